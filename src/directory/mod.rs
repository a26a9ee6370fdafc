//! Directory adapter.
//!
//! Wraps the LDAP protocol behind the [`Directory`] trait so the reset
//! workflow can be driven against a real directory ([`LdapDirectory`]) or a
//! test double. Lookups resolve a bare username plus the configured domain
//! qualifier to a single [`DirectoryIdentity`]; password changes replace the
//! `unicodePwd` attribute with the quoted UTF-16LE framing the directory
//! requires.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, Mod, Scope, SearchEntry, ldap_escape};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::{debug, error, warn};
use url::Url;

/// Attributes fetched for every user lookup.
const USER_ATTRIBUTES: [&str; 5] = [
    "distinguishedName",
    "userPrincipalName",
    "name",
    "mail",
    "telephoneNumber",
];

/// Directory result code for a password the policy refuses (unwillingToPerform).
const RC_UNWILLING_TO_PERFORM: u32 = 53;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Read-only snapshot of a directory account, fetched fresh per lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryIdentity {
    pub distinguished_name: String,
    pub principal_name: String,
    pub display_name: String,
    /// May be empty; channel eligibility checks handle the gap.
    pub mail: String,
    /// May be empty.
    pub telephone_number: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// Transport, auth, or protocol failure. The detail stays in the logs.
    #[error("directory unavailable: {0}")]
    Unavailable(String),
    /// The directory refused the new password (insufficient complexity).
    #[error("the password does not meet the directory policy")]
    PolicyViolation,
}

/// Lookup and password-modification operations against a directory service.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Resolve a bare username to at most one directory identity.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::Unavailable`] on protocol or auth failure.
    async fn lookup(&mut self, username: &str)
        -> Result<Option<DirectoryIdentity>, DirectoryError>;

    /// Replace the identity's password attribute.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::PolicyViolation`] when the directory refuses
    /// the password, [`DirectoryError::Unavailable`] on transport failure.
    async fn change_password(
        &mut self,
        identity: &DirectoryIdentity,
        new_password: &SecretString,
    ) -> Result<(), DirectoryError>;
}

/// Connection settings for [`LdapDirectory::connect`].
#[derive(Debug, Clone)]
pub struct LdapSettings {
    url: Url,
    domain: String,
    service_username: String,
    service_password: SecretString,
    timeout: Duration,
}

impl LdapSettings {
    #[must_use]
    pub fn new(
        url: Url,
        domain: impl Into<String>,
        service_username: impl Into<String>,
        service_password: SecretString,
    ) -> Self {
        Self {
            url,
            domain: domain.into(),
            service_username: service_username.into(),
            service_password,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Bound applied to every directory operation, bind included.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// [`Directory`] implementation over a live LDAP connection.
///
/// The connection is acquired and bound once in [`connect`](Self::connect)
/// and released in [`close`](Self::close); release failures are logged and
/// swallowed so teardown paths never re-raise.
pub struct LdapDirectory {
    ldap: Ldap,
    domain: String,
    timeout: Duration,
}

impl LdapDirectory {
    /// Open a connection and bind with the service account
    /// (`<service_username>@<domain>`, simple bind).
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::Unavailable`] when the connection or the
    /// bind fails; the detail is logged, not surfaced.
    pub async fn connect(settings: &LdapSettings) -> Result<Self, DirectoryError> {
        let (conn, mut ldap) = LdapConnAsync::new(settings.url.as_str())
            .await
            .map_err(|err| {
                error!("failed to open the directory connection: {err}");
                DirectoryError::Unavailable(err.to_string())
            })?;
        ldap3::drive!(conn);

        let principal = format!("{}@{}", settings.service_username, settings.domain);
        ldap.with_timeout(settings.timeout)
            .simple_bind(&principal, settings.service_password.expose_secret())
            .await
            .and_then(ldap3::LdapResult::success)
            .map_err(|err| {
                error!("failed to bind the service account: {err}");
                DirectoryError::Unavailable(err.to_string())
            })?;

        Ok(Self {
            ldap,
            domain: settings.domain.clone(),
            timeout: settings.timeout,
        })
    }

    /// Unbind and release the connection. Never fails; release errors are
    /// logged and dropped.
    pub async fn close(mut self) {
        debug!("closing the directory connection");
        if let Err(err) = self.ldap.unbind().await {
            error!("error occurred when closing the directory connection: {err}");
        }
    }
}

#[async_trait]
impl Directory for LdapDirectory {
    async fn lookup(
        &mut self,
        username: &str,
    ) -> Result<Option<DirectoryIdentity>, DirectoryError> {
        debug!("finding user with username '{username}'");

        let filter = search_filter(username, &self.domain);
        let base = search_base(&self.domain);
        let (entries, _result) = self
            .ldap
            .with_timeout(self.timeout)
            .search(&base, Scope::Subtree, &filter, USER_ATTRIBUTES.to_vec())
            .await
            .and_then(ldap3::SearchResult::success)
            .map_err(|err| {
                warn!("exception occurred when looking up user: {err}");
                DirectoryError::Unavailable(err.to_string())
            })?;

        if entries.len() > 1 {
            // First match wins; the filter is expected to be unique per principal.
            debug!("multiple directory entries matched '{username}', using the first");
        }

        let Some(entry) = entries.into_iter().next() else {
            debug!("no user was found");
            return Ok(None);
        };

        let entry = SearchEntry::construct(entry);
        let identity = DirectoryIdentity {
            distinguished_name: attribute(&entry, "distinguishedName"),
            principal_name: attribute(&entry, "userPrincipalName"),
            display_name: attribute(&entry, "name"),
            mail: attribute(&entry, "mail"),
            telephone_number: attribute(&entry, "telephoneNumber"),
        };
        debug!("found user '{}'", identity.display_name);
        Ok(Some(identity))
    }

    async fn change_password(
        &mut self,
        identity: &DirectoryIdentity,
        new_password: &SecretString,
    ) -> Result<(), DirectoryError> {
        debug!(
            "setting password for user '{}'",
            identity.distinguished_name
        );

        let encoded = encode_unicode_pwd(new_password.expose_secret());
        let mods = vec![Mod::Replace(
            b"unicodePwd".to_vec(),
            HashSet::from([encoded]),
        )];

        let result = self
            .ldap
            .with_timeout(self.timeout)
            .modify(&identity.distinguished_name, mods)
            .await
            .map_err(|err| {
                error!("exception occurred when setting password: {err}");
                DirectoryError::Unavailable(err.to_string())
            })?;

        match result.rc {
            0 => Ok(()),
            RC_UNWILLING_TO_PERFORM => {
                debug!("password did not meet the requirements");
                Err(DirectoryError::PolicyViolation)
            }
            rc => {
                error!(
                    "directory rejected the password modification: rc={rc} {}",
                    result.text
                );
                Err(DirectoryError::Unavailable(format!(
                    "result code {rc}: {}",
                    result.text
                )))
            }
        }
    }
}

/// Subtree filter matching exactly one principal in the domain.
fn search_filter(username: &str, domain: &str) -> String {
    format!(
        "(&(userPrincipalName={}@{})(objectClass=user))",
        ldap_escape(username),
        ldap_escape(domain)
    )
}

/// Decompose a DNS domain into its DC-based search base.
fn search_base(domain: &str) -> String {
    domain
        .split('.')
        .filter(|part| !part.is_empty())
        .map(|part| format!("DC={part}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// First value of the attribute, or empty when the directory omits it.
fn attribute(entry: &SearchEntry, name: &str) -> String {
    entry
        .attrs
        .get(name)
        .and_then(|values| values.first())
        .cloned()
        .unwrap_or_default()
}

/// Frame a plaintext password the way the directory requires: wrap it in
/// literal double quotes, then encode the quoted string as UTF-16LE bytes.
fn encode_unicode_pwd(password: &str) -> Vec<u8> {
    let quoted = format!("\"{password}\"");
    quoted.encode_utf16().flat_map(u16::to_le_bytes).collect()
}
