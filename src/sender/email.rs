//! E-mail delivery channel.
//!
//! [`EmailTokenSender`] composes the token message and routes it through
//! the [`Mailer`] seam; [`SmtpMailer`] is the production transport. Tests
//! and local setups plug in capture or log mailers instead.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::PoolConfig;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{Message, SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};
use tracing::warn;

use crate::directory::DirectoryIdentity;
use crate::sender::TokenSender;

const SUBJECT: &str = "Password Reset";
const DEFAULT_SMTP_PORT: u16 = 587;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Mail transport seam used by [`EmailTokenSender`].
pub trait Mailer: Send + Sync {
    /// Hand the composed message to the transport.
    ///
    /// # Errors
    ///
    /// Returns an error when the transport could not accept the message.
    fn send(&self, message: &Message) -> Result<()>;
}

/// SMTP relay settings for [`SmtpMailer`].
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    host: String,
    port: u16,
    username: String,
    password: SecretString,
    from: String,
    timeout: Duration,
}

impl SmtpSettings {
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: SecretString,
        from: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SMTP_PORT,
            username: username.into(),
            password,
            from: from.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// [`Mailer`] over an SMTP relay with required TLS and a bounded timeout.
pub struct SmtpMailer {
    transport: SmtpTransport,
}

impl SmtpMailer {
    /// Build the relay transport from the settings.
    ///
    /// # Errors
    ///
    /// Returns an error when the relay host or its TLS parameters are
    /// rejected.
    pub fn new(settings: &SmtpSettings) -> Result<Self> {
        let tls = TlsParameters::builder(settings.host.clone())
            .build()
            .context("failed to build the SMTP TLS parameters")?;

        let transport = SmtpTransport::relay(&settings.host)
            .context("failed to create the SMTP transport")?
            .credentials(Credentials::new(
                settings.username.clone(),
                settings.password.expose_secret().to_string(),
            ))
            .port(settings.port)
            .tls(Tls::Required(tls))
            .pool_config(PoolConfig::new().max_size(1))
            .timeout(Some(settings.timeout))
            .build();

        Ok(Self { transport })
    }
}

impl Mailer for SmtpMailer {
    fn send(&self, message: &Message) -> Result<()> {
        self.transport
            .send(message)
            .map(|_| ())
            .context("failed to send the token e-mail")
    }
}

/// Channel that mails the token to the identity's directory address.
pub struct EmailTokenSender {
    mailer: Arc<dyn Mailer>,
    from: Mailbox,
}

impl EmailTokenSender {
    #[must_use]
    pub fn new(mailer: Arc<dyn Mailer>, from: Mailbox) -> Self {
        Self { mailer, from }
    }

    /// Convenience constructor over an [`SmtpMailer`].
    ///
    /// # Errors
    ///
    /// Returns an error when the transport cannot be built or the
    /// from-address does not parse.
    pub fn smtp(settings: &SmtpSettings) -> Result<Self> {
        let from = settings
            .from
            .parse::<Mailbox>()
            .context("invalid from address")?;
        let mailer = SmtpMailer::new(settings)?;
        Ok(Self::new(Arc::new(mailer), from))
    }

    fn compose(&self, to: Mailbox, token: &str) -> Result<Message> {
        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(SUBJECT)
            .header(ContentType::TEXT_PLAIN)
            .body(format!("Your token is '{token}'"))
            .context("failed to build the token message")
    }
}

impl TokenSender for EmailTokenSender {
    fn is_eligible(&self, identity: &DirectoryIdentity) -> Result<(), String> {
        if identity.mail.is_empty() {
            warn!(
                principal = %identity.principal_name,
                "the user has no e-mail address"
            );
            return Err("Your user has no e-mail address.".to_string());
        }
        Ok(())
    }

    fn deliver(&self, identity: &DirectoryIdentity, token: &str) -> Result<()> {
        let to = identity
            .mail
            .parse::<Mailbox>()
            .with_context(|| format!("invalid recipient address for '{}'", identity.principal_name))?;
        let message = self.compose(to, token)?;
        self.mailer.send(&message)
    }

    fn success_message(&self) -> &str {
        "Check your e-mail."
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CaptureMailer {
        sent: Mutex<Vec<(Vec<String>, String)>>,
    }

    impl Mailer for CaptureMailer {
        fn send(&self, message: &Message) -> Result<()> {
            let recipients = message
                .envelope()
                .to()
                .iter()
                .map(ToString::to_string)
                .collect();
            let raw = String::from_utf8_lossy(&message.formatted()).into_owned();
            self.sent
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push((recipients, raw));
            Ok(())
        }
    }

    fn identity(mail: &str) -> DirectoryIdentity {
        DirectoryIdentity {
            distinguished_name: "CN=alice,DC=example,DC=com".to_string(),
            principal_name: "alice@example.com".to_string(),
            display_name: "Alice".to_string(),
            mail: mail.to_string(),
            telephone_number: String::new(),
        }
    }

    fn sender(mailer: Arc<CaptureMailer>) -> EmailTokenSender {
        let from = "Password Reset <no-reply@example.com>"
            .parse::<Mailbox>()
            .expect("valid mailbox");
        EmailTokenSender::new(mailer, from)
    }

    #[test]
    fn identity_without_mail_is_ineligible() {
        let sender = sender(Arc::new(CaptureMailer::default()));
        assert_eq!(
            sender.is_eligible(&identity("")),
            Err("Your user has no e-mail address.".to_string())
        );
    }

    #[test]
    fn identity_with_mail_is_eligible() {
        let sender = sender(Arc::new(CaptureMailer::default()));
        assert_eq!(sender.is_eligible(&identity("alice@example.com")), Ok(()));
    }

    #[test]
    fn delivery_mails_the_token_to_the_directory_address() {
        let mailer = Arc::new(CaptureMailer::default());
        let sender = sender(mailer.clone());

        sender
            .deliver(&identity("alice@example.com"), "t0k3n")
            .expect("delivery succeeds");

        let sent = mailer
            .sent
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let (recipients, raw) = &sent[0];
        assert_eq!(recipients, &vec!["alice@example.com".to_string()]);
        assert!(raw.contains("Subject: Password Reset"));
        assert!(raw.contains("Your token is 't0k3n'"));
    }

    #[test]
    fn delivery_fails_on_unparseable_address() {
        let sender = sender(Arc::new(CaptureMailer::default()));
        assert!(sender.deliver(&identity("not an address"), "t0k3n").is_err());
    }

    #[test]
    fn success_message_points_at_the_mailbox() {
        let sender = sender(Arc::new(CaptureMailer::default()));
        assert_eq!(sender.success_message(), "Check your e-mail.");
    }
}
