//! Per-session password-reset state machine.
//!
//! One [`ResetWorkflow`] exists per session and is mutated only by that
//! session's calls; the token store behind it is the only shared state.
//! The presentation layer drives the three operations and renders whatever
//! [`stage`](ResetWorkflow::stage) reports; the core never touches UI
//! state.

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tracing::{debug, error, warn};

use crate::directory::{Directory, DirectoryError, DirectoryIdentity};
use crate::error::ResetError;
use crate::sender::TokenSender;
use crate::token::TokenIssuer;

/// Where a session currently is in the reset sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    RequestToken,
    UseToken,
    SetPassword,
}

/// Session state machine: request a token, prove its receipt, set the
/// password. Completion and `back` both return to [`Stage::RequestToken`]
/// with the session state cleared.
pub struct ResetWorkflow<D> {
    directory: D,
    issuer: Arc<TokenIssuer>,
    sender: Arc<dyn TokenSender>,
    token_ttl: Duration,
    stage: Stage,
    username: Option<String>,
    identity: Option<DirectoryIdentity>,
    token_value: Option<String>,
}

impl<D: Directory> ResetWorkflow<D> {
    #[must_use]
    pub fn new(
        directory: D,
        issuer: Arc<TokenIssuer>,
        sender: Arc<dyn TokenSender>,
        token_ttl: Duration,
    ) -> Self {
        Self {
            directory,
            issuer,
            sender,
            token_ttl,
            stage: Stage::RequestToken,
            username: None,
            identity: None,
            token_value: None,
        }
    }

    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// The identity resolved for this session, once a token request
    /// succeeded. Presentation layers use it to greet the user.
    #[must_use]
    pub fn identity(&self) -> Option<&DirectoryIdentity> {
        self.identity.as_ref()
    }

    /// The username entered for this session, once a token request
    /// succeeded.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Resolve the username, check channel eligibility, and deliver a fresh
    /// token. `Ok` carries the channel's success message.
    ///
    /// An unknown username and an unreachable directory produce the same
    /// [`ResetError::ServiceUnavailable`] answer so requesters cannot probe
    /// which accounts exist; the distinction lives in the logs only.
    ///
    /// # Errors
    ///
    /// See [`ResetError`]; every failure leaves the session in
    /// [`Stage::RequestToken`].
    pub async fn request_token(
        &mut self,
        username: &str,
        human_verified: bool,
    ) -> Result<String, ResetError> {
        if self.stage != Stage::RequestToken {
            return Err(ResetError::InvalidStage);
        }
        if !human_verified {
            debug!("rejecting token request without human verification");
            return Err(ResetError::VerificationRequired);
        }

        let identity = match self.directory.lookup(username).await {
            Ok(Some(identity)) => identity,
            Ok(None) => {
                debug!("token requested for unknown username '{username}'");
                return Err(ResetError::ServiceUnavailable);
            }
            Err(err) => {
                error!("directory lookup failed: {err}");
                return Err(ResetError::ServiceUnavailable);
            }
        };

        if let Err(reason) = self.sender.is_eligible(&identity) {
            return Err(ResetError::SenderIneligible(reason));
        }

        let token = self.issuer.issue(&identity, self.token_ttl);
        if let Err(err) = self.sender.deliver(&identity, &token.value) {
            // The freshly issued token is left to expire on its own.
            error!("token delivery failed: {err}");
            return Err(ResetError::DeliveryFailed);
        }

        self.username = Some(username.to_string());
        self.identity = Some(identity);
        self.stage = Stage::UseToken;
        Ok(self.sender.success_message().to_string())
    }

    /// Validate a submitted token value and move on to the password stage.
    ///
    /// Absent, expired, consumed, and wrong-identity values are all
    /// answered with the same [`ResetError::InvalidToken`], so a value
    /// guessed from another session gives nothing away.
    ///
    /// # Errors
    ///
    /// [`ResetError::InvalidToken`] leaves the session in
    /// [`Stage::UseToken`].
    pub fn submit_token(&mut self, value: &str) -> Result<(), ResetError> {
        if self.stage != Stage::UseToken {
            return Err(ResetError::InvalidStage);
        }
        let Some(session_identity) = &self.identity else {
            return Err(ResetError::InvalidStage);
        };

        let Some(authorized) = self.issuer.validate(value) else {
            return Err(ResetError::InvalidToken);
        };
        if authorized != *session_identity {
            warn!(
                principal = %authorized.principal_name,
                "submitted token does not belong to this session"
            );
            return Err(ResetError::InvalidToken);
        }

        self.token_value = Some(value.to_string());
        self.stage = Stage::SetPassword;
        Ok(())
    }

    /// Change the password tied to the session's token and finish the
    /// reset. The token is consumed only after the directory accepted the
    /// change, so a policy rejection leaves it usable for another attempt.
    ///
    /// # Errors
    ///
    /// [`ResetError::PasswordMismatch`], [`ResetError::PolicyViolation`],
    /// and [`ResetError::ServiceUnavailable`] keep the session in
    /// [`Stage::SetPassword`]; a token that died in the meantime returns
    /// [`ResetError::InvalidToken`] and sends the session back to
    /// [`Stage::UseToken`].
    pub async fn set_password(
        &mut self,
        new_password: &str,
        repeat: &str,
    ) -> Result<(), ResetError> {
        if self.stage != Stage::SetPassword {
            return Err(ResetError::InvalidStage);
        }
        if new_password != repeat {
            return Err(ResetError::PasswordMismatch);
        }

        let (identity, token_value) = match (&self.identity, &self.token_value) {
            (Some(identity), Some(token)) => (identity.clone(), token.clone()),
            _ => return Err(ResetError::InvalidStage),
        };

        // The token may have expired or been superseded while the user was
        // typing; recheck before touching the directory.
        if self.issuer.validate(&token_value).is_none() {
            self.token_value = None;
            self.stage = Stage::UseToken;
            return Err(ResetError::InvalidToken);
        }

        let new_password = SecretString::from(new_password.to_string());
        match self.directory.change_password(&identity, &new_password).await {
            Ok(()) => {
                if !self.issuer.consume(&token_value) {
                    warn!(
                        principal = %identity.principal_name,
                        "reset token vanished between validation and consumption"
                    );
                }
                self.clear();
                Ok(())
            }
            Err(DirectoryError::PolicyViolation) => Err(ResetError::PolicyViolation),
            Err(err @ DirectoryError::Unavailable(_)) => {
                error!("password change failed: {err}");
                Err(ResetError::ServiceUnavailable)
            }
        }
    }

    /// Abandon the session and return to the initial stage.
    pub fn back(&mut self) {
        self.clear();
    }

    /// Drop all session state and return to [`Stage::RequestToken`].
    pub fn clear(&mut self) {
        self.username = None;
        self.identity = None;
        self.token_value = None;
        self.stage = Stage::RequestToken;
    }
}
