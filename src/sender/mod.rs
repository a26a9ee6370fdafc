//! Token delivery channels.
//!
//! A channel is a capability set, not a class hierarchy: eligibility check,
//! delivery, and the message shown after a successful request. Additional
//! channels (SMS, push) are additional implementations of the same trait.

pub mod email;

use anyhow::Result;
use tracing::info;

use crate::directory::DirectoryIdentity;

pub use email::{EmailTokenSender, Mailer, SmtpMailer, SmtpSettings};

/// Delivery capability over one out-of-band channel.
pub trait TokenSender: Send + Sync {
    /// Whether the identity can receive tokens over this channel.
    /// `Err` carries the user-facing reason, surfaced verbatim.
    fn is_eligible(&self, _identity: &DirectoryIdentity) -> Result<(), String> {
        Ok(())
    }

    /// Deliver the token or fail; the failure detail stays in the logs.
    ///
    /// # Errors
    ///
    /// Returns an error when the channel could not hand the token over.
    fn deliver(&self, identity: &DirectoryIdentity, token: &str) -> Result<()>;

    /// Shown to the user after a successful request.
    fn success_message(&self) -> &str;
}

/// Diagnostic channel that surfaces the token in the service log instead of
/// sending it anywhere. Every identity is eligible.
#[derive(Clone, Debug, Default)]
pub struct ConsoleTokenSender;

impl TokenSender for ConsoleTokenSender {
    fn deliver(&self, identity: &DirectoryIdentity, token: &str) -> Result<()> {
        info!(
            principal = %identity.principal_name,
            "generated token '{token}'"
        );
        Ok(())
    }

    fn success_message(&self) -> &str {
        "The token has been written to the service log."
    }
}
