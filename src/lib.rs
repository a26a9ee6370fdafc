//! # Reseti (Self-Service Directory Password Reset)
//!
//! `reseti` lets a directory-service user reset their own password through
//! a short-lived, single-use token exchanged over an out-of-band channel.
//! The crate is the core of the service: the token state machine and the
//! directory adapter it drives. Screens, the human-verification widget,
//! and process wiring live in the embedding application.
//!
//! ## Flow
//!
//! A session walks three stages. [`ResetWorkflow::request_token`] resolves
//! the username in the directory, checks the delivery channel's
//! eligibility, and sends a fresh token. [`ResetWorkflow::submit_token`]
//! proves the requester received it. [`ResetWorkflow::set_password`]
//! replaces the directory password and consumes the token, returning the
//! session to the initial stage.
//!
//! ## Enumeration & Replay Defenses
//!
//! - An unknown username and an unreachable directory answer with the same
//!   generic failure; the detail exists only in the logs.
//! - At most one live token exists per identity: requesting again silently
//!   invalidates the predecessor.
//! - Raw token values are never stored; the issuer keeps SHA-256 hashes
//!   and consumes a token exactly once, as the atomic side effect of a
//!   successful password change.
//!
//! ## Composition
//!
//! The embedding application constructs an [`LdapDirectory`] (or any
//! [`Directory`] implementation), one shared [`TokenIssuer`], and a
//! [`TokenSender`] channel, then hands them to one [`ResetWorkflow`] per
//! session. The presentation layer renders whatever
//! [`ResetWorkflow::stage`] reports; the core never mutates UI state.

pub mod directory;
pub mod error;
pub mod reset;
pub mod sender;
pub mod token;

pub use directory::{Directory, DirectoryError, DirectoryIdentity, LdapDirectory, LdapSettings};
pub use error::ResetError;
pub use reset::{ResetWorkflow, Stage};
pub use sender::{
    ConsoleTokenSender, EmailTokenSender, Mailer, SmtpMailer, SmtpSettings, TokenSender,
};
pub use token::{IssuedToken, TokenIssuer, spawn_sweeper};
