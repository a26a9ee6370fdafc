use thiserror::Error;

/// Failure kinds surfaced to the presentation layer.
///
/// Directory and protocol detail never reaches the requester; it is logged
/// internally and collapsed into these coarse kinds. `ServiceUnavailable`
/// deliberately covers both an unknown username and an unreachable
/// directory so that callers cannot probe which usernames exist.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResetError {
    #[error("complete the human verification first")]
    VerificationRequired,
    #[error("the request could not be completed, try again later")]
    ServiceUnavailable,
    #[error("{0}")]
    SenderIneligible(String),
    #[error("the token could not be delivered, try again later")]
    DeliveryFailed,
    #[error("the token is not valid")]
    InvalidToken,
    #[error("the new password does not meet the policy requirements")]
    PolicyViolation,
    #[error("the passwords do not match")]
    PasswordMismatch,
    #[error("the request is out of sequence")]
    InvalidStage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_user_and_outage_share_one_message() {
        // Both lookup outcomes must render identically to the requester.
        assert_eq!(
            ResetError::ServiceUnavailable.to_string(),
            "the request could not be completed, try again later"
        );
    }

    #[test]
    fn ineligibility_reason_is_verbatim() {
        let err = ResetError::SenderIneligible("Your user has no e-mail address.".to_string());
        assert_eq!(err.to_string(), "Your user has no e-mail address.");
    }
}
