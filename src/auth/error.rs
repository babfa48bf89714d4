use thiserror::Error;

/// Failures of the authentication core.
///
/// The four credential failures are distinguishable here for logs and
/// tests; the session gate collapses them into one "unauthorized" answer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Signing secret missing or unusable. Fatal at startup.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Malformed credential")]
    MalformedCredential,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Credential expired")]
    Expired,

    #[error("Credential revoked")]
    Revoked,

    /// Revocation store unreachable or too slow; the request fails closed.
    #[error("Revocation store unavailable: {0}")]
    Unavailable(String),
}

impl AuthError {
    /// True for failures caused by the presented credential itself.
    pub fn is_unauthenticated(&self) -> bool {
        matches!(
            self,
            Self::MalformedCredential | Self::InvalidSignature | Self::Expired | Self::Revoked
        )
    }

    /// Short stable label for structured logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::MalformedCredential => "malformed",
            Self::InvalidSignature => "invalid_signature",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
            Self::Unavailable(_) => "unavailable",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_failures_are_unauthenticated() {
        assert!(AuthError::MalformedCredential.is_unauthenticated());
        assert!(AuthError::InvalidSignature.is_unauthenticated());
        assert!(AuthError::Expired.is_unauthenticated());
        assert!(AuthError::Revoked.is_unauthenticated());
    }

    #[test]
    fn infrastructure_failures_are_not_unauthenticated() {
        assert!(!AuthError::Unavailable("timeout".into()).is_unauthenticated());
        assert!(!AuthError::Configuration("empty".into()).is_unauthenticated());
    }
}
