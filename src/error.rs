//! Error taxonomy shared by the services.
//!
//! Every operation returns a tagged value so callers can tell a denial from a
//! system failure. `AuthenticationDenied` renders the same text for every
//! reason; the reason itself is only meant for the audit trail.

use crate::{
    crypto::{ConfigurationError, DecryptionError, EncryptionError},
    model::DenialReason,
    store::StoreError,
    validators::ValidationError,
};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("authentication failed")]
    AuthenticationDenied(DenialReason),
    #[error("forbidden")]
    Forbidden,
    #[error(transparent)]
    Decryption(#[from] DecryptionError),
    #[error(transparent)]
    Encryption(#[from] EncryptionError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Error {
    #[must_use]
    pub fn denial_reason(&self) -> Option<DenialReason> {
        match self {
            Self::AuthenticationDenied(reason) => Some(*reason),
            _ => None,
        }
    }

    /// True for outcomes the caller caused (bad input, bad credentials, missing rights).
    #[must_use]
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::AuthenticationDenied(_)
                | Self::Forbidden
                | Self::Conflict(_)
                | Self::NotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denial_text_does_not_leak_reason() {
        let unknown = Error::AuthenticationDenied(DenialReason::UnknownIdentifier).to_string();
        let bad_password = Error::AuthenticationDenied(DenialReason::BadPassword).to_string();
        assert_eq!(unknown, bad_password);
        assert!(!unknown.contains("unknown"));
    }

    #[test]
    fn reason_is_available_to_the_audit_path() {
        let err = Error::AuthenticationDenied(DenialReason::Locked);
        assert_eq!(err.denial_reason(), Some(DenialReason::Locked));
        assert!(err.is_denial());
        assert!(!Error::Store(StoreError::Timeout).is_denial());
        assert_eq!(Error::Forbidden.denial_reason(), None);
        assert!(Error::NotFound("account").is_denial());
        assert_eq!(Error::NotFound("account").to_string(), "account not found");
    }
}
