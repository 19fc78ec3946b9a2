//! Error types for key envelope, capability and KMS operations.
//!
//! One closed enum covers every failure the security core reports to its
//! caller. Variants never carry key material.

use thiserror::Error;

use crate::key::KeyType;

/// Convenience alias for results in this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors reported by the security core.
#[derive(Debug, Error)]
pub enum Error {
    /// The operation needs a key in the opposite encrypted/decrypted state,
    /// or the key is otherwise unusable for it.
    #[error("key state error: {0}")]
    KeyState(#[from] KeyStateError),

    /// A password, MAC or capability check failed, or the KMS declined.
    ///
    /// Deliberately carries no detail: "wrong password" and "no such account"
    /// must look the same to the caller.
    #[error("access denied")]
    AccessDenied,

    /// A password-reset confirmation string was malformed.
    #[error("invalid confirmation code")]
    InvalidConfirmationCode,

    /// A ciphertext envelope (message content or capability) was malformed.
    #[error("message corrupted: {reason}")]
    MessageCorrupted {
        /// What was wrong with the envelope
        reason: String,
    },

    /// The secret-management service failed during the named step.
    #[error("{step}: {source}")]
    ServiceFailure {
        /// Hierarchy step that issued the KMS call
        step: &'static str,
        /// Underlying KMS error
        #[source]
        source: KmsError,
    },
}

impl Error {
    /// Shorthand for [`Error::MessageCorrupted`].
    pub fn corrupted(reason: impl Into<String>) -> Self {
        Self::MessageCorrupted { reason: reason.into() }
    }

    /// Wrap a KMS error with the step that produced it.
    ///
    /// A KMS refusal to unwrap a key surfaces as [`Error::AccessDenied`], not
    /// as a service failure.
    pub fn kms(step: &'static str, source: KmsError) -> Self {
        match source {
            KmsError::AccessDenied => Self::AccessDenied,
            source => Self::ServiceFailure { step, source },
        }
    }

    /// Returns true if retrying the whole operation later may succeed.
    ///
    /// Only an unavailable KMS is transient. Everything else is a property of
    /// the inputs and fails identically on retry. The core itself never
    /// retries.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ServiceFailure { source: KmsError::Unavailable(_), .. })
    }
}

/// Ways a key can be in the wrong state for an operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyStateError {
    /// Tried to encrypt a key that is already encrypted
    #[error("key is already encrypted")]
    AlreadyEncrypted,

    /// Tried to decrypt a key that is already decrypted
    #[error("key is already decrypted")]
    AlreadyDecrypted,

    /// An input key (outer key, client key, message key) is still encrypted
    #[error("key must be decrypted")]
    MustBeDecrypted,

    /// Key type cannot be used for this operation
    #[error("incompatible key type: expected {expected}, got {actual}")]
    IncompatibleType {
        /// Key type the operation needs
        expected: KeyType,
        /// Key type that was given
        actual: KeyType,
    },

    /// Plaintext length does not match the key type
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected key length
        expected: usize,
        /// Actual key length
        actual: usize,
    },

    /// IV was never set, or has the wrong length
    #[error("invalid iv length: expected {expected}, got {actual}")]
    InvalidIv {
        /// Expected IV length
        expected: usize,
        /// Actual IV length
        actual: usize,
    },
}

/// Errors from the secret-management service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KmsError {
    /// The master credential cannot unwrap the key
    #[error("kms access denied")]
    AccessDenied,

    /// The service could not be reached or timed out
    #[error("kms unavailable: {0}")]
    Unavailable(String),

    /// The request itself was invalid (unknown context, bad key state)
    #[error("invalid kms request: {0}")]
    InvalidRequest(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kms_denial_maps_to_access_denied() {
        let err = Error::kms("key decryption", KmsError::AccessDenied);
        assert!(matches!(err, Error::AccessDenied));
    }

    #[test]
    fn kms_outage_keeps_step_context() {
        let err = Error::kms("rng", KmsError::Unavailable("timeout".to_string()));
        assert_eq!(err.to_string(), "rng: kms unavailable: timeout");
        assert!(err.is_transient());
    }

    #[test]
    fn key_state_errors_are_not_transient() {
        assert!(!Error::from(KeyStateError::AlreadyEncrypted).is_transient());
        assert!(!Error::AccessDenied.is_transient());
        assert!(!Error::corrupted("bad split").is_transient());
        assert!(
            !Error::kms("rng", KmsError::InvalidRequest("zero length".to_string())).is_transient()
        );
    }

    #[test]
    fn error_display() {
        let err = Error::from(KeyStateError::InvalidIv { expected: 24, actual: 0 });
        assert_eq!(err.to_string(), "key state error: invalid iv length: expected 24, got 0");
    }
}
