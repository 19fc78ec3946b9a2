//! Secret-management service contract.
//!
//! The KMS owns the master credential. Everything the core persists is
//! ultimately wrapped by a key only the KMS can unwrap, and every random byte
//! the hierarchies consume comes from it.
//!
//! Implementations are external (a cloud KMS, an HSM) or the development
//! `LocalKms` in `parlor-core`. The core never retries: a failed call
//! surfaces to the caller as `Error::ServiceFailure` with the step that made
//! it.

use crate::{
    error::KmsError,
    key::{KeyType, ManagedKey},
};

/// Secret-management service.
pub trait Kms: Send + Sync {
    /// `len` cryptographically random bytes.
    fn generate_nonce(&self, len: usize) -> Result<Vec<u8>, KmsError>;

    /// Fresh random key of `key_type`, encrypted under the master key and
    /// bound to the context `namespace=value`.
    ///
    /// The context is authenticated: the returned key only unwraps while it
    /// still carries the same context.
    fn generate_encrypted_key(
        &self,
        key_type: KeyType,
        namespace: &str,
        value: &str,
    ) -> Result<ManagedKey, KmsError>;

    /// Decrypted copy of a key produced by
    /// [`Kms::generate_encrypted_key`]. The input is left untouched.
    ///
    /// Returns [`KmsError::AccessDenied`] if the master credential cannot
    /// unwrap it.
    fn decrypt_key(&self, key: &ManagedKey) -> Result<ManagedKey, KmsError>;
}

impl<K: Kms + ?Sized> Kms for &K {
    fn generate_nonce(&self, len: usize) -> Result<Vec<u8>, KmsError> {
        (**self).generate_nonce(len)
    }

    fn generate_encrypted_key(
        &self,
        key_type: KeyType,
        namespace: &str,
        value: &str,
    ) -> Result<ManagedKey, KmsError> {
        (**self).generate_encrypted_key(key_type, namespace, value)
    }

    fn decrypt_key(&self, key: &ManagedKey) -> Result<ManagedKey, KmsError> {
        (**self).decrypt_key(key)
    }
}
