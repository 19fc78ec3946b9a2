//! Local master-key KMS.
//!
//! [`LocalKms`] keeps its master key in process memory and draws randomness
//! from the [`Environment`]. It exists for development and tests: a
//! production deployment plugs an external service into the
//! [`Kms`](parlor_crypto::Kms) trait instead.

use parlor_crypto::{
    Error, IV_SIZE, KEY_SIZE, KeyType, Kms, KmsError, ManagedKey, Result as CryptoResult,
};
use zeroize::Zeroizing;

use crate::env::Environment;

/// KMS whose master key lives in memory.
#[derive(Clone)]
pub struct LocalKms<E: Environment> {
    env: E,
    master: ManagedKey,
}

impl<E: Environment> LocalKms<E> {
    /// New KMS with a fresh random master key.
    pub fn new(env: E) -> Self {
        let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
        env.random_bytes(bytes.as_mut_slice());

        let Ok(master) = ManagedKey::from_plaintext(KeyType::XChaCha20Poly1305, bytes.as_slice())
        else {
            unreachable!("master key is exactly KEY_SIZE bytes");
        };
        Self { env, master }
    }

    /// Rebuild a KMS from a previously exported credential.
    ///
    /// Returns [`KmsError::InvalidRequest`] unless the credential is a
    /// decrypted symmetric key.
    pub fn from_credential(env: E, credential: &ManagedKey) -> Result<Self, KmsError> {
        if credential.is_encrypted() || !credential.key_type().is_symmetric() {
            return Err(KmsError::InvalidRequest(
                "credential must be a decrypted symmetric key".to_string(),
            ));
        }
        Ok(Self { env, master: credential.clone() })
    }

    /// The master key, decrypted. Whoever holds it can unwrap every key this
    /// KMS issued.
    pub fn credential(&self) -> ManagedKey {
        self.master.clone()
    }
}

impl<E: Environment> Kms for LocalKms<E> {
    fn generate_nonce(&self, len: usize) -> Result<Vec<u8>, KmsError> {
        let mut nonce = vec![0u8; len];
        self.env.random_bytes(&mut nonce);
        Ok(nonce)
    }

    fn generate_encrypted_key(
        &self,
        key_type: KeyType,
        namespace: &str,
        value: &str,
    ) -> Result<ManagedKey, KmsError> {
        let mut bytes = Zeroizing::new(vec![0u8; key_type.key_size()]);
        self.env.random_bytes(&mut bytes);
        let mut iv = [0u8; IV_SIZE];
        self.env.random_bytes(&mut iv);

        ManagedKey::from_plaintext(key_type, &bytes)
            .map_err(Error::from)
            .and_then(|key| key.with_iv(&iv).with_context(namespace, value).encrypt(&self.master))
            .map_err(|e| KmsError::InvalidRequest(e.to_string()))
    }

    fn decrypt_key(&self, key: &ManagedKey) -> Result<ManagedKey, KmsError> {
        match key.decrypt(&self.master) {
            Ok(key) => Ok(key),
            Err(Error::AccessDenied) => Err(KmsError::AccessDenied),
            Err(e) => Err(KmsError::InvalidRequest(e.to_string())),
        }
    }
}

/// Attach the hierarchy step to a KMS result, logging service failures.
pub(crate) fn step<T>(step: &'static str, result: Result<T, KmsError>) -> CryptoResult<T> {
    result.map_err(|e| {
        if !matches!(e, KmsError::AccessDenied) {
            tracing::warn!(step, error = %e, "kms call failed");
        }
        Error::kms(step, e)
    })
}
