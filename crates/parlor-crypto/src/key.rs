//! Managed keys: key material that is either decrypted or wrapped.
//!
//! A [`ManagedKey`] is in exactly one of two states. Decrypted keys hold
//! plaintext, which is zeroized on drop and never serialized. Encrypted keys
//! hold the ciphertext produced by wrapping the plaintext under another,
//! decrypted, symmetric key.
//!
//! State transitions never mutate: [`ManagedKey::encrypt`] and
//! [`ManagedKey::decrypt`] return a new key and leave the receiver as it was.
//! Deriving several wrapped copies from one base key is just calling
//! `encrypt` more than once.
//!
//! # Wrapping
//!
//! ```text
//! outer key (decrypted, XChaCha20-Poly1305)
//!        │
//!        ▼ nonce = iv, aad = key type || context
//! XChaCha20-Poly1305(plaintext) → ciphertext || tag
//! ```
//!
//! The IV must be set by the caller before encrypting, typically derived from
//! a hierarchy nonce with [`iv_from_nonce`].

use std::fmt;

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};
use serde::{Deserialize, Deserializer, Serialize, Serializer, ser::Error as _};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::error::{Error, KeyStateError, Result};

/// Size of every key this crate manages (32 bytes)
pub const KEY_SIZE: usize = 32;

/// Size of the IV used when wrapping a key (24-byte `XChaCha20` nonce)
pub const IV_SIZE: usize = 24;

/// Build an IV from a nonce: the nonce is copied into a zeroed IV-sized
/// buffer, truncated if longer.
pub fn iv_from_nonce(nonce: &[u8]) -> Vec<u8> {
    let mut iv = vec![0u8; IV_SIZE];
    let len = nonce.len().min(IV_SIZE);
    iv[..len].copy_from_slice(&nonce[..len]);
    iv
}

/// Kind of key held by a [`ManagedKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    /// 256-bit symmetric key for XChaCha20-Poly1305
    #[serde(rename = "xchacha20poly1305")]
    XChaCha20Poly1305,
    /// X25519 private scalar
    X25519,
}

impl KeyType {
    /// Length of the key material in bytes.
    pub fn key_size(self) -> usize {
        match self {
            Self::XChaCha20Poly1305 | Self::X25519 => KEY_SIZE,
        }
    }

    /// Whether keys of this type can wrap other keys.
    pub fn is_symmetric(self) -> bool {
        matches!(self, Self::XChaCha20Poly1305)
    }

    /// Stable label, also bound into wrapped ciphertexts.
    pub fn label(self) -> &'static str {
        match self {
            Self::XChaCha20Poly1305 => "xchacha20poly1305",
            Self::X25519 => "x25519",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Context a KMS-generated key is bound to, e.g. `room=lobby`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyContext {
    /// Context namespace (`"nonce"`, `"room"`)
    pub namespace: String,
    /// Context value within the namespace
    pub value: String,
}

#[derive(Clone)]
enum Material {
    Decrypted(Zeroizing<Vec<u8>>),
    Encrypted(Vec<u8>),
}

/// A key that is either decrypted or wrapped under another key.
#[derive(Clone)]
pub struct ManagedKey {
    key_type: KeyType,
    iv: Vec<u8>,
    context: Option<KeyContext>,
    material: Material,
}

impl ManagedKey {
    /// Decrypted key from raw key material.
    pub fn from_plaintext(key_type: KeyType, plaintext: &[u8]) -> Result<Self, KeyStateError> {
        if plaintext.len() != key_type.key_size() {
            return Err(KeyStateError::InvalidLength {
                expected: key_type.key_size(),
                actual: plaintext.len(),
            });
        }

        Ok(Self {
            key_type,
            iv: Vec::new(),
            context: None,
            material: Material::Decrypted(Zeroizing::new(plaintext.to_vec())),
        })
    }

    /// Encrypted key from stored parts.
    pub fn from_ciphertext(
        key_type: KeyType,
        iv: Vec<u8>,
        ciphertext: Vec<u8>,
        context: Option<KeyContext>,
    ) -> Self {
        Self { key_type, iv, context, material: Material::Encrypted(ciphertext) }
    }

    /// Same key with the given IV. Only meaningful before encrypting: an
    /// encrypted key with a replaced IV no longer decrypts.
    #[must_use]
    pub fn with_iv(mut self, iv: &[u8]) -> Self {
        self.iv = iv.to_vec();
        self
    }

    /// Same key bound to the given context.
    #[must_use]
    pub fn with_context(mut self, namespace: impl Into<String>, value: impl Into<String>) -> Self {
        self.context = Some(KeyContext { namespace: namespace.into(), value: value.into() });
        self
    }

    /// Kind of key material.
    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// IV used to wrap this key. Empty if never set.
    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    /// Context this key is bound to, if any.
    pub fn context(&self) -> Option<&KeyContext> {
        self.context.as_ref()
    }

    /// True if only ciphertext is available.
    pub fn is_encrypted(&self) -> bool {
        matches!(self.material, Material::Encrypted(_))
    }

    /// Plaintext key material.
    pub fn plaintext(&self) -> Result<&[u8], KeyStateError> {
        match &self.material {
            Material::Decrypted(plaintext) => Ok(plaintext.as_slice()),
            Material::Encrypted(_) => Err(KeyStateError::MustBeDecrypted),
        }
    }

    /// Wrapped key material (ciphertext including the Poly1305 tag).
    pub fn ciphertext(&self) -> Result<&[u8], KeyStateError> {
        match &self.material {
            Material::Encrypted(ciphertext) => Ok(ciphertext.as_slice()),
            Material::Decrypted(_) => Err(KeyStateError::AlreadyDecrypted),
        }
    }

    /// Wrap this key under `outer`, returning the encrypted copy.
    ///
    /// # Errors
    ///
    /// - `KeyState(AlreadyEncrypted)` if this key is already encrypted
    /// - `KeyState(MustBeDecrypted)` if `outer` is encrypted
    /// - `KeyState(IncompatibleType)` if `outer` is not a symmetric key
    /// - `KeyState(InvalidIv)` if no valid IV was set
    pub fn encrypt(&self, outer: &ManagedKey) -> Result<ManagedKey> {
        let Material::Decrypted(plaintext) = &self.material else {
            return Err(KeyStateError::AlreadyEncrypted.into());
        };
        let cipher = outer.cipher()?;
        let nonce = self.nonce()?;
        let aad = self.associated_data();

        let Ok(ciphertext) = cipher.encrypt(nonce, Payload { msg: plaintext.as_slice(), aad: &aad })
        else {
            unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
        };

        Ok(Self {
            key_type: self.key_type,
            iv: self.iv.clone(),
            context: self.context.clone(),
            material: Material::Encrypted(ciphertext),
        })
    }

    /// Unwrap this key with `outer`, returning the decrypted copy.
    ///
    /// # Errors
    ///
    /// - `KeyState(AlreadyDecrypted)` if this key is already decrypted
    /// - `KeyState(MustBeDecrypted)` if `outer` is encrypted
    /// - `AccessDenied` if `outer` is the wrong key or the ciphertext, IV or
    ///   context was tampered with
    pub fn decrypt(&self, outer: &ManagedKey) -> Result<ManagedKey> {
        let Material::Encrypted(ciphertext) = &self.material else {
            return Err(KeyStateError::AlreadyDecrypted.into());
        };
        let cipher = outer.cipher()?;
        let nonce = self.nonce()?;
        let aad = self.associated_data();

        let plaintext = cipher
            .decrypt(nonce, Payload { msg: ciphertext, aad: &aad })
            .map(Zeroizing::new)
            .map_err(|_| Error::AccessDenied)?;

        if plaintext.len() != self.key_type.key_size() {
            return Err(KeyStateError::InvalidLength {
                expected: self.key_type.key_size(),
                actual: plaintext.len(),
            }
            .into());
        }

        Ok(Self {
            key_type: self.key_type,
            iv: self.iv.clone(),
            context: self.context.clone(),
            material: Material::Decrypted(plaintext),
        })
    }

    /// AEAD instance keyed by this key. Requires a decrypted symmetric key.
    pub(crate) fn cipher(&self) -> Result<XChaCha20Poly1305, KeyStateError> {
        if !self.key_type.is_symmetric() {
            return Err(KeyStateError::IncompatibleType {
                expected: KeyType::XChaCha20Poly1305,
                actual: self.key_type,
            });
        }
        let key = self.plaintext()?;

        XChaCha20Poly1305::new_from_slice(key)
            .map_err(|_| KeyStateError::InvalidLength { expected: KEY_SIZE, actual: key.len() })
    }

    fn nonce(&self) -> Result<&XNonce, KeyStateError> {
        if self.iv.len() != IV_SIZE {
            return Err(KeyStateError::InvalidIv { expected: IV_SIZE, actual: self.iv.len() });
        }
        Ok(XNonce::from_slice(&self.iv))
    }

    /// Associated data: `label || 0x00 || namespace || '=' || value`
    fn associated_data(&self) -> Vec<u8> {
        let mut aad = self.key_type.label().as_bytes().to_vec();
        if let Some(context) = &self.context {
            aad.push(0);
            aad.extend_from_slice(context.namespace.as_bytes());
            aad.push(b'=');
            aad.extend_from_slice(context.value.as_bytes());
        }
        aad
    }
}

impl fmt::Debug for ManagedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedKey")
            .field("key_type", &self.key_type)
            .field("encrypted", &self.is_encrypted())
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

/// Persisted form of an encrypted key.
#[derive(Serialize, Deserialize)]
struct StoredKey {
    key_type: KeyType,
    #[serde(with = "crate::encoding::base64")]
    iv: Vec<u8>,
    #[serde(with = "crate::encoding::base64")]
    ciphertext: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    context: Option<KeyContext>,
}

impl Serialize for ManagedKey {
    /// Fails for decrypted keys: plaintext is never written out.
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let Material::Encrypted(ciphertext) = &self.material else {
            return Err(S::Error::custom("refusing to serialize a decrypted key"));
        };

        StoredKey {
            key_type: self.key_type,
            iv: self.iv.clone(),
            ciphertext: ciphertext.clone(),
            context: self.context.clone(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ManagedKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let stored = StoredKey::deserialize(deserializer)?;
        Ok(Self::from_ciphertext(stored.key_type, stored.iv, stored.ciphertext, stored.context))
    }
}

/// Asymmetric key pair algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPairType {
    /// Curve25519 Diffie-Hellman
    X25519,
}

impl KeyPairType {
    /// Bytes of randomness needed to generate a private key.
    pub fn private_key_size(self) -> usize {
        match self {
            Self::X25519 => KeyType::X25519.key_size(),
        }
    }
}

/// Key pair whose public half is always available and whose private half is
/// a [`ManagedKey`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedKeyPair {
    key_pair_type: KeyPairType,
    #[serde(with = "crate::encoding::base64")]
    public_key: Vec<u8>,
    private_key: ManagedKey,
}

impl ManagedKeyPair {
    /// X25519 key pair from caller-provided secret bytes.
    ///
    /// `random` must hold exactly [`KeyPairType::private_key_size`] bytes.
    pub fn from_secret(random: &[u8]) -> Result<Self, KeyStateError> {
        let bytes: [u8; KEY_SIZE] = random.try_into().map_err(|_| {
            KeyStateError::InvalidLength { expected: KEY_SIZE, actual: random.len() }
        })?;

        let secret = StaticSecret::from(bytes);
        let public_key = PublicKey::from(&secret);
        let private_key = ManagedKey::from_plaintext(KeyType::X25519, secret.as_bytes())?;

        Ok(Self {
            key_pair_type: KeyPairType::X25519,
            public_key: public_key.as_bytes().to_vec(),
            private_key,
        })
    }

    /// Key pair algorithm.
    pub fn key_pair_type(&self) -> KeyPairType {
        self.key_pair_type
    }

    /// Public key bytes.
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Private half.
    pub fn private_key(&self) -> &ManagedKey {
        &self.private_key
    }

    /// IV used to wrap the private half.
    pub fn iv(&self) -> &[u8] {
        self.private_key.iv()
    }

    /// True if the private half is wrapped.
    pub fn is_encrypted(&self) -> bool {
        self.private_key.is_encrypted()
    }

    /// Same key pair with the given IV for wrapping the private half.
    #[must_use]
    pub fn with_iv(self, iv: &[u8]) -> Self {
        Self { private_key: self.private_key.with_iv(iv), ..self }
    }

    /// Wrap the private half under `kek`.
    pub fn encrypt(&self, kek: &ManagedKey) -> Result<Self> {
        Ok(Self { private_key: self.private_key.encrypt(kek)?, ..self.clone() })
    }

    /// Unwrap the private half with `kek`.
    pub fn decrypt(&self, kek: &ManagedKey) -> Result<Self> {
        Ok(Self { private_key: self.private_key.decrypt(kek)?, ..self.clone() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symmetric_key(fill: u8) -> ManagedKey {
        ManagedKey::from_plaintext(KeyType::XChaCha20Poly1305, &[fill; KEY_SIZE]).unwrap()
    }

    fn test_iv() -> Vec<u8> {
        iv_from_nonce(b"0123456789abcdef01234567")
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let inner = symmetric_key(0x11).with_iv(&test_iv());
        let outer = symmetric_key(0x22);

        let wrapped = inner.encrypt(&outer).unwrap();
        assert!(wrapped.is_encrypted());
        assert_eq!(wrapped.ciphertext().unwrap().len(), KEY_SIZE + 16);

        let unwrapped = wrapped.decrypt(&outer).unwrap();
        assert!(!unwrapped.is_encrypted());
        assert_eq!(unwrapped.plaintext().unwrap(), &[0x11; KEY_SIZE]);
    }

    #[test]
    fn encrypt_leaves_receiver_decrypted() {
        let inner = symmetric_key(0x11).with_iv(&test_iv());
        let _wrapped = inner.encrypt(&symmetric_key(0x22)).unwrap();

        assert!(!inner.is_encrypted());
        assert_eq!(inner.plaintext().unwrap(), &[0x11; KEY_SIZE]);
    }

    #[test]
    fn encrypting_encrypted_key_fails() {
        let outer = symmetric_key(0x22);
        let wrapped = symmetric_key(0x11).with_iv(&test_iv()).encrypt(&outer).unwrap();

        let result = wrapped.encrypt(&outer);
        assert!(matches!(result, Err(Error::KeyState(KeyStateError::AlreadyEncrypted))));
        assert!(wrapped.is_encrypted());
    }

    #[test]
    fn decrypting_decrypted_key_fails() {
        let key = symmetric_key(0x11).with_iv(&test_iv());

        let result = key.decrypt(&symmetric_key(0x22));
        assert!(matches!(result, Err(Error::KeyState(KeyStateError::AlreadyDecrypted))));
        assert!(!key.is_encrypted());
    }

    #[test]
    fn encrypted_outer_key_is_rejected() {
        let outer = symmetric_key(0x22).with_iv(&test_iv()).encrypt(&symmetric_key(0x33)).unwrap();

        let result = symmetric_key(0x11).with_iv(&test_iv()).encrypt(&outer);
        assert!(matches!(result, Err(Error::KeyState(KeyStateError::MustBeDecrypted))));
    }

    #[test]
    fn asymmetric_outer_key_is_rejected() {
        let pair = ManagedKeyPair::from_secret(&[7; KEY_SIZE]).unwrap();

        let result = symmetric_key(0x11).with_iv(&test_iv()).encrypt(pair.private_key());
        assert!(matches!(
            result,
            Err(Error::KeyState(KeyStateError::IncompatibleType { actual: KeyType::X25519, .. }))
        ));
    }

    #[test]
    fn missing_iv_is_rejected() {
        let result = symmetric_key(0x11).encrypt(&symmetric_key(0x22));
        assert!(matches!(
            result,
            Err(Error::KeyState(KeyStateError::InvalidIv { expected: IV_SIZE, actual: 0 }))
        ));
    }

    #[test]
    fn wrong_outer_key_is_access_denied() {
        let wrapped =
            symmetric_key(0x11).with_iv(&test_iv()).encrypt(&symmetric_key(0x22)).unwrap();

        let result = wrapped.decrypt(&symmetric_key(0x23));
        assert!(matches!(result, Err(Error::AccessDenied)));
    }

    #[test]
    fn context_is_authenticated() {
        let outer = symmetric_key(0x22);
        let wrapped = symmetric_key(0x11)
            .with_iv(&test_iv())
            .with_context("room", "lobby")
            .encrypt(&outer)
            .unwrap();

        let relabelled = wrapped.clone().with_context("room", "office");
        assert!(matches!(relabelled.decrypt(&outer), Err(Error::AccessDenied)));

        let unwrapped = wrapped.decrypt(&outer).unwrap();
        assert_eq!(unwrapped.context().unwrap().value, "lobby");
    }

    #[test]
    fn clone_transitions_do_not_touch_original() {
        let outer = symmetric_key(0x22);
        let original = symmetric_key(0x11).with_iv(&test_iv()).encrypt(&outer).unwrap();

        let copy = original.clone();
        let decrypted = copy.decrypt(&outer).unwrap();
        let _rewrapped = decrypted.encrypt(&symmetric_key(0x44)).unwrap();

        assert!(original.is_encrypted());
        assert_eq!(original.decrypt(&outer).unwrap().plaintext().unwrap(), &[0x11; KEY_SIZE]);
    }

    #[test]
    fn from_plaintext_checks_length() {
        let result = ManagedKey::from_plaintext(KeyType::XChaCha20Poly1305, &[0; 16]);
        assert_eq!(result.unwrap_err(), KeyStateError::InvalidLength { expected: 32, actual: 16 });
    }

    #[test]
    fn iv_from_nonce_pads_and_truncates() {
        let mut expected = vec![0u8; IV_SIZE];
        expected[..2].copy_from_slice(&[1, 2]);
        assert_eq!(iv_from_nonce(&[1, 2]), expected);
        assert_eq!(iv_from_nonce(&[9; 40]), vec![9; IV_SIZE]);
    }

    #[test]
    fn decrypted_key_never_serializes() {
        let result = serde_json::to_string(&symmetric_key(0x11));
        assert!(result.is_err());
    }

    #[test]
    fn encrypted_key_serializes_without_plaintext() {
        let wrapped = symmetric_key(0x11)
            .with_iv(&test_iv())
            .with_context("nonce", "abc")
            .encrypt(&symmetric_key(0x22))
            .unwrap();

        let value = serde_json::to_value(&wrapped).unwrap();
        assert_eq!(value["key_type"], "xchacha20poly1305");
        assert_eq!(value["context"]["namespace"], "nonce");
        assert!(value.get("plaintext").is_none());

        let restored: ManagedKey = serde_json::from_value(value).unwrap();
        assert!(restored.is_encrypted());
        assert_eq!(
            restored.decrypt(&symmetric_key(0x22)).unwrap().plaintext().unwrap(),
            &[0x11; KEY_SIZE]
        );
    }

    #[test]
    fn serialized_key_type_matches_label() {
        for key_type in [KeyType::XChaCha20Poly1305, KeyType::X25519] {
            let json = serde_json::to_string(&key_type).unwrap();
            assert_eq!(json, format!("\"{}\"", key_type.label()));
            assert_eq!(serde_json::from_str::<KeyType>(&json).unwrap(), key_type);
        }
    }

    #[test]
    fn debug_output_redacts_plaintext() {
        let rendered = format!("{:?}", symmetric_key(0xAB));
        assert!(rendered.contains("encrypted: false"));
        assert!(!rendered.contains("171"));
    }

    #[test]
    fn key_pair_public_half_matches_private() {
        let pair = ManagedKeyPair::from_secret(&[5; KEY_SIZE]).unwrap();
        let secret: [u8; KEY_SIZE] = pair.private_key().plaintext().unwrap().try_into().unwrap();
        let expected = PublicKey::from(&StaticSecret::from(secret));

        assert_eq!(pair.public_key(), expected.as_bytes());
    }

    #[test]
    fn key_pair_wrap_keeps_public_half() {
        let kek = symmetric_key(0x22);
        let pair = ManagedKeyPair::from_secret(&[5; KEY_SIZE]).unwrap().with_iv(&test_iv());

        let wrapped = pair.encrypt(&kek).unwrap();
        assert!(wrapped.is_encrypted());
        assert_eq!(wrapped.public_key(), pair.public_key());

        let unwrapped = wrapped.decrypt(&kek).unwrap();
        assert_eq!(
            unwrapped.private_key().plaintext().unwrap(),
            pair.private_key().plaintext().unwrap()
        );
    }

    #[test]
    fn key_pair_from_secret_checks_length() {
        assert!(ManagedKeyPair::from_secret(&[0; 31]).is_err());
    }
}
