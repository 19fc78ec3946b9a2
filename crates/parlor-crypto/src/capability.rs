//! Capability grants.
//!
//! A capability shares one key with whoever holds a recipient key: the shared
//! key is serialized and sealed under the recipient with
//! XChaCha20-Poly1305. The capability id is the base64 IV, so a capability is
//! self-contained and carries no plaintext.
//!
//! ```text
//! recipient key ─┐
//! iv ────────────┼─▶ seal({key_type, key}) ─▶ Capability { id: b64(iv), payload }
//! shared key ────┘
//! ```
//!
//! Recipients are either an account key-encrypting key (room grants to
//! members) or a key derived from a passcode (room grants to anyone who knows
//! the passcode).

use chacha20poly1305::{
    XNonce,
    aead::{Aead, Payload},
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::{
    encoding,
    error::{Error, KeyStateError, Result},
    kdf::{KdfParams, key_from_passcode},
    key::{IV_SIZE, KeyType, ManagedKey},
};

/// Associated data bound into every sealed payload
const CAPABILITY_AAD: &[u8] = b"parlor-capability";

/// A sealed key, openable only with the recipient key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    /// Base64 of the IV used to seal the payload
    pub id: String,
    /// Sealed key record (ciphertext including the Poly1305 tag)
    #[serde(with = "crate::encoding::base64")]
    pub encrypted_payload: Vec<u8>,
}

/// Plaintext record inside the sealed payload.
#[derive(Serialize, Deserialize)]
struct SharedKey {
    key_type: KeyType,
    #[serde(with = "crate::encoding::base64")]
    key: Vec<u8>,
}

impl Capability {
    /// Seal `key` to `recipient`.
    ///
    /// `iv` must be [`IV_SIZE`] fresh random bytes; the caller obtains them
    /// from the KMS.
    ///
    /// # Errors
    ///
    /// - `KeyState` if `recipient` is encrypted or not symmetric, `key` is
    ///   encrypted, or `iv` has the wrong length
    pub fn seal(recipient: &ManagedKey, iv: &[u8], key: &ManagedKey) -> Result<Self> {
        let cipher = recipient.cipher()?;
        let nonce = nonce_from(iv)?;

        let record = SharedKey { key_type: key.key_type(), key: key.plaintext()?.to_vec() };
        let Ok(plaintext) = serde_json::to_vec(&record).map(Zeroizing::new) else {
            unreachable!("shared key record always serializes");
        };
        // wipe the serialized copy's source
        drop(Zeroizing::new(record.key));

        let Ok(encrypted_payload) =
            cipher.encrypt(nonce, Payload { msg: plaintext.as_slice(), aad: CAPABILITY_AAD })
        else {
            unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
        };

        Ok(Self { id: encoding::encode(iv), encrypted_payload })
    }

    /// Open the capability with `recipient`, returning the decrypted key.
    ///
    /// # Errors
    ///
    /// - `KeyState` if `recipient` is encrypted or not symmetric
    /// - `MessageCorrupted` if the id is not a valid IV or the opened record
    ///   is malformed
    /// - `AccessDenied` if `recipient` is the wrong key or the capability was
    ///   tampered with
    pub fn open(&self, recipient: &ManagedKey) -> Result<ManagedKey> {
        let cipher = recipient.cipher()?;
        let iv = encoding::decode(&self.id)
            .ok_or_else(|| Error::corrupted("capability id is not base64"))?;
        if iv.len() != IV_SIZE {
            return Err(Error::corrupted(format!(
                "capability iv is {} bytes, expected {IV_SIZE}",
                iv.len()
            )));
        }

        let plaintext = cipher
            .decrypt(
                XNonce::from_slice(&iv),
                Payload { msg: &self.encrypted_payload, aad: CAPABILITY_AAD },
            )
            .map(Zeroizing::new)
            .map_err(|_| Error::AccessDenied)?;

        let record: SharedKey = serde_json::from_slice(&plaintext)
            .map_err(|e| Error::corrupted(format!("capability payload: {e}")))?;
        let key = Zeroizing::new(record.key);

        Ok(ManagedKey::from_plaintext(record.key_type, &key)?)
    }

    /// Seal `key` to a passcode. The passcode key is derived with `salt` and
    /// `params`; both must be supplied again to open.
    pub fn seal_for_passcode(
        passcode: &[u8],
        salt: &[u8],
        params: KdfParams,
        iv: &[u8],
        key: &ManagedKey,
    ) -> Result<Self> {
        Self::seal(&key_from_passcode(passcode, salt, params), iv, key)
    }

    /// Open a capability produced by [`Capability::seal_for_passcode`].
    pub fn open_with_passcode(
        &self,
        passcode: &[u8],
        salt: &[u8],
        params: KdfParams,
    ) -> Result<ManagedKey> {
        self.open(&key_from_passcode(passcode, salt, params))
    }
}

fn nonce_from(iv: &[u8]) -> Result<&XNonce> {
    if iv.len() != IV_SIZE {
        return Err(KeyStateError::InvalidIv { expected: IV_SIZE, actual: iv.len() }.into());
    }
    Ok(XNonce::from_slice(iv))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{KEY_SIZE, iv_from_nonce};

    fn key(fill: u8) -> ManagedKey {
        ManagedKey::from_plaintext(KeyType::XChaCha20Poly1305, &[fill; KEY_SIZE]).unwrap()
    }

    fn iv() -> Vec<u8> {
        vec![0x5A; IV_SIZE]
    }

    #[test]
    fn seal_open_roundtrip() {
        let capability = Capability::seal(&key(1), &iv(), &key(9)).unwrap();

        assert_eq!(capability.id, encoding::encode(&iv()));
        let opened = capability.open(&key(1)).unwrap();
        assert_eq!(opened.plaintext().unwrap(), &[9; KEY_SIZE]);
        assert_eq!(opened.key_type(), KeyType::XChaCha20Poly1305);
    }

    #[test]
    fn payload_does_not_contain_key() {
        let capability = Capability::seal(&key(1), &iv(), &key(9)).unwrap();
        let encoded = encoding::encode(&[9; KEY_SIZE]);

        let json = serde_json::to_string(&capability).unwrap();
        assert!(!json.contains(&encoded));
    }

    #[test]
    fn wrong_recipient_is_access_denied() {
        let capability = Capability::seal(&key(1), &iv(), &key(9)).unwrap();
        assert!(matches!(capability.open(&key(2)), Err(Error::AccessDenied)));
    }

    #[test]
    fn tampered_payload_is_access_denied() {
        let mut capability = Capability::seal(&key(1), &iv(), &key(9)).unwrap();
        capability.encrypted_payload[0] ^= 1;
        assert!(matches!(capability.open(&key(1)), Err(Error::AccessDenied)));
    }

    #[test]
    fn swapped_id_is_access_denied() {
        let mut capability = Capability::seal(&key(1), &iv(), &key(9)).unwrap();
        capability.id = encoding::encode(&[0x11; IV_SIZE]);
        assert!(matches!(capability.open(&key(1)), Err(Error::AccessDenied)));
    }

    #[test]
    fn malformed_id_is_corruption() {
        let mut capability = Capability::seal(&key(1), &iv(), &key(9)).unwrap();

        capability.id = "not base64!".to_string();
        assert!(matches!(capability.open(&key(1)), Err(Error::MessageCorrupted { .. })));

        capability.id = encoding::encode(&[1, 2, 3]);
        assert!(matches!(capability.open(&key(1)), Err(Error::MessageCorrupted { .. })));
    }

    #[test]
    fn encrypted_recipient_is_key_state_error() {
        let capability = Capability::seal(&key(1), &iv(), &key(9)).unwrap();
        let wrapped = key(1).with_iv(&iv_from_nonce(b"n")).encrypt(&key(3)).unwrap();

        assert!(matches!(
            capability.open(&wrapped),
            Err(Error::KeyState(KeyStateError::MustBeDecrypted))
        ));
    }

    #[test]
    fn sealing_requires_full_iv() {
        let result = Capability::seal(&key(1), &[0; 12], &key(9));
        assert!(matches!(result, Err(Error::KeyState(KeyStateError::InvalidIv { .. }))));
    }

    #[test]
    fn passcode_grant_roundtrip() {
        let params = KdfParams { rounds: 8 };
        let capability =
            Capability::seal_for_passcode(b"open sesame", b"salt", params, &iv(), &key(4)).unwrap();

        let opened = capability.open_with_passcode(b"open sesame", b"salt", params).unwrap();
        assert_eq!(opened.plaintext().unwrap(), &[4; KEY_SIZE]);

        let wrong = capability.open_with_passcode(b"open simsim", b"salt", params);
        assert!(matches!(wrong, Err(Error::AccessDenied)));
    }
}
