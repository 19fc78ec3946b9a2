//! Password-derived keys and keyed MACs.
//!
//! Client keys are derived from a password (or room passcode) with
//! PBKDF2-HMAC-SHA256, salted with the hierarchy nonce. Knowledge of the
//! password is proven by an HMAC-SHA256 over the nonce keyed with the derived
//! key, so the password itself is never stored.

use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::{
    error::{KeyStateError, Result},
    key::{KEY_SIZE, KeyType, ManagedKey},
};

type HmacSha256 = Hmac<Sha256>;

/// Default PBKDF2 iteration count
pub const DEFAULT_KDF_ROUNDS: u32 = 100_000;

/// Parameters for deriving a key from a password.
///
/// Stored alongside each hierarchy so a later change of the default never
/// locks out existing accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// PBKDF2-HMAC-SHA256 iteration count
    pub rounds: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self { rounds: DEFAULT_KDF_ROUNDS }
    }
}

/// Derive a decrypted symmetric key from a passcode and salt.
///
/// Deterministic: the same passcode, salt and parameters always produce the
/// same key.
pub fn key_from_passcode(passcode: &[u8], salt: &[u8], params: KdfParams) -> ManagedKey {
    let mut derived = Zeroizing::new([0u8; KEY_SIZE]);
    pbkdf2_hmac::<Sha256>(passcode, salt, params.rounds.max(1), derived.as_mut_slice());

    let Ok(key) = ManagedKey::from_plaintext(KeyType::XChaCha20Poly1305, derived.as_slice()) else {
        unreachable!("PBKDF2 output is exactly KEY_SIZE bytes");
    };
    key
}

/// HMAC-SHA256 over `message`, keyed by a decrypted key.
pub fn mac(key: &ManagedKey, message: &[u8]) -> Result<Vec<u8>> {
    let mut mac = hmac_for(key)?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Constant-time check of a MAC produced by [`mac`].
///
/// Returns `Ok(false)` on mismatch. Only a key in the wrong state is an
/// error.
pub fn verify_mac(key: &ManagedKey, message: &[u8], expected: &[u8]) -> Result<bool> {
    let mut mac = hmac_for(key)?;
    mac.update(message);
    Ok(mac.verify_slice(expected).is_ok())
}

fn hmac_for(key: &ManagedKey) -> Result<HmacSha256, KeyStateError> {
    let Ok(mac) = HmacSha256::new_from_slice(key.plaintext()?) else {
        unreachable!("HMAC-SHA256 accepts any key size");
    };
    Ok(mac)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, key::iv_from_nonce};

    const FAST: KdfParams = KdfParams { rounds: 16 };

    #[test]
    fn derivation_is_deterministic() {
        let a = key_from_passcode(b"hunter22", b"salt", FAST);
        let b = key_from_passcode(b"hunter22", b"salt", FAST);
        assert_eq!(a.plaintext().unwrap(), b.plaintext().unwrap());
    }

    #[test]
    fn different_salts_produce_different_keys() {
        let a = key_from_passcode(b"hunter22", b"salt-a", FAST);
        let b = key_from_passcode(b"hunter22", b"salt-b", FAST);
        assert_ne!(a.plaintext().unwrap(), b.plaintext().unwrap());
    }

    #[test]
    fn rounds_change_the_key() {
        let a = key_from_passcode(b"hunter22", b"salt", KdfParams { rounds: 1 });
        let b = key_from_passcode(b"hunter22", b"salt", KdfParams { rounds: 2 });
        assert_ne!(a.plaintext().unwrap(), b.plaintext().unwrap());
    }

    #[test]
    fn pbkdf2_matches_reference_vector() {
        // RFC 7914 section 11, first PBKDF2-HMAC-SHA256 vector, truncated to 32 bytes
        let key = key_from_passcode(b"passwd", b"salt", KdfParams { rounds: 1 });
        assert_eq!(
            hex::encode(key.plaintext().unwrap()),
            "55ac046e56e3089fec1691c22544b605f94185216dde0465e68b9d57c20dacbc"
        );
    }

    #[test]
    fn mac_verifies_only_with_same_key() {
        let key = key_from_passcode(b"right", b"nonce", FAST);
        let other = key_from_passcode(b"wrong", b"nonce", FAST);
        let tag = mac(&key, b"nonce").unwrap();

        assert!(verify_mac(&key, b"nonce", &tag).unwrap());
        assert!(!verify_mac(&other, b"nonce", &tag).unwrap());
        assert!(!verify_mac(&key, b"other", &tag).unwrap());
    }

    #[test]
    fn truncated_mac_does_not_verify() {
        let key = key_from_passcode(b"right", b"nonce", FAST);
        let tag = mac(&key, b"nonce").unwrap();
        assert!(!verify_mac(&key, b"nonce", &tag[..16]).unwrap());
    }

    #[test]
    fn mac_requires_decrypted_key() {
        let key = key_from_passcode(b"right", b"nonce", FAST)
            .with_iv(&iv_from_nonce(b"nonce"))
            .encrypt(&key_from_passcode(b"outer", b"nonce", FAST))
            .unwrap();

        assert!(matches!(
            mac(&key, b"nonce"),
            Err(Error::KeyState(KeyStateError::MustBeDecrypted))
        ));
    }
}
