//! Content encryption with a detached authentication tag.
//!
//! The nonce is not random: it is derived from caller-supplied nonce material
//! (a unique message id), so the same message always encrypts to the same
//! ciphertext under the same key and no nonce has to be stored.
//!
//! ```text
//! nonce material ─▶ HKDF-SHA256 ─▶ 24-byte nonce
//! plaintext, aad ─▶ XChaCha20-Poly1305 ─▶ (digest, ciphertext)
//! ```

use chacha20poly1305::{AeadInPlace, Tag, XNonce};
use hkdf::Hkdf;
use sha2::Sha256;

use crate::{
    error::{Error, Result},
    key::{IV_SIZE, ManagedKey},
};

/// Label used for nonce derivation
const NONCE_LABEL: &[u8] = b"parlorContentNonceV1";

/// Poly1305 tag size (16 bytes)
pub const DIGEST_SIZE: usize = 16;

/// Encrypt `plaintext` under a decrypted symmetric key.
///
/// Returns `(digest, ciphertext)`; the ciphertext has the same length as the
/// plaintext.
pub fn encrypt_detached(
    key: &ManagedKey,
    nonce_material: &[u8],
    plaintext: &[u8],
    associated_data: &[u8],
) -> Result<(Vec<u8>, Vec<u8>)> {
    let cipher = key.cipher()?;
    let nonce = derive_nonce(nonce_material);

    let mut buffer = plaintext.to_vec();
    let Ok(tag) = cipher.encrypt_in_place_detached(&nonce, associated_data, &mut buffer) else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };

    Ok((tag.to_vec(), buffer))
}

/// Decrypt the output of [`encrypt_detached`].
///
/// # Errors
///
/// - `KeyState` if the key is encrypted or not symmetric
/// - `MessageCorrupted` if the digest has the wrong length
/// - `AccessDenied` if authentication fails (wrong key, tampered ciphertext,
///   digest or associated data)
pub fn decrypt_detached(
    key: &ManagedKey,
    nonce_material: &[u8],
    digest: &[u8],
    ciphertext: &[u8],
    associated_data: &[u8],
) -> Result<Vec<u8>> {
    let cipher = key.cipher()?;
    if digest.len() != DIGEST_SIZE {
        return Err(Error::corrupted(format!(
            "digest is {} bytes, expected {DIGEST_SIZE}",
            digest.len()
        )));
    }
    let nonce = derive_nonce(nonce_material);

    let mut buffer = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(&nonce, associated_data, &mut buffer, Tag::from_slice(digest))
        .map_err(|_| Error::AccessDenied)?;

    Ok(buffer)
}

/// Derive a 24-byte nonce from arbitrary nonce material.
fn derive_nonce(material: &[u8]) -> XNonce {
    let hkdf = Hkdf::<Sha256>::new(None, material);

    let mut nonce = [0u8; IV_SIZE];
    let Ok(()) = hkdf.expand(NONCE_LABEL, &mut nonce) else {
        unreachable!("24 bytes is a valid HKDF-SHA256 output length");
    };

    XNonce::from(nonce)
}
