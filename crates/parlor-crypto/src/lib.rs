//! Parlor Cryptographic Primitives
//!
//! Building blocks for the parlor security core. Pure functions with no I/O,
//! no clock and no RNG: callers provide random bytes (usually from a
//! [`Kms`]), which keeps every operation deterministic under test.
//!
//! # Key Hierarchy
//!
//! Every persisted secret is a [`ManagedKey`] wrapped under another key. The
//! chain always ends at either the KMS master key or a password-derived key,
//! neither of which is ever stored.
//!
//! ```text
//! KMS master key            password ──PBKDF2──▶ client key
//!        │                                          │
//!        ▼                                          ▼
//! system key (wrapped) ── KMS unwrap ──▶ KEK ◀── user key (wrapped)
//!                                         │
//!                         ┌───────────────┼────────────────┐
//!                         ▼               ▼                ▼
//!                  key pair (private)  capabilities   staff credential
//! ```
//!
//! Rooms follow the same shape without the password branch: the room KEK is
//! KMS-wrapped, and members obtain it through a [`Capability`] sealed to
//! their own KEK.
//!
//! # Security
//!
//! Confidentiality:
//! - Plaintext key material is zeroized on drop and never serialized
//! - Passwords are never stored; a MAC over the nonce proves knowledge
//!
//! Integrity:
//! - Every wrap is XChaCha20-Poly1305 with the key type and context bound as
//!   associated data
//! - MACs are compared in constant time
//!
//! Explicit state:
//! - A key is either decrypted or encrypted, never both
//! - Transitions return new values; the original is never mutated

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod aead;
pub mod capability;
pub mod encoding;
pub mod error;
pub mod kdf;
pub mod key;
pub mod kms;

pub use capability::Capability;
pub use error::{Error, KeyStateError, KmsError, Result};
pub use kdf::{DEFAULT_KDF_ROUNDS, KdfParams, key_from_passcode, mac, verify_mac};
pub use key::{
    IV_SIZE, KEY_SIZE, KeyContext, KeyPairType, KeyType, ManagedKey, ManagedKeyPair,
    iv_from_nonce,
};
pub use kms::Kms;
