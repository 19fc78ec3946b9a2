//! Parlor Security Core
//!
//! Key hierarchies and protocols built on [`parlor_crypto`]: accounts unlocked
//! by a password, rooms unlocked by grants or the KMS, message content
//! encryption and password-reset tokens.
//!
//! # Architecture
//!
//! Everything here is synchronous and free of I/O. Hierarchies are plain
//! values: every operation that changes one returns a new value, and the
//! caller persists it. Randomness and wrapping go through a [`Kms`]; the wall
//! clock and snowflake randomness go through an [`Environment`].
//!
//! # Components
//!
//! - [`AccountSecurity`]: per-account system key, user key and key pair
//! - [`RoomSecurity`]: per-room manager key, key pair and message key
//! - [`encrypt_message`] / [`decrypt_message`]: message content codec
//! - [`PasswordResetRequest`]: reset tokens and their confirmations
//! - [`LocalKms`]: in-memory KMS for development and tests
//! - [`SecurityConfig`]: tunables a host embeds in its configuration

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod account;
pub mod config;
pub mod env;
pub mod kms;
pub mod message;
pub mod reset;
pub mod room;
pub mod snowflake;

pub use account::{AccountSecurity, PasswordTooShort, validate_password};
pub use config::SecurityConfig;
pub use env::{Environment, SystemEnv};
pub use kms::LocalKms;
pub use message::{
    EncryptionKeyId, KeyId, Message, PrivilegeLevel, SessionView, decrypt_message,
    encrypt_message,
};
pub use parlor_crypto::{
    Capability, Error, KdfParams, KeyStateError, KeyType, Kms, KmsError, ManagedKey,
    ManagedKeyPair, Result,
};
pub use reset::{PasswordResetRequest, ResetAuthorization, ResetConfirmation};
pub use room::{RoomMessageKey, RoomSecurity};
pub use snowflake::Snowflake;
