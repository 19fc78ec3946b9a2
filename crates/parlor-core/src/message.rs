//! Message content encryption.
//!
//! Encrypted content travels as `base64url(digest) + "/" + base64url(ciphertext)`
//! with the key id beside it. The nonce is derived from the message id and
//! the sender id is bound as associated data, so content cannot be moved to
//! another message or re-attributed to another sender.
//!
//! Two formats exist, told apart by the key id:
//!
//! | key id      | plaintext                                   |
//! |-------------|---------------------------------------------|
//! | `<id>`      | content bytes (legacy, decrypt only)        |
//! | `v1/<id>`   | JSON `{sender, content}` (sender is hidden) |
//!
//! Client addresses are visible to hosts and staff only. They are stripped
//! before sealing and again after opening for general viewers.

use std::{collections::HashMap, fmt};

use parlor_crypto::{
    Error, KeyStateError, ManagedKey, Result, aead,
    encoding::{decode, encode},
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::snowflake::Snowflake;

/// Prefix marking the v1 sealed-record format
const V1_PREFIX: &str = "v1/";

/// Identifier of a room message key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyId(String);

impl KeyId {
    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for KeyId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for KeyId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key id attached to an encrypted message, with its format version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EncryptionKeyId {
    /// Legacy format: content bytes encrypted directly
    Unversioned(KeyId),
    /// Sealed `{sender, content}` record
    V1(KeyId),
}

impl EncryptionKeyId {
    /// Parse the wire form. `None` for an empty string (unencrypted).
    pub fn parse(wire: &str) -> Option<Self> {
        if wire.is_empty() {
            return None;
        }
        Some(match wire.strip_prefix(V1_PREFIX) {
            Some(id) => Self::V1(KeyId::from(id)),
            None => Self::Unversioned(KeyId::from(wire)),
        })
    }

    /// Key id without the version.
    pub fn key_id(&self) -> &KeyId {
        match self {
            Self::Unversioned(id) | Self::V1(id) => id,
        }
    }
}

impl fmt::Display for EncryptionKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unversioned(id) => write!(f, "{id}"),
            Self::V1(id) => write!(f, "{V1_PREFIX}{id}"),
        }
    }
}

/// What a viewer is allowed to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum PrivilegeLevel {
    /// Ordinary participant
    #[default]
    General,
    /// Room host (manager)
    Host,
    /// Platform staff
    Staff,
}

/// A participant's session as shown on their messages.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionView {
    /// Agent or account id
    pub id: String,
    /// Display name
    pub name: String,
    /// Server the session is connected to
    pub server_id: String,
    /// Era of that server
    pub server_era: String,
    /// Session id
    pub session_id: String,
    /// Network address; privileged viewers only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_address: Option<String>,
    /// Session belongs to staff
    #[serde(default)]
    pub is_staff: bool,
    /// Session belongs to a room manager
    #[serde(default)]
    pub is_manager: bool,
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message id; also the nonce material for content encryption
    pub id: Snowflake,
    /// Message this one replies to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Snowflake>,
    /// Unix time in seconds
    pub time: i64,
    /// Author
    pub sender: SessionView,
    /// Content, encrypted if `encryption_key_id` is set
    pub content: String,
    /// Key the content is encrypted under; `None` for plaintext
    #[serde(default, with = "wire_key_id", skip_serializing_if = "Option::is_none")]
    pub encryption_key_id: Option<EncryptionKeyId>,
    /// Content was cut short for delivery and cannot be decrypted
    #[serde(default)]
    pub truncated: bool,
}

/// Sealed record of the v1 format.
#[derive(Serialize, Deserialize)]
struct SealedRecord {
    sender: SessionView,
    content: String,
}

/// Encrypt the sender and content of `msg` under `key`.
///
/// The returned message carries only the sender id and session id in the
/// clear; the full sender (minus client address) is inside the ciphertext.
///
/// # Errors
///
/// - `KeyState` if `key` is encrypted or not a symmetric key
pub fn encrypt_message(msg: &Message, key_id: &KeyId, key: &ManagedKey) -> Result<Message> {
    if key.is_encrypted() {
        return Err(KeyStateError::MustBeDecrypted.into());
    }

    let record = SealedRecord {
        sender: SessionView { client_address: None, ..msg.sender.clone() },
        content: msg.content.clone(),
    };
    let Ok(plaintext) = serde_json::to_vec(&record).map(Zeroizing::new) else {
        unreachable!("sealed record always serializes");
    };

    let (digest, ciphertext) = aead::encrypt_detached(
        key,
        msg.id.to_string().as_bytes(),
        &plaintext,
        msg.sender.id.as_bytes(),
    )?;

    Ok(Message {
        sender: SessionView {
            id: msg.sender.id.clone(),
            session_id: msg.sender.session_id.clone(),
            ..SessionView::default()
        },
        content: format!("{}/{}", encode(&digest), encode(&ciphertext)),
        encryption_key_id: Some(EncryptionKeyId::V1(key_id.clone())),
        ..msg.clone()
    })
}

/// Decrypt `msg` with whichever of `keys` it names, as seen at `level`.
///
/// Unencrypted and truncated messages pass through unchanged, except that
/// general viewers never see a client address.
///
/// # Errors
///
/// - `AccessDenied` if no key with the message's key id is known, or
///   authentication fails (wrong key, tampered content, re-attributed
///   sender)
/// - `KeyState` if the named key is still encrypted
/// - `MessageCorrupted` if the content is not `digest/ciphertext` in base64,
///   or the plaintext does not decode
pub fn decrypt_message(
    msg: &Message,
    keys: &HashMap<KeyId, ManagedKey>,
    level: PrivilegeLevel,
) -> Result<Message> {
    let mut msg = msg.clone();
    if level == PrivilegeLevel::General {
        msg.sender.client_address = None;
    }

    let Some(key_id) = msg.encryption_key_id.clone() else {
        return Ok(msg);
    };
    if msg.truncated {
        return Ok(msg);
    }

    let Some(key) = keys.get(key_id.key_id()) else {
        tracing::debug!(message_id = %msg.id, key_id = %key_id, "no key for encrypted message");
        return Err(Error::AccessDenied);
    };
    if key.is_encrypted() {
        return Err(KeyStateError::MustBeDecrypted.into());
    }

    let (digest, ciphertext) = split_content(&msg.content)?;
    let plaintext = Zeroizing::new(aead::decrypt_detached(
        key,
        msg.id.to_string().as_bytes(),
        &digest,
        &ciphertext,
        msg.sender.id.as_bytes(),
    )?);

    match key_id {
        EncryptionKeyId::Unversioned(_) => {
            msg.content = String::from_utf8(plaintext.to_vec())
                .map_err(|_| Error::corrupted("content is not utf-8"))?;
        }
        EncryptionKeyId::V1(_) => {
            let record: SealedRecord = serde_json::from_slice(&plaintext)
                .map_err(|e| Error::corrupted(format!("sealed record: {e}")))?;
            msg.sender = record.sender;
            msg.content = record.content;
            if level == PrivilegeLevel::General {
                msg.sender.client_address = None;
            }
        }
    }

    Ok(msg)
}

fn split_content(content: &str) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut parts = content.split('/');
    let (Some(digest), Some(ciphertext), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(Error::corrupted("content is not digest/ciphertext"));
    };

    let digest = decode(digest).ok_or_else(|| Error::corrupted("digest is not base64"))?;
    let ciphertext =
        decode(ciphertext).ok_or_else(|| Error::corrupted("ciphertext is not base64"))?;
    Ok((digest, ciphertext))
}

mod wire_key_id {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::EncryptionKeyId;

    pub(super) fn serialize<S: Serializer>(
        value: &Option<EncryptionKeyId>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(id) => serializer.collect_str(id),
            None => serializer.serialize_none(),
        }
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<EncryptionKeyId>, D::Error> {
        let wire = Option::<String>::deserialize(deserializer)?;
        Ok(wire.as_deref().and_then(EncryptionKeyId::parse))
    }
}
