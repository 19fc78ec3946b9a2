//! Room key hierarchy.
//!
//! ```text
//!   KMS ──unwrap──▶ manager key (room KEK) ──▶ key pair (private half wrapped)
//!    │                  │
//!    │                  └─ sealed to members as manager capabilities
//!    │
//!    └──unwrap──▶ message key (current RoomMessageKey)
//!                       │
//!                       └─ sealed to members or to a passcode
//! ```
//!
//! Rooms have no password. Managers reach the KEK through a capability sealed
//! to their account; staff reach it directly through the KMS. `mac =
//! HMAC(manager key, key pair IV)` lets a presented manager key be checked
//! before it is used.

use std::time::SystemTime;

use parlor_crypto::{
    Capability, Error, IV_SIZE, KdfParams, KeyPairType, KeyType, Kms, ManagedKey, ManagedKeyPair,
    Result,
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::{
    account::AccountSecurity, env::Environment, kms::step, message::KeyId, snowflake::Snowflake,
};

/// Size of the per-room nonce
pub const ROOM_NONCE_SIZE: usize = IV_SIZE;

/// KMS context namespace for room keys
const ROOM_NAMESPACE: &str = "room";

/// Persisted key hierarchy of one room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSecurity {
    room_name: String,
    #[serde(with = "parlor_crypto::encoding::base64")]
    nonce: Vec<u8>,
    #[serde(with = "parlor_crypto::encoding::base64")]
    mac: Vec<u8>,
    key_encrypting_key: ManagedKey,
    key_pair: ManagedKeyPair,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message_key: Option<RoomMessageKey>,
}

impl RoomSecurity {
    /// Bootstrap a hierarchy for a new room.
    ///
    /// The room starts without a message key; call
    /// [`RoomSecurity::rotate_message_key`] to issue the first one.
    pub fn new<K: Kms + ?Sized>(kms: &K, room_name: &str) -> Result<Self> {
        let key_pair_type = KeyPairType::X25519;
        let random = Zeroizing::new(step(
            "nonce generation",
            kms.generate_nonce(IV_SIZE + key_pair_type.private_key_size() + ROOM_NONCE_SIZE),
        )?);
        let (iv, rest) = random.split_at(IV_SIZE);
        let (private_key, nonce) = rest.split_at(key_pair_type.private_key_size());

        let key_encrypting_key = step(
            "key generation",
            kms.generate_encrypted_key(KeyType::XChaCha20Poly1305, ROOM_NAMESPACE, room_name),
        )?;
        let manager_key = step("key decryption", kms.decrypt_key(&key_encrypting_key))?;
        let key_pair = ManagedKeyPair::from_secret(private_key)?.with_iv(iv).encrypt(&manager_key)?;
        let mac = parlor_crypto::mac(&manager_key, key_pair.iv())?;

        tracing::debug!(room = room_name, "room key hierarchy created");

        Ok(Self {
            room_name: room_name.to_string(),
            nonce: nonce.to_vec(),
            mac,
            key_encrypting_key,
            key_pair,
            message_key: None,
        })
    }

    /// Room this hierarchy belongs to.
    pub fn room_name(&self) -> &str {
        &self.room_name
    }

    /// Per-room nonce.
    pub fn nonce(&self) -> &[u8] {
        &self.nonce
    }

    /// MAC over the key pair IV, keyed by the manager key.
    pub fn mac(&self) -> &[u8] {
        &self.mac
    }

    /// KMS-wrapped manager key.
    pub fn key_encrypting_key(&self) -> &ManagedKey {
        &self.key_encrypting_key
    }

    /// Room key pair (private half wrapped under the manager key).
    pub fn key_pair(&self) -> &ManagedKeyPair {
        &self.key_pair
    }

    /// Current message key, if one was issued.
    pub fn message_key(&self) -> Option<&RoomMessageKey> {
        self.message_key.as_ref()
    }

    /// Unlock the room key pair with a manager key.
    ///
    /// # Errors
    ///
    /// - `KeyState(MustBeDecrypted)` if `manager_key` is encrypted
    /// - `AccessDenied` if `manager_key` is not this room's current manager
    ///   key
    pub fn unlock(&self, manager_key: &ManagedKey) -> Result<ManagedKeyPair> {
        if !parlor_crypto::verify_mac(manager_key, self.key_pair.iv(), &self.mac)? {
            tracing::debug!(room = %self.room_name, "room unlock refused: mac mismatch");
            return Err(Error::AccessDenied);
        }
        self.key_pair.decrypt(manager_key)
    }

    /// Unlock the key pair through the KMS, without any grant.
    pub fn staff_unlock<K: Kms + ?Sized>(&self, kms: &K) -> Result<ManagedKeyPair> {
        let manager_key = self.manager_key(kms)?;
        self.unlock(&manager_key)
    }

    /// Decrypted manager key, via the KMS.
    pub fn manager_key<K: Kms + ?Sized>(&self, kms: &K) -> Result<ManagedKey> {
        step("key decryption", kms.decrypt_key(&self.key_encrypting_key))
    }

    /// Seal the manager key to `account`.
    pub fn grant_manager<K: Kms + ?Sized>(
        &self,
        kms: &K,
        account: &AccountSecurity,
    ) -> Result<Capability> {
        let manager_key = self.manager_key(kms)?;
        let capability = account.grant(kms, &manager_key)?;

        tracing::debug!(room = %self.room_name, "manager capability issued");
        Ok(capability)
    }

    /// Unlock the key pair with a manager capability held by `account`.
    pub fn unlock_with_grant(
        &self,
        account: &AccountSecurity,
        client_key: &ManagedKey,
        capability: &Capability,
    ) -> Result<ManagedKeyPair> {
        let manager_key = account.open_grant(client_key, capability)?;
        self.unlock(&manager_key)
    }

    /// Replace the manager key.
    ///
    /// The key pair is kept and re-wrapped under a fresh KEK with a fresh IV.
    /// Manager capabilities issued before the rotation no longer unlock the
    /// returned hierarchy.
    pub fn rotate_manager_key<K: Kms + ?Sized>(&self, kms: &K) -> Result<Self> {
        let key_pair = self.staff_unlock(kms)?;
        let iv = step("nonce generation", kms.generate_nonce(IV_SIZE))?;

        let key_encrypting_key = step(
            "key generation",
            kms.generate_encrypted_key(KeyType::XChaCha20Poly1305, ROOM_NAMESPACE, &self.room_name),
        )?;
        let manager_key = step("key decryption", kms.decrypt_key(&key_encrypting_key))?;
        let key_pair = key_pair.with_iv(&iv).encrypt(&manager_key)?;
        let mac = parlor_crypto::mac(&manager_key, key_pair.iv())?;

        tracing::info!(room = %self.room_name, "room manager key rotated");
        Ok(Self { mac, key_encrypting_key, key_pair, ..self.clone() })
    }

    /// Issue a fresh message key, replacing the current one.
    ///
    /// Holders of the previous key keep it; they can read older messages but
    /// not messages sent under the new key id.
    pub fn rotate_message_key<K: Kms + ?Sized, E: Environment>(
        &self,
        kms: &K,
        env: &E,
    ) -> Result<Self> {
        let message_key = RoomMessageKey::generate(kms, env, &self.room_name)?;

        tracing::info!(
            room = %self.room_name,
            key_id = %message_key.key_id,
            "room message key rotated"
        );
        Ok(Self { message_key: Some(message_key), ..self.clone() })
    }
}

/// A room's message key, identified by a snowflake key id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomMessageKey {
    key_id: KeyId,
    timestamp: SystemTime,
    #[serde(with = "parlor_crypto::encoding::base64")]
    nonce: Vec<u8>,
    key: ManagedKey,
}

impl RoomMessageKey {
    /// Fresh KMS-wrapped message key for `room_name`.
    pub fn generate<K: Kms + ?Sized, E: Environment>(
        kms: &K,
        env: &E,
        room_name: &str,
    ) -> Result<Self> {
        let nonce = step("nonce generation", kms.generate_nonce(ROOM_NONCE_SIZE))?;
        let key = step(
            "key generation",
            kms.generate_encrypted_key(KeyType::XChaCha20Poly1305, ROOM_NAMESPACE, room_name),
        )?;

        Ok(Self {
            key_id: KeyId::from(Snowflake::generate(env).to_string()),
            timestamp: env.now(),
            nonce,
            key,
        })
    }

    /// Key id messages refer to.
    pub fn key_id(&self) -> &KeyId {
        &self.key_id
    }

    /// When the key was issued.
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Per-key nonce (salt for passcode grants).
    pub fn nonce(&self) -> &[u8] {
        &self.nonce
    }

    /// KMS-wrapped key.
    pub fn key(&self) -> &ManagedKey {
        &self.key
    }

    /// Decrypted key, via the KMS.
    pub fn unlock<K: Kms + ?Sized>(&self, kms: &K) -> Result<ManagedKey> {
        step("key decryption", kms.decrypt_key(&self.key))
    }

    /// Seal the message key to `account`.
    pub fn grant_to_account<K: Kms + ?Sized>(
        &self,
        kms: &K,
        account: &AccountSecurity,
    ) -> Result<Capability> {
        let key = self.unlock(kms)?;
        account.grant(kms, &key)
    }

    /// Seal the message key to `passcode`, salted with this key's nonce.
    pub fn grant_to_passcode<K: Kms + ?Sized>(
        &self,
        kms: &K,
        passcode: &str,
        kdf: KdfParams,
    ) -> Result<Capability> {
        let key = self.unlock(kms)?;
        let iv = step("nonce generation", kms.generate_nonce(IV_SIZE))?;
        Capability::seal_for_passcode(passcode.as_bytes(), &self.nonce, kdf, &iv, &key)
    }

    /// Open a grant produced by [`RoomMessageKey::grant_to_passcode`].
    pub fn open_passcode_grant(
        &self,
        capability: &Capability,
        passcode: &str,
        kdf: KdfParams,
    ) -> Result<ManagedKey> {
        capability.open_with_passcode(passcode.as_bytes(), &self.nonce, kdf)
    }
}
