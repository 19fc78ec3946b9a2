//! Account key hierarchy.
//!
//! ```text
//!                     KMS
//!                      │ unwrap
//!                      ▼
//! system key ──────▶  KEK  ◀────── user key ◀── client key ◀── PBKDF2(password, nonce)
//!  (stored)            │            (stored)
//!                      ▼
//!              key pair (private half wrapped, stored)
//! ```
//!
//! The KEK is reachable two ways: through the KMS (administrative, used for
//! grants and password resets) or through the password. The password is
//! never stored; `mac = HMAC(client key, nonce)` proves it without revealing
//! it. Changing or resetting the password replaces `user_key` and `mac`
//! together and leaves the key pair untouched.

use parlor_crypto::{
    Capability, Error, IV_SIZE, KdfParams, KeyPairType, KeyType, Kms, ManagedKey, ManagedKeyPair,
    Result, encoding, iv_from_nonce, key_from_passcode,
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::{config::SecurityConfig, kms::step, reset::ResetAuthorization, snowflake::Snowflake};

/// Size of the per-account nonce (also the KDF salt)
pub const ACCOUNT_NONCE_SIZE: usize = IV_SIZE;

/// Persisted key hierarchy of one account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSecurity {
    #[serde(with = "parlor_crypto::encoding::base64")]
    nonce: Vec<u8>,
    #[serde(with = "parlor_crypto::encoding::base64")]
    mac: Vec<u8>,
    #[serde(default)]
    kdf: KdfParams,
    system_key: ManagedKey,
    user_key: ManagedKey,
    key_pair: ManagedKeyPair,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    staff_capability: Option<Capability>,
}

impl AccountSecurity {
    /// Bootstrap a hierarchy for a new account.
    ///
    /// Returns the hierarchy and the decrypted client key derived from
    /// `password`. The client key is for the caller's session only and must
    /// never be persisted.
    ///
    /// # Errors
    ///
    /// - `ServiceFailure` if any KMS call fails, naming the step
    pub fn new<K: Kms + ?Sized>(
        kms: &K,
        password: &str,
        kdf: KdfParams,
    ) -> Result<(Self, ManagedKey)> {
        let key_pair_type = KeyPairType::X25519;
        let random = Zeroizing::new(step(
            "nonce generation",
            kms.generate_nonce(ACCOUNT_NONCE_SIZE + key_pair_type.private_key_size()),
        )?);
        let (nonce, private_key) = random.split_at(ACCOUNT_NONCE_SIZE);
        let iv = iv_from_nonce(nonce);

        let context = encoding::encode(nonce);
        let system_key = step(
            "key generation",
            kms.generate_encrypted_key(KeyType::XChaCha20Poly1305, "nonce", &context),
        )?;
        let kek = step("key decryption", kms.decrypt_key(&system_key))?;
        let key_pair = ManagedKeyPair::from_secret(private_key)?.with_iv(&iv).encrypt(&kek)?;

        let client_key = key_from_passcode(password.as_bytes(), nonce, kdf);
        let user_key = kek.with_iv(&iv).encrypt(&client_key)?;
        let mac = parlor_crypto::mac(&client_key, nonce)?;

        tracing::debug!(kdf_rounds = kdf.rounds, "account key hierarchy created");

        let sec = Self {
            nonce: nonce.to_vec(),
            mac,
            kdf,
            system_key,
            user_key,
            key_pair,
            staff_capability: None,
        };
        Ok((sec, client_key))
    }

    /// Per-account nonce.
    pub fn nonce(&self) -> &[u8] {
        &self.nonce
    }

    /// MAC proving the current password.
    pub fn mac(&self) -> &[u8] {
        &self.mac
    }

    /// Key-derivation parameters this hierarchy was created with.
    pub fn kdf(&self) -> KdfParams {
        self.kdf
    }

    /// KMS-wrapped KEK.
    pub fn system_key(&self) -> &ManagedKey {
        &self.system_key
    }

    /// KEK wrapped under the client key.
    pub fn user_key(&self) -> &ManagedKey {
        &self.user_key
    }

    /// Account key pair (private half wrapped under the KEK).
    pub fn key_pair(&self) -> &ManagedKeyPair {
        &self.key_pair
    }

    /// Staff credential grant, if this account is staff.
    pub fn staff_capability(&self) -> Option<&Capability> {
        self.staff_capability.as_ref()
    }

    /// Derive the client key for `password` with this account's salt and
    /// parameters.
    pub fn key_from_password(&self, password: &str) -> ManagedKey {
        key_from_passcode(password.as_bytes(), &self.nonce, self.kdf)
    }

    /// Unlock the account key pair.
    ///
    /// # Errors
    ///
    /// - `KeyState(MustBeDecrypted)` if `client_key` is encrypted
    /// - `AccessDenied` if `client_key` is not derived from the current
    ///   password
    pub fn unlock(&self, client_key: &ManagedKey) -> Result<ManagedKeyPair> {
        let kek = self.unlock_kek(client_key)?;
        self.key_pair.decrypt(&kek)
    }

    /// Re-wrap the KEK under a new client key.
    ///
    /// Returns a new hierarchy; `self` stays valid for `old` until the caller
    /// persists the replacement.
    pub fn change_client_key(&self, old: &ManagedKey, new: &ManagedKey) -> Result<Self> {
        let kek = self.unlock_kek(old)?;
        self.rewrap(&kek, new)
    }

    /// Replace the password of account `account_id` without knowing the old
    /// one.
    ///
    /// Requires a [`ResetAuthorization`] for that same account, which only a
    /// valid, unexpired reset confirmation produces. The KEK is recovered
    /// through the KMS.
    ///
    /// # Errors
    ///
    /// - `AccessDenied` if the authorization was issued for another account
    /// - `ServiceFailure` if the KMS cannot unwrap the system key
    pub fn reset_password<K: Kms + ?Sized>(
        &self,
        kms: &K,
        account_id: Snowflake,
        authorization: &ResetAuthorization,
        new_password: &str,
    ) -> Result<(Self, ManagedKey)> {
        if authorization.account_id() != account_id {
            tracing::debug!(
                %account_id,
                authorized = %authorization.account_id(),
                "reset authorization is for another account"
            );
            return Err(Error::AccessDenied);
        }

        let kek = step("key decryption", kms.decrypt_key(&self.system_key))?;
        let client_key = self.key_from_password(new_password);
        let sec = self.rewrap(&kek, &client_key)?;

        tracing::info!(%account_id, "account password reset");
        Ok((sec, client_key))
    }

    /// Seal `key` to this account.
    ///
    /// The grant opens with [`AccountSecurity::open_grant`] and the account's
    /// client key. Issuing it needs only the KMS, not the password.
    pub fn grant<K: Kms + ?Sized>(&self, kms: &K, key: &ManagedKey) -> Result<Capability> {
        let kek = step("key decryption", kms.decrypt_key(&self.system_key))?;
        let iv = step("nonce generation", kms.generate_nonce(IV_SIZE))?;
        Capability::seal(&kek, &iv, key)
    }

    /// Open a grant issued by [`AccountSecurity::grant`].
    pub fn open_grant(
        &self,
        client_key: &ManagedKey,
        capability: &Capability,
    ) -> Result<ManagedKey> {
        let kek = self.unlock_kek(client_key)?;
        capability.open(&kek)
    }

    /// Make this account staff by granting it the KMS credential.
    pub fn grant_staff<K: Kms + ?Sized>(&self, kms: &K, credential: &ManagedKey) -> Result<Self> {
        let capability = self.grant(kms, credential)?;
        tracing::info!("staff capability granted");
        Ok(Self { staff_capability: Some(capability), ..self.clone() })
    }

    /// Drop staff status.
    #[must_use]
    pub fn revoke_staff(&self) -> Self {
        Self { staff_capability: None, ..self.clone() }
    }

    /// True if the account holds a staff credential grant.
    pub fn is_staff(&self) -> bool {
        self.staff_capability.is_some()
    }

    /// Recover the KMS credential granted with
    /// [`AccountSecurity::grant_staff`].
    ///
    /// `AccessDenied` if the account is not staff.
    pub fn unlock_staff_credential(&self, client_key: &ManagedKey) -> Result<ManagedKey> {
        let capability = self.staff_capability.as_ref().ok_or(Error::AccessDenied)?;
        self.open_grant(client_key, capability)
    }

    fn unlock_kek(&self, client_key: &ManagedKey) -> Result<ManagedKey> {
        if !parlor_crypto::verify_mac(client_key, &self.nonce, &self.mac)? {
            tracing::debug!("account unlock refused: mac mismatch");
            return Err(Error::AccessDenied);
        }
        self.user_key.decrypt(client_key)
    }

    fn rewrap(&self, kek: &ManagedKey, client_key: &ManagedKey) -> Result<Self> {
        let user_key = kek.clone().with_iv(&iv_from_nonce(&self.nonce)).encrypt(client_key)?;
        let mac = parlor_crypto::mac(client_key, &self.nonce)?;
        Ok(Self { user_key, mac, ..self.clone() })
    }
}

/// The password is shorter than the configured minimum.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("password must be at least {min} characters long")]
pub struct PasswordTooShort {
    /// Configured minimum length
    pub min: usize,
}

/// Check a new password against the configured policy.
pub fn validate_password(password: &str, config: &SecurityConfig) -> Result<(), PasswordTooShort> {
    if password.chars().count() < config.min_password_length {
        return Err(PasswordTooShort { min: config.min_password_length });
    }
    Ok(())
}
