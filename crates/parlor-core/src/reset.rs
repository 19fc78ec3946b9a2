//! Password-reset tokens.
//!
//! A reset request holds 64 random bytes from the KMS. The confirmation sent
//! to the user is `<request id>-<hex HMAC-SHA256(key, request id)>`; only the
//! holder of the stored request can produce or check it.
//!
//! ```text
//! generate ─▶ PasswordResetRequest (stored) ─▶ confirmation string (emailed)
//!                                                    │
//!                     ResetConfirmation::parse ◀─────┘
//!                               │
//!                     authorize(now) ─▶ ResetAuthorization ─▶ reset_password
//! ```
//!
//! Single use is the store's job: it deletes the request once
//! [`PasswordResetRequest::authorize`] succeeds.

use std::{
    fmt,
    str::FromStr,
    time::{Duration, SystemTime},
};

use hmac::{Hmac, Mac};
use parlor_crypto::{Error, Kms, Result};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::{env::Environment, kms::step, snowflake::Snowflake};

type HmacSha256 = Hmac<Sha256>;

/// Bytes of KMS randomness keying each request
pub const RESET_KEY_SIZE: usize = 64;

/// A pending password reset.
#[derive(Clone, Serialize, Deserialize)]
pub struct PasswordResetRequest {
    id: Snowflake,
    account_id: Snowflake,
    #[serde(with = "parlor_crypto::encoding::base64")]
    key: Vec<u8>,
    requested_at: SystemTime,
    expires_at: SystemTime,
}

impl PasswordResetRequest {
    /// New request for `account_id`, valid for `lifetime`.
    pub fn generate<K: Kms + ?Sized, E: Environment>(
        kms: &K,
        env: &E,
        account_id: Snowflake,
        lifetime: Duration,
    ) -> Result<Self> {
        let key = step("reset key generation", kms.generate_nonce(RESET_KEY_SIZE))?;
        let requested_at = env.now();
        let request = Self {
            id: Snowflake::generate(env),
            account_id,
            key,
            requested_at,
            expires_at: requested_at + lifetime,
        };

        tracing::info!(request_id = %request.id, %account_id, "password reset requested");
        Ok(request)
    }

    /// Request id.
    pub fn id(&self) -> Snowflake {
        self.id
    }

    /// Account the reset applies to.
    pub fn account_id(&self) -> Snowflake {
        self.account_id
    }

    /// When the request was made.
    pub fn requested_at(&self) -> SystemTime {
        self.requested_at
    }

    /// When the request stops being accepted.
    pub fn expires_at(&self) -> SystemTime {
        self.expires_at
    }

    /// HMAC-SHA256 of the request id string, keyed by the request key.
    pub fn mac(&self) -> Vec<u8> {
        let mut mac = self.hmac();
        mac.update(self.id.to_string().as_bytes());
        mac.finalize().into_bytes().to_vec()
    }

    /// Confirmation string to deliver to the account owner.
    pub fn confirmation(&self) -> String {
        self.to_string()
    }

    /// Constant-time comparison of `mac` against [`PasswordResetRequest::mac`].
    pub fn verify_mac(&self, mac: &[u8]) -> bool {
        let mut expected = self.hmac();
        expected.update(self.id.to_string().as_bytes());
        expected.verify_slice(mac).is_ok()
    }

    /// True once `now` reaches the expiry time.
    pub fn is_expired(&self, now: SystemTime) -> bool {
        now >= self.expires_at
    }

    /// Check a confirmation against this request.
    ///
    /// `AccessDenied` if the confirmation is for another request, the MAC
    /// does not verify, or the request has expired. All three are
    /// indistinguishable to the caller.
    pub fn authorize(
        &self,
        confirmation: &ResetConfirmation,
        now: SystemTime,
    ) -> Result<ResetAuthorization> {
        if confirmation.id != self.id || !self.verify_mac(&confirmation.mac) {
            tracing::debug!(request_id = %self.id, "reset confirmation rejected");
            return Err(Error::AccessDenied);
        }
        if self.is_expired(now) {
            tracing::debug!(request_id = %self.id, "reset request expired");
            return Err(Error::AccessDenied);
        }

        Ok(ResetAuthorization { request_id: self.id, account_id: self.account_id })
    }

    fn hmac(&self) -> HmacSha256 {
        let Ok(mac) = HmacSha256::new_from_slice(&self.key) else {
            unreachable!("HMAC-SHA256 accepts any key size");
        };
        mac
    }
}

impl fmt::Display for PasswordResetRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.id, hex::encode(self.mac()))
    }
}

impl fmt::Debug for PasswordResetRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordResetRequest")
            .field("id", &self.id)
            .field("account_id", &self.account_id)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// A parsed confirmation string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetConfirmation {
    id: Snowflake,
    mac: Vec<u8>,
}

impl ResetConfirmation {
    /// Parse `<id>-<hex mac>`.
    ///
    /// `InvalidConfirmationCode` on any malformed input, so callers can
    /// reject it before looking anything up.
    pub fn parse(confirmation: &str) -> Result<Self> {
        let (id, mac) = confirmation.split_once('-').ok_or(Error::InvalidConfirmationCode)?;
        let mac = hex::decode(mac).map_err(|_| Error::InvalidConfirmationCode)?;
        let id = id.parse().map_err(|_| Error::InvalidConfirmationCode)?;

        Ok(Self { id, mac })
    }

    /// Id of the request this confirmation claims to answer.
    pub fn request_id(&self) -> Snowflake {
        self.id
    }
}

impl FromStr for ResetConfirmation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Proof that a reset confirmation was verified.
///
/// Only [`PasswordResetRequest::authorize`] creates one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetAuthorization {
    request_id: Snowflake,
    account_id: Snowflake,
}

impl ResetAuthorization {
    /// Verified request.
    pub fn request_id(&self) -> Snowflake {
        self.request_id
    }

    /// Account whose password may be reset.
    pub fn account_id(&self) -> Snowflake {
        self.account_id
    }
}
