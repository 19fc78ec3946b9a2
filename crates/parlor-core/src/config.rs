//! Tunables for the security core.

use std::time::Duration;

use parlor_crypto::KdfParams;
use serde::{Deserialize, Serialize};

/// Security configuration a host embeds in its own config file.
///
/// Missing fields fall back to [`SecurityConfig::default`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Password key-derivation parameters for new hierarchies
    pub kdf: KdfParams,
    /// How long a password-reset request stays valid
    #[serde(with = "duration_secs")]
    pub password_reset_lifetime: Duration,
    /// Shortest password accepted for a new account or reset
    pub min_password_length: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            kdf: KdfParams::default(),
            password_reset_lifetime: Duration::from_secs(60 * 60),
            min_password_length: 6,
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(
        duration: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_secs())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
