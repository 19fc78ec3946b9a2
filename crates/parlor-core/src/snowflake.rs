//! Time-ordered 64-bit identifiers.
//!
//! ```text
//!  63                      22 21                0
//! ┌──────────────────────────┬──────────────────┐
//! │ ms since 2014-12-01 UTC  │   random bits    │
//! └──────────────────────────┴──────────────────┘
//! ```
//!
//! Ids sort by creation time. The string form is 13 lowercase base36 digits,
//! zero padded, so string order matches numeric order.

use std::{
    fmt,
    str::FromStr,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error as _};

use crate::env::Environment;

/// 2014-12-01T00:00:00Z in milliseconds since the Unix epoch
const EPOCH_MILLIS: u64 = 1_417_392_000_000;

/// Low bits filled with randomness
const RANDOM_BITS: u32 = 22;

/// Digits in the string form (`u64::MAX` in base36 needs 13)
const STRING_LEN: usize = 13;

const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// A time-ordered unique id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Snowflake(u64);

impl Snowflake {
    /// Fresh id for the current time.
    pub fn generate<E: Environment>(env: &E) -> Self {
        Self::from_time(env.now(), env.random_u64())
    }

    /// Id for `time` with the low bits taken from `random`.
    ///
    /// Times before the epoch clamp to it.
    pub fn from_time(time: SystemTime, random: u64) -> Self {
        let millis = time
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as u64)
            .saturating_sub(EPOCH_MILLIS);
        let mask = (1u64 << RANDOM_BITS) - 1;

        Self((millis << RANDOM_BITS) | (random & mask))
    }

    /// Raw integer value.
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Creation time encoded in the id, to the millisecond.
    pub fn time(self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis((self.0 >> RANDOM_BITS) + EPOCH_MILLIS)
    }
}

impl From<u64> for Snowflake {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut buf = [b'0'; STRING_LEN];
        let mut value = self.0;
        for slot in buf.iter_mut().rev() {
            *slot = DIGITS[(value % 36) as usize];
            value /= 36;
        }

        // buf holds ASCII digits only
        f.write_str(std::str::from_utf8(&buf).map_err(|_| fmt::Error)?)
    }
}

/// The string is not a base36 snowflake.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid snowflake: {0:?}")]
pub struct ParseSnowflakeError(String);

impl FromStr for Snowflake {
    type Err = ParseSnowflakeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.len() > STRING_LEN || !s.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(ParseSnowflakeError(s.to_string()));
        }
        if s.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(ParseSnowflakeError(s.to_string()));
        }

        u64::from_str_radix(s, 36).map(Self).map_err(|_| ParseSnowflakeError(s.to_string()))
    }
}

impl Serialize for Snowflake {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Snowflake {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(D::Error::custom)
    }
}
