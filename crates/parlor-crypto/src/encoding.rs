//! Base64 encoding of byte fields in persisted structures.
//!
//! Every byte field (nonce, MAC, IV, ciphertext) is stored as URL-safe base64
//! with padding. Use with `#[serde(with = "parlor_crypto::encoding::base64")]`.

use ::base64::{Engine, engine::general_purpose::URL_SAFE};

/// Encode bytes as URL-safe base64.
pub fn encode(bytes: &[u8]) -> String {
    URL_SAFE.encode(bytes)
}

/// Decode URL-safe base64. `None` on malformed input.
pub fn decode(text: &str) -> Option<Vec<u8>> {
    URL_SAFE.decode(text).ok()
}

/// Serde adapter for `Vec<u8>` fields.
pub mod base64 {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    /// Serialize bytes as a base64 string.
    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::encode(bytes))
    }

    /// Deserialize a base64 string into bytes.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::decode(&text).ok_or_else(|| D::Error::custom("invalid base64"))
    }
}
