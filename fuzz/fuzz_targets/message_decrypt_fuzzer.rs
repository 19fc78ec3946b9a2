//! Fuzz target for decrypt_message
//!
//! Feeds attacker-controlled message content and key ids to the decoder.
//!
//! # Invariants
//!
//! - Decryption never panics
//! - An untouched message always decrypts to its original content
//! - General viewers never see a client address

#![no_main]

use std::collections::HashMap;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use parlor_core::{
    EncryptionKeyId, KeyId, KeyType, ManagedKey, Message, PrivilegeLevel, SessionView, Snowflake,
    decrypt_message, encrypt_message,
};

#[derive(Debug, Arbitrary)]
struct Scenario {
    key: [u8; 32],
    id: u64,
    sender_id: String,
    client_address: Option<String>,
    content: String,
    /// Raw content substituted for the encrypted content
    forged_content: Option<String>,
    /// Raw wire key id substituted for the real one
    forged_key_id: Option<String>,
    truncated: bool,
    staff: bool,
}

fuzz_target!(|scenario: Scenario| {
    let Ok(key) = ManagedKey::from_plaintext(KeyType::XChaCha20Poly1305, &scenario.key) else {
        return;
    };
    let key_id = KeyId::from("fuzz");
    let keys = HashMap::from([(key_id.clone(), key.clone())]);

    let msg = Message {
        id: Snowflake::from(scenario.id),
        parent: None,
        time: 0,
        sender: SessionView {
            id: scenario.sender_id,
            client_address: scenario.client_address,
            ..SessionView::default()
        },
        content: scenario.content.clone(),
        encryption_key_id: None,
        truncated: false,
    };
    let Ok(mut encrypted) = encrypt_message(&msg, &key_id, &key) else {
        return;
    };

    let untouched = scenario.forged_content.is_none()
        && scenario.forged_key_id.is_none()
        && !scenario.truncated;
    if let Some(content) = scenario.forged_content {
        encrypted.content = content;
    }
    if let Some(wire) = scenario.forged_key_id {
        encrypted.encryption_key_id = EncryptionKeyId::parse(&wire);
    }
    encrypted.truncated = scenario.truncated;

    let level = if scenario.staff { PrivilegeLevel::Staff } else { PrivilegeLevel::General };
    let result = decrypt_message(&encrypted, &keys, level);

    if untouched {
        let Ok(decrypted) = &result else {
            panic!("untouched message failed to decrypt: {result:?}");
        };
        assert_eq!(decrypted.content, scenario.content);
    }
    if let (Ok(decrypted), PrivilegeLevel::General) = (&result, level) {
        assert!(decrypted.sender.client_address.is_none(), "client address leaked");
    }
});
