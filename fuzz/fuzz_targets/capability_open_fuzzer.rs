//! Fuzz target for Capability::open and stored key envelopes
//!
//! Arbitrary capability JSON and envelope JSON must deserialize or fail
//! cleanly, and opening them under a fixed key must never panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use parlor_crypto::{Capability, KeyType, ManagedKey};

fuzz_target!(|data: &[u8]| {
    let Ok(recipient) = ManagedKey::from_plaintext(KeyType::XChaCha20Poly1305, &[0x42; 32]) else {
        return;
    };

    if let Ok(capability) = serde_json::from_slice::<Capability>(data) {
        let _ = capability.open(&recipient);
    }

    if let Ok(envelope) = serde_json::from_slice::<ManagedKey>(data) {
        let _ = envelope.decrypt(&recipient);
    }
});
