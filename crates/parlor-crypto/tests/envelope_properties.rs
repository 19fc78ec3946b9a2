//! Property-based tests for key envelopes and capabilities
//!
//! These tests verify the invariants of the wrapping primitives:
//!
//! 1. **Round-trip**: decrypt(encrypt(k)) == k for every key, IV and context
//! 2. **State**: exactly one of plaintext/ciphertext is available
//! 3. **Binding**: a wrapped key does not open under another outer key
//! 4. **Capabilities**: a sealed key opens only for its recipient

use parlor_crypto::{
    Capability, Error, IV_SIZE, KEY_SIZE, KeyType, ManagedKey, aead, encoding, iv_from_nonce,
};
use proptest::prelude::*;

fn key_bytes() -> impl Strategy<Value = [u8; KEY_SIZE]> {
    prop::collection::vec(any::<u8>(), KEY_SIZE..=KEY_SIZE).prop_map(|v| {
        let mut arr = [0u8; KEY_SIZE];
        arr.copy_from_slice(&v);
        arr
    })
}

fn symmetric(bytes: &[u8; KEY_SIZE]) -> ManagedKey {
    ManagedKey::from_plaintext(KeyType::XChaCha20Poly1305, bytes).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_wrap_unwrap_roundtrip(
        inner in key_bytes(),
        outer in key_bytes(),
        nonce in prop::collection::vec(any::<u8>(), 0..40),
        context in prop::option::of(("[a-z]{1,8}", "[a-z0-9]{0,16}")),
    ) {
        let mut key = symmetric(&inner).with_iv(&iv_from_nonce(&nonce));
        if let Some((namespace, value)) = context {
            key = key.with_context(namespace, value);
        }
        let outer = symmetric(&outer);

        let wrapped = key.encrypt(&outer).unwrap();
        prop_assert!(wrapped.is_encrypted());
        prop_assert!(wrapped.plaintext().is_err());
        prop_assert_eq!(wrapped.context(), key.context());

        let unwrapped = wrapped.decrypt(&outer).unwrap();
        prop_assert!(unwrapped.ciphertext().is_err());
        prop_assert_eq!(unwrapped.plaintext().unwrap(), &inner[..]);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_wrong_outer_key_never_unwraps(
        inner in key_bytes(),
        outer in key_bytes(),
        other in key_bytes(),
    ) {
        prop_assume!(outer != other);
        let wrapped = symmetric(&inner)
            .with_iv(&[7; IV_SIZE])
            .encrypt(&symmetric(&outer))
            .unwrap();

        let result = wrapped.decrypt(&symmetric(&other));
        prop_assert!(matches!(result, Err(Error::AccessDenied)));
    }

    #[test]
    fn prop_serialized_envelope_has_no_plaintext(inner in key_bytes(), outer in key_bytes()) {
        let wrapped = symmetric(&inner)
            .with_iv(&[1; IV_SIZE])
            .encrypt(&symmetric(&outer))
            .unwrap();

        let json = serde_json::to_string(&wrapped).unwrap();
        prop_assert!(!json.contains(&encoding::encode(&inner)));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_capability_opens_only_for_recipient(
        shared in key_bytes(),
        recipient in key_bytes(),
        stranger in key_bytes(),
        iv in prop::collection::vec(any::<u8>(), IV_SIZE..=IV_SIZE),
    ) {
        prop_assume!(recipient != stranger);
        let capability =
            Capability::seal(&symmetric(&recipient), &iv, &symmetric(&shared)).unwrap();

        let opened = capability.open(&symmetric(&recipient)).unwrap();
        prop_assert_eq!(opened.plaintext().unwrap(), &shared[..]);

        let denied = capability.open(&symmetric(&stranger));
        prop_assert!(matches!(denied, Err(Error::AccessDenied)));
    }

    #[test]
    fn prop_detached_aead_roundtrip(
        key in key_bytes(),
        id in "[0-9a-z]{13}",
        plaintext in prop::collection::vec(any::<u8>(), 0..512),
        sender in "[a-z]{1,12}",
    ) {
        let key = symmetric(&key);
        let (digest, ciphertext) =
            aead::encrypt_detached(&key, id.as_bytes(), &plaintext, sender.as_bytes()).unwrap();

        let decrypted =
            aead::decrypt_detached(&key, id.as_bytes(), &digest, &ciphertext, sender.as_bytes())
                .unwrap();
        prop_assert_eq!(decrypted, plaintext);
    }
}
