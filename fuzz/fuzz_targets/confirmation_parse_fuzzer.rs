//! Fuzz target for ResetConfirmation::parse
//!
//! Arbitrary strings must either parse or fail with `InvalidConfirmationCode`.
//! A parsed confirmation must never authorize a request it was not issued
//! for.

#![no_main]

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use libfuzzer_sys::fuzz_target;
use parlor_core::{Environment, Error, LocalKms, PasswordResetRequest, ResetConfirmation, Snowflake};

/// Deterministic environment so crashes reproduce.
#[derive(Clone)]
struct FixedEnv;

impl Environment for FixedEnv {
    fn now(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        for (i, byte) in buffer.iter_mut().enumerate() {
            *byte = i as u8;
        }
    }
}

fuzz_target!(|data: &str| {
    let confirmation = match ResetConfirmation::parse(data) {
        Ok(confirmation) => confirmation,
        Err(Error::InvalidConfirmationCode) => return,
        Err(e) => panic!("unexpected parse error: {e:?}"),
    };

    let env = FixedEnv;
    let kms = LocalKms::new(FixedEnv);
    let Ok(request) =
        PasswordResetRequest::generate(&kms, &env, Snowflake::from(1), Duration::from_secs(60))
    else {
        return;
    };

    if request.authorize(&confirmation, env.now()).is_ok() {
        assert_eq!(data, request.confirmation(), "forged confirmation accepted");
    }
});
