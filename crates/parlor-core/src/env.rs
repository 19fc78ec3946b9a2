//! Environment abstraction for deterministic testing.
//!
//! Decouples the hierarchies from system resources (wall clock, randomness).
//! Production uses [`SystemEnv`]; tests substitute a seeded RNG and a manual
//! clock so snowflake ids, reset expiry and KMS output are reproducible.

use std::time::SystemTime;

/// Abstract environment providing time and randomness.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `random_bytes()` uses cryptographically secure entropy in production
/// - Methods are infallible except in exceptional circumstances (e.g., OS
///   entropy exhaustion)
pub trait Environment: Clone + Send + Sync + 'static {
    /// Current wall-clock time.
    ///
    /// Used for snowflake timestamps and reset expiry, both of which are
    /// persisted, so this is wall time rather than a monotonic instant.
    fn now(&self) -> SystemTime;

    /// Fills the provided buffer with random bytes.
    ///
    /// # Invariants
    ///
    /// - Given the same RNG seed, this produces the same sequence of bytes
    /// - Uses cryptographically secure RNG
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}

/// Production environment using the system clock and the OS RNG.
///
/// # Panics
///
/// Panics if the OS RNG fails. A process without functioning cryptographic
/// randomness cannot mint keys, nonces or reset tokens safely.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer)
            .expect("invariant: OS RNG failure is unrecoverable - cannot generate key material");
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Seeded environment for unit tests.

    use std::{
        sync::{Arc, Mutex},
        time::{Duration, SystemTime},
    };

    use rand::{RngCore, SeedableRng};
    use rand_chacha::ChaCha20Rng;

    use super::Environment;

    /// Deterministic environment: seeded `ChaCha20` RNG and a clock that only
    /// moves when told to.
    #[derive(Clone)]
    pub(crate) struct MockEnv {
        rng: Arc<Mutex<ChaCha20Rng>>,
        clock: Arc<Mutex<SystemTime>>,
    }

    impl MockEnv {
        /// 2024-01-01T00:00:00Z
        const START: u64 = 1_704_067_200;

        pub(crate) fn with_seed(seed: u64) -> Self {
            Self {
                rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
                clock: Arc::new(Mutex::new(
                    SystemTime::UNIX_EPOCH + Duration::from_secs(Self::START),
                )),
            }
        }

        pub(crate) fn advance(&self, duration: Duration) {
            *self.clock.lock().unwrap() += duration;
        }
    }

    impl Environment for MockEnv {
        fn now(&self) -> SystemTime {
            *self.clock.lock().unwrap()
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            self.rng.lock().unwrap().fill_bytes(buffer);
        }
    }
}
