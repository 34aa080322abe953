//! Simulated environment: a virtual clock that only moves when told to, and
//! a seeded RNG.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use hushline_core::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Deterministic [`Environment`] for simulation.
///
/// Clones share the same clock and RNG, so a driver and the test that owns
/// it observe the same time.
#[derive(Clone)]
pub struct SimEnv {
    epoch: Instant,
    clock: Arc<Mutex<Instant>>,
    rng: Arc<Mutex<ChaCha20Rng>>,
}

impl SimEnv {
    /// Create an environment whose randomness is fixed by `seed`.
    pub fn with_seed(seed: u64) -> Self {
        let epoch = Instant::now();
        Self {
            epoch,
            clock: Arc::new(Mutex::new(epoch)),
            rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        *lock(&self.clock) += by;
    }

    /// Move the clock to `at`. Earlier instants are ignored.
    pub fn advance_to(&self, at: Instant) {
        let mut clock = lock(&self.clock);
        if at > *clock {
            *clock = at;
        }
    }

    /// Virtual time since creation.
    pub fn elapsed(&self) -> Duration {
        *lock(&self.clock) - self.epoch
    }
}

impl Environment for SimEnv {
    fn now(&self) -> Instant {
        *lock(&self.clock)
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        self.advance(duration);
        std::future::ready(())
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        lock(&self.rng).fill_bytes(buffer);
    }
}

impl std::fmt::Debug for SimEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimEnv").field("elapsed", &self.elapsed()).finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
