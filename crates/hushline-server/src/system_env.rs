//! Production environment backed by the system clock, tokio timers and the
//! OS random source.

use std::time::{Duration, Instant};

use hushline_core::Environment;

/// Production environment.
///
/// Connection identifiers are drawn from `getrandom`, so they are not
/// guessable from outside the process.
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
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        if let Err(e) = getrandom::fill(buffer) {
            // Only connection ids come from here; a zeroed id is still
            // deduplicated by the driver.
            tracing::error!(error = %e, "getrandom failed");
            buffer.fill(0);
        }
    }
}
