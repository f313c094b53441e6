//! # Time source
//!
//! Everything that measures time (timeouts, periodic callbacks, heartbeat tracking) reads it
//! through a [`Clock`]. Production code uses [`SystemClock`], tests step a [`FakeClock`] manually.

use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Source of monotonic time.
pub trait Clock: Debug + Send + Sync {
    /// Current instant.
    fn now(&self) -> Instant;

    /// Time elapsed since `since`, zero if `since` is in the future.
    fn elapsed(&self, since: Instant) -> Duration {
        self.now().saturating_duration_since(since)
    }
}

/// Real monotonic clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock.
///
/// Clones share the same time.
///
/// ```rust
/// use std::time::Duration;
/// use mavlane::core::time::{Clock, FakeClock};
///
/// let clock = FakeClock::new();
/// let start = clock.now();
///
/// clock.advance(Duration::from_millis(250));
/// assert_eq!(clock.elapsed(start), Duration::from_millis(250));
/// ```
#[derive(Clone, Debug)]
pub struct FakeClock {
    base: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl FakeClock {
    /// Creates a clock frozen at the current instant.
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Moves time forward.
    pub fn advance(&self, duration: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|err| err.into_inner());
        *offset += duration;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        let offset = self.offset.lock().unwrap_or_else(|err| err.into_inner());
        self.base + *offset
    }
}
