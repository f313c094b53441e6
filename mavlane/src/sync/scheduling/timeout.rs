use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::core::time::Clock;
use crate::core::utils::{Arena, Cookie};

/// One-shot deadline registered in a [`TimeoutHandler`].
pub struct TimeoutEntry {
    callback: Box<dyn FnOnce() + Send>,
    deadline: Instant,
    duration: Duration,
}

/// Handle of a [`TimeoutEntry`].
pub type TimeoutCookie = Cookie<TimeoutEntry>;

/// Cancellable and refreshable one-shot deadlines.
///
/// Entries fire from [`TimeoutHandler::run_once`]. A fired entry is removed before its callback
/// runs, and callbacks run without the internal lock held, so a callback may add, refresh or
/// remove entries.
///
/// ```rust
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::time::Duration;
/// use mavlane::core::time::FakeClock;
/// use mavlane::sync::scheduling::TimeoutHandler;
///
/// let clock = FakeClock::new();
/// let timeouts = TimeoutHandler::new(Arc::new(clock.clone()));
///
/// let fired = Arc::new(AtomicBool::new(false));
/// let flag = fired.clone();
/// timeouts.add(move || flag.store(true, Ordering::SeqCst), Duration::from_secs(1));
///
/// clock.advance(Duration::from_millis(999));
/// timeouts.run_once();
/// assert!(!fired.load(Ordering::SeqCst));
///
/// clock.advance(Duration::from_millis(1));
/// timeouts.run_once();
/// assert!(fired.load(Ordering::SeqCst));
/// ```
pub struct TimeoutHandler {
    clock: Arc<dyn Clock>,
    entries: Mutex<Arena<TimeoutEntry>>,
}

impl TimeoutHandler {
    /// Creates an empty handler that reads time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(Arena::new()),
        }
    }

    /// Schedules `callback` to run once `duration` elapses.
    pub fn add<F>(&self, callback: F, duration: Duration) -> TimeoutCookie
    where
        F: FnOnce() + Send + 'static,
    {
        let entry = TimeoutEntry {
            callback: Box::new(callback),
            deadline: self.clock.now() + duration,
            duration,
        };
        self.lock().insert(entry)
    }

    /// Moves the deadline to now plus the original duration.
    ///
    /// Returns `false` if the entry already fired or was removed.
    pub fn refresh(&self, cookie: TimeoutCookie) -> bool {
        let now = self.clock.now();
        match self.lock().get_mut(cookie) {
            Some(entry) => {
                entry.deadline = now + entry.duration;
                true
            }
            None => false,
        }
    }

    /// Removes the entry, it will never fire.
    ///
    /// Returns `false` if the entry already fired or was removed.
    pub fn remove(&self, cookie: TimeoutCookie) -> bool {
        self.lock().remove(cookie).is_some()
    }

    /// Returns `true` if the entry is still pending.
    pub fn contains(&self, cookie: TimeoutCookie) -> bool {
        self.lock().contains(cookie)
    }

    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Fires every entry whose deadline has passed.
    ///
    /// Entries added by callbacks during this call fire on a later call at the earliest.
    pub fn run_once(&self) {
        let now = self.clock.now();
        let due: Vec<TimeoutCookie> = self
            .lock()
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(cookie, _)| cookie)
            .collect();

        for cookie in due {
            // A previous callback may have refreshed or removed this entry.
            let entry = {
                let mut entries = self.lock();
                match entries.get(cookie) {
                    Some(entry) if entry.deadline <= now => entries.remove(cookie),
                    _ => None,
                }
            };

            if let Some(entry) = entry {
                (entry.callback)();
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Arena<TimeoutEntry>> {
        self.entries.lock().unwrap_or_else(|err| err.into_inner())
    }
}

impl Debug for TimeoutHandler {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutHandler")
            .field("pending", &self.len())
            .finish()
    }
}

///////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Tests                                               //
///////////////////////////////////////////////////////////////////////////////////////////////////
