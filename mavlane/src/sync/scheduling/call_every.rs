use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::core::time::Clock;
use crate::core::utils::{Arena, Cookie};

type PeriodicCallback = Arc<Mutex<Box<dyn FnMut() + Send>>>;

/// Periodic callback registered in a [`CallEveryHandler`].
pub struct CallEveryEntry {
    callback: PeriodicCallback,
    interval: Duration,
    last_fired: Option<Instant>,
}

/// Handle of a [`CallEveryEntry`].
pub type CallEveryCookie = Cookie<CallEveryEntry>;

/// Periodic callbacks with adjustable intervals.
///
/// A new entry fires on the first [`CallEveryHandler::run_once`] after registration, then once
/// per interval. After firing, the last-fired time advances by exactly one interval, so a delayed
/// tick does not shift the schedule.
pub struct CallEveryHandler {
    clock: Arc<dyn Clock>,
    entries: Mutex<Arena<CallEveryEntry>>,
}

impl CallEveryHandler {
    /// Creates an empty handler that reads time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(Arena::new()),
        }
    }

    /// Registers `callback` to run every `interval`.
    pub fn add<F>(&self, callback: F, interval: Duration) -> CallEveryCookie
    where
        F: FnMut() + Send + 'static,
    {
        let entry = CallEveryEntry {
            callback: Arc::new(Mutex::new(Box::new(callback))),
            interval,
            last_fired: None,
        };
        self.lock().insert(entry)
    }

    /// Changes the interval. Takes effect from the next firing.
    pub fn change(&self, interval: Duration, cookie: CallEveryCookie) -> bool {
        match self.lock().get_mut(cookie) {
            Some(entry) => {
                entry.interval = interval;
                true
            }
            None => false,
        }
    }

    /// Treats now as the last firing time.
    pub fn reset(&self, cookie: CallEveryCookie) -> bool {
        let now = self.clock.now();
        match self.lock().get_mut(cookie) {
            Some(entry) => {
                entry.last_fired = Some(now);
                true
            }
            None => false,
        }
    }

    /// Removes the entry.
    pub fn remove(&self, cookie: CallEveryCookie) -> bool {
        self.lock().remove(cookie).is_some()
    }

    /// Number of registered entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Runs every callback whose interval has elapsed since it last fired.
    pub fn run_once(&self) {
        let now = self.clock.now();
        let due: Vec<CallEveryCookie> = self
            .lock()
            .iter()
            .filter(|(_, entry)| is_due(entry, now))
            .map(|(cookie, _)| cookie)
            .collect();

        for cookie in due {
            let callback = {
                let mut entries = self.lock();
                match entries.get_mut(cookie) {
                    Some(entry) if is_due(entry, now) => {
                        entry.last_fired = Some(match entry.last_fired {
                            Some(last_fired) => last_fired + entry.interval,
                            None => now,
                        });
                        Some(entry.callback.clone())
                    }
                    _ => None,
                }
            };

            if let Some(callback) = callback {
                let mut callback = callback.lock().unwrap_or_else(|err| err.into_inner());
                (*callback)();
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Arena<CallEveryEntry>> {
        self.entries.lock().unwrap_or_else(|err| err.into_inner())
    }
}

fn is_due(entry: &CallEveryEntry, now: Instant) -> bool {
    match entry.last_fired {
        Some(last_fired) => now.saturating_duration_since(last_fired) > entry.interval,
        None => true,
    }
}

impl Debug for CallEveryHandler {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallEveryHandler")
            .field("entries", &self.len())
            .finish()
    }
}

///////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Tests                                               //
///////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::core::time::FakeClock;

    fn handler() -> (FakeClock, Arc<CallEveryHandler>) {
        let clock = FakeClock::new();
        let handler = Arc::new(CallEveryHandler::new(Arc::new(clock.clone())));
        (clock, handler)
    }

    fn counting(count: &Arc<AtomicUsize>) -> impl FnMut() + Send + 'static {
        let count = count.clone();
        move || {
            count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn fires_once_per_interval_regardless_of_tick_rate() {
        let (clock, handler) = handler();
        let count = Arc::new(AtomicUsize::new(0));
        handler.add(counting(&count), Duration::from_millis(100));

        handler.run_once();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // 10 ms ticks for one second.
        for _ in 0..100 {
            clock.advance(Duration::from_millis(10));
            handler.run_once();
            handler.run_once();
        }
        // Fires when strictly more than an interval has passed.
        let fired = count.load(Ordering::SeqCst);
        assert!((10..=11).contains(&fired), "fired {fired} times");
    }

    #[test]
    fn delayed_tick_does_not_drift() {
        let (clock, handler) = handler();
        let count = Arc::new(AtomicUsize::new(0));
        handler.add(counting(&count), Duration::from_millis(100));
        handler.run_once();

        // A late tick fires once and the schedule stays anchored to the original start.
        clock.advance(Duration::from_millis(250));
        handler.run_once();
        assert_eq!(count.load(Ordering::SeqCst), 2);

        clock.advance(Duration::from_millis(1));
        handler.run_once();
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn change_affects_future_firings() {
        let (clock, handler) = handler();
        let count = Arc::new(AtomicUsize::new(0));
        let cookie = handler.add(counting(&count), Duration::from_millis(100));
        handler.run_once();

        assert!(handler.change(Duration::from_millis(500), cookie));

        clock.advance(Duration::from_millis(200));
        handler.run_once();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_millis(301));
        handler.run_once();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn reset_and_remove() {
        let (clock, handler) = handler();
        let count = Arc::new(AtomicUsize::new(0));
        let cookie = handler.add(counting(&count), Duration::from_millis(100));
        assert!(handler.reset(cookie));

        clock.advance(Duration::from_millis(100));
        handler.run_once();
        assert_eq!(count.load(Ordering::SeqCst), 0);

        assert!(handler.remove(cookie));
        clock.advance(Duration::from_secs(1));
        handler.run_once();
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!handler.reset(cookie));
    }

    #[test]
    fn callback_may_remove_itself() {
        let (_clock, handler) = handler();
        let count = Arc::new(AtomicUsize::new(0));
        let cookie_slot: Arc<Mutex<Option<CallEveryCookie>>> = Arc::new(Mutex::new(None));

        let inner = handler.clone();
        let slot = cookie_slot.clone();
        let mut bump = counting(&count);
        let cookie = handler.add(
            move || {
                bump();
                if let Some(cookie) = *slot.lock().unwrap() {
                    inner.remove(cookie);
                }
            },
            Duration::from_millis(100),
        );
        *cookie_slot.lock().unwrap() = Some(cookie);

        handler.run_once();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(handler.is_empty());
    }
}
