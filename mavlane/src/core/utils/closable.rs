//! # Close flags for background tasks
//!
//! A [`Closer`] is owned by whoever controls the lifetime of a background task (a receive loop,
//! a worker thread). The task itself receives a read-only [`Closable`] and stops once the closer is
//! closed or dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Owning side of a close flag.
///
/// The flag is raised by [`Closer::close`] or when the closer goes out of scope. This struct is
/// intentionally not [`Clone`].
///
/// ```rust
/// use mavlane::core::utils::Closer;
///
/// let closer = Closer::new();
/// let closable = closer.to_closable();
/// assert!(!closable.is_closed());
///
/// drop(closer);
/// assert!(closable.is_closed());
/// ```
#[derive(Debug)]
#[must_use]
pub struct Closer(Arc<AtomicBool>);

/// Read-only view of a [`Closer`].
#[derive(Clone, Debug)]
pub struct Closable(Arc<AtomicBool>);

impl Closer {
    /// Creates an open flag.
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Returns a read-only view of this flag.
    pub fn to_closable(&self) -> Closable {
        Closable(self.0.clone())
    }

    /// Raises the flag.
    pub fn close(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns `true` if the flag is raised.
    pub fn is_closed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl Default for Closer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Closer {
    fn drop(&mut self) {
        self.close();
    }
}

impl Closable {
    /// Returns `true` if the owning [`Closer`] was closed or dropped.
    pub fn is_closed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

///////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Tests                                               //
///////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_close_is_visible_to_all_views() {
        let closer = Closer::new();
        let first = closer.to_closable();
        let second = first.clone();

        closer.close();

        assert!(closer.is_closed());
        assert!(first.is_closed());
        assert!(second.is_closed());
    }
}
