//! # MAVLink protocols
//!
//! Request/acknowledgement protocols run against a single remote system:
//!
//! * [`command`]: `COMMAND_LONG` / `COMMAND_INT` with retries and `IN_PROGRESS` support,
//! * [`params`]: standard and extended parameter get/set,
//! * [`mission`]: upload, download, clear and set-current of mission items.
//!
//! Every protocol keeps at most one request in flight. Results are delivered to callbacks exactly
//! once, outside of any internal lock.

pub mod command;
pub mod messages;
pub mod mission;
pub mod params;

use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Receives progress of a long-running request as a value in `[0.0, 1.0]`.
///
/// Commands report `NaN` when the remote does not tell the progress.
pub type ProgressCallback = Arc<dyn Fn(f32) + Send + Sync>;

/// Single-use result receiver.
///
/// Consumed by [`Completion::complete`], so a result can't be delivered twice.
pub struct Completion<T>(Box<dyn FnOnce(T) + Send>);

impl<T> Completion<T> {
    /// Wraps a callback.
    pub fn new<F: FnOnce(T) + Send + 'static>(callback: F) -> Self {
        Self(Box::new(callback))
    }

    /// Delivers the result.
    pub fn complete(self, result: T) {
        (self.0)(result)
    }
}

impl<T> Debug for Completion<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("Completion")
    }
}
