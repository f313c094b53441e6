//! # Scheduling primitives
//!
//! [`TimeoutHandler`] runs one-shot deadlines, [`CallEveryHandler`] runs periodic callbacks. Both
//! do nothing on their own: a worker calls `run_once` on every tick.

mod call_every;
mod timeout;

#[doc(inline)]
pub use call_every::{CallEveryCookie, CallEveryEntry, CallEveryHandler};
#[doc(inline)]
pub use timeout::{TimeoutCookie, TimeoutEntry, TimeoutHandler};
