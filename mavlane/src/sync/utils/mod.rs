//! Utils for the thread-based runtime.

mod work_queue;

#[doc(inline)]
pub use work_queue::{WorkQueue, WorkQueueGuard};
