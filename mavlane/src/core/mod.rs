//! # Core abstractions
//!
//! Transport-agnostic building blocks: channel allocation, frame parsing, time and connection
//! addressing. Thread-based implementations that use them live in [`crate::sync`].

pub mod channels;
pub mod io;
pub mod parser;
pub mod time;
pub mod utils;

#[doc(inline)]
pub use channels::{Channel, ChannelAllocator};
#[doc(inline)]
pub use parser::FrameParser;
