//! # Thread-based runtime
//!
//! Connections with their receive threads, scheduling primitives ticked by per-remote workers,
//! and the work queue used by protocols.

pub mod io;
pub mod scheduling;
pub mod utils;
