//! # Mavlane
//!
//! A ground-side [MAVLink](https://mavlink.io/en/) transport and protocol engine. Mavlane lets an
//! application talk to one or more remote autopilots and peripherals over UDP, TCP or serial links
//! and takes care of the stateful parts of the protocol:
//!
//! * connection and channel multiplexing, so many frame parsers can share one process,
//! * per-remote message routing and component discovery driven by heartbeats,
//! * one-shot timeouts and periodic callbacks that drive every retry and keepalive,
//! * the [command](https://mavlink.io/en/services/command.html) protocol with retries and
//!   `IN_PROGRESS` acknowledgements,
//! * the [parameter](https://mavlink.io/en/services/parameter.html) protocol (standard and
//!   extended),
//! * the [mission](https://mavlink.io/en/services/mission.html) transfer protocol: upload,
//!   download, clear and set-current, with progress reporting and cancellation.
//!
//! Mavlane is based on [Mavio](https://gitlab.com/mavka/libs/mavio) which provides MAVLink frame
//! encoding and decoding.
//!
//! # Usage
//!
//! ```rust,no_run
//! use mavlane::prelude::*;
//!
//! let hub = Hub::new(HubConf::default());
//! hub.add_connection("udp://:14540").unwrap();
//!
//! hub.subscribe_on_new_system(|system| {
//!     log::info!("discovered system #{}", system.system_id());
//! });
//! ```
//!
//! # Features
#![doc = document_features::document_features!()]
#![warn(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod consts;
pub mod core;
pub mod errors;
pub mod prelude;
pub mod protocol;
pub mod sync;
pub mod system;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

#[doc(inline = true)]
pub extern crate mavio;

#[doc(inline = true)]
pub use mavio::dialects;
