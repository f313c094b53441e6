//! # Mission transfer protocol
//!
//! Moves lists of [`MissionItem`]s between us and a remote system:
//!
//! * upload: `MISSION_COUNT`, then the remote requests each item with `MISSION_REQUEST_INT`, then
//!   acknowledges the whole list with `MISSION_ACK`,
//! * download: `MISSION_REQUEST_LIST`, the remote answers with `MISSION_COUNT`, then we request
//!   each item and acknowledge the list,
//! * clear: `MISSION_CLEAR_ALL` until acknowledged,
//! * set current: `MISSION_SET_CURRENT` until `MISSION_CURRENT` reports the requested index.
//!
//! Transfers of one remote run one at a time through [`MissionTransferClient`]. Every transfer
//! can be cancelled through its [`TransferHandle`].

mod clear;
mod client;
mod download;
mod item;
mod result;
mod set_current;
mod upload;
mod work;

#[doc(inline)]
pub use client::{MissionTransferClient, TransferHandle};
#[doc(inline)]
pub use item::MissionItem;
#[doc(inline)]
pub use result::{MissionError, MissionResult};
