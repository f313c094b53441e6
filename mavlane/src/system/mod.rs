//! # Remote systems
//!
//! A [`Hub`] owns connections and routes every incoming frame to the [`System`] of its sender,
//! creating systems on first contact. Each system runs a worker thread that drives its
//! scheduling primitives and protocols through [`System::tick`].
//!
//! ## Discovery
//!
//! A system is [`RemoteState::Unknown`] until its first heartbeat, then
//! [`RemoteState::Discovering`] until it learns a stable identifier:
//!
//! * from `AUTOPILOT_VERSION`, requested from the autopilot component,
//! * from the system `ID`, when the autopilot never answers the identity request or when only
//!   non-autopilot components send heartbeats.
//!
//! Once identified it is [`RemoteState::Connected`]. When heartbeats stop for
//! [`HubConf::heartbeat_timeout`] it becomes [`RemoteState::Disconnected`] and reconnects on the
//! next heartbeat. Every connect and disconnect edge notifies subscribers and toggles attached
//! [`Plugin`]s.
//!
//! ## Plugins
//!
//! Features built on top of the core talk to a system through a narrow interface: message
//! handlers identified by an [`OwnerToken`], timeouts, periodic callbacks, message sending and
//! the command, parameter and mission protocols.

mod conf;
mod context;
mod handlers;
mod hub;
mod remote;

#[doc(inline)]
pub use conf::{HubConf, HubConfBuilder};
#[doc(inline)]
pub use context::{Autopilot, FrameSink, SystemContext};
#[doc(inline)]
pub use handlers::{MessageCallback, MessageHandlers, OwnerToken};
#[doc(inline)]
pub use hub::Hub;
#[doc(inline)]
pub use remote::{Plugin, RemoteState, System};
