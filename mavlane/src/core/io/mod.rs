//! # Connection addressing and routing
//!
//! Connection `URL`s, connection info used to tag logs, and outgoing frames with routing hints.

mod connection_info;
mod routing;
mod url;

#[doc(inline)]
pub use connection_info::{ConnectionDetails, ConnectionInfo};
#[doc(inline)]
pub use routing::{ConnectionId, OutgoingFrame};
#[doc(inline)]
pub use url::ConnectionUrl;
