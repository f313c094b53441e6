use std::fmt::{Debug, Formatter};
use std::net::SocketAddr;

use crate::core::io::ConnectionId;

/// <sup>[`serde`](https://serde.rs)</sup>
/// Information about a connection.
///
/// [`Debug`] prints only the connection details, so it can be used as a log prefix.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone)]
pub struct ConnectionInfo {
    id: ConnectionId,
    details: ConnectionDetails,
}

/// <sup>[`serde`](https://serde.rs)</sup>
/// Transport-specific details of a connection.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionDetails {
    /// UDP socket bound to a local address.
    Udp {
        /// Bind address.
        bind_addr: SocketAddr,
    },
    /// TCP client.
    Tcp {
        /// Remote server address.
        remote_addr: SocketAddr,
    },
    /// Serial port.
    Serial {
        /// Port path.
        path: String,
        /// Baud rate.
        baud_rate: u32,
        /// Hardware flow control.
        flow_control: bool,
    },
}

impl ConnectionInfo {
    pub(crate) fn new(details: ConnectionDetails) -> Self {
        Self {
            id: ConnectionId::new(),
            details,
        }
    }

    /// Connection `ID`.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Connection details.
    pub fn details(&self) -> &ConnectionDetails {
        &self.details
    }
}

impl Debug for ConnectionInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.details {
            ConnectionDetails::Udp { bind_addr } => write!(f, "udp:{bind_addr}"),
            ConnectionDetails::Tcp { remote_addr } => write!(f, "tcp:{remote_addr}"),
            ConnectionDetails::Serial {
                path, baud_rate, ..
            } => write!(f, "serial:{path}@{baud_rate}"),
        }
    }
}
