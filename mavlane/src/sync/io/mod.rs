//! # Connections
//!
//! A connection owns a transport, a receive thread and a [`FrameParser`](crate::core::FrameParser)
//! bound to a channel from the shared [`ChannelAllocator`](crate::core::ChannelAllocator).
//! Decoded frames are handed to a [`FrameCallback`].

mod connection;
#[cfg(feature = "serial")]
mod serial;
mod tcp;
mod udp;

#[doc(inline)]
pub use connection::{build_connection, Connection, FrameCallback};
#[cfg(feature = "serial")]
#[doc(inline)]
pub use serial::SerialConnection;
#[doc(inline)]
pub use tcp::TcpConnection;
#[doc(inline)]
pub use udp::UdpConnection;

pub(crate) use connection::{encode_frame, ReceiveTask};
