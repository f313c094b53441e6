use std::sync::Arc;
use std::thread::{self, JoinHandle};

use mavio::protocol::V2;
use mavio::{Frame, Sender};

use crate::core::channels::ChannelAllocator;
use crate::core::io::{ConnectionInfo, ConnectionUrl, OutgoingFrame};
use crate::core::utils::{Closable, Closer};
use crate::sync::io::{TcpConnection, UdpConnection};

use crate::prelude::*;

/// Receiver of decoded frames.
///
/// Called on the receive thread of a connection.
pub type FrameCallback = Arc<dyn Fn(Frame<V2>) + Send + Sync>;

/// Transport that produces and consumes MAVLink frames.
///
/// Lifecycle: created, then [`Connection::start`] opens the transport, checks out a channel and
/// spawns the receive thread. [`Connection::stop`] signals the thread, closes the transport,
/// joins the thread and only then releases the channel.
pub trait Connection: Send + Sync {
    /// Information about this connection.
    fn info(&self) -> &ConnectionInfo;

    /// Opens the transport and starts receiving.
    ///
    /// Starting a running connection does nothing.
    fn start(&mut self) -> Result<()>;

    /// Stops receiving and closes the transport.
    fn stop(&mut self);

    /// Returns `true` between a successful start and stop.
    fn is_running(&self) -> bool;

    /// Sends a frame, returns `true` if at least one peer was reached.
    fn send(&self, frame: &OutgoingFrame) -> bool;
}

/// Creates a connection (not yet started) for a parsed `URL`.
pub fn build_connection(
    url: &ConnectionUrl,
    channels: Arc<ChannelAllocator>,
    callback: FrameCallback,
) -> Result<Box<dyn Connection>> {
    match url {
        ConnectionUrl::Udp { host, port } => Ok(Box::new(UdpConnection::new(
            host, *port, channels, callback,
        )?)),
        ConnectionUrl::Tcp { host, port } => Ok(Box::new(TcpConnection::new(
            host, *port, channels, callback,
        )?)),
        #[cfg(feature = "serial")]
        ConnectionUrl::Serial {
            path,
            baud_rate,
            flow_control,
        } => Ok(Box::new(crate::sync::io::SerialConnection::new(
            path,
            *baud_rate,
            *flow_control,
            channels,
            callback,
        ))),
        #[cfg(not(feature = "serial"))]
        ConnectionUrl::Serial { .. } => Err(Error::Unsupported(
            "serial connections require `serial` feature".to_string(),
        )),
    }
}

/// Serialises a frame into wire bytes.
pub(crate) fn encode_frame(frame: &Frame<V2>) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    Sender::new::<V2>(mavio::io::StdIoWriter::new(&mut bytes)).send(frame)?;
    Ok(bytes)
}

/// Receive thread with its close flag.
pub(crate) struct ReceiveTask {
    closer: Closer,
    handle: Option<JoinHandle<()>>,
}

impl ReceiveTask {
    pub(crate) fn spawn<F>(info: &ConnectionInfo, body: F) -> Result<Self>
    where
        F: FnOnce(Closable) + Send + 'static,
    {
        let closer = Closer::new();
        let closable = closer.to_closable();
        let handle = thread::Builder::new()
            .name(format!("mavlane-recv-{info:?}"))
            .spawn(move || body(closable))?;

        Ok(Self {
            closer,
            handle: Some(handle),
        })
    }

    /// Raises the close flag without waiting.
    pub(crate) fn signal(&self) {
        self.closer.close();
    }

    /// Waits for the thread to exit.
    pub(crate) fn join(&mut self, info: &ConnectionInfo) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("[{info:?}] receive thread panicked");
            }
        }
    }
}
