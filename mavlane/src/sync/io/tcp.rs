use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use crate::consts::{RECEIVE_BUFFER_SIZE, RECEIVE_POLL_INTERVAL, RECONNECT_INTERVAL};
use crate::core::channels::ChannelAllocator;
use crate::core::io::{ConnectionDetails, ConnectionInfo, OutgoingFrame};
use crate::core::parser::FrameParser;
use crate::core::utils::net::{is_timeout, resolve_socket_addr};
use crate::core::utils::Closable;
use crate::sync::io::{encode_frame, Connection, FrameCallback, ReceiveTask};

use crate::prelude::*;

type SharedStream = Arc<Mutex<Option<TcpStream>>>;

/// TCP client connection.
///
/// Connects to a server on start. When the stream breaks mid-session, the receive loop keeps
/// reconnecting until the connection is stopped.
pub struct TcpConnection {
    info: ConnectionInfo,
    remote_addr: SocketAddr,
    channels: Arc<ChannelAllocator>,
    callback: FrameCallback,
    writer: SharedStream,
    task: Option<ReceiveTask>,
}

impl TcpConnection {
    /// Creates a connection to `host:port`.
    pub fn new(
        host: &str,
        port: u16,
        channels: Arc<ChannelAllocator>,
        callback: FrameCallback,
    ) -> Result<Self> {
        let remote_addr = resolve_socket_addr(host, port)?;
        Ok(Self {
            info: ConnectionInfo::new(ConnectionDetails::Tcp { remote_addr }),
            remote_addr,
            channels,
            callback,
            writer: Arc::new(Mutex::new(None)),
            task: None,
        })
    }

    fn connect(remote_addr: SocketAddr) -> Result<(TcpStream, TcpStream)> {
        let stream = TcpStream::connect(remote_addr)?;
        stream.set_read_timeout(Some(RECEIVE_POLL_INTERVAL))?;
        stream.set_nodelay(true)?;
        let reader = stream.try_clone()?;
        Ok((reader, stream))
    }

    fn receive_loop(
        info: ConnectionInfo,
        remote_addr: SocketAddr,
        mut reader: TcpStream,
        writer: SharedStream,
        mut parser: FrameParser,
        callback: FrameCallback,
        closable: Closable,
    ) {
        let mut buf = [0u8; RECEIVE_BUFFER_SIZE];

        while !closable.is_closed() {
            let err = match reader.read(buf.as_mut_slice()) {
                Ok(0) => None,
                Ok(bytes_read) => {
                    parser.push(&buf[..bytes_read]);
                    while let Some(frame) = parser.next_frame() {
                        callback(frame);
                    }
                    continue;
                }
                Err(err) if is_timeout(&err) => continue,
                Err(err) => Some(err),
            };

            if closable.is_closed() {
                break;
            }
            match err {
                Some(err) => log::warn!("[{info:?}] receive error: {err:?}, reconnecting"),
                None => log::warn!("[{info:?}] server closed the stream, reconnecting"),
            }

            match Self::reconnect(&info, remote_addr, &writer, &closable) {
                Some(stream) => reader = stream,
                None => break,
            }
        }

        log::trace!("[{info:?}] receive loop stopped");
    }

    fn reconnect(
        info: &ConnectionInfo,
        remote_addr: SocketAddr,
        writer: &SharedStream,
        closable: &Closable,
    ) -> Option<TcpStream> {
        lock_stream(writer).take();

        while !closable.is_closed() {
            thread::sleep(RECONNECT_INTERVAL);
            match Self::connect(remote_addr) {
                Ok((reader, stream)) => {
                    log::info!("[{info:?}] reconnected");
                    *lock_stream(writer) = Some(stream);
                    return Some(reader);
                }
                Err(err) => log::debug!("[{info:?}] reconnect failed: {err:?}"),
            }
        }
        None
    }
}

fn lock_stream(stream: &SharedStream) -> MutexGuard<'_, Option<TcpStream>> {
    stream.lock().unwrap_or_else(|err| err.into_inner())
}

impl Connection for TcpConnection {
    fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    fn start(&mut self) -> Result<()> {
        if self.task.is_some() {
            return Ok(());
        }

        let (reader, stream) = Self::connect(self.remote_addr)?;
        let parser = FrameParser::new(self.channels.checkout()?);
        *lock_stream(&self.writer) = Some(stream);

        let info = self.info.clone();
        let remote_addr = self.remote_addr;
        let writer = self.writer.clone();
        let callback = self.callback.clone();
        let task = ReceiveTask::spawn(&self.info, move |closable| {
            Self::receive_loop(info, remote_addr, reader, writer, parser, callback, closable)
        });
        let task = match task {
            Ok(task) => task,
            Err(err) => {
                lock_stream(&self.writer).take();
                return Err(err);
            }
        };

        log::info!("[{:?}] connected", self.info);
        self.task = Some(task);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut task) = self.task.take() {
            task.signal();
            if let Some(stream) = lock_stream(&self.writer).take() {
                let _ = stream.shutdown(Shutdown::Both);
            }
            task.join(&self.info);
            log::info!("[{:?}] stopped", self.info);
        }
    }

    fn is_running(&self) -> bool {
        self.task.is_some()
    }

    fn send(&self, frame: &OutgoingFrame) -> bool {
        let bytes = match encode_frame(frame.frame()) {
            Ok(bytes) => bytes,
            Err(err) => {
                log::warn!("[{:?}] can't encode frame: {err:?}", self.info);
                return false;
            }
        };

        match lock_stream(&self.writer).as_mut() {
            Some(stream) => match stream.write_all(&bytes) {
                Ok(_) => true,
                Err(err) => {
                    log::warn!("[{:?}] send failed: {err:?}", self.info);
                    false
                }
            },
            None => false,
        }
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        self.stop();
    }
}

///////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Tests                                               //
///////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::time::Duration;

    use crate::test_utils::{encode_frame as encode, heartbeat_frame, init_logger, unused_port};

    #[test]
    fn exchanges_frames_with_server() {
        init_logger();
        let port = unused_port();
        let listener = TcpListener::bind(("127.0.0.1", port)).unwrap();

        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let callback: FrameCallback = Arc::new(move |frame| {
            let _ = tx.lock().unwrap().send(frame);
        });
        let channels = Arc::new(ChannelAllocator::new(2));
        let mut connection =
            TcpConnection::new("127.0.0.1", port, channels.clone(), callback).unwrap();
        connection.start().unwrap();

        let (mut server_side, _) = listener.accept().unwrap();
        server_side
            .write_all(&encode(&heartbeat_frame(1, 1, 3)))
            .unwrap();
        let frame = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(frame.sequence(), 3);

        assert!(connection.send(&OutgoingFrame::broadcast(heartbeat_frame(245, 190, 9))));
        let mut buf = [0u8; 64];
        server_side
            .set_read_timeout(Some(Duration::from_secs(1)))
            .unwrap();
        assert!(server_side.read(&mut buf).unwrap() > 0);

        connection.stop();
        assert_eq!(channels.in_use(), 0);
    }

    #[test]
    fn start_fails_without_server() {
        init_logger();
        let callback: FrameCallback = Arc::new(|_| {});
        let channels = Arc::new(ChannelAllocator::new(2));
        let mut connection =
            TcpConnection::new("127.0.0.1", unused_port(), channels.clone(), callback).unwrap();

        assert!(matches!(connection.start(), Err(Error::Io(_))));
        assert_eq!(channels.in_use(), 0);
    }
}
