use std::net::{SocketAddr, UdpSocket};
use std::sync::{Arc, Mutex, MutexGuard};

use mavio::protocol::SystemId;

use crate::consts::{RECEIVE_BUFFER_SIZE, RECEIVE_POLL_INTERVAL};
use crate::core::channels::ChannelAllocator;
use crate::core::io::{ConnectionDetails, ConnectionInfo, OutgoingFrame};
use crate::core::parser::FrameParser;
use crate::core::utils::net::{is_timeout, resolve_socket_addr};
use crate::sync::io::{encode_frame, Connection, FrameCallback, ReceiveTask};

use crate::prelude::*;

/// UDP connection.
///
/// Binds a local socket and learns peers from incoming traffic: the first frame received from a
/// socket address registers that address together with the frame's system `ID`. Frames targeted
/// at a system go only to peers with that system `ID`, other frames go to every known peer.
pub struct UdpConnection {
    info: ConnectionInfo,
    bind_addr: SocketAddr,
    channels: Arc<ChannelAllocator>,
    callback: FrameCallback,
    socket: Option<UdpSocket>,
    remotes: Arc<Mutex<Vec<UdpRemote>>>,
    task: Option<ReceiveTask>,
}

#[derive(Clone, Debug, PartialEq)]
struct UdpRemote {
    addr: SocketAddr,
    system_id: Option<SystemId>,
}

impl UdpConnection {
    /// Creates a connection that will bind to `host:port`.
    pub fn new(
        host: &str,
        port: u16,
        channels: Arc<ChannelAllocator>,
        callback: FrameCallback,
    ) -> Result<Self> {
        let bind_addr = resolve_socket_addr(host, port)?;
        Ok(Self {
            info: ConnectionInfo::new(ConnectionDetails::Udp { bind_addr }),
            bind_addr,
            channels,
            callback,
            socket: None,
            remotes: Arc::new(Mutex::new(Vec::new())),
            task: None,
        })
    }

    /// Adds a peer before it has sent anything, so frames can be sent to it first.
    pub fn add_remote(&self, addr: SocketAddr) {
        let mut remotes = lock_remotes(&self.remotes);
        if !remotes.iter().any(|remote| remote.addr == addr) {
            log::debug!("[{:?}] added remote {addr}", self.info);
            remotes.push(UdpRemote {
                addr,
                system_id: None,
            });
        }
    }

    /// Local address of the bound socket.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket
            .as_ref()
            .and_then(|socket| socket.local_addr().ok())
    }

    /// Known peers and their system `ID`s.
    pub fn remotes(&self) -> Vec<(SocketAddr, Option<SystemId>)> {
        lock_remotes(&self.remotes)
            .iter()
            .map(|remote| (remote.addr, remote.system_id))
            .collect()
    }

    fn receive_loop(
        info: ConnectionInfo,
        socket: UdpSocket,
        mut parser: FrameParser,
        remotes: Arc<Mutex<Vec<UdpRemote>>>,
        callback: FrameCallback,
        closable: crate::core::utils::Closable,
    ) {
        let mut buf = [0u8; RECEIVE_BUFFER_SIZE];

        while !closable.is_closed() {
            let (bytes_read, addr) = match socket.recv_from(buf.as_mut_slice()) {
                Ok(received) => received,
                Err(err) if is_timeout(&err) => continue,
                Err(err) => {
                    if !closable.is_closed() {
                        log::warn!("[{info:?}] receive error: {err:?}");
                    }
                    continue;
                }
            };

            parser.push(&buf[..bytes_read]);
            while let Some(frame) = parser.next_frame() {
                learn_remote(&info, &remotes, addr, frame.system_id());
                callback(frame);
            }
        }

        log::trace!("[{info:?}] receive loop stopped");
    }
}

fn lock_remotes(remotes: &Mutex<Vec<UdpRemote>>) -> MutexGuard<'_, Vec<UdpRemote>> {
    remotes.lock().unwrap_or_else(|err| err.into_inner())
}

fn learn_remote(
    info: &ConnectionInfo,
    remotes: &Mutex<Vec<UdpRemote>>,
    addr: SocketAddr,
    system_id: SystemId,
) {
    let mut remotes = lock_remotes(remotes);
    match remotes.iter_mut().find(|remote| remote.addr == addr) {
        Some(remote) => {
            if remote.system_id.is_none() {
                remote.system_id = Some(system_id);
            }
        }
        None => {
            log::info!("[{info:?}] new remote {addr} (system #{system_id})");
            remotes.push(UdpRemote {
                addr,
                system_id: Some(system_id),
            });
        }
    }
}

impl Connection for UdpConnection {
    fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    fn start(&mut self) -> Result<()> {
        if self.task.is_some() {
            return Ok(());
        }

        let socket = UdpSocket::bind(self.bind_addr)?;
        socket.set_read_timeout(Some(RECEIVE_POLL_INTERVAL))?;
        let recv_socket = socket.try_clone()?;
        let parser = FrameParser::new(self.channels.checkout()?);

        let info = self.info.clone();
        let remotes = self.remotes.clone();
        let callback = self.callback.clone();
        let task = ReceiveTask::spawn(&self.info, move |closable| {
            Self::receive_loop(info, recv_socket, parser, remotes, callback, closable)
        })?;

        log::info!("[{:?}] started", self.info);
        self.socket = Some(socket);
        self.task = Some(task);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut task) = self.task.take() {
            task.signal();
            self.socket = None;
            task.join(&self.info);
            log::info!("[{:?}] stopped", self.info);
        }
    }

    fn is_running(&self) -> bool {
        self.task.is_some()
    }

    fn send(&self, frame: &OutgoingFrame) -> bool {
        let socket = match &self.socket {
            Some(socket) => socket,
            None => return false,
        };
        let bytes = match encode_frame(frame.frame()) {
            Ok(bytes) => bytes,
            Err(err) => {
                log::warn!("[{:?}] can't encode frame: {err:?}", self.info);
                return false;
            }
        };

        let remotes = lock_remotes(&self.remotes);
        let mut sent = false;
        for remote in remotes
            .iter()
            .filter(|remote| frame.should_reach(remote.system_id))
        {
            match socket.send_to(&bytes, remote.addr) {
                Ok(_) => sent = true,
                Err(err) => log::warn!("[{:?}] send to {} failed: {err:?}", self.info, remote.addr),
            }
        }
        sent
    }
}

impl Drop for UdpConnection {
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
    use std::sync::mpsc;
    use std::time::Duration;

    use crate::test_utils::{encode_frame as encode, heartbeat_frame, init_logger, unused_port};

    fn connection(
        channels: &Arc<ChannelAllocator>,
    ) -> (UdpConnection, mpsc::Receiver<mavio::Frame<mavio::protocol::V2>>) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let callback: FrameCallback = Arc::new(move |frame| {
            let _ = tx.lock().unwrap().send(frame);
        });
        let connection =
            UdpConnection::new("127.0.0.1", unused_port(), channels.clone(), callback).unwrap();
        (connection, rx)
    }

    #[test]
    fn learns_remotes_and_routes_by_system_id() {
        init_logger();
        let channels = Arc::new(ChannelAllocator::new(4));
        let (mut connection, frames) = connection(&channels);
        connection.start().unwrap();
        let local = connection.local_addr().unwrap();

        let peer_a = UdpSocket::bind("127.0.0.1:0").unwrap();
        let peer_b = UdpSocket::bind("127.0.0.1:0").unwrap();
        peer_a.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
        peer_b.set_read_timeout(Some(Duration::from_millis(200))).unwrap();

        peer_a.send_to(&encode(&heartbeat_frame(1, 1, 0)), local).unwrap();
        peer_b.send_to(&encode(&heartbeat_frame(2, 1, 0)), local).unwrap();
        for _ in 0..2 {
            frames.recv_timeout(Duration::from_secs(1)).unwrap();
        }
        assert_eq!(connection.remotes().len(), 2);

        let to_b = OutgoingFrame::targeted(heartbeat_frame(245, 190, 0), 2);
        assert!(connection.send(&to_b));

        let mut buf = [0u8; 512];
        assert!(peer_b.recv_from(&mut buf).is_ok());
        assert!(peer_a.recv_from(&mut buf).is_err());

        let broadcast = OutgoingFrame::broadcast(heartbeat_frame(245, 190, 1));
        assert!(connection.send(&broadcast));
        assert!(peer_a.recv_from(&mut buf).is_ok());
        assert!(peer_b.recv_from(&mut buf).is_ok());

        connection.stop();
    }

    #[test]
    fn sends_to_added_remote_first() {
        init_logger();
        let channels = Arc::new(ChannelAllocator::new(1));
        let (mut connection, frames) = connection(&channels);
        connection.start().unwrap();
        let local = connection.local_addr().unwrap();

        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        peer.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
        connection.add_remote(peer.local_addr().unwrap());
        connection.add_remote(peer.local_addr().unwrap());
        assert_eq!(connection.remotes(), vec![(peer.local_addr().unwrap(), None)]);

        // Unknown system id still receives targeted frames.
        let targeted = OutgoingFrame::targeted(heartbeat_frame(245, 190, 0), 3);
        assert!(connection.send(&targeted));
        let mut buf = [0u8; 512];
        assert!(peer.recv_from(&mut buf).is_ok());

        peer.send_to(&encode(&heartbeat_frame(3, 1, 0)), local).unwrap();
        frames.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(connection.remotes(), vec![(peer.local_addr().unwrap(), Some(3))]);

        connection.stop();
    }

    #[test]
    fn stop_releases_channel() {
        init_logger();
        let channels = Arc::new(ChannelAllocator::new(1));
        let (mut connection, _frames) = connection(&channels);

        connection.start().unwrap();
        assert_eq!(channels.in_use(), 1);
        assert!(connection.is_running());

        connection.stop();
        assert_eq!(channels.in_use(), 0);
        assert!(!connection.is_running());
        assert!(!connection.send(&OutgoingFrame::broadcast(heartbeat_frame(245, 190, 0))));
    }

    #[test]
    fn start_fails_when_channels_are_exhausted() {
        init_logger();
        let channels = Arc::new(ChannelAllocator::new(1));
        let _taken = channels.checkout().unwrap();
        let (mut connection, _frames) = connection(&channels);

        assert!(matches!(connection.start(), Err(Error::ChannelsExhausted)));
        assert!(!connection.is_running());
    }
}
