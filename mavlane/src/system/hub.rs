use std::collections::{BTreeMap, HashMap};
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use mavio::protocol::{SystemId, V2};
use mavio::Frame;

use crate::core::channels::ChannelAllocator;
use crate::core::io::{ConnectionId, ConnectionInfo, ConnectionUrl, OutgoingFrame};
use crate::sync::io::{build_connection, Connection, FrameCallback};
use crate::system::{FrameSink, HubConf, System};

use crate::prelude::*;

type NewSystemCallback = Arc<dyn Fn(Arc<System>) + Send + Sync>;

/// Entry point: owns connections and the systems discovered through them.
///
/// Frames from our own system `ID` and from system `0` are dropped. A [`System`] with its worker
/// thread is created on the first frame from a new system `ID`. Outgoing frames are offered to
/// every connection and count as sent if any connection accepted them.
///
/// ```rust,no_run
/// use mavlane::prelude::*;
///
/// let hub = Hub::new(HubConf::default());
/// let connection_id = hub.add_connection("udp://:14540").unwrap();
///
/// // ...
///
/// hub.remove_connection(connection_id);
/// ```
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    conf: HubConf,
    channels: Arc<ChannelAllocator>,
    connections: Mutex<HashMap<ConnectionId, Box<dyn Connection>>>,
    systems: Mutex<BTreeMap<SystemId, Arc<System>>>,
    new_system_listeners: Mutex<Vec<NewSystemCallback>>,
}

/// Frame sink handed to systems, sends through every connection of the hub.
struct HubSink {
    inner: Weak<HubInner>,
}

impl Hub {
    /// Creates a hub without connections.
    pub fn new(conf: HubConf) -> Self {
        let channels = Arc::new(ChannelAllocator::new(conf.channel_capacity()));
        Self {
            inner: Arc::new(HubInner {
                conf,
                channels,
                connections: Mutex::new(HashMap::new()),
                systems: Mutex::new(BTreeMap::new()),
                new_system_listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Configuration.
    pub fn conf(&self) -> &HubConf {
        &self.inner.conf
    }

    /// Parses a connection `URL`, then creates and starts the connection.
    ///
    /// See [`ConnectionUrl`] for the supported schemes.
    pub fn add_connection(&self, url: &str) -> Result<ConnectionId> {
        let url: ConnectionUrl = url.parse()?;
        self.add_connection_url(&url)
    }

    /// Creates and starts a connection for a parsed `URL`.
    pub fn add_connection_url(&self, url: &ConnectionUrl) -> Result<ConnectionId> {
        let inner = Arc::downgrade(&self.inner);
        let callback: FrameCallback = Arc::new(move |frame| {
            if let Some(inner) = inner.upgrade() {
                inner.route_frame(frame);
            }
        });

        let mut connection = build_connection(url, self.inner.channels.clone(), callback)?;
        connection.start()?;

        let id = connection.info().id();
        log::info!("[{:?}] connection added: {url}", connection.info());
        self.inner.connections().insert(id, connection);
        Ok(id)
    }

    /// Stops and removes a connection, returns `false` if it is unknown.
    pub fn remove_connection(&self, id: ConnectionId) -> bool {
        // Stopping joins the receive thread, which may be sending through this hub.
        let connection = self.inner.connections().remove(&id);
        match connection {
            Some(mut connection) => {
                connection.stop();
                log::info!("[{:?}] connection removed", connection.info());
                true
            }
            None => false,
        }
    }

    /// Information about active connections.
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.inner
            .connections()
            .values()
            .map(|connection| connection.info().clone())
            .collect()
    }

    /// Known systems, ordered by system `ID`.
    pub fn systems(&self) -> Vec<Arc<System>> {
        self.inner.systems().values().cloned().collect()
    }

    /// System with a particular `ID`, if any frame from it was received.
    pub fn system(&self, system_id: SystemId) -> Option<Arc<System>> {
        self.inner.systems().get(&system_id).cloned()
    }

    /// Calls `callback` for every newly created system, before the system receives its first
    /// frame.
    pub fn subscribe_on_new_system<F>(&self, callback: F)
    where
        F: Fn(Arc<System>) + Send + Sync + 'static,
    {
        self.inner
            .new_system_listeners()
            .push(Arc::new(callback));
    }

    /// Sends a frame through every connection.
    pub fn send(&self, frame: OutgoingFrame) -> bool {
        self.inner.send(&frame)
    }
}

impl HubInner {
    fn route_frame(self: &Arc<Self>, frame: Frame<V2>) {
        let system_id = frame.system_id();
        if system_id == 0 || system_id == self.conf.system_id() {
            log::trace!("dropping frame from system #{system_id}");
            return;
        }

        let (system, created) = match self.get_or_create_system(system_id) {
            Ok(entry) => entry,
            Err(err) => {
                log::error!("[#{system_id}] can't create system: {err}");
                return;
            }
        };

        if created {
            log::info!("[#{system_id}] new system");
            let listeners = self.new_system_listeners().clone();
            for listener in listeners {
                listener(system.clone());
            }
        }

        system.handle_frame(&frame);
    }

    fn get_or_create_system(self: &Arc<Self>, system_id: SystemId) -> Result<(Arc<System>, bool)> {
        let mut systems = self.systems();
        if let Some(system) = systems.get(&system_id) {
            return Ok((system.clone(), false));
        }

        let sink = Arc::new(HubSink {
            inner: Arc::downgrade(self),
        });
        let system = System::spawn(system_id, self.conf.clone(), sink)?;
        systems.insert(system_id, system.clone());
        Ok((system, true))
    }

    fn send(&self, frame: &OutgoingFrame) -> bool {
        let connections = self.connections();
        let mut sent = false;
        for connection in connections.values() {
            sent |= connection.send(frame);
        }
        sent
    }

    fn connections(&self) -> MutexGuard<'_, HashMap<ConnectionId, Box<dyn Connection>>> {
        self.connections
            .lock()
            .unwrap_or_else(|err| err.into_inner())
    }

    fn systems(&self) -> MutexGuard<'_, BTreeMap<SystemId, Arc<System>>> {
        self.systems.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn new_system_listeners(&self) -> MutexGuard<'_, Vec<NewSystemCallback>> {
        self.new_system_listeners
            .lock()
            .unwrap_or_else(|err| err.into_inner())
    }
}

impl FrameSink for HubSink {
    fn send_frame(&self, frame: OutgoingFrame) -> bool {
        match self.inner.upgrade() {
            Some(inner) => inner.send(&frame),
            None => false,
        }
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        let connections: Vec<_> = self.inner.connections().drain().collect();
        for (_, mut connection) in connections {
            connection.stop();
        }

        let systems: Vec<_> = std::mem::take(&mut *self.inner.systems())
            .into_values()
            .collect();
        for system in systems {
            system.stop();
        }
    }
}

impl Debug for Hub {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("connections", &self.connections())
            .field(
                "systems",
                &self.inner.systems().keys().copied().collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

///////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Tests                                               //
///////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket;
    use std::thread;
    use std::time::Duration;

    use crate::test_utils::{encode_frame, heartbeat_frame, init_logger, make_addr, unused_port};

    const WAIT: Duration = Duration::from_millis(100);

    #[test]
    fn invalid_url_is_rejected() {
        let hub = Hub::new(HubConf::default());

        assert!(matches!(
            hub.add_connection("ftp://localhost"),
            Err(Error::InvalidUrl { .. })
        ));
        assert!(hub.connections().is_empty());
    }

    #[test]
    fn creates_systems_on_first_frame() {
        init_logger();
        let hub = Hub::new(HubConf::default());
        let port = unused_port();
        let id = hub
            .add_connection(&format!("udp://127.0.0.1:{port}"))
            .unwrap();

        let created = Arc::new(Mutex::new(Vec::new()));
        let log = created.clone();
        hub.subscribe_on_new_system(move |system| log.lock().unwrap().push(system.system_id()));

        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        let hub_addr = make_addr(port);
        peer.send_to(&encode_frame(&heartbeat_frame(7, 1, 0)), &hub_addr)
            .unwrap();
        peer.send_to(&encode_frame(&heartbeat_frame(7, 100, 0)), &hub_addr)
            .unwrap();
        // Own system id and system 0 are ignored.
        peer.send_to(
            &encode_frame(&heartbeat_frame(hub.conf().system_id(), 1, 0)),
            &hub_addr,
        )
        .unwrap();
        peer.send_to(&encode_frame(&heartbeat_frame(0, 1, 0)), &hub_addr)
            .unwrap();
        thread::sleep(WAIT);

        assert_eq!(*created.lock().unwrap(), vec![7]);
        let system = hub.system(7).unwrap();
        assert_eq!(system.components(), vec![1, 100]);
        assert_eq!(hub.systems().len(), 1);

        assert!(hub.remove_connection(id));
        assert!(!hub.remove_connection(id));
        assert!(hub.connections().is_empty());
    }
}
