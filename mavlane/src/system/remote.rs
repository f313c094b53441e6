use std::collections::BTreeSet;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use mavio::dialects::Common;
use mavio::protocol::{ComponentId, Message, MessageId, SystemId, V2};
use mavio::Frame;

use crate::consts::{
    AUTOPILOT_COMPONENT_ID, CAMERA_COMPONENT_ID, CONNECTED_TICK_INTERVAL,
    DISCONNECTED_TICK_INTERVAL, GIMBAL_COMPONENT_ID, IDENTITY_REQUEST_PENDING,
    IDENTITY_REQUEST_RETRIES, NON_AUTOPILOT_HEARTBEATS_FOR_IDENTITY,
};
use crate::core::io::OutgoingFrame;
use crate::core::utils::{Closable, Closer};
use crate::protocol::command::{Command, CommandLong, CommandParams, CommandSender};
use crate::protocol::messages::{gcs_heartbeat, ids, CAPABILITY_MISSION_INT, CMD_REQUEST_MESSAGE};
use crate::protocol::mission::MissionTransferClient;
use crate::protocol::params::ParamSender;
use crate::sync::scheduling::{CallEveryCookie, TimeoutCookie};
use crate::system::{
    Autopilot, FrameSink, HubConf, MessageCallback, OwnerToken, SystemContext,
};

use crate::prelude::*;

/// Connectivity of a remote system.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum RemoteState {
    /// No heartbeat seen yet.
    #[default]
    Unknown,
    /// Heartbeats arrive, the stable identifier is not known yet.
    Discovering,
    /// Heartbeats arrive and the stable identifier is known.
    Connected,
    /// Heartbeats stopped arriving.
    Disconnected,
}

/// Feature built on top of a [`System`].
///
/// A plugin is enabled every time the system connects and disabled every time it times out. It
/// talks to the remote through the system API and must remove its handlers with
/// [`System::unregister_all`] when disabled.
pub trait Plugin: Send + Sync {
    /// The system has connected.
    fn enable(&self, system: &System);

    /// The system has timed out.
    fn disable(&self, system: &System);
}

type DiscoveredCallback = Arc<dyn Fn(u64) + Send + Sync>;
type TimeoutCallback = Arc<dyn Fn() + Send + Sync>;
type ComponentCallback = Arc<dyn Fn(ComponentId) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    discovered: Vec<DiscoveredCallback>,
    timeout: Vec<TimeoutCallback>,
    component: Vec<ComponentCallback>,
}

#[derive(Default)]
struct Discovery {
    state: RemoteState,
    stable_id: Option<u64>,
    components: BTreeSet<ComponentId>,
    last_heartbeat: Option<Instant>,
    identity_requests: usize,
    identity_requested_at: Option<Instant>,
    foreign_heartbeats: usize,
}

enum Edge {
    Connected(u64),
    Disconnected,
}

struct Worker {
    closer: Closer,
    handle: Option<JoinHandle<()>>,
}

/// Remote system.
///
/// Routes frames of one remote to registered handlers, tracks its components and connectivity
/// from heartbeats, and owns the command, parameter and mission protocols of that remote.
///
/// Everything time-driven happens in [`System::tick`]: a worker thread calls it in a loop for
/// systems created by a [`Hub`](crate::system::Hub).
pub struct System {
    context: Arc<SystemContext>,
    owner: OwnerToken,
    commands: Arc<CommandSender>,
    params: Arc<ParamSender>,
    missions: Arc<MissionTransferClient>,
    discovery: Mutex<Discovery>,
    listeners: Mutex<Listeners>,
    plugins: Mutex<Vec<Arc<dyn Plugin>>>,
    heartbeat_cookie: CallEveryCookie,
    worker: Mutex<Option<Worker>>,
}

impl System {
    /// Creates a system without a worker thread. Time moves only when [`System::tick`] is called.
    pub(crate) fn new(system_id: SystemId, conf: HubConf, sink: Arc<dyn FrameSink>) -> Arc<Self> {
        let context = Arc::new(SystemContext::new(system_id, conf, sink));

        Arc::new_cyclic(|this: &Weak<System>| {
            let owner = OwnerToken::new();

            let handler = this.clone();
            context.handlers().register(
                ids::HEARTBEAT,
                Arc::new(move |frame| {
                    if let Some(system) = handler.upgrade() {
                        system.process_heartbeat(frame);
                    }
                }),
                owner,
            );
            let handler = this.clone();
            context.handlers().register(
                ids::AUTOPILOT_VERSION,
                Arc::new(move |frame| {
                    if let Some(system) = handler.upgrade() {
                        system.process_autopilot_version(frame);
                    }
                }),
                owner,
            );

            let heartbeat_context = Arc::downgrade(&context);
            let heartbeat_cookie = context.call_every().add(
                move || {
                    if let Some(context) = heartbeat_context.upgrade() {
                        log::trace!("[#{}] sending heartbeat", context.system_id());
                        context.broadcast_message(&gcs_heartbeat());
                    }
                },
                context.conf().heartbeat_interval(),
            );

            Self {
                commands: CommandSender::new(context.clone()),
                params: ParamSender::new(context.clone()),
                missions: MissionTransferClient::new(context.clone()),
                context,
                owner,
                discovery: Mutex::new(Discovery::default()),
                listeners: Mutex::new(Listeners::default()),
                plugins: Mutex::new(Vec::new()),
                heartbeat_cookie,
                worker: Mutex::new(None),
            }
        })
    }

    /// Creates a system and spawns its worker thread.
    pub(crate) fn spawn(
        system_id: SystemId,
        conf: HubConf,
        sink: Arc<dyn FrameSink>,
    ) -> Result<Arc<Self>> {
        let system = Self::new(system_id, conf, sink);
        system.start_worker()?;
        Ok(system)
    }

    /// System `ID` of the remote.
    pub fn system_id(&self) -> SystemId {
        self.context.system_id()
    }

    /// Stable identifier: the autopilot `UID`, or the system `ID` when the remote has none.
    pub fn stable_id(&self) -> Option<u64> {
        self.discovery().stable_id
    }

    /// Connectivity state.
    pub fn state(&self) -> RemoteState {
        self.discovery().state
    }

    /// Returns `true` while the system is connected.
    pub fn is_connected(&self) -> bool {
        self.state() == RemoteState::Connected
    }

    /// Component `ID`s that sent heartbeats, in ascending order.
    pub fn components(&self) -> Vec<ComponentId> {
        self.discovery().components.iter().copied().collect()
    }

    /// Returns `true` if the autopilot component sent a heartbeat.
    pub fn has_autopilot(&self) -> bool {
        self.discovery().components.contains(&AUTOPILOT_COMPONENT_ID)
    }

    /// Returns `true` if any of the six camera components sent a heartbeat.
    pub fn has_camera(&self) -> bool {
        self.discovery()
            .components
            .range(CAMERA_COMPONENT_ID..CAMERA_COMPONENT_ID + 6)
            .next()
            .is_some()
    }

    /// Returns `true` if the gimbal component sent a heartbeat.
    pub fn has_gimbal(&self) -> bool {
        self.discovery().components.contains(&GIMBAL_COMPONENT_ID)
    }

    /// Autopilot flavour learned from the autopilot heartbeat.
    pub fn autopilot(&self) -> Autopilot {
        self.context.autopilot()
    }

    /// Shared context used by the protocols of this system.
    pub fn context(&self) -> &Arc<SystemContext> {
        &self.context
    }

    /// Command protocol.
    pub fn commands(&self) -> &Arc<CommandSender> {
        &self.commands
    }

    /// Parameter protocol.
    pub fn params(&self) -> &Arc<ParamSender> {
        &self.params
    }

    /// Mission transfer protocol.
    pub fn missions(&self) -> &Arc<MissionTransferClient> {
        &self.missions
    }

    /// Registers a handler for incoming frames with `message_id`.
    pub fn register_message_handler(
        &self,
        message_id: MessageId,
        callback: MessageCallback,
        owner: OwnerToken,
    ) {
        self.context.handlers().register(message_id, callback, owner)
    }

    /// Removes every handler of `owner`.
    pub fn unregister_all(&self, owner: OwnerToken) {
        self.context.handlers().unregister_all(owner)
    }

    /// Schedules a one-shot callback.
    pub fn register_timeout<F>(&self, callback: F, duration: Duration) -> TimeoutCookie
    where
        F: FnOnce() + Send + 'static,
    {
        self.context.timeouts().add(callback, duration)
    }

    /// Restarts a one-shot callback from now.
    pub fn refresh_timeout(&self, cookie: TimeoutCookie) -> bool {
        self.context.timeouts().refresh(cookie)
    }

    /// Cancels a one-shot callback.
    pub fn remove_timeout(&self, cookie: TimeoutCookie) -> bool {
        self.context.timeouts().remove(cookie)
    }

    /// Schedules a periodic callback.
    pub fn add_periodic<F>(&self, callback: F, interval: Duration) -> CallEveryCookie
    where
        F: FnMut() + Send + 'static,
    {
        self.context.call_every().add(callback, interval)
    }

    /// Cancels a periodic callback.
    pub fn remove_periodic(&self, cookie: CallEveryCookie) -> bool {
        self.context.call_every().remove(cookie)
    }

    /// Encodes and sends a message to this system.
    pub fn send_message<M: Message>(&self, message: &M) -> bool {
        self.context.send_message(message)
    }

    /// Sends a prepared frame.
    pub fn send(&self, frame: OutgoingFrame) -> bool {
        self.context.send(frame)
    }

    /// Calls `callback` with the stable identifier every time the system connects.
    ///
    /// Called right away if the system is connected already.
    pub fn subscribe_on_discovered<F>(&self, callback: F)
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        let callback: DiscoveredCallback = Arc::new(callback);
        self.listeners().discovered.push(callback.clone());

        let connected = {
            let discovery = self.discovery();
            match (discovery.state, discovery.stable_id) {
                (RemoteState::Connected, Some(stable_id)) => Some(stable_id),
                _ => None,
            }
        };
        if let Some(stable_id) = connected {
            callback(stable_id);
        }
    }

    /// Calls `callback` every time the heartbeats of a connected system stop.
    pub fn subscribe_on_timeout<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.listeners().timeout.push(Arc::new(callback));
    }

    /// Calls `callback` once for every new component.
    pub fn subscribe_on_new_component<F>(&self, callback: F)
    where
        F: Fn(ComponentId) + Send + Sync + 'static,
    {
        self.listeners().component.push(Arc::new(callback));
    }

    /// Attaches a plugin, enabling it right away if the system is connected.
    pub fn add_plugin(&self, plugin: Arc<dyn Plugin>) {
        self.plugins().push(plugin.clone());
        if self.is_connected() {
            plugin.enable(self);
        }
    }

    /// Detaches a plugin, disabling it if the system is connected.
    pub fn remove_plugin(&self, plugin: &Arc<dyn Plugin>) {
        let removed = {
            let mut plugins = self.plugins();
            let len = plugins.len();
            plugins.retain(|attached| !Arc::ptr_eq(attached, plugin));
            plugins.len() != len
        };
        if removed && self.is_connected() {
            plugin.disable(self);
        }
    }

    /// Drives the system one step.
    ///
    /// Detects heartbeat timeouts, runs periodic callbacks (including our own heartbeat) and due
    /// timeouts, then advances the parameter, command and mission queues.
    pub fn tick(&self) {
        self.check_heartbeat_timeout();
        self.context.call_every().run_once();
        self.context.timeouts().run_once();
        self.params.do_work();
        self.commands.do_work();
        self.missions.do_work();
    }

    /// Dispatches a frame of this remote to registered handlers.
    pub(crate) fn handle_frame(&self, frame: &Frame<V2>) {
        self.context.handlers().process(frame);
    }

    /// Stops the worker thread, if any, and waits for it to exit.
    pub fn stop(&self) {
        let worker = self.worker().take();
        if let Some(mut worker) = worker {
            worker.closer.close();
            if let Some(handle) = worker.handle.take() {
                let worker_thread: ThreadId = handle.thread().id();
                if worker_thread == thread::current().id() {
                    return;
                }
                if handle.join().is_err() {
                    log::error!("[#{}] worker thread panicked", self.system_id());
                }
            }
        }
    }

    fn start_worker(self: &Arc<Self>) -> Result<()> {
        let mut worker = self.worker();
        if worker.is_some() {
            return Ok(());
        }

        let closer = Closer::new();
        let closable = closer.to_closable();
        let system = Arc::downgrade(self);
        let system_id = self.system_id();
        let handle = thread::Builder::new()
            .name(format!("mavlane-system-{system_id}"))
            .spawn(move || Self::work(system, closable))?;

        *worker = Some(Worker {
            closer,
            handle: Some(handle),
        });
        Ok(())
    }

    fn work(system: Weak<System>, closable: Closable) {
        loop {
            if closable.is_closed() {
                break;
            }
            let interval = match system.upgrade() {
                Some(system) => {
                    system.tick();
                    if system.is_connected() {
                        CONNECTED_TICK_INTERVAL
                    } else {
                        DISCONNECTED_TICK_INTERVAL
                    }
                }
                None => break,
            };
            thread::sleep(interval);
        }
        log::trace!("worker thread stopped");
    }

    fn process_heartbeat(&self, frame: &Frame<V2>) {
        let heartbeat = match frame.decode::<Common>() {
            Ok(Common::Heartbeat(heartbeat)) => heartbeat,
            _ => return,
        };
        let component_id = frame.component_id();
        let system_id = self.system_id();
        let now = self.context.clock().now();

        if component_id == AUTOPILOT_COMPONENT_ID {
            self.context
                .set_autopilot(Autopilot::from_mav_autopilot(heartbeat.autopilot as u8));
        }

        let mut request_identity = false;
        let (new_component, edge) = {
            let mut discovery = self.discovery();
            discovery.last_heartbeat = Some(now);
            let new_component = discovery.components.insert(component_id);

            if matches!(
                discovery.state,
                RemoteState::Unknown | RemoteState::Disconnected
            ) {
                log::debug!("[#{system_id}] heartbeats arriving, discovering");
                discovery.state = RemoteState::Discovering;
            }

            if discovery.stable_id.is_none() {
                if component_id == AUTOPILOT_COMPONENT_ID {
                    let pending = discovery
                        .identity_requested_at
                        .map_or(false, |at| {
                            now.saturating_duration_since(at) < IDENTITY_REQUEST_PENDING
                        });
                    if !pending {
                        if discovery.identity_requests >= IDENTITY_REQUEST_RETRIES {
                            log::debug!(
                                "[#{system_id}] no autopilot version received, using system id"
                            );
                            discovery.stable_id = Some(system_id as u64);
                        } else {
                            discovery.identity_requests += 1;
                            discovery.identity_requested_at = Some(now);
                            request_identity = true;
                        }
                    }
                } else {
                    discovery.foreign_heartbeats += 1;
                    if discovery.foreign_heartbeats >= NON_AUTOPILOT_HEARTBEATS_FOR_IDENTITY {
                        log::debug!("[#{system_id}] no autopilot, using system id");
                        discovery.stable_id = Some(system_id as u64);
                    }
                }
            }

            (new_component, Self::try_connect(&mut discovery))
        };

        if request_identity {
            self.request_identity();
        }
        if new_component {
            log::debug!("[#{system_id}] new component {component_id}");
            let listeners = self.listeners().component.clone();
            for listener in listeners {
                listener(component_id);
            }
        }
        self.apply_edge(edge);
    }

    fn process_autopilot_version(&self, frame: &Frame<V2>) {
        let version = match frame.decode::<Common>() {
            Ok(Common::AutopilotVersion(version)) => version,
            _ => return,
        };
        if frame.component_id() != AUTOPILOT_COMPONENT_ID {
            return;
        }

        let system_id = self.system_id();
        let int_supported = (version.capabilities.bits() as u64) & CAPABILITY_MISSION_INT != 0;
        self.missions.set_int_messages_supported(int_supported);

        let edge = {
            let mut discovery = self.discovery();
            if discovery.stable_id.is_none() {
                let stable_id = match version.uid {
                    0 => system_id as u64,
                    uid => uid,
                };
                log::debug!("[#{system_id}] autopilot version received, uid: {stable_id}");
                discovery.stable_id = Some(stable_id);
            }
            Self::try_connect(&mut discovery)
        };
        self.apply_edge(edge);
    }

    fn request_identity(&self) {
        log::debug!("[#{}] requesting autopilot version", self.system_id());
        self.commands.send_command_async(
            Command::Long(CommandLong {
                target_component_id: AUTOPILOT_COMPONENT_ID,
                command: CMD_REQUEST_MESSAGE,
                params: CommandParams {
                    param1: Some(ids::AUTOPILOT_VERSION as f32),
                    ..Default::default()
                },
            }),
            None,
            None,
        );
    }

    fn try_connect(discovery: &mut Discovery) -> Option<Edge> {
        match (discovery.state, discovery.stable_id) {
            (RemoteState::Discovering, Some(stable_id)) => {
                discovery.state = RemoteState::Connected;
                Some(Edge::Connected(stable_id))
            }
            _ => None,
        }
    }

    fn check_heartbeat_timeout(&self) {
        let heartbeat_timeout = self.context.conf().heartbeat_timeout();
        let edge = {
            let mut discovery = self.discovery();
            match (discovery.state, discovery.last_heartbeat) {
                (RemoteState::Connected | RemoteState::Discovering, Some(at))
                    if self.context.clock().elapsed(at) > heartbeat_timeout =>
                {
                    let was_connected = discovery.state == RemoteState::Connected;
                    discovery.state = RemoteState::Disconnected;
                    log::info!("[#{}] heartbeats timed out", self.system_id());
                    was_connected.then_some(Edge::Disconnected)
                }
                _ => None,
            }
        };
        self.apply_edge(edge);
    }

    fn apply_edge(&self, edge: Option<Edge>) {
        let Some(edge) = edge else {
            return;
        };
        let plugins = self.plugins().clone();

        match edge {
            Edge::Connected(stable_id) => {
                log::info!("[#{}] connected, stable id: {stable_id}", self.system_id());
                for plugin in plugins.iter() {
                    plugin.enable(self);
                }
                let listeners = self.listeners().discovered.clone();
                for listener in listeners {
                    listener(stable_id);
                }
            }
            Edge::Disconnected => {
                for plugin in plugins.iter() {
                    plugin.disable(self);
                }
                let listeners = self.listeners().timeout.clone();
                for listener in listeners {
                    listener();
                }
            }
        }
    }

    fn discovery(&self) -> MutexGuard<'_, Discovery> {
        self.discovery.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn listeners(&self) -> MutexGuard<'_, Listeners> {
        self.listeners.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn plugins(&self) -> MutexGuard<'_, Vec<Arc<dyn Plugin>>> {
        self.plugins.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn worker(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(|err| err.into_inner())
    }
}

impl Drop for System {
    fn drop(&mut self) {
        self.context.handlers().unregister_all(self.owner);
        self.context.call_every().remove(self.heartbeat_cookie);
        if let Some(worker) = self.worker().take() {
            worker.closer.close();
        }
    }
}

impl Debug for System {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let discovery = self.discovery();
        f.debug_struct("System")
            .field("system_id", &self.system_id())
            .field("state", &discovery.state)
            .field("stable_id", &discovery.stable_id)
            .field("components", &discovery.components)
            .finish_non_exhaustive()
    }
}

///////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Tests                                               //
///////////////////////////////////////////////////////////////////////////////////////////////////
