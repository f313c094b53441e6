use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mavio::protocol::{ComponentId, Message, SystemId, V2};
use mavio::Frame;

use crate::core::io::OutgoingFrame;
use crate::core::time::Clock;
use crate::protocol::messages::{AUTOPILOT_ARDUPILOT, AUTOPILOT_PX4};
use crate::sync::scheduling::{CallEveryHandler, TimeoutHandler};
use crate::system::{HubConf, MessageHandlers};

use crate::prelude::*;

/// Destination of outgoing frames.
///
/// Implemented by [`Hub`](crate::system::Hub) to fan frames out to its connections, and by test
/// doubles that record frames.
pub trait FrameSink: Send + Sync {
    /// Sends a frame, returns `true` if any transport accepted it.
    fn send_frame(&self, frame: OutgoingFrame) -> bool;
}

/// Flavour of the autopilot of a remote system.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Autopilot {
    /// No autopilot heartbeat seen yet.
    #[default]
    Unknown,
    /// PX4.
    Px4,
    /// ArduPilot.
    ArduPilot,
    /// Any other autopilot.
    Generic,
}

impl Autopilot {
    pub(crate) fn from_mav_autopilot(autopilot: u8) -> Self {
        match autopilot {
            AUTOPILOT_PX4 => Autopilot::Px4,
            AUTOPILOT_ARDUPILOT => Autopilot::ArduPilot,
            _ => Autopilot::Generic,
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            Autopilot::Unknown => 0,
            Autopilot::Px4 => 1,
            Autopilot::ArduPilot => 2,
            Autopilot::Generic => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Autopilot::Px4,
            2 => Autopilot::ArduPilot,
            3 => Autopilot::Generic,
            _ => Autopilot::Unknown,
        }
    }
}

/// Shared state of a remote system used by its protocols.
///
/// Gives protocols and plugins a narrow interface: sending messages to the remote, message
/// handler registration, and the two scheduling primitives.
pub struct SystemContext {
    system_id: SystemId,
    conf: HubConf,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn FrameSink>,
    sequence: AtomicU8,
    autopilot: AtomicU8,
    handlers: MessageHandlers,
    timeouts: TimeoutHandler,
    call_every: CallEveryHandler,
}

impl SystemContext {
    pub(crate) fn new(system_id: SystemId, conf: HubConf, sink: Arc<dyn FrameSink>) -> Self {
        let clock = conf.clock();
        Self {
            system_id,
            sink,
            sequence: AtomicU8::new(0),
            autopilot: AtomicU8::new(Autopilot::Unknown.to_u8()),
            handlers: MessageHandlers::new(),
            timeouts: TimeoutHandler::new(clock.clone()),
            call_every: CallEveryHandler::new(clock.clone()),
            clock,
            conf,
        }
    }

    /// System `ID` of the remote.
    pub fn system_id(&self) -> SystemId {
        self.system_id
    }

    /// Our own system `ID`.
    pub fn own_system_id(&self) -> SystemId {
        self.conf.system_id()
    }

    /// Our own component `ID`.
    pub fn own_component_id(&self) -> ComponentId {
        self.conf.component_id()
    }

    /// Configuration.
    pub fn conf(&self) -> &HubConf {
        &self.conf
    }

    /// Time source.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Timeout of a single request attempt.
    pub fn timeout(&self) -> Duration {
        self.conf.timeout()
    }

    /// Message handlers of this remote.
    pub fn handlers(&self) -> &MessageHandlers {
        &self.handlers
    }

    /// One-shot deadlines ticked by the worker of this remote.
    pub fn timeouts(&self) -> &TimeoutHandler {
        &self.timeouts
    }

    /// Periodic callbacks ticked by the worker of this remote.
    pub fn call_every(&self) -> &CallEveryHandler {
        &self.call_every
    }

    /// Autopilot flavour learned from heartbeats.
    pub fn autopilot(&self) -> Autopilot {
        Autopilot::from_u8(self.autopilot.load(Ordering::Acquire))
    }

    pub(crate) fn set_autopilot(&self, autopilot: Autopilot) {
        self.autopilot.store(autopilot.to_u8(), Ordering::Release);
    }

    /// Encodes and sends a message addressed to this remote.
    pub fn send_message<M: Message>(&self, message: &M) -> bool {
        match self.make_frame(message) {
            Ok(frame) => self.send(OutgoingFrame::targeted(frame, self.system_id)),
            Err(err) => {
                log::warn!("[#{}] can't encode message: {err:?}", self.system_id);
                false
            }
        }
    }

    /// Encodes and sends a message to every peer.
    pub fn broadcast_message<M: Message>(&self, message: &M) -> bool {
        match self.make_frame(message) {
            Ok(frame) => self.send(OutgoingFrame::broadcast(frame)),
            Err(err) => {
                log::warn!("[#{}] can't encode message: {err:?}", self.system_id);
                false
            }
        }
    }

    /// Sends a prepared frame.
    pub fn send(&self, frame: OutgoingFrame) -> bool {
        let sent = self.sink.send_frame(frame);
        if !sent {
            log::debug!("[#{}] frame was not sent", self.system_id);
        }
        sent
    }

    /// Builds a frame from our own `ID`s with the next sequence number.
    pub fn make_frame<M: Message>(&self, message: &M) -> Result<Frame<V2>> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let frame = Frame::builder()
            .sequence(sequence)
            .system_id(self.conf.system_id())
            .component_id(self.conf.component_id())
            .version(V2)
            .message(message)
            .map_err(mavio::error::Error::from)?
            .build();
        Ok(frame)
    }
}

impl Debug for SystemContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemContext")
            .field("system_id", &self.system_id)
            .field("autopilot", &self.autopilot())
            .finish_non_exhaustive()
    }
}
