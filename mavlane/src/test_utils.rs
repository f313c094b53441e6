//! Mavlane test utils.
//!
//! Compiled for unit tests and behind the `test_utils` feature. Provides a recording
//! [`FrameSink`], a [`Harness`] that drives a [`SystemContext`] with a [`FakeClock`], and
//! builders for frames sent by a simulated remote.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use portpicker::Port;

use mavio::dialects::common::enums::{
    MavCmd, MavMissionResult, MavParamExtType, MavParamType, MavProtocolCapability, MavResult,
    ParamAck,
};
use mavio::dialects::common::messages::{
    AutopilotVersion, CommandAck, MissionAck, MissionCount, MissionCurrent, MissionRequest,
    MissionRequestInt, ParamExtAck, ParamExtValue, ParamValue as ParamValueMessage,
};
use mavio::dialects::minimal::enums::{MavAutopilot, MavState, MavType};
use mavio::dialects::minimal::messages::Heartbeat;
use mavio::protocol::{ComponentId, Message, MessageId, SystemId, V2};
use mavio::Frame;

use crate::consts::{DEFAULT_COMPONENT_ID, DEFAULT_SYSTEM_ID, PARAM_EXT_VALUE_LEN};
use crate::core::io::OutgoingFrame;
use crate::core::time::FakeClock;
use crate::protocol::messages::{mav_mission_type, param_id_to_bytes};
use crate::protocol::mission::MissionItem;
use crate::protocol::params::ParamValue;
use crate::system::{FrameSink, HubConfBuilder, HubConf, SystemContext};

static INIT_LOGGER: Once = Once::new();
/// Log level of the crate's own modules in tests.
pub const LOG_LEVEL: log::LevelFilter = log::LevelFilter::Debug;
/// Loopback host used by socket tests.
pub const HOST: &str = "127.0.0.1";
/// System `ID` of the simulated remote.
pub const REMOTE_SYSTEM_ID: SystemId = 1;

/// Initialises `env_logger` once per process.
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::builder()
            // Suppress everything below `warn` for third-party modules
            .filter_level(log::LevelFilter::Warn)
            // Allow everything above `LOG_LEVEL` from current package
            .filter_module(env!("CARGO_PKG_NAME"), LOG_LEVEL)
            .is_test(true)
            .try_init();
    });
}

/// Picks a free local port.
pub fn unused_port() -> Port {
    portpicker::pick_unused_port().unwrap()
}

/// Address on the loopback host.
pub fn make_addr(port: Port) -> String {
    format!("{HOST}:{port}")
}

/// Serialises a frame into wire bytes.
pub fn encode_frame(frame: &Frame<V2>) -> Vec<u8> {
    crate::sync::io::encode_frame(frame).unwrap()
}

/// Frame sent by a peer with the given `ID`s.
pub fn peer_frame<M: Message>(
    system_id: SystemId,
    component_id: ComponentId,
    sequence: u8,
    message: &M,
) -> Frame<V2> {
    Frame::builder()
        .sequence(sequence)
        .system_id(system_id)
        .component_id(component_id)
        .version(V2)
        .message(message)
        .unwrap()
        .build()
}

/// Generic heartbeat of a peer.
pub fn heartbeat_frame(system_id: SystemId, component_id: ComponentId, sequence: u8) -> Frame<V2> {
    peer_frame(
        system_id,
        component_id,
        sequence,
        &Heartbeat {
            type_: MavType::Quadrotor,
            autopilot: MavAutopilot::Generic,
            base_mode: Default::default(),
            custom_mode: 0,
            system_status: MavState::Active,
            mavlink_version: 3,
        },
    )
}

/// Heartbeat of a peer running a particular autopilot (`MAV_AUTOPILOT` value).
pub fn autopilot_heartbeat_frame(
    system_id: SystemId,
    component_id: ComponentId,
    autopilot: u8,
) -> Frame<V2> {
    peer_frame(
        system_id,
        component_id,
        0,
        &Heartbeat {
            type_: MavType::Quadrotor,
            autopilot: MavAutopilot::try_from(autopilot).unwrap(),
            base_mode: Default::default(),
            custom_mode: 0,
            system_status: MavState::Active,
            mavlink_version: 3,
        },
    )
}

/// `AUTOPILOT_VERSION` with the given unique `ID` and capability bits.
pub fn autopilot_version_frame(system_id: SystemId, uid: u64, capabilities: u64) -> Frame<V2> {
    peer_frame(
        system_id,
        1,
        0,
        &AutopilotVersion {
            capabilities: MavProtocolCapability::from_bits_truncate(capabilities as u32),
            uid,
            ..Default::default()
        },
    )
}

/// `COMMAND_ACK` addressed to us.
pub fn command_ack_frame(
    system_id: SystemId,
    component_id: ComponentId,
    command: u16,
    result: u8,
    progress: u8,
) -> Frame<V2> {
    peer_frame(
        system_id,
        component_id,
        0,
        &CommandAck {
            command: MavCmd::try_from(command).unwrap(),
            result: MavResult::try_from(result).unwrap(),
            progress,
            target_system: DEFAULT_SYSTEM_ID,
            target_component: DEFAULT_COMPONENT_ID,
            ..Default::default()
        },
    )
}

/// `PARAM_VALUE` carrying a standard value.
pub fn param_value_frame(
    system_id: SystemId,
    component_id: ComponentId,
    name: &str,
    value: &ParamValue,
) -> Frame<V2> {
    param_list_entry_frame(system_id, component_id, name, value, 0, 1)
}

/// `PARAM_VALUE` sent as entry `index` of a parameter list of `count` values.
pub fn param_list_entry_frame(
    system_id: SystemId,
    component_id: ComponentId,
    name: &str,
    value: &ParamValue,
    index: u16,
    count: u16,
) -> Frame<V2> {
    peer_frame(
        system_id,
        component_id,
        0,
        &ParamValueMessage {
            param_id: param_id_to_bytes(name),
            param_value: value.to_standard().unwrap(),
            param_type: MavParamType::try_from(value.param_type().to_mav()).unwrap(),
            param_count: count,
            param_index: index,
        },
    )
}

/// `PARAM_EXT_VALUE` carrying an extended value.
pub fn param_ext_value_frame(
    system_id: SystemId,
    component_id: ComponentId,
    name: &str,
    value: &ParamValue,
) -> Frame<V2> {
    peer_frame(
        system_id,
        component_id,
        0,
        &ParamExtValue {
            param_id: param_id_to_bytes(name),
            param_value: value.to_ext().unwrap_or([0u8; PARAM_EXT_VALUE_LEN]),
            param_type: MavParamExtType::try_from(value.param_type().to_mav()).unwrap(),
            param_count: 1,
            param_index: 0,
        },
    )
}

/// `PARAM_EXT_ACK` with a `PARAM_ACK` result.
pub fn param_ext_ack_frame(
    system_id: SystemId,
    component_id: ComponentId,
    name: &str,
    value: &ParamValue,
    result: u8,
) -> Frame<V2> {
    peer_frame(
        system_id,
        component_id,
        0,
        &ParamExtAck {
            param_id: param_id_to_bytes(name),
            param_value: value.to_ext().unwrap_or([0u8; PARAM_EXT_VALUE_LEN]),
            param_type: MavParamExtType::try_from(value.param_type().to_mav()).unwrap(),
            param_result: ParamAck::try_from(result).unwrap(),
        },
    )
}

/// `MISSION_REQUEST_INT` addressed to us.
pub fn mission_request_int_frame(
    system_id: SystemId,
    component_id: ComponentId,
    seq: u16,
    mission_type: u8,
) -> Frame<V2> {
    peer_frame(
        system_id,
        component_id,
        0,
        &MissionRequestInt {
            target_system: DEFAULT_SYSTEM_ID,
            target_component: DEFAULT_COMPONENT_ID,
            seq,
            mission_type: mav_mission_type(mission_type).unwrap(),
        },
    )
}

/// Legacy `MISSION_REQUEST` addressed to us.
pub fn mission_request_frame(
    system_id: SystemId,
    component_id: ComponentId,
    seq: u16,
    mission_type: u8,
) -> Frame<V2> {
    peer_frame(
        system_id,
        component_id,
        0,
        &MissionRequest {
            target_system: DEFAULT_SYSTEM_ID,
            target_component: DEFAULT_COMPONENT_ID,
            seq,
            mission_type: mav_mission_type(mission_type).unwrap(),
        },
    )
}

/// `MISSION_ACK` addressed to us with a `MAV_MISSION_RESULT`.
pub fn mission_ack_frame(
    system_id: SystemId,
    component_id: ComponentId,
    result: u8,
    mission_type: u8,
) -> Frame<V2> {
    peer_frame(
        system_id,
        component_id,
        0,
        &MissionAck {
            target_system: DEFAULT_SYSTEM_ID,
            target_component: DEFAULT_COMPONENT_ID,
            type_: MavMissionResult::try_from(result).unwrap(),
            mission_type: mav_mission_type(mission_type).unwrap(),
            ..Default::default()
        },
    )
}

/// `MISSION_COUNT` addressed to us.
pub fn mission_count_frame(
    system_id: SystemId,
    component_id: ComponentId,
    count: u16,
    mission_type: u8,
) -> Frame<V2> {
    peer_frame(
        system_id,
        component_id,
        0,
        &MissionCount {
            target_system: DEFAULT_SYSTEM_ID,
            target_component: DEFAULT_COMPONENT_ID,
            count,
            mission_type: mav_mission_type(mission_type).unwrap(),
            ..Default::default()
        },
    )
}

/// `MISSION_ITEM_INT` addressed to us.
pub fn mission_item_int_frame(
    system_id: SystemId,
    component_id: ComponentId,
    item: &MissionItem,
) -> Frame<V2> {
    peer_frame(
        system_id,
        component_id,
        0,
        &item
            .to_message(DEFAULT_SYSTEM_ID, DEFAULT_COMPONENT_ID)
            .unwrap(),
    )
}

/// `MISSION_CURRENT` reporting the current item.
pub fn mission_current_frame(
    system_id: SystemId,
    component_id: ComponentId,
    seq: u16,
) -> Frame<V2> {
    peer_frame(
        system_id,
        component_id,
        0,
        &MissionCurrent {
            seq,
            ..Default::default()
        },
    )
}

/// Frame sink that records every frame it is offered.
#[derive(Debug)]
pub struct RecordingSink {
    frames: Mutex<Vec<OutgoingFrame>>,
    link_up: AtomicBool,
}

impl RecordingSink {
    /// Creates a sink with the link up.
    pub fn new() -> Self {
        Self {
            frames: Mutex::new(Vec::new()),
            link_up: AtomicBool::new(true),
        }
    }

    /// While the link is down frames are rejected and not recorded.
    pub fn set_link_up(&self, link_up: bool) {
        self.link_up.store(link_up, Ordering::Release);
    }

    /// Recorded frames, oldest first.
    pub fn frames(&self) -> Vec<OutgoingFrame> {
        self.frames.lock().unwrap().clone()
    }

    /// Forgets recorded frames.
    pub fn clear(&self) {
        self.frames.lock().unwrap().clear();
    }
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSink for RecordingSink {
    fn send_frame(&self, frame: OutgoingFrame) -> bool {
        if !self.link_up.load(Ordering::Acquire) {
            return false;
        }
        self.frames.lock().unwrap().push(frame);
        true
    }
}

/// Drives a [`SystemContext`] of remote [`REMOTE_SYSTEM_ID`] without threads.
///
/// Time only moves on [`Harness::advance`], which then ticks timeouts and periodic callbacks the
/// way the worker of a system would.
pub struct Harness {
    clock: FakeClock,
    sink: Arc<RecordingSink>,
    context: Arc<SystemContext>,
}

impl Harness {
    /// Harness with default configuration.
    pub fn new() -> Self {
        Self::with_conf(HubConf::builder())
    }

    /// Harness with custom configuration, its clock is replaced by a [`FakeClock`].
    pub fn with_conf(conf: HubConfBuilder) -> Self {
        let clock = FakeClock::new();
        let sink = Arc::new(RecordingSink::new());
        let conf = conf.clock(clock.clone()).build();
        let context = Arc::new(SystemContext::new(REMOTE_SYSTEM_ID, conf, sink.clone()));
        Self {
            clock,
            sink,
            context,
        }
    }

    /// Shared context.
    pub fn context(&self) -> Arc<SystemContext> {
        self.context.clone()
    }

    /// Clock driving the context.
    pub fn clock(&self) -> &FakeClock {
        &self.clock
    }

    /// Recording sink.
    pub fn sink(&self) -> &Arc<RecordingSink> {
        &self.sink
    }

    /// Every frame sent so far.
    pub fn sent(&self) -> Vec<Frame<V2>> {
        self.sink
            .frames()
            .iter()
            .map(|frame| frame.frame().clone())
            .collect()
    }

    /// Frames sent so far with a particular message `ID`.
    pub fn sent_of(&self, message_id: MessageId) -> Vec<Frame<V2>> {
        self.sent()
            .into_iter()
            .filter(|frame| frame.message_id() == message_id)
            .collect()
    }

    /// Passes a frame from the remote to registered handlers.
    pub fn deliver(&self, frame: &Frame<V2>) -> usize {
        self.context.handlers().process(frame)
    }

    /// Moves time forward and runs due timeouts and periodic callbacks.
    pub fn advance(&self, duration: Duration) {
        self.clock.advance(duration);
        self.context.timeouts().run_once();
        self.context.call_every().run_once();
    }

    /// Takes the link up or down.
    pub fn set_link_up(&self, link_up: bool) {
        self.sink.set_link_up(link_up);
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
