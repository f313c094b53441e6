//! Common constants.

use std::time::Duration;

use mavio::protocol::{ComponentId, SystemId};

/// Default MAVLink system `ID` of this ground station.
pub const DEFAULT_SYSTEM_ID: SystemId = 245;
/// Default MAVLink component `ID` of this ground station (`MAV_COMP_ID_MISSIONPLANNER`).
pub const DEFAULT_COMPONENT_ID: ComponentId = 190;

/// Component `ID` of a remote autopilot.
pub const AUTOPILOT_COMPONENT_ID: ComponentId = 1;
/// Component `ID` of the first camera of a remote.
pub const CAMERA_COMPONENT_ID: ComponentId = 100;
/// Component `ID` of a gimbal.
pub const GIMBAL_COMPONENT_ID: ComponentId = 154;

/// Default timeout for a single request/acknowledgement round-trip.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);
/// Default number of send attempts for commands.
pub const DEFAULT_COMMAND_RETRIES: usize = 3;
/// Default number of send attempts for parameter requests.
pub const DEFAULT_PARAM_RETRIES: usize = 3;
/// Default number of retries for mission transfers.
pub const DEFAULT_TRANSFER_RETRIES: usize = 5;

/// How often our own heartbeat is sent.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
/// A remote is considered disconnected if no heartbeat arrived within this period.
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(3);

/// Worker loop pause while the remote is connected.
pub const CONNECTED_TICK_INTERVAL: Duration = Duration::from_millis(10);
/// Worker loop pause while the remote is not connected.
pub const DISCONNECTED_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Window during which an identity request is considered pending.
pub const IDENTITY_REQUEST_PENDING: Duration = Duration::from_millis(500);
/// Number of unanswered identity requests after which the system `ID` becomes the stable `ID`.
pub const IDENTITY_REQUEST_RETRIES: usize = 3;
/// Heartbeats from a non-autopilot component required to settle on the stable `ID`.
pub const NON_AUTOPILOT_HEARTBEATS_FOR_IDENTITY: usize = 2;

/// Maximum number of simultaneously allocated parser channels.
pub const DEFAULT_CHANNEL_CAPACITY: u8 = 32;

/// Maximum length of a parameter name.
pub const PARAM_ID_LEN: usize = 16;
/// Size of the value field of the extended parameter protocol.
pub const PARAM_EXT_VALUE_LEN: usize = 128;

/// Default host for `udp://` connections (listens on all interfaces).
pub const DEFAULT_UDP_HOST: &str = "0.0.0.0";
/// Default port for `udp://` connections.
pub const DEFAULT_UDP_PORT: u16 = 14540;
/// Default host for `tcp://` connections.
pub const DEFAULT_TCP_HOST: &str = "127.0.0.1";
/// Default port for `tcp://` connections.
pub const DEFAULT_TCP_PORT: u16 = 5760;
/// Default baud rate for `serial://` connections.
pub const DEFAULT_BAUD_RATE: u32 = 57600;

/// Read timeout of transports, bounds how quickly a receive loop notices shutdown.
pub const RECEIVE_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Pause before a TCP client tries to reconnect.
pub const RECONNECT_INTERVAL: Duration = Duration::from_millis(500);
/// Size of the receive buffer of transports.
pub const RECEIVE_BUFFER_SIZE: usize = 2048;
