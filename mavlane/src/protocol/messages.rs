//! # Message catalogue
//!
//! Message `ID`s and enum values used by the protocols, and conversions from raw wire numbers
//! into `common` dialect enums.

use std::fmt::Display;

use mavio::dialects::common::enums::{
    MavCmd, MavFrame, MavMissionResult, MavMissionType, MavParamExtType, MavParamType,
};
use mavio::dialects::minimal::enums::{MavAutopilot, MavState, MavType};
use mavio::dialects::minimal::messages::Heartbeat;

use crate::consts::PARAM_ID_LEN;
use crate::prelude::*;

/// Message `ID`s.
pub mod ids {
    use mavio::protocol::MessageId;

    /// `HEARTBEAT`
    pub const HEARTBEAT: MessageId = 0;
    /// `PARAM_REQUEST_READ`
    pub const PARAM_REQUEST_READ: MessageId = 20;
    /// `PARAM_REQUEST_LIST`
    pub const PARAM_REQUEST_LIST: MessageId = 21;
    /// `PARAM_VALUE`
    pub const PARAM_VALUE: MessageId = 22;
    /// `PARAM_SET`
    pub const PARAM_SET: MessageId = 23;
    /// `MISSION_REQUEST`
    pub const MISSION_REQUEST: MessageId = 40;
    /// `MISSION_SET_CURRENT`
    pub const MISSION_SET_CURRENT: MessageId = 41;
    /// `MISSION_CURRENT`
    pub const MISSION_CURRENT: MessageId = 42;
    /// `MISSION_REQUEST_LIST`
    pub const MISSION_REQUEST_LIST: MessageId = 43;
    /// `MISSION_COUNT`
    pub const MISSION_COUNT: MessageId = 44;
    /// `MISSION_CLEAR_ALL`
    pub const MISSION_CLEAR_ALL: MessageId = 45;
    /// `MISSION_ACK`
    pub const MISSION_ACK: MessageId = 47;
    /// `MISSION_REQUEST_INT`
    pub const MISSION_REQUEST_INT: MessageId = 51;
    /// `MISSION_ITEM_INT`
    pub const MISSION_ITEM_INT: MessageId = 73;
    /// `COMMAND_INT`
    pub const COMMAND_INT: MessageId = 75;
    /// `COMMAND_LONG`
    pub const COMMAND_LONG: MessageId = 76;
    /// `COMMAND_ACK`
    pub const COMMAND_ACK: MessageId = 77;
    /// `AUTOPILOT_VERSION`
    pub const AUTOPILOT_VERSION: MessageId = 148;
    /// `PARAM_EXT_REQUEST_READ`
    pub const PARAM_EXT_REQUEST_READ: MessageId = 320;
    /// `PARAM_EXT_VALUE`
    pub const PARAM_EXT_VALUE: MessageId = 322;
    /// `PARAM_EXT_SET`
    pub const PARAM_EXT_SET: MessageId = 323;
    /// `PARAM_EXT_ACK`
    pub const PARAM_EXT_ACK: MessageId = 324;
}

/// `MAV_RESULT` values.
pub mod mav_result {
    /// Command is valid and was executed.
    pub const ACCEPTED: u8 = 0;
    /// Command is valid but can't be executed at this time.
    pub const TEMPORARILY_REJECTED: u8 = 1;
    /// Command is invalid.
    pub const DENIED: u8 = 2;
    /// Command is not supported.
    pub const UNSUPPORTED: u8 = 3;
    /// Command failed.
    pub const FAILED: u8 = 4;
    /// Command is being executed.
    pub const IN_PROGRESS: u8 = 5;
    /// Command was cancelled.
    pub const CANCELLED: u8 = 6;
}

/// `MAV_MISSION_RESULT` values.
pub mod mission_result {
    /// Mission accepted.
    pub const ACCEPTED: u8 = 0;
    /// Generic error.
    pub const ERROR: u8 = 1;
    /// Coordinate frame is not supported.
    pub const UNSUPPORTED_FRAME: u8 = 2;
    /// Command is not supported.
    pub const UNSUPPORTED: u8 = 3;
    /// Mission items exceed storage space.
    pub const NO_SPACE: u8 = 4;
    /// One of the parameters has an invalid value.
    pub const INVALID: u8 = 5;
    /// Last parameter-specific result (`INVALID_PARAM7`).
    pub const INVALID_PARAM7: u8 = 12;
    /// Sequence out of order.
    pub const INVALID_SEQUENCE: u8 = 13;
    /// Not accepting any mission commands.
    pub const DENIED: u8 = 14;
    /// Current mission operation cancelled.
    pub const OPERATION_CANCELLED: u8 = 15;
}

/// `PARAM_ACK` values.
pub mod param_ack {
    /// Parameter value accepted.
    pub const ACCEPTED: u8 = 0;
    /// Value unknown or not supported.
    pub const VALUE_UNSUPPORTED: u8 = 1;
    /// Setting failed.
    pub const FAILED: u8 = 2;
    /// Value received but not yet applied.
    pub const IN_PROGRESS: u8 = 3;
}

/// `MAV_MISSION_TYPE` values.
pub mod mission_type {
    /// Regular mission items.
    pub const MISSION: u8 = 0;
    /// Geofence items.
    pub const FENCE: u8 = 1;
    /// Rally points.
    pub const RALLY: u8 = 2;
}

/// `MAV_AUTOPILOT_ARDUPILOTMEGA`
pub const AUTOPILOT_ARDUPILOT: u8 = 3;
/// `MAV_AUTOPILOT_PX4`
pub const AUTOPILOT_PX4: u8 = 12;
/// `MAV_PROTOCOL_CAPABILITY_MISSION_INT`
pub const CAPABILITY_MISSION_INT: u64 = 4;
/// `MAV_CMD_REQUEST_MESSAGE`
pub const CMD_REQUEST_MESSAGE: u16 = 512;

fn convert<T, R>(value: R, name: &str) -> Result<T>
where
    T: TryFrom<R>,
    R: Copy + Display,
{
    T::try_from(value).map_err(|_| Error::Unsupported(format!("{name} value {value}")))
}

pub(crate) fn mav_cmd(code: u16) -> Result<MavCmd> {
    convert(code, "MAV_CMD")
}

pub(crate) fn mav_frame(frame: u8) -> Result<MavFrame> {
    convert(frame, "MAV_FRAME")
}

pub(crate) fn mav_mission_type(mission_type: u8) -> Result<MavMissionType> {
    convert(mission_type, "MAV_MISSION_TYPE")
}

pub(crate) fn mav_mission_result(result: u8) -> Result<MavMissionResult> {
    convert(result, "MAV_MISSION_RESULT")
}

pub(crate) fn mav_param_type(param_type: u8) -> Result<MavParamType> {
    convert(param_type, "MAV_PARAM_TYPE")
}

pub(crate) fn mav_param_ext_type(param_type: u8) -> Result<MavParamExtType> {
    convert(param_type, "MAV_PARAM_EXT_TYPE")
}

/// Heartbeat announcing this ground station.
pub(crate) fn gcs_heartbeat() -> Heartbeat {
    Heartbeat {
        type_: MavType::Gcs,
        autopilot: MavAutopilot::Invalid,
        base_mode: Default::default(),
        custom_mode: 0,
        system_status: MavState::Active,
        mavlink_version: 3,
    }
}

/// Encodes a parameter name into the fixed-width wire field.
///
/// Names longer than the field are truncated, callers reject them beforehand.
pub fn param_id_to_bytes(name: &str) -> [u8; PARAM_ID_LEN] {
    let mut bytes = [0u8; PARAM_ID_LEN];
    for (dst, src) in bytes.iter_mut().zip(name.bytes()) {
        *dst = src;
    }
    bytes
}

/// Decodes the fixed-width name field, which is not NUL-terminated when the name fills it.
pub fn param_id_to_string(bytes: &[u8; PARAM_ID_LEN]) -> String {
    let len = bytes.iter().position(|b| *b == 0).unwrap_or(PARAM_ID_LEN);
    String::from_utf8_lossy(&bytes[..len]).into_owned()
}

/// Compares the fixed-width name field with a name, looking at no more than the field width.
pub fn param_id_matches(bytes: &[u8; PARAM_ID_LEN], name: &str) -> bool {
    let len = bytes.iter().position(|b| *b == 0).unwrap_or(PARAM_ID_LEN);
    &bytes[..len] == name.as_bytes()
}

///////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Tests                                               //
///////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_id_bounded_compare() {
        let full = param_id_to_bytes("SYSID_MYGCS_LONG");
        assert!(param_id_matches(&full, "SYSID_MYGCS_LONG"));
        assert!(!param_id_matches(&full, "SYSID_MYGCS_LON"));
        assert_eq!(param_id_to_string(&full), "SYSID_MYGCS_LONG");

        let short = param_id_to_bytes("MIS_TAKEOFF_ALT");
        assert!(param_id_matches(&short, "MIS_TAKEOFF_ALT"));
        assert!(!param_id_matches(&short, "MIS_TAKEOFF"));
    }

    #[test]
    fn enum_conversions() {
        assert_eq!(mav_cmd(CMD_REQUEST_MESSAGE).unwrap() as u16, CMD_REQUEST_MESSAGE);
        assert_eq!(mav_mission_type(mission_type::FENCE).unwrap() as u8, 1);
        assert!(mav_mission_result(200).is_err());
    }
}
