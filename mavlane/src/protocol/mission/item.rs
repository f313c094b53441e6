use mavio::dialects::common::messages::MissionItemInt;
use mavio::protocol::{ComponentId, SystemId};

use crate::protocol::messages::{mav_cmd, mav_frame, mav_mission_type};
use crate::protocol::mission::MissionError;

use crate::prelude::*;

/// Mission item in its `MISSION_ITEM_INT` form.
///
/// Enum fields are kept as raw wire numbers so items for commands or frames unknown to this
/// build can still be downloaded.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MissionItem {
    /// Sequence number, items of a mission are numbered `0..N`.
    pub seq: u16,
    /// `MAV_FRAME` of the coordinates.
    pub frame: u8,
    /// `MAV_CMD` code.
    pub command: u16,
    /// `1` for the item to start from.
    pub current: u8,
    /// `1` to continue to the next item automatically.
    pub autocontinue: u8,
    /// Parameter 1.
    pub param1: f32,
    /// Parameter 2.
    pub param2: f32,
    /// Parameter 3.
    pub param3: f32,
    /// Parameter 4.
    pub param4: f32,
    /// Latitude or local X, scaled.
    pub x: i32,
    /// Longitude or local Y, scaled.
    pub y: i32,
    /// Altitude or local Z.
    pub z: f32,
    /// `MAV_MISSION_TYPE`.
    pub mission_type: u8,
}

impl MissionItem {
    pub(crate) fn to_message(
        &self,
        target_system: SystemId,
        target_component: ComponentId,
    ) -> Result<MissionItemInt> {
        Ok(MissionItemInt {
            target_system,
            target_component,
            seq: self.seq,
            frame: mav_frame(self.frame)?,
            command: mav_cmd(self.command)?,
            current: self.current,
            autocontinue: self.autocontinue,
            param1: self.param1,
            param2: self.param2,
            param3: self.param3,
            param4: self.param4,
            x: self.x,
            y: self.y,
            z: self.z,
            mission_type: mav_mission_type(self.mission_type)?,
        })
    }

    pub(crate) fn from_message(message: &MissionItemInt) -> Self {
        Self {
            seq: message.seq,
            frame: message.frame as u8,
            command: message.command as u16,
            current: message.current,
            autocontinue: message.autocontinue,
            param1: message.param1,
            param2: message.param2,
            param3: message.param3,
            param4: message.param4,
            x: message.x,
            y: message.y,
            z: message.z,
            mission_type: message.mission_type as u8,
        }
    }
}

/// Checks a list of items before it is uploaded.
pub(crate) fn validate_upload(
    items: &[MissionItem],
    mission_type: u8,
) -> std::result::Result<(), MissionError> {
    if items.is_empty() {
        return Err(MissionError::NoMissionAvailable);
    }

    // MISSION_COUNT carries the count as u16.
    if items.len() > u16::MAX as usize {
        return Err(MissionError::TooManyMissionItems);
    }

    if items
        .iter()
        .enumerate()
        .any(|(index, item)| item.seq as usize != index)
    {
        return Err(MissionError::InvalidSequence);
    }

    if items.iter().filter(|item| item.current != 0).count() != 1 {
        return Err(MissionError::CurrentInvalid);
    }

    if items.iter().any(|item| item.mission_type != mission_type) {
        return Err(MissionError::MissionTypeNotConsistent);
    }

    Ok(())
}

///////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Tests                                               //
///////////////////////////////////////////////////////////////////////////////////////////////////
