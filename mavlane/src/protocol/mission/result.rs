use crate::protocol::messages::mission_result;

/// Outcome of a mission transfer.
pub type MissionResult<T> = std::result::Result<T, MissionError>;

/// Reasons a mission transfer did not succeed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MissionError {
    /// A frame could not be sent.
    #[error("connection error")]
    ConnectionError,
    /// The remote does not accept mission commands.
    #[error("mission denied")]
    Denied,
    /// The remote has no space for this many items.
    #[error("too many mission items")]
    TooManyMissionItems,
    /// No response after all attempts.
    #[error("mission transfer timed out")]
    Timeout,
    /// The remote does not support a command.
    #[error("mission command unsupported")]
    Unsupported,
    /// The remote does not support a coordinate frame.
    #[error("mission frame unsupported")]
    UnsupportedFrame,
    /// Nothing to upload.
    #[error("no mission available")]
    NoMissionAvailable,
    /// The transfer was cancelled by either side.
    #[error("mission transfer cancelled")]
    Cancelled,
    /// Items carry different mission types.
    #[error("mission type not consistent")]
    MissionTypeNotConsistent,
    /// Sequence numbers are not `0..N` or the remote reported a sequence error.
    #[error("invalid sequence")]
    InvalidSequence,
    /// Not exactly one item is current, or the current index is invalid.
    #[error("current item invalid")]
    CurrentInvalid,
    /// The remote violated the protocol.
    #[error("mission protocol error")]
    ProtocolError,
    /// The remote rejected a parameter of an item.
    #[error("invalid mission item parameter")]
    InvalidParam,
    /// The remote does not support `MISSION_ITEM_INT`.
    #[error("int messages not supported")]
    IntMessagesNotSupported,
}

/// Maps a `MAV_MISSION_RESULT` to a transfer outcome.
pub(crate) fn result_from_ack(result: u8) -> MissionResult<()> {
    match result {
        mission_result::ACCEPTED => Ok(()),
        mission_result::UNSUPPORTED_FRAME => Err(MissionError::UnsupportedFrame),
        mission_result::UNSUPPORTED => Err(MissionError::Unsupported),
        mission_result::NO_SPACE => Err(MissionError::TooManyMissionItems),
        mission_result::INVALID..=mission_result::INVALID_PARAM7 => Err(MissionError::InvalidParam),
        mission_result::INVALID_SEQUENCE => Err(MissionError::InvalidSequence),
        mission_result::DENIED => Err(MissionError::Denied),
        mission_result::OPERATION_CANCELLED => Err(MissionError::Cancelled),
        _ => Err(MissionError::ProtocolError),
    }
}

///////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Tests                                               //
///////////////////////////////////////////////////////////////////////////////////////////////////
