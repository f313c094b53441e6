use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use mavio::protocol::{SystemId, V2};
use mavio::Frame;

use crate::core::utils::UniqueId;

/// Connection `ID`.
///
/// This is an opaque identifier. It can be compared for equality with other connection `ID`s and
/// used as a key in hashmaps or hashsets.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(UniqueId);

/// Outgoing MAVLink frame.
///
/// Carries the system `ID` the frame is addressed to, taken from the `target_system` field of the
/// encoded message. Transports that know several peers use it to pick the recipients. A frame
/// without a target, or with target `0`, is broadcast.
#[derive(Clone)]
pub struct OutgoingFrame {
    frame: Arc<Frame<V2>>,
    target_system_id: Option<SystemId>,
}

impl ConnectionId {
    pub(crate) fn new() -> Self {
        Self(UniqueId::new())
    }
}

impl Debug for ConnectionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ConnectionId").field(&self.0.value()).finish()
    }
}

impl OutgoingFrame {
    /// Frame addressed to every peer.
    pub fn broadcast(frame: Frame<V2>) -> Self {
        Self {
            frame: Arc::new(frame),
            target_system_id: None,
        }
    }

    /// Frame addressed to a particular system.
    pub fn targeted(frame: Frame<V2>, target_system_id: SystemId) -> Self {
        Self {
            frame: Arc::new(frame),
            target_system_id: match target_system_id {
                0 => None,
                id => Some(id),
            },
        }
    }

    /// MAVLink frame.
    pub fn frame(&self) -> &Frame<V2> {
        self.frame.as_ref()
    }

    /// Target system `ID`, `None` for broadcast frames.
    pub fn target_system_id(&self) -> Option<SystemId> {
        self.target_system_id
    }

    /// Returns `true` if the frame should reach a peer with the given system `ID`.
    ///
    /// Peers with unknown system `ID` receive every frame.
    pub fn should_reach(&self, peer_system_id: Option<SystemId>) -> bool {
        match (self.target_system_id, peer_system_id) {
            (Some(target), Some(peer)) => target == peer,
            _ => true,
        }
    }
}

impl Debug for OutgoingFrame {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutgoingFrame")
            .field("message_id", &self.frame.message_id())
            .field("sequence", &self.frame.sequence())
            .field("target_system_id", &self.target_system_id)
            .finish()
    }
}

///////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Tests                                               //
///////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::heartbeat_frame;

    #[test]
    fn targeted_frames_reach_matching_or_unknown_peers() {
        let frame = OutgoingFrame::targeted(heartbeat_frame(245, 190, 0), 3);

        assert!(frame.should_reach(Some(3)));
        assert!(frame.should_reach(None));
        assert!(!frame.should_reach(Some(4)));
    }

    #[test]
    fn zero_target_is_broadcast() {
        let frame = OutgoingFrame::targeted(heartbeat_frame(245, 190, 0), 0);

        assert_eq!(frame.target_system_id(), None);
        assert!(frame.should_reach(Some(42)));
    }
}
