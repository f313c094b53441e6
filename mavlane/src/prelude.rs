//! # Basic imports

pub use crate::errors::{Error, Result};

pub use crate::core::io::{ConnectionUrl, OutgoingFrame};
pub use crate::core::time::{Clock, FakeClock, SystemClock};
pub use crate::protocol::command::{Command, CommandError, CommandInt, CommandLong, CommandParams};
pub use crate::protocol::mission::{MissionError, MissionItem, TransferHandle};
pub use crate::protocol::params::{ParamError, ParamType, ParamValue};
pub use crate::system::{Hub, HubConf, OwnerToken, Plugin, RemoteState, System};

pub use mavio::protocol::{ComponentId, MessageId, SystemId, V2};
pub use mavio::Frame;
