//! # Mavlane errors
//!
//! [`Error`] covers failures of the engine itself: transports, codecs, configuration. Outcomes of
//! protocol exchanges with a remote are reported to callbacks with dedicated error types:
//! [`CommandError`](crate::protocol::command::CommandError),
//! [`ParamError`](crate::protocol::params::ParamError) and
//! [`MissionError`](crate::protocol::mission::MissionError).

use std::sync::PoisonError;

/// Common result type returned by Mavlane functions and methods.
pub type Result<T> = std::result::Result<T, Error>;

/// All errors generated by Mavlane.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// MAVLink encoding and decoding errors.
    #[error("MAVLink error: {0:?}")]
    Mavio(#[from] mavio::error::Error),

    /// Serial port errors.
    #[cfg(feature = "serial")]
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Connection URL can't be parsed.
    #[error("invalid connection URL `{url}`: {reason}")]
    InvalidUrl {
        /// Provided URL.
        url: String,
        /// What is wrong with it.
        reason: String,
    },

    /// All parser channels are in use.
    #[error("no free channels left")]
    ChannelsExhausted,

    /// Connection is not started or already stopped.
    #[error("connection is closed")]
    ConnectionClosed,

    /// A frame was not accepted by any transport.
    #[error("frame was not sent")]
    SendFailed,

    /// Value can't be represented on the wire.
    #[error("unsupported value: {0}")]
    Unsupported(String),

    /// A lock was poisoned by a panicking thread.
    #[error("poisoned lock: {0}")]
    Poisoned(String),
}

impl<T> From<PoisonError<T>> for Error {
    fn from(value: PoisonError<T>) -> Self {
        Self::Poisoned(value.to_string())
    }
}

impl From<mavio::error::SpecError> for Error {
    fn from(value: mavio::error::SpecError) -> Self {
        Self::Mavio(value.into())
    }
}
