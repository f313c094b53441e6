//! # Parameter protocol
//!
//! Reads and writes named parameters of a remote system. The standard protocol
//! (`PARAM_REQUEST_READ` / `PARAM_SET` / `PARAM_VALUE`) talks to the autopilot and carries values
//! up to four bytes wide. The extended protocol (`PARAM_EXT_*`) talks to the camera component and
//! carries any [`ParamValue`].

mod sender;
mod value;

#[doc(inline)]
pub use sender::{ParamChangedCallback, ParamList, ParamSender};
#[doc(inline)]
pub use value::{ParamType, ParamValue};

/// Outcome of a parameter request.
pub type ParamResult<T> = std::result::Result<T, ParamError>;

/// Reasons a parameter request did not succeed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParamError {
    /// The request could not be sent.
    #[error("connection error")]
    ConnectionError,
    /// No response after all attempts.
    #[error("parameter request timed out")]
    Timeout,
    /// The name does not fit the 16-byte wire field.
    #[error("parameter name is too long")]
    NameTooLong,
    /// The remote reported a value of another type than expected.
    #[error("parameter has a different type")]
    WrongType,
    /// The value can't be carried by the protocol or was rejected by the remote.
    #[error("parameter value is not supported")]
    ValueUnsupported,
    /// The remote failed to set the value.
    #[error("setting parameter failed")]
    Failed,
    /// Another parameter list request is active.
    #[error("parameter list request already in progress")]
    Busy,
}
