use thiserror::Error;

/// Error taxonomy of the coordination service.
///
/// Only `SessionNotFound` and `ReconnectThrottled` ever reach the wire as an
/// `error` message; the rest are handled at the boundary they occur at
/// (`AuthFailure` closes the socket with code 4001, `Unauthorized` is
/// swallowed without a state change, `ChannelUnavailable` is a logged drop).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("Invalid token")]
    AuthFailure,

    #[error("Session not found")]
    SessionNotFound,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Target has no live connection")]
    ChannelUnavailable,

    #[error("Too many reconnect attempts")]
    ReconnectThrottled,
}
