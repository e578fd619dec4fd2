//! Error taxonomy for the room synchronization core.

use thiserror::Error;

/// Why a session ended or a command could not be carried out.
///
/// Transport and protocol faults never escape the connection manager as
/// panics; they are turned into one of these values and either returned to
/// the caller or published as a `connection_failed` / `error` event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// A frame was not JSON, or not an object with a string `type` tag.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// The transport was closed on purpose (user action or normal close).
    #[error("connection closed")]
    TransportClosedNormal,

    /// The transport dropped unexpectedly; eligible for reconnection.
    #[error("connection lost ({}): {reason}", close_code_label(.code))]
    TransportClosedAbnormal { code: Option<u16>, reason: String },

    /// The server does not know the requested room.
    #[error("{0}")]
    RoomNotFound(String),

    /// The supplied credential was refused.
    #[error("{0}")]
    AuthenticationRejected(String),

    /// Every reconnection attempt failed.
    #[error("connection lost after {attempts} reconnection attempts")]
    ReconnectLimitExceeded { attempts: u32 },

    /// A command was issued while the connection was not open.
    #[error("not connected")]
    NotConnected,

    /// The server reported an error; the message is shown as-is.
    #[error("{0}")]
    ServerReportedError(String),

    /// An operation was attempted in a state that does not allow it.
    #[error("cannot {operation} while {state}")]
    InvalidState { state: String, operation: &'static str },

    /// The room endpoint could not be built from the configured base URL.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// A command was refused before sending because its input is unusable.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// An outbound command could not be serialized.
    #[error("failed to encode command: {0}")]
    Encode(String),
}

impl SyncError {
    /// Terminal errors end the session; the user has to act (refresh, log in
    /// again, pick another room) before a new `connect()` makes sense.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncError::RoomNotFound(_)
                | SyncError::AuthenticationRejected(_)
                | SyncError::ReconnectLimitExceeded { .. }
        )
    }
}

fn close_code_label(code: &Option<u16>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "no close code".to_string(),
    }
}
