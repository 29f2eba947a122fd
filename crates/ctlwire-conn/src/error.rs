use std::time::Duration;

use crate::connection::ConnectionState;

/// Errors that can occur in connection operations.
#[derive(Debug, thiserror::Error)]
pub enum ConnError {
    /// Transport-level error (connect refused, unreachable, timed out, I/O).
    #[error("transport error: {0}")]
    Transport(#[from] ctlwire_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] ctlwire_frame::FrameError),

    /// The connection ended while the operation was in progress.
    #[error("connection closed")]
    ConnectionClosed,

    /// No frame with the request's command code arrived before the deadline.
    #[error("no response to command {command} within {timeout:?}")]
    ResponseTimeout { command: u32, timeout: Duration },

    /// Another request for the same command code is already awaiting its response.
    #[error("a request for command {0} is already awaiting a response")]
    DuplicatePendingRequest(u32),

    /// The connection has not been opened.
    #[error("not connected")]
    NotConnected,

    /// The operation is not allowed in the current lifecycle state.
    #[error("connection is {state}")]
    InvalidState { state: ConnectionState },

    /// The background reader thread could not be started.
    #[error("failed to start reader thread: {0}")]
    Spawn(std::io::Error),
}

impl ConnError {
    /// True for every flavor of "not connected": connect failures, a closed
    /// or never-opened connection.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ConnError::ConnectionClosed | ConnError::NotConnected => true,
            ConnError::Transport(err) => {
                err.is_closed()
                    || matches!(
                        err,
                        ctlwire_transport::TransportError::Connect { .. }
                            | ctlwire_transport::TransportError::Resolve { .. }
                    )
            }
            ConnError::Frame(ctlwire_frame::FrameError::ConnectionClosed) => true,
            _ => false,
        }
    }

    /// True when the device did not answer in time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ConnError::ResponseTimeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, ConnError>;
