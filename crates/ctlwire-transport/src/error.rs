use std::net::SocketAddr;

/// Errors that can occur in controller transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The host name could not be resolved to any socket address.
    #[error("failed to resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        source: std::io::Error,
    },

    /// Failed to connect to the specified address (refused, unreachable, timed out).
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// The command port leaves no room for the data channel at `port + 1`.
    #[error("command port {0} has no data channel port (port + 1 overflows)")]
    InvalidPort(u16),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The remote side closed the stream before the requested bytes arrived.
    #[error("connection closed by remote")]
    Closed,
}

impl TransportError {
    /// Returns true if the error means the connection is gone.
    pub fn is_closed(&self) -> bool {
        match self {
            TransportError::Closed => true,
            TransportError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
