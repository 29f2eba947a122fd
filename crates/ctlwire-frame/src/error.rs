use crate::codec::Frame;

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame start or end marker does not match its fixed constant.
    ///
    /// The raw decoded fields are kept so the corrupt frame can be logged.
    #[error(
        "invalid frame markers (start {:#010x}, end {:#010x})",
        .frame.start_marker,
        .frame.end_marker
    )]
    InvalidMarker { frame: Box<Frame> },

    /// The declared trailing payload exceeds the configured maximum size.
    #[error("trailing payload too large ({size} bytes, max {max})")]
    TrailingTooLarge { size: usize, max: usize },

    /// Caller-supplied input cannot be represented on the wire.
    #[error("frame encoding failed: {0}")]
    Encoding(String),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
