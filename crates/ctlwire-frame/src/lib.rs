//! Fixed-size binary framing for instrument controllers.
//!
//! Every message on the command channel is a 128-byte frame:
//! - 4-byte start and end markers for stream synchronization
//! - command code, status code, seven integer parameters and a float value
//! - a 72-byte inline data field
//! - a declared count of trailing payload bytes that follow the frame
//!
//! The reader drains trailing payloads before touching the next frame and
//! realigns the stream when frame boundaries are lost.

pub mod codec;
pub mod error;
pub mod reader;
pub mod stats;
pub mod writer;

pub use codec::{
    decode_frame, decode_header, encode_frame, find_start_marker, Frame, FrameConfig, Message,
    DATA_SIZE, DEFAULT_INVALID_FRAME_THRESHOLD, DEFAULT_MAX_TRAILING, DEFAULT_RESYNC_CHUNK,
    END_MARKER, FRAME_SIZE, PARAM_COUNT, START_MARKER,
};
pub use error::{FrameError, Result};
pub use reader::{FrameReader, ReaderState};
pub use stats::{ReaderCounters, ReaderStats};
pub use writer::FrameWriter;
