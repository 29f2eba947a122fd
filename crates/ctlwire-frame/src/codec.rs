use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Size of one frame on the wire.
pub const FRAME_SIZE: usize = 128;

/// Size of the inline data field.
pub const DATA_SIZE: usize = 72;

/// Number of integer parameters in a frame.
pub const PARAM_COUNT: usize = 7;

/// Frame start sentinel.
pub const START_MARKER: u32 = 0xAA55_0F0F;

/// Frame end sentinel.
pub const END_MARKER: u32 = 0x0F0F_55AA;

/// Byte pattern of [`START_MARKER`] as it appears on the wire.
pub const START_MARKER_BYTES: [u8; 4] = START_MARKER.to_le_bytes();

/// Default maximum trailing payload size: 16 MiB.
pub const DEFAULT_MAX_TRAILING: usize = 16 * 1024 * 1024;

/// Consecutive invalid frames tolerated before the reader resynchronizes.
pub const DEFAULT_INVALID_FRAME_THRESHOLD: u32 = 5;

/// Bytes pulled per read while scanning for a start marker.
pub const DEFAULT_RESYNC_CHUNK: usize = 512;

const PARAMS_OFFSET: usize = 12;
const DATA_OFFSET: usize = 52;

/// One 128-byte controller frame.
///
/// Field meanings beyond the markers are defined per command code by the
/// controller; the codec treats them as opaque.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    pub start_marker: u32,
    /// Operation (request), echoed operation (response) or event kind.
    pub command: u32,
    /// 0 on success; nonzero is a device-reported error.
    pub status: u32,
    pub params: [i32; PARAM_COUNT],
    pub value: f64,
    /// Number of trailing payload bytes that follow this frame on the wire.
    pub additional_data_bytes: u32,
    /// Inline payload, null-padded.
    pub data: [u8; DATA_SIZE],
    pub end_marker: u32,
}

impl Frame {
    /// Create a frame for `command` with every other field zeroed.
    pub fn new(command: u32) -> Self {
        Self {
            start_marker: START_MARKER,
            command,
            status: 0,
            params: [0; PARAM_COUNT],
            value: 0.0,
            additional_data_bytes: 0,
            data: [0; DATA_SIZE],
            end_marker: END_MARKER,
        }
    }

    pub fn with_status(mut self, status: u32) -> Self {
        self.status = status;
        self
    }

    pub fn with_params(mut self, params: [i32; PARAM_COUNT]) -> Self {
        self.params = params;
        self
    }

    /// Set a single parameter. Indices past the last parameter are ignored.
    pub fn with_param(mut self, index: usize, value: i32) -> Self {
        if let Some(slot) = self.params.get_mut(index) {
            *slot = value;
        }
        self
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = value;
        self
    }

    /// Set the inline data field.
    ///
    /// Input longer than [`DATA_SIZE`] is truncated; larger payloads belong in
    /// the trailing payload.
    pub fn with_data(mut self, data: &[u8]) -> Self {
        let len = data.len().min(DATA_SIZE);
        self.data = [0; DATA_SIZE];
        self.data[..len].copy_from_slice(&data[..len]);
        self
    }

    /// Inline data with the null padding stripped.
    pub fn data_bytes(&self) -> &[u8] {
        let end = self
            .data
            .iter()
            .rposition(|b| *b != 0)
            .map_or(0, |pos| pos + 1);
        &self.data[..end]
    }

    /// Inline data as text, replacing invalid UTF-8.
    pub fn data_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(self.data_bytes())
    }

    /// True when both markers match their fixed constants.
    pub fn is_valid(&self) -> bool {
        self.start_marker == START_MARKER && self.end_marker == END_MARKER
    }

    /// True when the device reported success.
    pub fn is_success(&self) -> bool {
        self.status == 0
    }
}

/// A decoded frame together with the trailing payload it declared.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub frame: Frame,
    pub trailing: Bytes,
}

impl Message {
    pub fn new(frame: Frame, trailing: impl Into<Bytes>) -> Self {
        Self {
            frame,
            trailing: trailing.into(),
        }
    }

    pub fn command(&self) -> u32 {
        self.frame.command
    }

    pub fn status(&self) -> u32 {
        self.frame.status
    }

    /// The total wire size of this message (frame + trailing payload).
    pub fn wire_size(&self) -> usize {
        FRAME_SIZE + self.trailing.len()
    }
}

/// Encode a frame and its trailing payload into the wire format.
///
/// Wire format (all integers little-endian):
/// ```text
/// offset  size  field
///      0     4  start marker
///      4     4  command
///      8     4  status
///     12    28  params[7] (i32)
///     40     8  value (f64)
///     48     4  additional data bytes (= trailing.len())
///     52    72  inline data, null-padded
///    124     4  end marker
///    128     N  trailing payload
/// ```
///
/// Markers are always written as the fixed constants, whatever `frame` holds.
pub fn encode_frame(frame: &Frame, trailing: &[u8], dst: &mut BytesMut) -> Result<()> {
    let trailing_len = u32::try_from(trailing.len()).map_err(|_| {
        FrameError::Encoding(format!(
            "trailing payload of {} bytes exceeds the u32 size field",
            trailing.len()
        ))
    })?;

    dst.reserve(FRAME_SIZE + trailing.len());
    dst.put_u32_le(START_MARKER);
    dst.put_u32_le(frame.command);
    dst.put_u32_le(frame.status);
    for param in frame.params {
        dst.put_i32_le(param);
    }
    dst.put_f64_le(frame.value);
    dst.put_u32_le(trailing_len);
    dst.put_slice(&frame.data);
    dst.put_u32_le(END_MARKER);
    dst.put_slice(trailing);
    Ok(())
}

/// Unpack every header field, whether or not the markers are valid.
pub fn decode_header(buf: &[u8; FRAME_SIZE]) -> Frame {
    let mut src = &buf[..];
    let start_marker = src.get_u32_le();
    let command = src.get_u32_le();
    let status = src.get_u32_le();
    debug_assert_eq!(FRAME_SIZE - src.remaining(), PARAMS_OFFSET);
    let mut params = [0i32; PARAM_COUNT];
    for param in &mut params {
        *param = src.get_i32_le();
    }
    let value = src.get_f64_le();
    let additional_data_bytes = src.get_u32_le();
    debug_assert_eq!(FRAME_SIZE - src.remaining(), DATA_OFFSET);
    let mut data = [0u8; DATA_SIZE];
    src.copy_to_slice(&mut data);
    let end_marker = src.get_u32_le();

    Frame {
        start_marker,
        command,
        status,
        params,
        value,
        additional_data_bytes,
        data,
        end_marker,
    }
}

/// Decode a frame, rejecting it when either marker mismatches.
pub fn decode_frame(buf: &[u8; FRAME_SIZE]) -> Result<Frame> {
    let frame = decode_header(buf);
    if !frame.is_valid() {
        return Err(FrameError::InvalidMarker {
            frame: Box::new(frame),
        });
    }
    Ok(frame)
}

/// Offset of the first start-marker byte pattern in `buf`.
pub fn find_start_marker(buf: &[u8]) -> Option<usize> {
    buf.windows(START_MARKER_BYTES.len())
        .position(|window| window == START_MARKER_BYTES)
}

/// Configuration for frame reading and writing.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum trailing payload size in bytes. Default: 16 MiB.
    pub max_trailing_payload: usize,
    /// Consecutive invalid frames before resynchronizing. Default: 5.
    pub invalid_frame_threshold: u32,
    /// Read size while scanning for a start marker. Default: 512.
    pub resync_chunk_size: usize,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_trailing_payload: DEFAULT_MAX_TRAILING,
            invalid_frame_threshold: DEFAULT_INVALID_FRAME_THRESHOLD,
            resync_chunk_size: DEFAULT_RESYNC_CHUNK,
            write_timeout: None,
        }
    }
}
