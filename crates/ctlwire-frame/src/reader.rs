use std::io::{ErrorKind, Read};
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use ctlwire_transport::DeviceStream;
use tracing::{debug, info, warn};

use crate::codec::{
    decode_header, find_start_marker, Frame, FrameConfig, Message, FRAME_SIZE, START_MARKER_BYTES,
};
use crate::error::{FrameError, Result};
use crate::stats::ReaderStats;

/// Where the reader stands relative to frame boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// Reading whole frames.
    Synchronized,
    /// Scanning the stream for a start marker.
    Resyncing,
    /// The stream ended or failed; no further frames will be produced.
    Stopped,
}

/// Reads complete messages (frame + trailing payload) from any `Read` stream.
///
/// Handles partial reads internally. Frames with bad markers are counted and
/// skipped; after [`FrameConfig::invalid_frame_threshold`] of them in a row the
/// reader scans the stream for the next start marker and realigns on it.
pub struct FrameReader<T> {
    inner: T,
    /// Bytes already pulled off the stream but not yet consumed.
    carry: BytesMut,
    scratch: Vec<u8>,
    config: FrameConfig,
    state: ReaderState,
    consecutive_invalid: u32,
    stats: Arc<ReaderStats>,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        let chunk = config.resync_chunk_size.max(START_MARKER_BYTES.len());
        Self {
            inner,
            carry: BytesMut::with_capacity(chunk + FRAME_SIZE),
            scratch: vec![0u8; chunk],
            config,
            state: ReaderState::Synchronized,
            consecutive_invalid: 0,
            stats: Arc::new(ReaderStats::new()),
        }
    }

    /// Read the next valid message (blocking).
    ///
    /// The trailing payload declared by a frame is always read before this
    /// returns, so the next call starts on a frame boundary. Returns
    /// `Err(FrameError::ConnectionClosed)` when EOF is reached; after any
    /// error the reader is [`ReaderState::Stopped`].
    pub fn read_message(&mut self) -> Result<Message> {
        let result = self.next_message();
        if let Err(err) = &result {
            if self.state != ReaderState::Stopped {
                debug!(error = %err, "frame reader stopped");
            }
            self.state = ReaderState::Stopped;
        }
        result
    }

    fn next_message(&mut self) -> Result<Message> {
        loop {
            match self.state {
                ReaderState::Stopped => return Err(FrameError::ConnectionClosed),
                ReaderState::Resyncing => self.resync_step()?,
                ReaderState::Synchronized => {
                    if let Some(message) = self.read_synchronized()? {
                        return Ok(message);
                    }
                }
            }
        }
    }

    fn read_synchronized(&mut self) -> Result<Option<Message>> {
        let mut header = [0u8; FRAME_SIZE];
        self.fill(&mut header)?;
        let frame = decode_header(&header);

        if !frame.is_valid() {
            self.record_invalid(&frame, "marker mismatch");
            return Ok(None);
        }

        let trailing_len = frame.additional_data_bytes as usize;
        if trailing_len > self.config.max_trailing_payload {
            self.record_invalid(&frame, "trailing payload exceeds limit");
            return Ok(None);
        }

        let trailing = if trailing_len > 0 {
            let mut buf = BytesMut::zeroed(trailing_len);
            self.fill(&mut buf)?;
            buf.freeze()
        } else {
            Bytes::new()
        };

        self.consecutive_invalid = 0;
        self.stats.record_frame(trailing_len);
        debug!(
            command = frame.command,
            status = frame.status,
            trailing = trailing_len,
            "frame read"
        );
        Ok(Some(Message { frame, trailing }))
    }

    fn record_invalid(&mut self, frame: &Frame, reason: &'static str) {
        self.consecutive_invalid = self.consecutive_invalid.saturating_add(1);
        self.stats.record_parse_error();
        warn!(
            reason,
            start_marker = format_args!("{:#010x}", frame.start_marker),
            end_marker = format_args!("{:#010x}", frame.end_marker),
            command = frame.command,
            status = frame.status,
            additional_data_bytes = frame.additional_data_bytes,
            consecutive = self.consecutive_invalid,
            "invalid frame skipped"
        );

        if self.consecutive_invalid >= self.config.invalid_frame_threshold {
            warn!(
                consecutive = self.consecutive_invalid,
                "too many invalid frames; resynchronizing"
            );
            self.state = ReaderState::Resyncing;
        }
    }

    /// Scan buffered bytes for a start marker, pulling one more chunk when
    /// none is found.
    fn resync_step(&mut self) -> Result<()> {
        if let Some(pos) = find_start_marker(&self.carry) {
            self.carry.advance(pos);
            self.stats.record_discarded(pos);
            self.stats.record_resync();
            self.consecutive_invalid = 0;
            self.state = ReaderState::Synchronized;
            info!(skipped = pos, "stream resynchronized on start marker");
            return Ok(());
        }

        // A marker may straddle two reads; keep its possible prefix.
        let keep = START_MARKER_BYTES.len() - 1;
        if self.carry.len() > keep {
            let discard = self.carry.len() - keep;
            self.carry.advance(discard);
            self.stats.record_discarded(discard);
        }

        let read = loop {
            match self.inner.read(&mut self.scratch) {
                Ok(n) => break n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        };
        if read == 0 {
            return Err(FrameError::ConnectionClosed);
        }
        self.carry.extend_from_slice(&self.scratch[..read]);
        Ok(())
    }

    /// Fill `buf` completely, consuming carried bytes before reading the stream.
    fn fill(&mut self, buf: &mut [u8]) -> Result<()> {
        let carried = self.carry.len().min(buf.len());
        if carried > 0 {
            buf[..carried].copy_from_slice(&self.carry[..carried]);
            self.carry.advance(carried);
        }

        let mut filled = carried;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        Ok(())
    }

    /// Current synchronization state.
    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// Invalid frames seen since the last valid one.
    pub fn consecutive_invalid(&self) -> u32 {
        self.consecutive_invalid
    }

    /// Shared counters; the handle stays valid after the reader is moved.
    pub fn stats(&self) -> Arc<ReaderStats> {
        Arc::clone(&self.stats)
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameReader<DeviceStream> {
    /// Create a frame reader for a command channel.
    ///
    /// The read timeout is cleared: the reader blocks until a frame arrives or
    /// the socket closes.
    pub fn with_config_device(inner: DeviceStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(None)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

pub(crate) fn transport_to_frame_error(err: ctlwire_transport::TransportError) -> FrameError {
    match err {
        ctlwire_transport::TransportError::Io(io) => FrameError::Io(io),
        ctlwire_transport::TransportError::Connect { source, .. }
        | ctlwire_transport::TransportError::Resolve { source, .. } => FrameError::Io(source),
        ctlwire_transport::TransportError::Closed => FrameError::ConnectionClosed,
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}
