//! Reader counters shared between the reader thread and observers.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters updated by a [`FrameReader`](crate::FrameReader).
#[derive(Debug, Default)]
pub struct ReaderStats {
    frames_read: AtomicU64,
    parse_errors: AtomicU64,
    resync_count: AtomicU64,
    bytes_discarded: AtomicU64,
    trailing_bytes: AtomicU64,
}

/// Point-in-time copy of [`ReaderStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderCounters {
    /// Valid frames handed out by the reader.
    pub frames_read: u64,
    /// Frames rejected for bad markers or an oversized trailing payload.
    pub parse_errors: u64,
    /// Completed resynchronizations.
    pub resync_count: u64,
    /// Bytes skipped while scanning for a start marker.
    pub bytes_discarded: u64,
    /// Trailing payload bytes read alongside valid frames.
    pub trailing_bytes: u64,
}

impl ReaderStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ReaderCounters {
        ReaderCounters {
            frames_read: self.frames_read.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            resync_count: self.resync_count.load(Ordering::Relaxed),
            bytes_discarded: self.bytes_discarded.load(Ordering::Relaxed),
            trailing_bytes: self.trailing_bytes.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_frame(&self, trailing: usize) {
        self.frames_read.fetch_add(1, Ordering::Relaxed);
        self.trailing_bytes
            .fetch_add(trailing as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_resync(&self) {
        self.resync_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_discarded(&self, bytes: usize) {
        self.bytes_discarded
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }
}
