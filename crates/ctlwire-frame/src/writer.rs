use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use ctlwire_transport::DeviceStream;

use crate::codec::{encode_frame, Frame, FrameConfig, Message, FRAME_SIZE};
use crate::error::{FrameError, Result};
use crate::reader::transport_to_frame_error;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete frames to any `Write` stream.
///
/// Every call writes the whole frame and its trailing payload or fails; a
/// partial write is never reported as success.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY.max(FRAME_SIZE)),
            config,
        }
    }

    /// Write a decoded message back out (frame + trailing payload).
    pub fn write_message(&mut self, message: &Message) -> Result<()> {
        self.send(&message.frame, message.trailing.as_ref())
    }

    /// Encode and send a frame followed by its trailing payload.
    pub fn send(&mut self, frame: &Frame, trailing: &[u8]) -> Result<()> {
        if trailing.len() > self.config.max_trailing_payload {
            return Err(FrameError::TrailingTooLarge {
                size: trailing.len(),
                max: self.config.max_trailing_payload,
            });
        }

        self.buf.clear();
        encode_frame(frame, trailing, &mut self.buf)?;

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        // Large trailing payloads should not pin memory between sends.
        if self.buf.capacity() > 4 * INITIAL_BUFFER_CAPACITY {
            self.buf = BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY);
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameWriter<DeviceStream> {
    /// Create a frame writer for a command channel and apply the write timeout from config.
    pub fn with_config_device(inner: DeviceStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::codec::decode_frame;
    use crate::reader::FrameReader;

    fn written(writer: FrameWriter<Cursor<Vec<u8>>>) -> Vec<u8> {
        writer.into_inner().into_inner()
    }

    #[test]
    fn write_single_frame() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));

        writer.send(&Frame::new(1).with_data(b"hello"), b"").unwrap();

        let wire = written(writer);
        assert_eq!(wire.len(), FRAME_SIZE);
        let header: [u8; FRAME_SIZE] = wire.as_slice().try_into().unwrap();
        let frame = decode_frame(&header).unwrap();
        assert_eq!(frame.command, 1);
        assert_eq!(frame.data_bytes(), b"hello");
    }

    #[test]
    fn write_frame_with_trailing_payload() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        let payload = vec![0xAB; 4096];

        writer.send(&Frame::new(2), &payload).unwrap();

        let wire = written(writer);
        assert_eq!(wire.len(), FRAME_SIZE + payload.len());
        let message = FrameReader::new(Cursor::new(wire)).read_message().unwrap();
        assert_eq!(message.frame.additional_data_bytes as usize, payload.len());
        assert_eq!(message.trailing.as_ref(), payload.as_slice());
    }

    #[test]
    fn write_message_preserves_trailing() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        let message = Message::new(Frame::new(3).with_status(1), b"tail".to_vec());

        writer.write_message(&message).unwrap();

        let read = FrameReader::new(Cursor::new(written(writer)))
            .read_message()
            .unwrap();
        assert_eq!(read.status(), 1);
        assert_eq!(read.trailing.as_ref(), b"tail");
    }

    #[test]
    fn trailing_too_large_rejected() {
        let cfg = FrameConfig {
            max_trailing_payload: 4,
            ..FrameConfig::default()
        };
        let mut writer = FrameWriter::with_config(Cursor::new(Vec::<u8>::new()), cfg);

        let err = writer.send(&Frame::new(1), b"oversized").unwrap_err();
        assert!(matches!(err, FrameError::TrailingTooLarge { .. }));
        assert!(written(writer).is_empty());
    }

    #[test]
    fn flush_propagates() {
        let sink = FlushTrackingWriter::default();
        let flag = Arc::clone(&sink.flushed);
        let mut writer = FrameWriter::new(sink);

        writer.send(&Frame::new(1), b"").unwrap();
        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn short_writes_are_completed() {
        let mut writer = FrameWriter::new(ShortWriter::default());
        writer.send(&Frame::new(5), b"abcdef").unwrap();
        assert_eq!(writer.get_ref().bytes.len(), FRAME_SIZE + 6);
    }

    #[test]
    fn zero_write_is_connection_closed() {
        let mut writer = FrameWriter::new(ZeroWriter);
        let err = writer.send(&Frame::new(1), b"").unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[derive(Default)]
    struct FlushTrackingWriter {
        bytes: Vec<u8>,
        flushed: Arc<AtomicBool>,
    }

    impl Write for FlushTrackingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.bytes.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Accepts at most 7 bytes per call and interrupts every other call.
    #[derive(Default)]
    struct ShortWriter {
        bytes: Vec<u8>,
        calls: usize,
    }

    impl Write for ShortWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.calls += 1;
            if self.calls % 2 == 0 {
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            let n = buf.len().min(7);
            self.bytes.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
