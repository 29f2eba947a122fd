use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use bytes::{Bytes, BytesMut};

use crate::error::{Result, TransportError};

/// A connected controller stream. Implements `Read` and `Write`.
///
/// This is the fundamental I/O type returned by transport operations. Both the
/// command channel and the data channel are represented by one of these.
pub struct DeviceStream {
    inner: TcpStream,
}

impl Read for DeviceStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for DeviceStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl DeviceStream {
    /// Wrap an already connected TCP stream.
    pub fn from_tcp(stream: TcpStream) -> Self {
        Self { inner: stream }
    }

    /// Read until `buf` is completely filled.
    ///
    /// EOF before the buffer is full yields [`TransportError::Closed`].
    pub fn read_full(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0usize;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
        Ok(())
    }

    /// Read exactly `len` bytes into a fresh buffer.
    pub fn read_exact_bytes(&mut self, len: usize) -> Result<Bytes> {
        let mut buf = BytesMut::zeroed(len);
        self.read_full(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Set read timeout on the underlying stream.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.inner.set_read_timeout(timeout).map_err(Into::into)
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.inner.set_write_timeout(timeout).map_err(Into::into)
    }

    /// Try to clone this stream (creates a new file descriptor for the same socket).
    pub fn try_clone(&self) -> Result<Self> {
        let cloned = self.inner.try_clone()?;
        Ok(Self::from_tcp(cloned))
    }

    /// Address of the remote controller.
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        self.inner.peer_addr().map_err(Into::into)
    }

    /// Close both directions of the socket.
    ///
    /// Shutting down an already closed socket is not an error, so this is
    /// safe to call repeatedly and from any clone of the stream. Blocked
    /// readers on other clones wake up with EOF.
    pub fn shutdown(&self) -> Result<()> {
        match self.inner.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(TransportError::Io(err)),
        }
    }
}

impl std::fmt::Debug for DeviceStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut dbg = f.debug_struct("DeviceStream");
        dbg.field("type", &"tcp");
        if let Ok(addr) = self.inner.peer_addr() {
            dbg.field("peer", &addr);
        }
        dbg.finish()
    }
}
