use std::fmt;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use ctlwire_frame::{FrameError, FrameReader, FrameWriter, Message, ReaderCounters, ReaderStats};
use ctlwire_transport::{ChannelPair, DeviceStream, TcpTransport};
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::dispatcher::{DispatchCounters, Dispatcher};
use crate::error::{ConnError, Result};
use crate::handlers::HandlerId;
use crate::request::Request;

/// Connection lifecycle.
///
/// `Unconnected → Connecting → Open → Closing → Closed`. A failed connect
/// returns to `Unconnected`; `Closed` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unconnected,
    Connecting,
    Open,
    Closing,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Unconnected => "unconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of a connection's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionCounters {
    pub reader: ReaderCounters,
    pub dispatch: DispatchCounters,
    pub frames_sent: u64,
}

struct Session {
    channels: ChannelPair,
    reader: Option<JoinHandle<()>>,
}

struct Shared {
    config: ConnectionConfig,
    /// Serializes connect and teardown.
    lifecycle: Mutex<()>,
    state: Mutex<ConnectionState>,
    dispatcher: Dispatcher,
    writer: Mutex<Option<FrameWriter<DeviceStream>>>,
    session: Mutex<Option<Session>>,
    data: Mutex<Option<DeviceStream>>,
    /// Kept past teardown so counters stay readable.
    reader_stats: Mutex<Option<Arc<ReaderStats>>>,
    frames_sent: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    fn set_state(&self, state: ConnectionState) {
        let mut current = lock(&self.state);
        if *current != state {
            debug!(from = %*current, to = %state, "connection state changed");
            *current = state;
        }
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state() {
            ConnectionState::Open => Ok(()),
            ConnectionState::Unconnected | ConnectionState::Connecting => {
                Err(ConnError::NotConnected)
            }
            ConnectionState::Closing | ConnectionState::Closed => Err(ConnError::ConnectionClosed),
        }
    }

    fn write(&self, request: &Request) -> Result<()> {
        let mut guard = lock(&self.writer);
        let Some(writer) = guard.as_mut() else {
            return Err(ConnError::ConnectionClosed);
        };

        match writer.send(request.frame(), request.trailing_payload()) {
            Ok(()) => {
                self.frames_sent.fetch_add(1, Ordering::Relaxed);
                debug!(
                    command = request.command(),
                    trailing = request.trailing_payload().len(),
                    "frame sent"
                );
                Ok(())
            }
            // Rejected before anything reached the wire.
            Err(err @ (FrameError::TrailingTooLarge { .. } | FrameError::Encoding(_))) => {
                Err(err.into())
            }
            Err(err) => {
                drop(guard);
                warn!(command = request.command(), error = %err, "write failed; closing connection");
                self.teardown();
                Err(write_error(err))
            }
        }
    }

    /// Release sockets and fail every pending request. Safe to call from any
    /// thread, any number of times; the reader thread is not joined here.
    fn teardown(&self) -> Option<JoinHandle<()>> {
        let _lifecycle = lock(&self.lifecycle);
        match self.state() {
            ConnectionState::Open => {}
            _ => return None,
        }
        self.set_state(ConnectionState::Closing);

        let session = lock(&self.session).take();
        let reader = session.and_then(|mut session| {
            if let Err(err) = session.channels.shutdown() {
                debug!(error = %err, "socket shutdown failed");
            }
            session.reader.take()
        });
        lock(&self.writer).take();
        lock(&self.data).take();

        let released = self.dispatcher.close();
        if released > 0 {
            debug!(released, "pending requests failed with connection closed");
        }
        self.set_state(ConnectionState::Closed);
        info!("connection closed");
        reader
    }

    fn reader_counters(&self) -> ReaderCounters {
        lock(&self.reader_stats)
            .as_ref()
            .map(|stats| stats.snapshot())
            .unwrap_or_default()
    }
}

fn write_error(err: FrameError) -> ConnError {
    match err {
        FrameError::ConnectionClosed => ConnError::ConnectionClosed,
        FrameError::Io(io)
            if matches!(
                io.kind(),
                ErrorKind::BrokenPipe
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::NotConnected
                    | ErrorKind::UnexpectedEof
            ) =>
        {
            ConnError::ConnectionClosed
        }
        other => ConnError::Frame(other),
    }
}

fn run_reader(shared: Arc<Shared>, mut reader: FrameReader<DeviceStream>) {
    debug!("reader started");
    loop {
        match reader.read_message() {
            Ok(message) => {
                shared.dispatcher.dispatch(message);
            }
            Err(err) => {
                match shared.state() {
                    ConnectionState::Open => {
                        warn!(error = %err, "command channel lost");
                    }
                    state => debug!(%state, error = %err, "reader stopping"),
                }
                break;
            }
        }
    }
    // Joining is left to `disconnect`; this thread cannot join itself.
    drop(shared.teardown());
}

/// A connection to one instrument controller.
///
/// Owns the command and data sockets, a background reader thread that
/// decodes frames and dispatches them, and the single write path shared by
/// every caller. Dropping the connection disconnects it.
///
/// ```no_run
/// use std::time::Duration;
/// use ctlwire_conn::{Connection, ConnectionConfig, Request};
///
/// # fn main() -> ctlwire_conn::Result<()> {
/// let conn = Connection::new(ConnectionConfig::default());
/// conn.connect("192.168.1.50", 5000, Duration::from_secs(3))?;
///
/// conn.register_handler(2001, |event| println!("event {}", event.frame.value));
///
/// let reply = conn.query(&Request::new(12327).param(0, 1), Duration::from_secs(2))?;
/// println!("status {}", reply.status());
/// conn.disconnect();
/// # Ok(())
/// # }
/// ```
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    pub fn new(config: ConnectionConfig) -> Self {
        let dispatcher = Dispatcher::new(config.unhandled_capacity);
        Self {
            shared: Arc::new(Shared {
                config,
                lifecycle: Mutex::new(()),
                state: Mutex::new(ConnectionState::Unconnected),
                dispatcher,
                writer: Mutex::new(None),
                session: Mutex::new(None),
                data: Mutex::new(None),
                reader_stats: Mutex::new(None),
                frames_sent: AtomicU64::new(0),
            }),
        }
    }

    /// Open the command channel at `port` and the data channel at `port + 1`,
    /// then start the reader thread.
    ///
    /// A zero `timeout` waits as long as the OS allows. Fails with
    /// [`ConnError::InvalidState`] unless the connection is unconnected.
    pub fn connect(&self, host: &str, port: u16, timeout: Duration) -> Result<()> {
        let shared = &self.shared;
        let lifecycle = lock(&shared.lifecycle);
        let state = shared.state();
        if state != ConnectionState::Unconnected {
            return Err(ConnError::InvalidState { state });
        }
        shared.set_state(ConnectionState::Connecting);
        info!(host, port, "connecting");

        let channels = match TcpTransport::connect(host, port, timeout) {
            Ok(channels) => channels,
            Err(err) => {
                warn!(host, port, error = %err, "connect failed");
                shared.set_state(ConnectionState::Unconnected);
                return Err(err.into());
            }
        };

        match self.start_session(&channels) {
            Ok(reader) => {
                *lock(&shared.reader_stats) = Some(reader.stats());
                *lock(&shared.session) = Some(Session {
                    channels,
                    reader: None,
                });
                shared.set_state(ConnectionState::Open);

                let spawned = thread::Builder::new()
                    .name(shared.config.reader_thread_name.clone())
                    .spawn({
                        let shared = Arc::clone(shared);
                        move || run_reader(shared, reader)
                    });
                match spawned {
                    Ok(handle) => {
                        if let Some(session) = lock(&shared.session).as_mut() {
                            session.reader = Some(handle);
                        }
                        info!(host, port, "connection open");
                        Ok(())
                    }
                    Err(err) => {
                        drop(lifecycle);
                        shared.teardown();
                        Err(ConnError::Spawn(err))
                    }
                }
            }
            Err(err) => {
                let _ = channels.shutdown();
                lock(&shared.writer).take();
                lock(&shared.data).take();
                shared.set_state(ConnectionState::Unconnected);
                Err(err)
            }
        }
    }

    fn start_session(&self, channels: &ChannelPair) -> Result<FrameReader<DeviceStream>> {
        let frame_config = self.shared.config.frame.clone();
        let reader =
            FrameReader::with_config_device(channels.command.try_clone()?, frame_config.clone())?;
        let writer = FrameWriter::with_config_device(channels.command.try_clone()?, frame_config)?;
        let data = channels.data.try_clone()?;

        *lock(&self.shared.writer) = Some(writer);
        *lock(&self.shared.data) = Some(data);
        Ok(reader)
    }

    /// Close both sockets, fail every pending request with
    /// [`ConnError::ConnectionClosed`] and stop the reader thread.
    ///
    /// Idempotent. When called from an event handler the reader thread is
    /// left to finish on its own.
    pub fn disconnect(&self) {
        let Some(reader) = self.shared.teardown() else {
            return;
        };
        if reader.thread().id() == thread::current().id() {
            return;
        }
        if reader.join().is_err() {
            warn!("reader thread panicked");
        }
    }

    /// Send one frame and, when the request expects one, wait for the frame
    /// carrying the same command code.
    ///
    /// The response slot is reserved before the write so a fast reply cannot
    /// be missed. Returns `Ok(None)` once the write completes for requests
    /// that expect no response.
    pub fn send(&self, request: &Request) -> Result<Option<Message>> {
        self.shared.ensure_open()?;

        let pending = match request.response_timeout(self.shared.config.default_response_timeout) {
            Some(timeout) => Some(
                self.shared
                    .dispatcher
                    .register_pending(request.command(), timeout)?,
            ),
            None => None,
        };

        self.shared.write(request)?;

        match pending {
            Some(handle) => handle.wait().map(Some),
            None => Ok(None),
        }
    }

    /// Send `request` and wait up to `timeout` for its response.
    pub fn query(&self, request: &Request, timeout: Duration) -> Result<Message> {
        let request = request.clone().expect_response_within(timeout);
        match self.send(&request)? {
            Some(message) => Ok(message),
            None => Err(ConnError::ResponseTimeout {
                command: request.command(),
                timeout,
            }),
        }
    }

    /// Send `request` without waiting for a response.
    pub fn notify(&self, request: &Request) -> Result<()> {
        let request = request.clone().no_response();
        self.send(&request).map(|_| ())
    }

    /// Receive every unsolicited message for `command`.
    ///
    /// The callback runs on the reader thread, in arrival order. It may
    /// register and unregister handlers and send requests for other command
    /// codes, but must not wait on a response itself: the reader that would
    /// deliver it is busy running the callback.
    pub fn register_handler<F>(&self, command: u32, callback: F) -> HandlerId
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.shared.dispatcher.register_handler(command, callback)
    }

    pub fn unregister_handler(&self, command: u32, id: HandlerId) -> bool {
        self.shared.dispatcher.unregister_handler(command, id)
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn counters(&self) -> ConnectionCounters {
        ConnectionCounters {
            reader: self.shared.reader_counters(),
            dispatch: self.shared.dispatcher.counters(),
            frames_sent: self.shared.frames_sent.load(Ordering::Relaxed),
        }
    }

    /// Recently received messages nobody claimed, oldest first.
    pub fn unhandled(&self) -> Vec<Message> {
        self.shared.dispatcher.unhandled()
    }

    pub fn clear_unhandled(&self) {
        self.shared.dispatcher.clear_unhandled();
    }

    /// Number of requests currently awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.shared.dispatcher.pending_count()
    }

    /// A handle to the data socket for collaborators that stream bulk payloads.
    pub fn data_channel(&self) -> Result<DeviceStream> {
        self.shared.ensure_open()?;
        match lock(&self.shared.data).as_ref() {
            Some(data) => Ok(data.try_clone()?),
            None => Err(ConnError::ConnectionClosed),
        }
    }

    /// Read exactly `len` bytes from the data channel.
    pub fn read_data(&self, len: usize) -> Result<Bytes> {
        let mut data = self.data_channel()?;
        data.read_exact_bytes(len).map_err(|err| {
            if err.is_closed() {
                ConnError::ConnectionClosed
            } else {
                ConnError::Transport(err)
            }
        })
    }

    /// Address of the controller's command channel.
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        match lock(&self.shared.session).as_ref() {
            Some(session) => Ok(session.channels.command.peer_addr()?),
            None => Err(ConnError::NotConnected),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("pending", &self.pending_requests())
            .finish()
    }
}
