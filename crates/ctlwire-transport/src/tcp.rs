use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::DeviceStream;

/// Port of the data channel that belongs to `command_port`.
pub fn data_port(command_port: u16) -> Result<u16> {
    command_port
        .checked_add(1)
        .ok_or(TransportError::InvalidPort(command_port))
}

/// The two sockets of a controller connection.
#[derive(Debug)]
pub struct ChannelPair {
    /// Command/response channel (`port`).
    pub command: DeviceStream,
    /// High-rate data channel (`port + 1`).
    pub data: DeviceStream,
}

impl ChannelPair {
    /// Close both sockets. Safe to call more than once.
    pub fn shutdown(&self) -> Result<()> {
        let command = self.command.shutdown();
        let data = self.data.shutdown();
        command.and(data)
    }
}

/// TCP transport to an instrument controller.
///
/// Opens the command channel and the data channel on consecutive ports of the
/// same host.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

impl TcpTransport {
    /// Connect the command channel at `port` and the data channel at `port + 1`.
    ///
    /// `timeout` bounds each individual connect attempt. On success both
    /// sockets have their read and write timeouts cleared and Nagle disabled.
    /// A zero timeout connects without a bound.
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<ChannelPair> {
        let data_port = data_port(port)?;

        let command = Self::connect_one(host, port, timeout)?;
        let data = match Self::connect_one(host, data_port, timeout) {
            Ok(data) => data,
            Err(err) => {
                let _ = command.shutdown();
                return Err(err);
            }
        };

        info!(host, port, data_port, "connected to controller");
        Ok(ChannelPair { command, data })
    }

    /// Connect a single socket to `host:port`.
    pub fn connect_one(host: &str, port: u16, timeout: Duration) -> Result<DeviceStream> {
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|source| TransportError::Resolve {
                host: host.to_string(),
                port,
                source,
            })?
            .collect();

        let mut last_err = None;
        for addr in addrs {
            debug!(%addr, ?timeout, "connecting");
            let attempt = if timeout.is_zero() {
                TcpStream::connect(addr)
            } else {
                TcpStream::connect_timeout(&addr, timeout)
            };
            match attempt {
                Ok(stream) => return Self::prepare(stream, addr),
                Err(source) => {
                    debug!(%addr, error = %source, "connect attempt failed");
                    last_err = Some(TransportError::Connect { addr, source });
                }
            }
        }

        Err(last_err.unwrap_or_else(|| TransportError::Resolve {
            host: host.to_string(),
            port,
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "host resolved to no addresses",
            ),
        }))
    }

    fn prepare(stream: TcpStream, addr: SocketAddr) -> Result<DeviceStream> {
        let configure = |stream: &TcpStream| -> std::io::Result<()> {
            stream.set_read_timeout(None)?;
            stream.set_write_timeout(None)?;
            stream.set_nodelay(true)
        };
        configure(&stream).map_err(|source| TransportError::Connect { addr, source })?;
        Ok(DeviceStream::from_tcp(stream))
    }
}
