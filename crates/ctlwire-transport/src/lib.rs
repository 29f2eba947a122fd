//! Dual-socket TCP transport for instrument controllers.
//!
//! A controller exposes two TCP ports on the same host:
//! - the command channel at `port` (request/response and event frames)
//! - the data channel at `port + 1` (high-rate payload streaming)
//!
//! This is the lowest layer of ctlwire. Everything else builds on top of
//! the [`DeviceStream`] type provided here.

pub mod error;
pub mod tcp;
pub mod traits;

pub use error::{Result, TransportError};
pub use tcp::{data_port, ChannelPair, TcpTransport};
pub use traits::DeviceStream;
