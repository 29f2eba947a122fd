//! Client core for TCP instrument controllers.
//!
//! ctlwire talks to a controller over two TCP sockets using fixed 128-byte
//! frames, keeps the stream aligned when bytes are lost, and matches
//! responses to requests by command code while routing unsolicited frames to
//! event handlers.
//!
//! # Crate Structure
//!
//! - [`transport`]: Dual-socket TCP transport (command port and data port)
//! - [`frame`]: Frame codec, stream reader with resynchronization, writer
//! - [`conn`]: Connection lifecycle, request/response correlation, events (behind `conn` feature)

/// Re-export transport types.
pub mod transport {
    pub use ctlwire_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use ctlwire_frame::*;
}

/// Re-export connection types (requires `conn` feature).
#[cfg(feature = "conn")]
pub mod conn {
    pub use ctlwire_conn::*;
}
