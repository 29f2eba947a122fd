//! High-level controller connection management.
//!
//! This is the "just works" layer. Connect to a controller, send commands and
//! await their responses, and receive unsolicited events by command code.
//!
//! The wire protocol carries no request IDs: a response is matched to its
//! request by command code alone. At most one request per command code may be
//! awaiting a response at a time; callers issuing the same command from
//! several threads must serialize those calls themselves. When a frame arrives
//! for a code that has both a waiting request and registered event handlers,
//! the waiting request receives it.

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod registry;
pub mod request;

pub use config::ConnectionConfig;
pub use connection::{Connection, ConnectionCounters, ConnectionState};
pub use dispatcher::{DispatchCounters, Dispatcher, Route};
pub use error::{ConnError, Result};
pub use handlers::{EventCallback, HandlerId, HandlerTable};
pub use registry::{PendingHandle, PendingRegistry};
pub use request::{Reply, Request};
