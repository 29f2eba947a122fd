use std::time::Duration;

use ctlwire_frame::FrameConfig;

/// Default capacity of the unhandled-message diagnostic buffer.
pub const DEFAULT_UNHANDLED_CAPACITY: usize = 64;

/// Connection behavior configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Frame reader/writer settings (resync threshold, trailing payload limit, write timeout).
    pub frame: FrameConfig,
    /// Messages kept for diagnostics when nobody claims them. Oldest are evicted.
    pub unhandled_capacity: usize,
    /// Timeout used by requests built with [`Request::expect_response`](crate::Request::expect_response).
    pub default_response_timeout: Duration,
    /// Name given to the background reader thread.
    pub reader_thread_name: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            unhandled_capacity: DEFAULT_UNHANDLED_CAPACITY,
            default_response_timeout: Duration::from_secs(5),
            reader_thread_name: "ctlwire-reader".to_string(),
        }
    }
}
