use std::time::Duration;

use bytes::Bytes;
use ctlwire_frame::{Frame, PARAM_COUNT};

/// Whether a request waits for a response, and for how long.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Reply {
    /// Fire and forget.
    #[default]
    None,
    /// Wait up to the connection's default response timeout.
    Default,
    /// Wait up to the given duration.
    Within(Duration),
}

/// One outgoing command frame plus optional trailing payload.
///
/// ```
/// use std::time::Duration;
/// use ctlwire_conn::Request;
///
/// let request = Request::new(12327)
///     .param(0, 1)
///     .param(1, 2)
///     .value(3.5)
///     .data(b"abc")
///     .expect_response_within(Duration::from_secs(2));
/// assert_eq!(request.command(), 12327);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    frame: Frame,
    trailing: Bytes,
    reply: Reply,
}

impl Request {
    pub fn new(command: u32) -> Self {
        Self {
            frame: Frame::new(command),
            trailing: Bytes::new(),
            reply: Reply::None,
        }
    }

    /// Build a request around an existing frame. Markers and the trailing
    /// length are always rewritten on encode.
    pub fn from_frame(frame: Frame) -> Self {
        Self {
            frame,
            trailing: Bytes::new(),
            reply: Reply::None,
        }
    }

    pub fn params(mut self, params: [i32; PARAM_COUNT]) -> Self {
        self.frame = self.frame.with_params(params);
        self
    }

    /// Set one parameter slot. Indices past the last slot are ignored.
    pub fn param(mut self, index: usize, value: i32) -> Self {
        self.frame = self.frame.with_param(index, value);
        self
    }

    pub fn value(mut self, value: f64) -> Self {
        self.frame = self.frame.with_value(value);
        self
    }

    pub fn status(mut self, status: u32) -> Self {
        self.frame = self.frame.with_status(status);
        self
    }

    /// Inline data, truncated to the 72-byte field.
    pub fn data(mut self, data: &[u8]) -> Self {
        self.frame = self.frame.with_data(data);
        self
    }

    /// Payload written after the frame; its length goes in the header.
    pub fn trailing(mut self, trailing: impl Into<Bytes>) -> Self {
        self.trailing = trailing.into();
        self
    }

    /// Wait for a response using the connection's default timeout.
    pub fn expect_response(mut self) -> Self {
        self.reply = Reply::Default;
        self
    }

    pub fn expect_response_within(mut self, timeout: Duration) -> Self {
        self.reply = Reply::Within(timeout);
        self
    }

    /// Do not wait for a response.
    pub fn no_response(mut self) -> Self {
        self.reply = Reply::None;
        self
    }

    pub fn command(&self) -> u32 {
        self.frame.command
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn trailing_payload(&self) -> &Bytes {
        &self.trailing
    }

    pub fn reply(&self) -> Reply {
        self.reply
    }

    /// Resolve the response timeout, if any, against `default`.
    pub(crate) fn response_timeout(&self, default: Duration) -> Option<Duration> {
        match self.reply {
            Reply::None => None,
            Reply::Default => Some(default),
            Reply::Within(timeout) => Some(timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_fills_frame_fields() {
        let request = Request::new(12327)
            .params([1, 2, 3, 4, 5, 6, 7])
            .param(6, 70)
            .value(2.25)
            .status(4)
            .data(b"hello")
            .trailing(vec![9u8; 10]);

        let frame = request.frame();
        assert_eq!(frame.command, 12327);
        assert_eq!(frame.params, [1, 2, 3, 4, 5, 6, 70]);
        assert_eq!(frame.value, 2.25);
        assert_eq!(frame.status, 4);
        assert_eq!(frame.data_bytes(), b"hello");
        assert_eq!(request.trailing_payload().len(), 10);
        assert_eq!(request.reply(), Reply::None);
    }

    #[test]
    fn out_of_range_param_is_ignored() {
        let request = Request::new(1).param(PARAM_COUNT, 99);
        assert_eq!(request.frame().params, [0; PARAM_COUNT]);
    }

    #[test]
    fn response_timeout_resolution() {
        let default = Duration::from_secs(5);
        assert_eq!(Request::new(1).response_timeout(default), None);
        assert_eq!(
            Request::new(1).expect_response().response_timeout(default),
            Some(default)
        );
        assert_eq!(
            Request::new(1)
                .expect_response_within(Duration::from_millis(250))
                .response_timeout(default),
            Some(Duration::from_millis(250))
        );
        assert_eq!(
            Request::new(1)
                .expect_response()
                .no_response()
                .response_timeout(default),
            None
        );
    }
}
