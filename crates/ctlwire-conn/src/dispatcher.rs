use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use ctlwire_frame::Message;
use tracing::{debug, error};

use crate::error::Result;
use crate::handlers::{HandlerId, HandlerTable};
use crate::registry::{PendingHandle, PendingRegistry};

/// Where a dispatched message ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Delivered to the request waiting for its command code.
    Response,
    /// Passed to the registered event handlers.
    Event { handlers: usize },
    /// Nobody wanted it; kept in the diagnostic buffer.
    Unhandled,
}

/// Dispatch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchCounters {
    pub responses: u64,
    pub events: u64,
    pub unhandled: u64,
    pub handler_panics: u64,
}

/// Routes each decoded message to a waiting caller, the event handlers for
/// its command code, or the unhandled-traffic buffer.
pub struct Dispatcher {
    registry: PendingRegistry,
    handlers: HandlerTable,
    unhandled: Mutex<VecDeque<Message>>,
    unhandled_capacity: usize,
    responses: AtomicU64,
    events: AtomicU64,
    unhandled_count: AtomicU64,
    handler_panics: AtomicU64,
}

impl Dispatcher {
    /// Create a dispatcher keeping at most `unhandled_capacity` unclaimed messages.
    pub fn new(unhandled_capacity: usize) -> Self {
        Self {
            registry: PendingRegistry::new(),
            handlers: HandlerTable::new(),
            unhandled: Mutex::new(VecDeque::with_capacity(unhandled_capacity.min(1024))),
            unhandled_capacity,
            responses: AtomicU64::new(0),
            events: AtomicU64::new(0),
            unhandled_count: AtomicU64::new(0),
            handler_panics: AtomicU64::new(0),
        }
    }

    /// Route one message.
    ///
    /// A waiting request wins over event handlers for the same code; exactly
    /// one waiter is satisfied per message. Unclaimed messages are dropped
    /// into the diagnostic buffer without error.
    pub fn dispatch(&self, message: Message) -> Route {
        let command = message.command();

        let Some(message) = self.registry.try_deliver(message) else {
            self.responses.fetch_add(1, Ordering::Relaxed);
            debug!(command, "response delivered");
            return Route::Response;
        };

        let callbacks = self.handlers.snapshot(command);
        if !callbacks.is_empty() {
            for callback in &callbacks {
                if catch_unwind(AssertUnwindSafe(|| callback(&message))).is_err() {
                    self.handler_panics.fetch_add(1, Ordering::Relaxed);
                    error!(command, "event handler panicked");
                }
            }
            self.events.fetch_add(1, Ordering::Relaxed);
            debug!(command, handlers = callbacks.len(), "event dispatched");
            return Route::Event {
                handlers: callbacks.len(),
            };
        }

        self.record_unhandled(message);
        Route::Unhandled
    }

    fn record_unhandled(&self, message: Message) {
        self.unhandled_count.fetch_add(1, Ordering::Relaxed);
        debug!(
            command = message.command(),
            status = message.status(),
            trailing = message.trailing.len(),
            "unhandled message dropped"
        );
        if self.unhandled_capacity == 0 {
            return;
        }
        let mut buffer = self.unhandled.lock().unwrap_or_else(PoisonError::into_inner);
        while buffer.len() >= self.unhandled_capacity {
            buffer.pop_front();
        }
        buffer.push_back(message);
    }

    /// Reserve the response slot for `command`; see [`PendingRegistry::register`].
    pub fn register_pending(&self, command: u32, timeout: Duration) -> Result<PendingHandle> {
        self.registry.register(command, timeout)
    }

    pub fn register_handler<F>(&self, command: u32, callback: F) -> HandlerId
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.handlers.register(command, callback)
    }

    pub fn unregister_handler(&self, command: u32, id: HandlerId) -> bool {
        self.handlers.unregister(command, id)
    }

    /// Oldest-first copy of the recently dropped messages.
    pub fn unhandled(&self) -> Vec<Message> {
        self.unhandled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn clear_unhandled(&self) {
        self.unhandled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn counters(&self) -> DispatchCounters {
        DispatchCounters {
            responses: self.responses.load(Ordering::Relaxed),
            events: self.events.load(Ordering::Relaxed),
            unhandled: self.unhandled_count.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
        }
    }

    /// Fail every pending request with `ConnectionClosed`.
    pub fn close(&self) -> usize {
        self.registry.close()
    }

    pub fn pending_count(&self) -> usize {
        self.registry.len()
    }

    pub fn registry(&self) -> &PendingRegistry {
        &self.registry
    }

    pub fn handlers(&self) -> &HandlerTable {
        &self.handlers
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("handlers", &self.handlers)
            .field("counters", &self.counters())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::thread;

    use bytes::Bytes;
    use ctlwire_frame::Frame;

    use super::*;
    use crate::error::ConnError;

    fn message(command: u32, value: f64) -> Message {
        Message::new(Frame::new(command).with_value(value), Bytes::new())
    }

    fn soon() -> Duration {
        Duration::from_secs(2)
    }

    #[test]
    fn pending_request_wins_then_handlers_get_the_rest() {
        let dispatcher = Dispatcher::new(8);
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            dispatcher.register_handler(12, move |m| seen.lock().unwrap().push(m.frame.value));
        }

        let handle = dispatcher.register_pending(12, soon()).unwrap();
        assert_eq!(dispatcher.dispatch(message(12, 1.0)), Route::Response);
        assert_eq!(dispatcher.pending_count(), 0);
        assert_eq!(
            dispatcher.dispatch(message(12, 2.0)),
            Route::Event { handlers: 1 }
        );

        assert_eq!(handle.wait().unwrap().frame.value, 1.0);
        assert_eq!(*seen.lock().unwrap(), vec![2.0]);
    }

    #[test]
    fn handlers_run_in_order_with_trailing_payload() {
        let dispatcher = Dispatcher::new(8);
        let calls = Arc::new(Mutex::new(Vec::new()));
        for tag in 0..3 {
            let calls = Arc::clone(&calls);
            dispatcher.register_handler(40, move |m: &Message| {
                calls.lock().unwrap().push((tag, m.trailing.clone()));
            });
        }

        let event = Message::new(Frame::new(40), Bytes::from_static(b"image-header"));
        assert_eq!(dispatcher.dispatch(event), Route::Event { handlers: 3 });

        let calls = calls.lock().unwrap();
        assert_eq!(calls.iter().map(|(tag, _)| *tag).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(calls.iter().all(|(_, t)| t.as_ref() == b"image-header"));
    }

    #[test]
    fn unmatched_message_goes_to_bounded_buffer() {
        let dispatcher = Dispatcher::new(2);
        for value in [1.0, 2.0, 3.0] {
            assert_eq!(dispatcher.dispatch(message(77, value)), Route::Unhandled);
        }

        let kept: Vec<f64> = dispatcher
            .unhandled()
            .iter()
            .map(|m| m.frame.value)
            .collect();
        assert_eq!(kept, vec![2.0, 3.0]);
        assert_eq!(dispatcher.counters().unhandled, 3);

        dispatcher.clear_unhandled();
        assert!(dispatcher.unhandled().is_empty());
    }

    #[test]
    fn zero_capacity_buffer_drops_everything() {
        let dispatcher = Dispatcher::new(0);
        assert_eq!(dispatcher.dispatch(message(1, 0.0)), Route::Unhandled);
        assert!(dispatcher.unhandled().is_empty());
    }

    #[test]
    fn handler_may_unregister_itself_during_dispatch() {
        let dispatcher = Arc::new(Dispatcher::new(4));
        let slot = Arc::new(Mutex::new(None));
        let hits = Arc::new(Mutex::new(0));

        let id = {
            let inner = Arc::clone(&dispatcher);
            let slot = Arc::clone(&slot);
            let hits = Arc::clone(&hits);
            dispatcher.register_handler(5, move |_| {
                *hits.lock().unwrap() += 1;
                if let Some(id) = slot.lock().unwrap().take() {
                    inner.unregister_handler(5, id);
                }
            })
        };
        *slot.lock().unwrap() = Some(id);

        assert_eq!(dispatcher.dispatch(message(5, 0.0)), Route::Event { handlers: 1 });
        assert_eq!(dispatcher.dispatch(message(5, 0.0)), Route::Unhandled);
        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[test]
    fn panicking_handler_does_not_stop_dispatch() {
        let dispatcher = Dispatcher::new(4);
        let reached = Arc::new(Mutex::new(false));
        dispatcher.register_handler(3, |_| panic!("handler failure"));
        {
            let reached = Arc::clone(&reached);
            dispatcher.register_handler(3, move |_| *reached.lock().unwrap() = true);
        }

        assert_eq!(dispatcher.dispatch(message(3, 0.0)), Route::Event { handlers: 2 });
        assert!(*reached.lock().unwrap());
        assert_eq!(dispatcher.counters().handler_panics, 1);
    }

    #[test]
    fn close_fails_waiters() {
        let dispatcher = Arc::new(Dispatcher::new(4));
        let handle = dispatcher.register_pending(8, soon()).unwrap();
        let waiter = thread::spawn(move || handle.wait());

        thread::sleep(Duration::from_millis(20));
        assert_eq!(dispatcher.close(), 1);
        assert!(matches!(
            waiter.join().unwrap(),
            Err(ConnError::ConnectionClosed)
        ));
    }

    #[test]
    fn duplicate_pending_rejected() {
        let dispatcher = Dispatcher::new(4);
        let _first = dispatcher.register_pending(8, soon()).unwrap();
        assert!(matches!(
            dispatcher.register_pending(8, soon()),
            Err(ConnError::DuplicatePendingRequest(8))
        ));
    }
}
