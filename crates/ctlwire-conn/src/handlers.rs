//! Event handlers for unsolicited frames, keyed by command code.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use ctlwire_frame::Message;

/// Callback invoked with every unsolicited message for its command code.
///
/// Runs on the reader thread; it must return quickly and hand long work off
/// to its own thread.
pub type EventCallback = Arc<dyn Fn(&Message) + Send + Sync + 'static>;

/// Token returned by registration, used to unregister a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

/// Registration table for event handlers.
#[derive(Default)]
pub struct HandlerTable {
    handlers: RwLock<HashMap<u32, Vec<(HandlerId, EventCallback)>>>,
    next_id: AtomicU64,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler for `command`. Handlers for one code run in registration order.
    pub fn register<F>(&self, command: u32, callback: F) -> HandlerId
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(command)
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    /// Remove one handler. Returns false when it was not registered for `command`.
    pub fn unregister(&self, command: u32, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let Some(list) = handlers.get_mut(&command) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(&command);
        }
        removed
    }

    /// Copy of the handlers for `command`, in registration order.
    ///
    /// Invoking from a snapshot lets handlers register or unregister
    /// handlers while they run.
    pub fn snapshot(&self, command: u32) -> Vec<EventCallback> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&command)
            .map(|list| list.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default()
    }

    pub fn handler_count(&self, command: u32) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&command)
            .map_or(0, Vec::len)
    }

    /// Command codes with at least one handler, sorted.
    pub fn commands(&self) -> Vec<u32> {
        let mut commands: Vec<u32> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        commands.sort_unstable();
        commands
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerTable")
            .field("commands", &self.commands())
            .finish()
    }
}
