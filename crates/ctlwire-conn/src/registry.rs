//! Outstanding requests awaiting a response, keyed by command code.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use ctlwire_frame::Message;
use tracing::debug;

use crate::error::{ConnError, Result};

enum Delivery {
    Response(Message),
    Closed,
}

struct PendingSlot {
    id: u64,
    sender: SyncSender<Delivery>,
}

#[derive(Default)]
struct RegistryState {
    slots: HashMap<u32, PendingSlot>,
    next_id: u64,
    closed: bool,
}

/// Registry of requests awaiting a response.
///
/// At most one request per command code can be pending. All mutation happens
/// under one mutex, and delivery into a slot happens under the same lock, so
/// a response is handed to exactly one waiter or to nobody.
#[derive(Clone, Default)]
pub struct PendingRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the response slot for `command` for up to `timeout`.
    ///
    /// Must be called before the request is written so a fast response cannot
    /// slip past unclaimed. A timeout too large to express as an instant waits
    /// without a deadline.
    pub fn register(&self, command: u32, timeout: Duration) -> Result<PendingHandle> {
        let (sender, receiver) = mpsc::sync_channel(1);
        let mut state = self.lock();
        if state.closed {
            return Err(ConnError::ConnectionClosed);
        }
        if state.slots.contains_key(&command) {
            return Err(ConnError::DuplicatePendingRequest(command));
        }

        state.next_id = state.next_id.wrapping_add(1);
        let id = state.next_id;
        state.slots.insert(command, PendingSlot { id, sender });
        drop(state);

        Ok(PendingHandle {
            registry: self.clone(),
            command,
            id,
            deadline: Instant::now().checked_add(timeout),
            timeout,
            receiver,
            finished: false,
        })
    }

    /// Hand `message` to the request waiting for its command code.
    ///
    /// Returns the message back when no request claimed it.
    pub fn try_deliver(&self, message: Message) -> Option<Message> {
        let mut state = self.lock();
        let Some(slot) = state.slots.remove(&message.command()) else {
            return Some(message);
        };

        match slot.sender.try_send(Delivery::Response(message)) {
            Ok(()) => None,
            // The waiter went away between its deadline and cleanup.
            Err(mpsc::TrySendError::Disconnected(Delivery::Response(message)))
            | Err(mpsc::TrySendError::Full(Delivery::Response(message))) => Some(message),
            Err(_) => None,
        }
    }

    /// Fail every pending request with `ConnectionClosed` and refuse new ones.
    ///
    /// Returns how many waiters were released.
    pub fn close(&self) -> usize {
        let mut state = self.lock();
        state.closed = true;
        let released = state.slots.len();
        for (command, slot) in state.slots.drain() {
            debug!(command, "releasing pending request on close");
            let _ = slot.sender.try_send(Delivery::Closed);
        }
        released
    }

    /// Number of requests currently awaiting a response.
    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when a request for `command` is awaiting a response.
    pub fn contains(&self, command: u32) -> bool {
        self.lock().slots.contains_key(&command)
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn remove(&self, command: u32, id: u64) -> bool {
        let mut state = self.lock();
        match state.slots.get(&command) {
            Some(slot) if slot.id == id => {
                state.slots.remove(&command);
                true
            }
            _ => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for PendingRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        let mut commands: Vec<u32> = state.slots.keys().copied().collect();
        commands.sort_unstable();
        f.debug_struct("PendingRegistry")
            .field("pending", &commands)
            .field("closed", &state.closed)
            .finish()
    }
}

/// The caller's side of a pending request.
///
/// Dropping the handle without waiting releases the slot.
pub struct PendingHandle {
    registry: PendingRegistry,
    command: u32,
    id: u64,
    deadline: Option<Instant>,
    timeout: Duration,
    receiver: Receiver<Delivery>,
    finished: bool,
}

impl PendingHandle {
    pub fn command(&self) -> u32 {
        self.command
    }

    /// `None` when the wait has no deadline.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Block until the response arrives, the deadline passes or the
    /// connection closes.
    pub fn wait(mut self) -> Result<Message> {
        let received = match self.deadline {
            Some(deadline) => self
                .receiver
                .recv_timeout(deadline.saturating_duration_since(Instant::now())),
            None => self
                .receiver
                .recv()
                .map_err(|_| RecvTimeoutError::Disconnected),
        };
        let delivery = match received {
            Ok(delivery) => Some(delivery),
            Err(RecvTimeoutError::Timeout) => {
                // Delivery happens under the registry lock, so once the slot is
                // gone nothing else can arrive; pick up a response that raced
                // the deadline.
                self.registry.remove(self.command, self.id);
                self.receiver.try_recv().ok()
            }
            Err(RecvTimeoutError::Disconnected) => Some(Delivery::Closed),
        };
        self.finished = true;

        match delivery {
            Some(Delivery::Response(message)) => Ok(message),
            Some(Delivery::Closed) => Err(ConnError::ConnectionClosed),
            None => {
                debug!(command = self.command, timeout = ?self.timeout, "response timed out");
                Err(ConnError::ResponseTimeout {
                    command: self.command,
                    timeout: self.timeout,
                })
            }
        }
    }
}

impl Drop for PendingHandle {
    fn drop(&mut self) {
        if !self.finished {
            self.registry.remove(self.command, self.id);
        }
    }
}

impl std::fmt::Debug for PendingHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingHandle")
            .field("command", &self.command)
            .field("deadline", &self.deadline)
            .finish()
    }
}
