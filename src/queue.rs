//! Thread-safe storage for clients waiting for a free server.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::Client;

/// A bounded ring of waiting clients.
///
/// `push` appends; once the optional capacity is reached, the oldest entry
/// is evicted to make room. `pop` removes from the same end `push` appends
/// to, so the most recently queued client is served first. This bias is
/// deliberate, inherited behavior and is locked in by tests; do not quietly
/// change it to FIFO.
///
/// Every operation is atomic under the queue's own lock. The
/// check-then-pop sequence spanning multiple servers is serialized one
/// level up, by the dispatcher.
#[derive(Debug, Default)]
pub struct ClientQueue {
    inner: Mutex<VecDeque<Client>>,
    capacity: Option<usize>,
}

impl ClientQueue {
    /// Constructs a queue without a capacity limit.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Constructs a queue holding at most `capacity` clients.
    #[must_use]
    pub fn bounded(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: Some(capacity),
        }
    }

    /// Appends a client. At capacity, the oldest waiting client is evicted.
    pub fn push(&self, client: Client) {
        let mut inner = self.inner.lock().expect("client queue poisoned");
        if let Some(capacity) = self.capacity {
            while inner.len() >= capacity {
                if let Some(evicted) = inner.pop_front() {
                    log::warn!("queue at capacity {}; evicting {}", capacity, evicted);
                }
            }
        }
        inner.push_back(client);
    }

    /// Removes and returns the most recently queued client, or `None` when
    /// the queue is empty.
    pub fn pop(&self) -> Option<Client> {
        self.inner.lock().expect("client queue poisoned").pop_back()
    }

    /// Number of waiting clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("client queue poisoned").len()
    }

    /// Whether the queue holds no clients.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the queue has reached its capacity. Always `false` for an
    /// unbounded queue.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.capacity
            .map_or(false, |capacity| self.len() >= capacity)
    }
}
