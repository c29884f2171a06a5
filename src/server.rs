//! Server: a worker unit servicing at most one client at a time.

use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::{CancellationToken, Client, Event, EventBus, Sampler, ServerId, POLL_INTERVAL};

/// A worker owning a slot for at most one in-flight client.
///
/// The slot is written by the dispatcher (assignment) and by the server's
/// own run loop (clearing on completion); both go through the slot lock, and
/// the slot stays occupied for the whole service, so `is_working` reflects
/// busyness throughout.
pub struct Server {
    id: ServerId,
    slot: Mutex<Option<Client>>,
    assigned: Condvar,
    service_times: Arc<dyn Sampler>,
    bus: EventBus,
    token: CancellationToken,
}

impl Server {
    /// Constructs an idle server drawing service durations from
    /// `service_times`.
    #[must_use]
    pub fn new(id: ServerId, service_times: Arc<dyn Sampler>, bus: EventBus) -> Self {
        Self {
            id,
            slot: Mutex::new(None),
            assigned: Condvar::new(),
            service_times,
            bus,
            token: CancellationToken::new(),
        }
    }

    /// The ID of this server.
    #[must_use]
    pub fn id(&self) -> ServerId {
        self.id
    }

    /// Whether the server currently holds a client.
    #[must_use]
    pub fn is_working(&self) -> bool {
        self.slot.lock().expect("server slot poisoned").is_some()
    }

    /// Hands a client to this server and publishes
    /// [`Event::ProcessingStarted`]. The caller (the dispatcher) must have
    /// established that the server is idle under its own lock.
    ///
    /// # Panics
    ///
    /// Panics if the server already holds a client. That means two callers
    /// raced for the same server, which is a concurrency bug, not a
    /// recoverable condition.
    pub fn assign(&self, client: Client) {
        let mut slot = self.slot.lock().expect("server slot poisoned");
        if let Some(current) = *slot {
            panic!(
                "server {} assigned {} while still serving {}",
                self.id, client, current
            );
        }
        self.bus.publish(Event::ProcessingStarted(client));
        *slot = Some(client);
        self.assigned.notify_one();
    }

    /// The server's execution loop. Waits for an assignment (re-checking
    /// cancellation every [`POLL_INTERVAL`]), services the held client, and
    /// repeats until stopped. An in-progress service always runs to
    /// completion.
    pub fn run(&self) {
        log::info!("server {} has been started", self.id);
        while !self.token.is_cancelled() {
            let client = {
                let slot = self.slot.lock().expect("server slot poisoned");
                let (slot, _) = self
                    .assigned
                    .wait_timeout_while(slot, POLL_INTERVAL, |slot| slot.is_none())
                    .expect("server slot poisoned");
                *slot
            };
            if let Some(client) = client {
                self.serve(client);
            }
        }
        log::info!("server {} has been stopped", self.id);
    }

    /// Requests the run loop to exit after its current iteration. Callers
    /// must join the server's thread to observe actual termination.
    pub fn stop(&self) {
        self.token.cancel();
        self.assigned.notify_one();
    }

    fn serve(&self, client: Client) {
        let duration = Duration::from_secs_f64(self.service_times.sample() / 1000.0);
        log::debug!("server {} processing {}", self.id, client);
        let start = Instant::now();
        thread::sleep(duration);
        *self.slot.lock().expect("server slot poisoned") = None;
        log::debug!(
            "{} has been processed for {} ms",
            client,
            start.elapsed().as_millis()
        );
        self.bus.publish(Event::ProcessingFinished(client));
    }
}
