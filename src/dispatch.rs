//! Dispatcher: assigns arriving clients to idle servers or queues them, and
//! drains the queue into servers as they become idle.

use std::sync::{Arc, Mutex};
use std::thread;

use crate::{CancellationToken, Client, ClientQueue, Event, EventBus, Server, POLL_INTERVAL};

/// Owns the assignment policy: first idle server in stable vector order
/// wins; with no idle server the client waits in the queue.
///
/// A single lock scopes both the assignment scan and the check-then-pop
/// drain sequence, so two paths can never race one queued client into two
/// servers or one server into two clients.
pub struct Dispatcher {
    servers: Vec<Arc<Server>>,
    queue: Arc<ClientQueue>,
    bus: EventBus,
    token: CancellationToken,
    scan: Mutex<()>,
}

impl Dispatcher {
    /// Constructs a dispatcher over the given server pool and queue.
    #[must_use]
    pub fn new(servers: Vec<Arc<Server>>, queue: Arc<ClientQueue>, bus: EventBus) -> Self {
        Self {
            servers,
            queue,
            bus,
            token: CancellationToken::new(),
            scan: Mutex::new(()),
        }
    }

    /// Makes the scheduling decision for a newly arrived client.
    ///
    /// Publishes [`Event::Scheduled`], then either assigns the client to the
    /// first idle server (returning `true`; the server publishes
    /// `ProcessingStarted`) or pushes it to the queue and publishes
    /// [`Event::Queued`] (returning `false`).
    pub fn schedule(&self, client: Client) -> bool {
        let _scan = self.scan.lock().expect("dispatcher lock poisoned");
        self.bus.publish(Event::Scheduled(client));
        if let Some(server) = self.servers.iter().find(|server| !server.is_working()) {
            server.assign(client);
            true
        } else {
            self.queue.push(client);
            log::debug!("{} has been queued", client);
            self.bus.publish(Event::Queued(client));
            false
        }
    }

    /// The re-assignment loop: pops one queued client into each idle server,
    /// publishing [`Event::PoppedFromQueue`] before assignment.
    ///
    /// The loop exits when stopped *or when the queue is observed empty* —
    /// inherited semantics kept on purpose. A caller that needs draining for
    /// the lifetime of a simulation must re-invoke `run` after it returns;
    /// the simulation driver does exactly that.
    pub fn run(&self) {
        log::info!("dispatcher has been started");
        while !self.token.is_cancelled() && !self.queue.is_empty() {
            self.drain_into_idle_servers();
            thread::sleep(POLL_INTERVAL);
        }
        log::info!("dispatcher loop exited");
    }

    /// Requests the drain loop to exit at its next iteration boundary.
    /// Clients still in the queue are not drained.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Whether [`Dispatcher::stop`] has been called. Distinguishes a stopped
    /// dispatcher from one whose loop merely ran out of queued clients.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    fn drain_into_idle_servers(&self) {
        let _scan = self.scan.lock().expect("dispatcher lock poisoned");
        for server in &self.servers {
            if !server.is_working() {
                match self.queue.pop() {
                    Some(client) => {
                        log::debug!("{} has been popped from queue", client);
                        self.bus.publish(Event::PoppedFromQueue(client));
                        server.assign(client);
                    }
                    None => break,
                }
            }
        }
    }
}
