//! Lifecycle event fabric.
//!
//! Producers publish tagged [`Event`]s into a channel; a dedicated fan-out
//! thread delivers each event to every subscriber in registration order.
//! The channel linearizes publications from all producer threads, so
//! subscribers observe a single total order of events. This matters for the
//! statistics engine, whose per-client timers rely on seeing
//! `Queued`/`PoppedFromQueue` and `ProcessingStarted`/`ProcessingFinished`
//! pairs in matching order.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::Client;

/// A client lifecycle event.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Event {
    /// A new client entered the system.
    Arrived(Client),
    /// The dispatcher made a scheduling decision for the client.
    Scheduled(Client),
    /// All servers were busy; the client was pushed to the waiting queue.
    Queued(Client),
    /// The client was taken off the waiting queue for assignment.
    PoppedFromQueue(Client),
    /// A server started servicing the client.
    ProcessingStarted(Client),
    /// A server finished servicing the client; the client leaves the system.
    ProcessingFinished(Client),
    /// Terminal event: the simulation has shut down and all workers have
    /// stopped. Published exactly once.
    AllProcessed,
}

/// An observer of the event stream. A single handler replaces the
/// per-event-kind callback interface, so new event kinds do not break
/// existing subscribers.
pub trait Subscriber: Send {
    /// Called for every published event, in publication order.
    fn handle(&mut self, event: &Event);
}

/// Lets a subscriber be shared with code that inspects it after the
/// simulation, such as the statistician queried for its summary.
impl<T: Subscriber> Subscriber for Arc<Mutex<T>> {
    fn handle(&mut self, event: &Event) {
        self.lock().expect("subscriber poisoned").handle(event);
    }
}

/// Cloneable publishing half of the event fabric.
#[derive(Clone)]
pub struct EventBus {
    sender: Sender<Event>,
}

impl EventBus {
    /// Creates a connected bus and its receiving half. The receiver must be
    /// spawned with the subscriber list before events start flowing.
    #[must_use]
    pub fn channel() -> (Self, EventReceiver) {
        let (sender, receiver) = channel();
        (Self { sender }, EventReceiver { receiver })
    }

    /// Publishes an event to all subscribers.
    ///
    /// Events published after the fan-out thread has exited are dropped
    /// with a warning; nothing publishes after `AllProcessed` in a
    /// correctly ordered shutdown.
    pub fn publish(&self, event: Event) {
        if self.sender.send(event).is_err() {
            log::warn!("event bus closed; dropping {:?}", event);
        }
    }
}

/// Receiving half of the event fabric, waiting to be spawned.
pub struct EventReceiver {
    receiver: Receiver<Event>,
}

impl EventReceiver {
    /// Spawns the fan-out thread delivering events to `subscribers` in
    /// registration order. The thread exits after delivering
    /// [`Event::AllProcessed`], or when every publisher has been dropped.
    #[must_use]
    pub fn spawn(self, mut subscribers: Vec<Box<dyn Subscriber>>) -> EventBusHandle {
        let thread = thread::Builder::new()
            .name("event-bus".into())
            .spawn(move || {
                for event in self.receiver {
                    log::trace!("delivering {:?}", event);
                    for subscriber in &mut subscribers {
                        subscriber.handle(&event);
                    }
                    if event == Event::AllProcessed {
                        break;
                    }
                }
            })
            .expect("failed to spawn event bus thread");
        EventBusHandle { thread }
    }
}

/// Handle to the running fan-out thread.
pub struct EventBusHandle {
    thread: JoinHandle<()>,
}

impl EventBusHandle {
    /// Waits until every published event has been delivered and the fan-out
    /// thread has exited.
    ///
    /// # Panics
    ///
    /// Panics if a subscriber panicked while handling an event.
    pub fn join(self) {
        self.thread.join().expect("event bus thread panicked");
    }
}
