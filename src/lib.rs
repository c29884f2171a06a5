//! Stochastic multi-server queueing simulation.
//!
//! Synthetic clients arrive according to a sampled inter-arrival process,
//! are dispatched to a fixed pool of server threads (or queued when all are
//! busy), are serviced for a sampled duration, and are observed throughout
//! by subscribers of a lifecycle event bus.

#![warn(
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_import_braces,
    unused_qualifications
)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::default_trait_access,
    clippy::inline_always
)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use derive_more::{Display, From, Into};

mod distribution;
pub use distribution::{
    DistributionConfig, DistributionError, Erlang, Exponential, HyperExponential, Sampler, Weibull,
};

mod queue;
pub use queue::ClientQueue;

mod event;
pub use event::{Event, EventBus, EventBusHandle, EventReceiver, Subscriber};

mod server;
pub use server::Server;

mod dispatch;
pub use dispatch::Dispatcher;

mod simulation;
pub use simulation::{RunState, Simulation};

mod stats;
pub use stats::{Statistician, StatsError, Summary};

mod progress;
pub use progress::ProgressReporter;

mod cancel;
pub use cancel::CancellationToken;

/// Interval at which worker loops re-check their cancellation tokens while
/// waiting for work.
pub const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Client ID, unique within a simulation run.
#[derive(From, Into, Debug, PartialEq, PartialOrd, Eq, Ord, Copy, Clone, Hash, Display)]
pub struct ClientId(u64);

/// Server ID.
#[derive(From, Into, Debug, PartialEq, PartialOrd, Eq, Ord, Copy, Clone, Hash, Display)]
pub struct ServerId(usize);

/// A unit of work entering the simulated system. Carries nothing but its
/// identity; all interesting state lives in the components handling it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Display)]
#[display(fmt = "client {}", id)]
pub struct Client {
    id: ClientId,
}

impl Client {
    /// The ID of this client, unique throughout the entire simulation.
    #[must_use]
    pub fn id(&self) -> ClientId {
        self.id
    }
}

/// Creates clients with incrementing IDs.
///
/// The counter is atomic, so a factory can be shared between threads,
/// although in practice only the arrival loop generates clients.
#[derive(Debug, Default)]
pub struct ClientFactory {
    next_id: AtomicU64,
}

impl ClientFactory {
    /// Constructs a factory starting at ID 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Generates the next client.
    pub fn generate(&self) -> Client {
        let id = ClientId::from(self.next_id.fetch_add(1, Ordering::Relaxed));
        log::debug!("client {} has been generated", id);
        Client { id }
    }
}
