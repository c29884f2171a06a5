//! Simulation driver: spawns the workers, generates arrivals, and performs
//! the coordinated shutdown.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::{ClientFactory, Dispatcher, Event, EventBus, Sampler, Server, POLL_INTERVAL};

/// Orchestration state of the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// `run` has not been called yet.
    NotStarted,
    /// Arrivals are being generated.
    Running,
    /// Arrivals have ceased; workers are being stopped and joined.
    Stopping,
    /// Every worker has terminated and the terminal event was published.
    Stopped,
}

/// Owns the simulation lifetime: one thread per server, one for the
/// dispatcher, and the arrival loop on the caller's thread.
pub struct Simulation {
    arrivals: Box<dyn Sampler>,
    clients: ClientFactory,
    duration: Duration,
    servers: Vec<Arc<Server>>,
    dispatcher: Arc<Dispatcher>,
    bus: EventBus,
    state: RunState,
}

impl Simulation {
    /// Constructs a driver generating arrivals from `arrivals` for
    /// `duration` of wall-clock time.
    #[must_use]
    pub fn new(
        arrivals: Box<dyn Sampler>,
        duration: Duration,
        servers: Vec<Arc<Server>>,
        dispatcher: Arc<Dispatcher>,
        bus: EventBus,
    ) -> Self {
        Self {
            arrivals,
            clients: ClientFactory::new(),
            duration,
            servers,
            dispatcher,
            bus,
            state: RunState::NotStarted,
        }
    }

    /// Current orchestration state.
    #[must_use]
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Runs the simulation to completion: spawns workers, generates arrivals
    /// at sampled intervals until the configured duration elapses, then
    /// stops and joins the dispatcher and every server (waiting out at most
    /// one in-flight service each) and publishes [`Event::AllProcessed`]
    /// exactly once, after all workers have fully stopped.
    ///
    /// Calling `run` a second time logs a warning and returns.
    ///
    /// # Panics
    ///
    /// Panics if a worker thread panicked, which only happens on an
    /// invariant violation inside the engine.
    pub fn run(&mut self) {
        if self.state != RunState::NotStarted {
            log::warn!("simulation has already run; ignoring");
            return;
        }
        self.state = RunState::Running;

        let workers = self.spawn_servers();
        let dispatcher_thread = self.spawn_dispatcher();

        let started = Instant::now();
        while started.elapsed() < self.duration {
            let interval = Duration::from_secs_f64(self.arrivals.sample() / 1000.0);
            thread::sleep(interval);
            let client = self.clients.generate();
            self.bus.publish(Event::Arrived(client));
            self.dispatcher.schedule(client);
        }

        self.state = RunState::Stopping;
        log::info!(
            "arrivals ceased after {} ms; shutting down",
            started.elapsed().as_millis()
        );
        self.dispatcher.stop();
        dispatcher_thread
            .join()
            .expect("dispatcher thread panicked");
        for (server, worker) in self.servers.iter().zip(workers) {
            server.stop();
            worker.join().expect("server thread panicked");
        }
        self.bus.publish(Event::AllProcessed);
        self.state = RunState::Stopped;
        log::info!(
            "stopped after {} ms of simulation",
            started.elapsed().as_millis()
        );
    }

    fn spawn_servers(&self) -> Vec<JoinHandle<()>> {
        self.servers
            .iter()
            .map(|server| {
                let server = Arc::clone(server);
                thread::Builder::new()
                    .name(format!("server-{}", server.id()))
                    .spawn(move || server.run())
                    .expect("failed to spawn server thread")
            })
            .collect()
    }

    /// The dispatcher's drain loop exits whenever it observes an empty
    /// queue, so the driver carries the restart obligation: re-invoke the
    /// loop until the dispatcher is actually stopped.
    fn spawn_dispatcher(&self) -> JoinHandle<()> {
        let dispatcher = Arc::clone(&self.dispatcher);
        thread::Builder::new()
            .name("dispatcher".into())
            .spawn(move || {
                while !dispatcher.is_stopped() {
                    dispatcher.run();
                    thread::sleep(POLL_INTERVAL);
                }
            })
            .expect("failed to spawn dispatcher thread")
    }
}
