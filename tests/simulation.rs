//! End-to-end simulation scenarios exercising the full engine: arrivals,
//! dispatch, queueing, service, shutdown, and statistics.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use mgcsim::{
    ClientId, ClientQueue, Dispatcher, Erlang, Event, EventBus, EventBusHandle, RunState, Sampler,
    Server, ServerId, Simulation, Statistician, Subscriber, Weibull,
};

#[derive(Default)]
struct Recorder {
    seen: Vec<Event>,
}

impl Subscriber for Recorder {
    fn handle(&mut self, event: &Event) {
        self.seen.push(*event);
    }
}

/// Returns a fixed first interval followed by a constant fallback, letting
/// tests script the arrival process.
struct Schedule {
    intervals: Mutex<std::vec::IntoIter<f64>>,
    fallback: f64,
}

impl Schedule {
    fn new(intervals: Vec<f64>, fallback: f64) -> Self {
        Self {
            intervals: Mutex::new(intervals.into_iter()),
            fallback,
        }
    }
}

impl Sampler for Schedule {
    fn sample(&self) -> f64 {
        self.intervals
            .lock()
            .unwrap()
            .next()
            .unwrap_or(self.fallback)
    }
}

struct Fixed(f64);

impl Sampler for Fixed {
    fn sample(&self) -> f64 {
        self.0
    }
}

struct Harness {
    simulation: Simulation,
    recorder: Arc<Mutex<Recorder>>,
    statistician: Arc<Mutex<Statistician>>,
    bus_handle: EventBusHandle,
}

fn harness(
    num_servers: usize,
    service: Arc<dyn Sampler>,
    arrivals: Box<dyn Sampler>,
    duration: Duration,
) -> Harness {
    let (bus, receiver) = EventBus::channel();
    let servers: Vec<_> = (0..num_servers)
        .map(|id| {
            Arc::new(Server::new(
                ServerId::from(id),
                Arc::clone(&service),
                bus.clone(),
            ))
        })
        .collect();
    let queue = Arc::new(ClientQueue::unbounded());
    let dispatcher = Arc::new(Dispatcher::new(
        servers.clone(),
        Arc::clone(&queue),
        bus.clone(),
    ));
    let recorder = Arc::new(Mutex::new(Recorder::default()));
    let statistician = Arc::new(Mutex::new(Statistician::new(queue, servers.clone())));
    let bus_handle = receiver.spawn(vec![
        Box::new(Arc::clone(&recorder)),
        Box::new(Arc::clone(&statistician)),
    ]);
    Harness {
        simulation: Simulation::new(arrivals, duration, servers, dispatcher, bus),
        recorder,
        statistician,
        bus_handle,
    }
}

fn client_of(event: &Event) -> Option<ClientId> {
    match event {
        Event::Arrived(c)
        | Event::Scheduled(c)
        | Event::Queued(c)
        | Event::PoppedFromQueue(c)
        | Event::ProcessingStarted(c)
        | Event::ProcessingFinished(c) => Some(c.id()),
        Event::AllProcessed => None,
    }
}

/// Every client's event sequence must be a prefix of one of the two valid
/// lifecycles (clients still queued or in flight at shutdown stop early):
/// direct `[Arrived, Scheduled, Started, Finished]` or queued
/// `[Arrived, Scheduled, Queued, Popped, Started, Finished]`.
fn assert_valid_lifecycles(events: &[Event]) {
    use std::collections::HashMap;
    let mut per_client: HashMap<ClientId, Vec<&Event>> = HashMap::new();
    for event in events {
        if let Some(id) = client_of(event) {
            per_client.entry(id).or_default().push(event);
        }
    }
    for (id, sequence) in per_client {
        let kinds: Vec<&str> = sequence
            .iter()
            .map(|event| match event {
                Event::Arrived(_) => "arrived",
                Event::Scheduled(_) => "scheduled",
                Event::Queued(_) => "queued",
                Event::PoppedFromQueue(_) => "popped",
                Event::ProcessingStarted(_) => "started",
                Event::ProcessingFinished(_) => "finished",
                Event::AllProcessed => unreachable!(),
            })
            .collect();
        let direct = ["arrived", "scheduled", "started", "finished"];
        let queued = [
            "arrived",
            "scheduled",
            "queued",
            "popped",
            "started",
            "finished",
        ];
        let valid = direct.starts_with(&kinds[..]) || queued.starts_with(&kinds[..]);
        assert!(
            valid,
            "client {} has an invalid event sequence: {:?}",
            id, kinds
        );
    }
}

#[test]
fn test_end_to_end_weibull_service_erlang_arrivals() {
    let mut harness = harness(
        2,
        Arc::new(Weibull::seeded(4.0, 50.0, 11).unwrap()),
        Box::new(Erlang::seeded(2, 20.0, 12).unwrap()),
        Duration::from_millis(2000),
    );
    harness.simulation.run();
    harness.bus_handle.join();

    let statistician = harness.statistician.lock().unwrap();
    assert!(
        statistician.errors().is_empty(),
        "event ordering violations: {:?}",
        statistician.errors()
    );
    let summary = statistician.summarize();
    assert!(summary.avg_occupancy >= 0.0);
    assert!(summary.avg_service_time_ms >= 0.0);
    assert!(summary.avg_wait_time_ms >= 0.0);
    assert!(summary.avg_queue_size >= 0.0);
    assert!(summary.idle_probability >= 0.0 && summary.idle_probability <= 100.0);
    assert!(summary.served_clients > 0, "no client completed service");

    let events = harness.recorder.lock().unwrap().seen.clone();
    assert_valid_lifecycles(&events);
}

#[test]
fn test_all_processed_fires_exactly_once_and_last() {
    let mut harness = harness(
        2,
        Arc::new(Fixed(10.0)),
        Box::new(Fixed(20.0)),
        Duration::from_millis(300),
    );
    harness.simulation.run();
    assert_eq!(harness.simulation.state(), RunState::Stopped);
    harness.bus_handle.join();

    let events = harness.recorder.lock().unwrap().seen.clone();
    let terminal_count = events
        .iter()
        .filter(|event| **event == Event::AllProcessed)
        .count();
    assert_eq!(terminal_count, 1);
    assert_eq!(events.last(), Some(&Event::AllProcessed));
    assert_valid_lifecycles(&events);
}

#[test]
fn test_shutdown_terminates_within_one_service_duration() {
    // Long services relative to the simulation window: the driver must
    // still come back within roughly one in-flight service duration plus
    // scheduling slack.
    let service_ms = 200.0;
    let duration = Duration::from_millis(100);
    let mut harness = harness(
        2,
        Arc::new(Fixed(service_ms)),
        Box::new(Fixed(30.0)),
        duration,
    );
    let started = Instant::now();
    harness.simulation.run();
    let elapsed = started.elapsed();
    harness.bus_handle.join();

    assert_eq!(harness.simulation.state(), RunState::Stopped);
    let bound = duration + Duration::from_millis(service_ms as u64 + 300);
    assert!(
        elapsed < bound,
        "shutdown took {:?}, expected under {:?}",
        elapsed,
        bound
    );
}

#[test]
fn test_idle_probability_approaches_one_with_single_client() {
    // One client at the start, then a gap far longer than the simulation
    // window: after the 50 ms service the system idles until the arrival
    // loop wakes up once more and winds down, so idle time dominates. (A
    // straggler client arrives when the gap elapses, the same way the
    // arrival loop has always overshot its duration; the idle stretch is
    // sized so the property holds regardless.)
    let mut harness = harness(
        1,
        Arc::new(Fixed(50.0)),
        Box::new(Schedule::new(vec![1.0], 3000.0)),
        Duration::from_millis(1000),
    );
    harness.simulation.run();
    harness.bus_handle.join();

    let statistician = harness.statistician.lock().unwrap();
    let summary = statistician.summarize();
    assert!(summary.served_clients >= 1);
    assert!(
        summary.idle_probability >= 95.0,
        "idle probability {} below expected 95%",
        summary.idle_probability
    );
    assert!(summary.idle_probability <= 100.0);
}
