//! Statistics engine: derives aggregate measures from the event stream.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::{Client, ClientId, ClientQueue, Event, Server, Subscriber};

/// A recoverable statistics error. These indicate an event-ordering
/// violation upstream; they are recorded and logged, never panicked on.
#[derive(Debug, Error, PartialEq)]
pub enum StatsError {
    /// `PoppedFromQueue` observed for a client with no `Queued` timer.
    #[error("no wait timer recorded for client {0}; event order violated")]
    MissingWaitTimer(ClientId),
    /// `ProcessingFinished` observed for a client with no
    /// `ProcessingStarted` timer.
    #[error("no service timer recorded for client {0}; event order violated")]
    MissingServiceTimer(ClientId),
}

/// An elapsed duration recorded once for one client.
#[derive(Debug, Clone, Copy, PartialEq)]
struct TimeMetric {
    client: Client,
    elapsed: Duration,
}

/// Accumulates samples and reports their mean, zero when empty.
#[derive(Debug, Default)]
struct AverageMetric {
    values: Vec<f64>,
}

impl AverageMetric {
    fn add(&mut self, value: f64) {
        self.values.push(value);
    }

    #[allow(clippy::cast_precision_loss)]
    fn average(&self) -> f64 {
        if self.values.is_empty() {
            0.0
        } else {
            self.values.iter().sum::<f64>() / self.values.len() as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SystemState {
    Idle,
    Busy,
}

/// Records how long the aggregate system spent busy vs idle as a sequence of
/// `(state, duration)` intervals. Closed out exactly once at simulation end;
/// only closed intervals count towards the totals.
#[derive(Debug)]
struct StateTracker {
    intervals: Vec<(SystemState, Duration)>,
    current: Option<(SystemState, Instant)>,
}

impl StateTracker {
    fn new() -> Self {
        Self {
            intervals: Vec::new(),
            current: Some((SystemState::Idle, Instant::now())),
        }
    }

    fn record_busy(&mut self) {
        self.transition(SystemState::Busy);
    }

    fn record_idle(&mut self) {
        self.transition(SystemState::Idle);
    }

    fn transition(&mut self, target: SystemState) {
        match self.current {
            Some((state, since)) if state != target => {
                self.intervals.push((state, since.elapsed()));
                self.current = Some((target, Instant::now()));
            }
            Some(_) => {}
            None => log::warn!("state transition after tracker close; ignored"),
        }
    }

    fn close(&mut self) {
        match self.current.take() {
            Some((state, since)) => self.intervals.push((state, since.elapsed())),
            None => log::warn!("state tracker closed twice; ignored"),
        }
    }

    fn total_in(&self, target: SystemState) -> Duration {
        self.intervals
            .iter()
            .filter(|(state, _)| *state == target)
            .map(|(_, elapsed)| *elapsed)
            .sum()
    }

    fn idle_time(&self) -> Duration {
        self.total_in(SystemState::Idle)
    }

    fn busy_time(&self) -> Duration {
        self.total_in(SystemState::Busy)
    }
}

/// The aggregate measures of a finished simulation run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    /// Mean number of clients in the system (in service plus queued),
    /// sampled at scheduling decisions and completions.
    pub avg_occupancy: f64,
    /// Mean service duration, milliseconds.
    pub avg_service_time_ms: f64,
    /// Mean queue length, sampled alongside occupancy.
    pub avg_queue_size: f64,
    /// Mean time spent waiting in the queue, milliseconds. Counts only
    /// clients that actually queued.
    pub avg_wait_time_ms: f64,
    /// Percentage of observed time with zero in-progress clients,
    /// in `[0, 100]`. Zero when nothing was observed.
    pub idle_probability: f64,
    /// Number of clients that completed service.
    pub served_clients: usize,
    /// Number of clients that went through the queue.
    pub queued_clients: usize,
    /// Total service time across all served clients, milliseconds.
    pub total_service_time_ms: f64,
    /// Total queue wait time across all queued clients, milliseconds.
    pub total_wait_time_ms: f64,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "average clients in the system:   {:.3} clients",
            self.avg_occupancy
        )?;
        writeln!(
            f,
            "average client processing time:  {:.3} ms",
            self.avg_service_time_ms
        )?;
        writeln!(
            f,
            "average queue size:              {:.3} clients",
            self.avg_queue_size
        )?;
        writeln!(
            f,
            "average time in the queue:       {:.3} ms",
            self.avg_wait_time_ms
        )?;
        write!(
            f,
            "chance of system downtime:       {:.3} %",
            self.idle_probability
        )
    }
}

/// Event bus subscriber converting timestamped lifecycle events into
/// aggregate measures.
///
/// Holds the queue and the server pool so it can sample queue length and
/// occupancy at the moment an event is delivered. Per-client timers are
/// keyed by client ID and rely on the bus's total delivery order.
pub struct Statistician {
    queue: Arc<ClientQueue>,
    servers: Vec<Arc<Server>>,
    service_metrics: Vec<TimeMetric>,
    wait_metrics: Vec<TimeMetric>,
    occupancy: AverageMetric,
    queue_size: AverageMetric,
    busyness: StateTracker,
    service_timers: HashMap<ClientId, Instant>,
    wait_timers: HashMap<ClientId, Instant>,
    errors: Vec<StatsError>,
}

impl Statistician {
    /// Constructs a statistician observing the given queue and server pool.
    #[must_use]
    pub fn new(queue: Arc<ClientQueue>, servers: Vec<Arc<Server>>) -> Self {
        Self {
            queue,
            servers,
            service_metrics: Vec::new(),
            wait_metrics: Vec::new(),
            occupancy: AverageMetric::default(),
            queue_size: AverageMetric::default(),
            busyness: StateTracker::new(),
            service_timers: HashMap::new(),
            wait_timers: HashMap::new(),
            errors: Vec::new(),
        }
    }

    /// Event-ordering violations observed so far.
    #[must_use]
    pub fn errors(&self) -> &[StatsError] {
        &self.errors
    }

    /// Computes the aggregate measures from everything recorded so far.
    /// All averages are zero when no samples exist.
    #[must_use]
    pub fn summarize(&self) -> Summary {
        let (total_service, avg_service) = Self::totals(&self.service_metrics);
        let (total_wait, avg_wait) = Self::totals(&self.wait_metrics);
        let idle = self.busyness.idle_time();
        let total = idle + self.busyness.busy_time();
        let idle_probability = if total == Duration::default() {
            0.0
        } else {
            idle.as_secs_f64() / total.as_secs_f64() * 100.0
        };
        Summary {
            avg_occupancy: self.occupancy.average(),
            avg_service_time_ms: avg_service,
            avg_queue_size: self.queue_size.average(),
            avg_wait_time_ms: avg_wait,
            idle_probability,
            served_clients: self.service_metrics.len(),
            queued_clients: self.wait_metrics.len(),
            total_service_time_ms: total_service,
            total_wait_time_ms: total_wait,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn totals(metrics: &[TimeMetric]) -> (f64, f64) {
        let total: f64 = metrics
            .iter()
            .map(|metric| metric.elapsed.as_secs_f64() * 1000.0)
            .sum();
        if metrics.is_empty() {
            (0.0, 0.0)
        } else {
            (total, total / metrics.len() as f64)
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn record_samples(&mut self) {
        let queued = self.queue.len();
        let in_service = self
            .servers
            .iter()
            .filter(|server| server.is_working())
            .count();
        self.queue_size.add(queued as f64);
        self.occupancy.add((in_service + queued) as f64);
    }

    fn is_system_idle(&self) -> bool {
        self.queue.is_empty() && self.servers.iter().all(|server| !server.is_working())
    }

    fn record_finish(&mut self, client: Client) {
        match self.service_timers.remove(&client.id()) {
            Some(started) => {
                let elapsed = started.elapsed();
                log::debug!(
                    "{} has been processed for {} ms",
                    client,
                    elapsed.as_millis()
                );
                self.service_metrics.push(TimeMetric { client, elapsed });
            }
            None => {
                let error = StatsError::MissingServiceTimer(client.id());
                log::error!("{}", error);
                self.errors.push(error);
            }
        }
    }

    fn record_popped(&mut self, client: Client) {
        match self.wait_timers.remove(&client.id()) {
            Some(queued) => {
                let elapsed = queued.elapsed();
                log::debug!("{} has waited in queue for {} ms", client, elapsed.as_millis());
                self.wait_metrics.push(TimeMetric { client, elapsed });
            }
            None => {
                let error = StatsError::MissingWaitTimer(client.id());
                log::error!("{}", error);
                self.errors.push(error);
            }
        }
    }
}

impl Subscriber for Statistician {
    fn handle(&mut self, event: &Event) {
        match *event {
            Event::Arrived(client) => log::debug!("{} has arrived", client),
            Event::Scheduled(client) => {
                log::debug!("{} has been scheduled", client);
                self.record_samples();
                self.busyness.record_busy();
            }
            Event::Queued(client) => {
                self.wait_timers.insert(client.id(), Instant::now());
            }
            Event::PoppedFromQueue(client) => self.record_popped(client),
            Event::ProcessingStarted(client) => {
                log::debug!("processing of {} has been started", client);
                self.service_timers.insert(client.id(), Instant::now());
            }
            Event::ProcessingFinished(client) => {
                self.record_samples();
                self.record_finish(client);
                if self.is_system_idle() {
                    self.busyness.record_idle();
                }
            }
            Event::AllProcessed => self.busyness.close(),
        }
    }
}
