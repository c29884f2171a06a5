//! Queueing simulation application.
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

use std::convert::TryFrom;
use std::fs::File;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use eyre::WrapErr;
use serde::Deserialize;

use mgcsim::{
    ClientQueue, Dispatcher, DistributionConfig, EventBus, ProgressReporter, Sampler, Server,
    ServerId, Simulation, Statistician, Subscriber,
};

/// Runs a multi-server queueing simulation.
#[derive(Parser)]
#[clap(version)]
struct Opt {
    /// Path to a JSON file describing the simulated system.
    #[clap(long)]
    config: PathBuf,

    /// Simulation duration override, e.g. `2s` or `500ms`.
    #[clap(long, parse(try_from_str = humantime::parse_duration))]
    duration: Option<Duration>,

    /// Server count override.
    #[clap(long)]
    servers: Option<usize>,

    /// Seed override for reproducible runs.
    #[clap(long)]
    seed: Option<u64>,

    /// Verbosity.
    #[clap(short, long, parse(from_occurrences))]
    verbose: i32,

    /// Store the logs in this file.
    #[clap(long)]
    log_output: Option<PathBuf>,

    /// Do not log to the stderr.
    #[clap(long)]
    no_stderr: bool,

    /// Do not draw the progress spinner.
    #[clap(long)]
    no_progress: bool,
}

/// Static description of the simulated system.
#[derive(Debug, Deserialize)]
struct SimulationConfig {
    duration_ms: u64,
    servers: usize,
    #[serde(default)]
    queue_capacity: Option<usize>,
    arrival: DistributionConfig,
    service: DistributionConfig,
    #[serde(default)]
    seed: Option<u64>,
}

impl TryFrom<&Opt> for SimulationConfig {
    type Error = eyre::Error;

    fn try_from(opt: &Opt) -> eyre::Result<Self> {
        let file = File::open(&opt.config).wrap_err_with(|| {
            format!("unable to open simulation config: {}", opt.config.display())
        })?;
        let mut config: SimulationConfig =
            serde_json::from_reader(file).wrap_err("unable to parse simulation config")?;
        if let Some(duration) = opt.duration {
            config.duration_ms =
                u64::try_from(duration.as_millis()).wrap_err("duration out of range")?;
        }
        if let Some(servers) = opt.servers {
            config.servers = servers;
        }
        if let Some(seed) = opt.seed {
            config.seed = Some(seed);
        }
        Ok(config)
    }
}

impl SimulationConfig {
    /// Wires up the components and runs the simulation to completion,
    /// printing the summary afterwards.
    fn run(&self, show_progress: bool) -> eyre::Result<()> {
        eyre::ensure!(self.duration_ms > 0, "simulation duration must be positive");
        eyre::ensure!(self.servers > 0, "server count must be positive");

        let (bus, receiver) = EventBus::channel();

        let service: Arc<dyn Sampler> = Arc::from(self.service.build(self.seed)?);
        let arrivals = self.arrival.build(self.seed.map(|s| s.wrapping_add(1)))?;

        let servers: Vec<_> = (0..self.servers)
            .map(|id| {
                Arc::new(Server::new(
                    ServerId::from(id),
                    Arc::clone(&service),
                    bus.clone(),
                ))
            })
            .collect();
        let queue = Arc::new(match self.queue_capacity {
            Some(capacity) => ClientQueue::bounded(capacity),
            None => ClientQueue::unbounded(),
        });
        let dispatcher = Arc::new(Dispatcher::new(
            servers.clone(),
            Arc::clone(&queue),
            bus.clone(),
        ));
        let statistician = Arc::new(Mutex::new(Statistician::new(queue, servers.clone())));

        let mut subscribers: Vec<Box<dyn Subscriber>> =
            vec![Box::new(Arc::clone(&statistician))];
        if show_progress {
            subscribers.push(Box::new(ProgressReporter::new()));
        }
        let bus_handle = receiver.spawn(subscribers);

        let mut simulation = Simulation::new(
            arrivals,
            Duration::from_millis(self.duration_ms),
            servers,
            dispatcher,
            bus,
        );
        simulation.run();
        bus_handle.join();

        let statistician = statistician.lock().expect("statistician poisoned");
        for error in statistician.errors() {
            log::error!("{}", error);
        }
        println!("{}", statistician.summarize());
        Ok(())
    }
}

/// Set up a logger based on the given user options.
fn set_up_logger(opt: &Opt) -> Result<(), fern::InitError> {
    let log_level = match opt.verbose {
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        3 => log::LevelFilter::Trace,
        _ => log::LevelFilter::Warn,
    };
    let dispatch = fern::Dispatch::new()
        .format(|out, message, record| out.finish(format_args!("[{}] {}", record.level(), message)))
        .level(log_level);
    let dispatch = if let Some(path) = &opt.log_output {
        let _ = std::fs::remove_file(path);
        dispatch.chain(
            std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .append(false)
                .open(path)?,
        )
    } else {
        dispatch
    };
    let dispatch = if opt.no_stderr {
        dispatch
    } else {
        dispatch.chain(std::io::stderr())
    };
    dispatch.apply()?;
    Ok(())
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let opt = Opt::parse();
    set_up_logger(&opt)?;
    let config = SimulationConfig::try_from(&opt)?;
    config.run(!opt.no_progress)
}
