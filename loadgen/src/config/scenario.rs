use std::time::Duration;

use super::{ClientConfig, ExecutorKind, ServerConfig};

/// High level benchmark scenarios.
/// Each scenario is a preset of client (and echo server) behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, Default)]
pub enum Scenario {
    /// Precise arrival-rate shaping at 20k iterations per second.
    /// Used to measure the throughput of the load balancer under test.
    #[default]
    Performance,

    /// A fixed pool of looping workers.
    /// Used to apply simple, latency bound load.
    Steady,

    /// Low rate sanity check of the target.
    Smoke,
}

impl Scenario {
    /// Construct the concrete client configuration
    /// associated with this scenario.
    pub fn client_config(self) -> ClientConfig {
        match self {
            Scenario::Performance => ClientConfig {
                executor: Some(ExecutorKind::ConstantArrivalRate),
                rate: Some(20_000),
                time_unit: Some(Duration::from_secs(1)),
                duration: Some(Duration::from_secs(30)),
                pre_allocated_workers: Some(1000),
                max_workers: Some(2000),
                workers: None,
                pause: None,
                burst_size: None,
                jitter: None,
            },

            Scenario::Steady => ClientConfig {
                executor: Some(ExecutorKind::ConstantWorkers),
                rate: None,
                time_unit: None,
                duration: Some(Duration::from_secs(30)),
                pre_allocated_workers: None,
                max_workers: None,
                workers: Some(199),
                pause: None,
                burst_size: None,
                jitter: None,
            },

            Scenario::Smoke => ClientConfig {
                executor: Some(ExecutorKind::ConstantArrivalRate),
                rate: Some(10),
                time_unit: Some(Duration::from_secs(1)),
                duration: Some(Duration::from_secs(5)),
                pre_allocated_workers: Some(2),
                max_workers: Some(10),
                workers: None,
                pause: None,
                burst_size: Some(1),
                jitter: None,
            },
        }
    }

    /// Construct the concrete echo server configuration
    /// associated with this scenario.
    pub fn server_config(self) -> ServerConfig {
        match self {
            // Fast and fully reliable backend.
            Scenario::Performance | Scenario::Smoke => ServerConfig::default(),

            // Backend with some processing cost, so workers stay busy.
            Scenario::Steady => ServerConfig {
                base_latency: Some(0.005),
                jitter: Some(0.002),
                ..Default::default()
            },
        }
    }
}
