use std::{fmt, time::Duration};

use rama::telemetry::tracing;

use super::ClientConfig;

/// Strategy used to schedule iterations over the duration of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, Default)]
pub enum ExecutorKind {
    /// Open model: start `rate` iterations per `time_unit`,
    /// independent of how long the responses take.
    #[default]
    ConstantArrivalRate,

    /// Closed model: a fixed amount of workers,
    /// each looping over iterations back-to-back.
    ConstantWorkers,
}

/// Validated executor configuration, passed explicitly to the dispatch loop.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorConfig {
    ConstantArrivalRate(ArrivalRateConfig),
    ConstantWorkers(ConstantWorkersConfig),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArrivalRateConfig {
    pub rate: u32,
    pub time_unit: Duration,
    pub duration: Duration,
    pub pre_allocated_workers: u32,
    pub max_workers: u32,
    pub burst_size: u32,
    pub jitter: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstantWorkersConfig {
    pub workers: u32,
    pub duration: Duration,
    pub pause: Duration,
}

const DEFAULT_TIME_UNIT: Duration = Duration::from_secs(1);
const DEFAULT_DURATION: Duration = Duration::from_secs(30);

/// Burst window used when no explicit burst size is configured.
///
/// Tokio timers have a millisecond granularity, so at high arrival rates
/// the arrival schedule needs to be able to catch up on the arrivals of a few ticks.
const AUTO_BURST_WINDOW: Duration = Duration::from_millis(10);

impl ArrivalRateConfig {
    /// Time between two consecutive arrivals.
    pub fn arrival_interval(&self) -> Duration {
        self.time_unit.checked_div(self.rate).unwrap_or(self.time_unit)
    }

    /// Upper bound on the iterations this configuration will start.
    pub fn expected_iterations(&self) -> u64 {
        (self.rate as f64 * self.duration.as_secs_f64() / self.time_unit.as_secs_f64()).ceil()
            as u64
    }

    fn auto_burst_size(rate: u32, time_unit: Duration) -> u32 {
        (rate as f64 * AUTO_BURST_WINDOW.as_nanos() as f64 / time_unit.as_nanos() as f64)
            .ceil()
            .clamp(1., u32::MAX as f64) as u32
    }
}

impl ExecutorConfig {
    pub fn kind(&self) -> ExecutorKind {
        match self {
            Self::ConstantArrivalRate(_) => ExecutorKind::ConstantArrivalRate,
            Self::ConstantWorkers(_) => ExecutorKind::ConstantWorkers,
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Self::ConstantArrivalRate(cfg) => cfg.duration,
            Self::ConstantWorkers(cfg) => cfg.duration,
        }
    }

    /// Maximum amount of iterations that can be in flight at the same time.
    pub fn max_concurrency(&self) -> usize {
        match self {
            Self::ConstantArrivalRate(cfg) => cfg.max_workers as usize,
            Self::ConstantWorkers(cfg) => cfg.workers as usize,
        }
    }

    /// Turn a (merged) client config into a validated executor config.
    ///
    /// Properties which do not apply to the selected executor are ignored.
    pub fn try_from_client_config(cfg: &ClientConfig) -> Result<Self, ConfigError> {
        let kind = cfg.executor.unwrap_or_default();
        let duration = cfg.duration.unwrap_or(DEFAULT_DURATION);
        if duration.is_zero() {
            return Err(ConfigError::ZeroDuration);
        }

        match kind {
            ExecutorKind::ConstantArrivalRate => {
                let rate = cfg.rate.ok_or(ConfigError::Missing("rate"))?;
                if rate == 0 {
                    return Err(ConfigError::ZeroRate);
                }

                let time_unit = cfg.time_unit.unwrap_or(DEFAULT_TIME_UNIT);
                if time_unit.is_zero() {
                    return Err(ConfigError::ZeroTimeUnit);
                }

                let max_workers = cfg.max_workers.ok_or(ConfigError::Missing("max_workers"))?;
                if max_workers == 0 {
                    return Err(ConfigError::ZeroMaxWorkers);
                }

                let pre_allocated_workers = cfg.pre_allocated_workers.unwrap_or(max_workers);
                if max_workers < pre_allocated_workers {
                    return Err(ConfigError::MaxWorkersBelowPreAllocated {
                        pre_allocated_workers,
                        max_workers,
                    });
                }

                let jitter = cfg.jitter.unwrap_or_default();
                if !(0.0..=1.0).contains(&jitter) {
                    return Err(ConfigError::JitterOutOfRange(jitter));
                }

                let burst_size = match cfg.burst_size.unwrap_or_default() {
                    0 => ArrivalRateConfig::auto_burst_size(rate, time_unit),
                    n => n,
                };

                if cfg.workers.is_some() || cfg.pause.is_some() {
                    tracing::warn!(
                        "workers and pause are ignored by the constant-arrival-rate executor"
                    );
                }

                Ok(Self::ConstantArrivalRate(ArrivalRateConfig {
                    rate,
                    time_unit,
                    duration,
                    pre_allocated_workers,
                    max_workers,
                    burst_size,
                    jitter,
                }))
            }
            ExecutorKind::ConstantWorkers => {
                let workers = cfg.workers.ok_or(ConfigError::Missing("workers"))?;
                if workers == 0 {
                    return Err(ConfigError::ZeroWorkers);
                }

                if cfg.rate.is_some() || cfg.max_workers.is_some() {
                    tracing::warn!("rate and worker bounds are ignored by the constant-workers executor");
                }

                Ok(Self::ConstantWorkers(ConstantWorkersConfig {
                    workers,
                    duration,
                    pause: cfg.pause.unwrap_or_default(),
                }))
            }
        }
    }
}

#[derive(Debug)]
#[cfg_attr(test, derive(PartialEq))]
pub enum ConfigError {
    Missing(&'static str),
    ZeroRate,
    ZeroTimeUnit,
    ZeroDuration,
    ZeroMaxWorkers,
    ZeroWorkers,
    MaxWorkersBelowPreAllocated {
        pre_allocated_workers: u32,
        max_workers: u32,
    },
    JitterOutOfRange(f64),
    MinPassRateOutOfRange(f64),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing(property) => write!(f, "ConfigError: property '{property}' is required"),
            Self::ZeroRate => write!(f, "ConfigError: rate has to be at least 1"),
            Self::ZeroTimeUnit => write!(f, "ConfigError: time unit cannot be zero"),
            Self::ZeroDuration => write!(f, "ConfigError: duration cannot be zero"),
            Self::ZeroMaxWorkers => write!(f, "ConfigError: max workers has to be at least 1"),
            Self::ZeroWorkers => write!(f, "ConfigError: workers has to be at least 1"),
            Self::MaxWorkersBelowPreAllocated {
                pre_allocated_workers,
                max_workers,
            } => write!(
                f,
                "ConfigError: max workers ({max_workers}) cannot be lower than pre-allocated workers ({pre_allocated_workers})"
            ),
            Self::JitterOutOfRange(jitter) => {
                write!(f, "ConfigError: jitter ({jitter}) has to be within [0, 1]")
            }
            Self::MinPassRateOutOfRange(rate) => {
                write!(f, "ConfigError: min pass rate ({rate}) has to be within [0, 1]")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
