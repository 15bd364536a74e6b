use std::time::Duration;

use super::ExecutorKind;

/// Client side load generation configuration.
/// This models how iterations are produced over time.
///
/// Every field is optional so it can overwrite the values
/// of a [`super::Scenario`] preset one by one.
#[derive(Debug, Clone, clap::Args, Default)]
pub struct ClientConfig {
    /// Strategy used to schedule iterations.
    #[arg(long, value_enum)]
    pub executor: Option<ExecutorKind>,

    /// Number of iterations started per time unit (constant-arrival-rate).
    #[arg(long, value_name = "N")]
    pub rate: Option<u32>,

    /// Period in which `rate` iterations are started (constant-arrival-rate).
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub time_unit: Option<Duration>,

    /// Total duration of the run, e.g. `30s` or `2m`.
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Workers spawned before the run starts (constant-arrival-rate).
    #[arg(long, value_name = "N")]
    pub pre_allocated_workers: Option<u32>,

    /// Upper bound on the worker pool (constant-arrival-rate).
    #[arg(long, value_name = "N")]
    pub max_workers: Option<u32>,

    /// Fixed amount of looping workers (constant-workers).
    #[arg(long, value_name = "N")]
    pub workers: Option<u32>,

    /// Sleep between two iterations of the same worker (constant-workers).
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub pause: Option<Duration>,

    /// Number of iterations that can be started back-to-back
    /// when the dispatcher fell behind (0 = 10ms worth of arrivals).
    #[arg(long, value_name = "#ITERATIONS")]
    pub burst_size: Option<u32>,

    /// Random multiplier applied on the waits between arrivals, within `[0, 1]`.
    #[arg(long, value_name = "RATIO")]
    pub jitter: Option<f64>,
}

/// Parse human friendly durations such as `1s`, `30s`, `250ms` or `1m 30s`.
pub fn parse_duration(s: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(s.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        for (input, expected) in [
            ("1s", Some(Duration::from_secs(1))),
            ("30s", Some(Duration::from_secs(30))),
            (" 250ms ", Some(Duration::from_millis(250))),
            ("1m 30s", Some(Duration::from_secs(90))),
            ("0s", Some(Duration::ZERO)),
            ("", None),
            ("thirty", None),
            ("30", None),
        ] {
            match (parse_duration(input), expected) {
                (Ok(result), Some(expected)) => assert_eq!(result, expected, "input: '{input}'"),
                (Err(_), None) => (),
                (result, expected) => panic!(
                    "input = '{input}', unexpected result '{result:?}', expected: '{expected:?}'"
                ),
            }
        }
    }
}
