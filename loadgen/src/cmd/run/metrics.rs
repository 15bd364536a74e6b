use std::{collections::BTreeMap, time::Duration};

use hdrhistogram::Histogram;
use rama::error::{BoxError, ErrorContext as _};

use super::{
    check::Checks,
    executor::ExecutorReport,
    probe::FailureKind,
    reporter::{Counters, IterationEvent},
};

/// Highest latency (in µs) tracked with full precision, larger values saturate.
const MAX_TRACKED_LATENCY_US: u64 = 60 * 60 * 1_000_000;

/// Run aggregate, owned by the report worker.
pub struct Metrics {
    checks: Checks,
    check_counts: Vec<(u64, u64)>,
    window: Counters,
    total: Counters,
    latency: Histogram<u64>,
    http_reqs: u64,
    http_req_failed: u64,
    statuses: BTreeMap<u16, u64>,
    failures: BTreeMap<FailureKind, u64>,
    bytes_received: u64,
}

impl Metrics {
    pub fn try_new(checks: Checks) -> Result<Self, BoxError> {
        let latency = Histogram::new_with_bounds(1, MAX_TRACKED_LATENCY_US, 3)
            .context("create latency histogram")?;
        Ok(Self {
            check_counts: vec![(0, 0); checks.len()],
            checks,
            window: Counters::default(),
            total: Counters::default(),
            latency,
            http_reqs: 0,
            http_req_failed: 0,
            statuses: BTreeMap::new(),
            failures: BTreeMap::new(),
            bytes_received: 0,
        })
    }

    pub fn record(&mut self, ev: &IterationEvent) {
        self.window.apply(ev);
        self.total.apply(ev);

        let IterationEvent::Finished { result, .. } = ev else {
            return;
        };

        for (counts, passed) in self.check_counts.iter_mut().zip(&result.checks) {
            if *passed {
                counts.0 += 1;
            } else {
                counts.1 += 1;
            }
        }

        match &result.outcome {
            Ok(record) => {
                self.http_reqs += 1;
                if record.status.as_u16() >= 400 {
                    self.http_req_failed += 1;
                }
                *self.statuses.entry(record.status.as_u16()).or_default() += 1;
                self.bytes_received += record.bytes_received;
                self.latency
                    .saturating_record(record.latency.as_micros().min(u64::MAX as u128) as u64);
            }
            Err(failure) => {
                if failure.kind.is_http_request() {
                    self.http_reqs += 1;
                    self.http_req_failed += 1;
                }
                *self.failures.entry(failure.kind).or_default() += 1;
            }
        }
    }

    pub fn total(&self) -> &Counters {
        &self.total
    }

    /// Counters since the previous call.
    pub fn take_window(&mut self) -> Counters {
        std::mem::take(&mut self.window)
    }

    pub fn into_summary(self, elapsed: Duration, report: ExecutorReport) -> RunSummary {
        let latency = LatencyStats::from_histogram(&self.latency);
        let checks = self
            .checks
            .iter()
            .zip(self.check_counts)
            .map(|(check, (passes, fails))| CheckSummary {
                name: check.name().to_owned(),
                passes,
                fails,
            })
            .collect();

        RunSummary {
            elapsed,
            iterations: self.total.iterations,
            dropped_iterations: self.total.dropped,
            interrupted_iterations: report.interrupted,
            http_reqs: self.http_reqs,
            http_req_failed: self.http_req_failed,
            statuses: self.statuses,
            failures: self.failures,
            checks,
            latency,
            bytes_received: self.bytes_received,
            peak_workers: report.peak_workers,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencyStats {
    pub count: u64,
    pub min: Duration,
    pub avg: Duration,
    pub med: Duration,
    pub p90: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub max: Duration,
}

impl LatencyStats {
    fn from_histogram(h: &Histogram<u64>) -> Self {
        if h.len() == 0 {
            return Self::default();
        }
        let q = |quantile| Duration::from_micros(h.value_at_quantile(quantile));
        Self {
            count: h.len(),
            min: Duration::from_micros(h.min()),
            avg: Duration::from_secs_f64(h.mean() / 1_000_000.),
            med: q(0.5),
            p90: q(0.9),
            p95: q(0.95),
            p99: q(0.99),
            max: Duration::from_micros(h.max()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckSummary {
    pub name: String,
    pub passes: u64,
    pub fails: u64,
}

impl CheckSummary {
    pub fn pass_rate(&self) -> Option<f64> {
        ratio(self.passes, self.passes + self.fails)
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub elapsed: Duration,
    pub iterations: u64,
    pub dropped_iterations: u64,
    pub interrupted_iterations: u64,
    pub http_reqs: u64,
    pub http_req_failed: u64,
    pub statuses: BTreeMap<u16, u64>,
    pub failures: BTreeMap<FailureKind, u64>,
    pub checks: Vec<CheckSummary>,
    pub latency: LatencyStats,
    pub bytes_received: u64,
    pub peak_workers: usize,
}

impl RunSummary {
    /// Pass rate over all evaluated checks, `None` if nothing was evaluated.
    pub fn check_pass_rate(&self) -> Option<f64> {
        let (passes, fails) = self
            .checks
            .iter()
            .fold((0, 0), |(p, f), c| (p + c.passes, f + c.fails));
        ratio(passes, passes + fails)
    }

    pub fn http_req_failed_rate(&self) -> Option<f64> {
        ratio(self.http_req_failed, self.http_reqs)
    }

    /// Completed iterations per second.
    pub fn iteration_rate(&self) -> f64 {
        per_second(self.iterations, self.elapsed)
    }

    pub fn http_req_rate(&self) -> f64 {
        per_second(self.http_reqs, self.elapsed)
    }
}

fn ratio(part: u64, total: u64) -> Option<f64> {
    (total > 0).then(|| part as f64 / total as f64)
}

fn per_second(n: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs == 0. { 0. } else { n as f64 / secs }
}
