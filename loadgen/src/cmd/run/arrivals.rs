use std::time::Duration;

use rand::{RngExt as _, SeedableRng as _, rngs::StdRng};
use tokio::time::Instant;

use crate::config::ArrivalRateConfig;

/// Schedule of the arrivals of a constant-arrival-rate run.
///
/// Every arrival pushes the theoretical arrival time (`tat`) one
/// interval further. An arrival is due once `tat` is at most
/// `tolerance` ahead of now, which lets `burst_size` arrivals go back
/// to back and bounds how much a late dispatcher catches up on.
///
/// The schedule ends at the run deadline or once the expected
/// amount of iterations has been issued, whichever comes first.
#[derive(Debug)]
pub(super) struct ArrivalSchedule {
    interval: Duration,
    tolerance: Duration,
    tat: Instant,
    deadline: Instant,
    max_arrivals: u64,
    issued: u64,
    jitter: f64,
    rng: StdRng,
}

impl ArrivalSchedule {
    pub(super) fn new(cfg: &ArrivalRateConfig) -> Self {
        Self::with_rng(cfg, StdRng::seed_from_u64(rand::random()))
    }

    fn with_rng(cfg: &ArrivalRateConfig, rng: StdRng) -> Self {
        let start = Instant::now();
        let interval = cfg.arrival_interval();

        Self {
            interval,
            tolerance: interval.saturating_mul(cfg.burst_size.max(1) - 1),
            tat: start,
            deadline: start + cfg.duration,
            max_arrivals: cfg.expected_iterations(),
            issued: 0,
            jitter: cfg.jitter.clamp(0., 1.),
            rng,
        }
    }

    /// Amount of arrivals handed out so far.
    pub(super) fn issued(&self) -> u64 {
        self.issued
    }

    /// Wait for the next arrival and return its index,
    /// or `None` once the schedule is exhausted.
    ///
    /// Cancel safe: the schedule only advances once an index is returned.
    pub(super) async fn next(&mut self) -> Option<u64> {
        if self.issued >= self.max_arrivals {
            return None;
        }

        if self.tat >= self.deadline + self.tolerance {
            return None;
        }

        let now = Instant::now();
        let ahead = self.tat.saturating_duration_since(now);
        if ahead > self.tolerance {
            let wake = now + self.spread(ahead - self.tolerance);
            tokio::time::sleep_until(wake.min(self.deadline)).await;
        }

        let now = Instant::now();
        if now >= self.deadline {
            return None;
        }

        // jitter never moves the theoretical arrival time
        self.tat = self.tat.max(now) + self.interval;

        let index = self.issued;
        self.issued += 1;
        Some(index)
    }

    fn spread(&mut self, wait: Duration) -> Duration {
        if self.jitter <= 0. {
            return wait;
        }
        let factor = self.rng.random_range((1. - self.jitter)..=(1. + self.jitter));
        wait.mul_f64(factor)
    }
}
