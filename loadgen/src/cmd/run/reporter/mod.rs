use std::time::Duration;

use super::{metrics::RunSummary, probe::ProbeResult};

mod human;
mod json;

pub use self::{human::HumanReporter, json::JsonlReporter};

pub trait Reporter: Send + 'static {
    fn on_event(&mut self, ev: &IterationEvent, elapsed: Duration);
    fn on_tick(&mut self, now: Duration, window: &Counters, total: &Counters);
    fn finish(&mut self, summary: &RunSummary);
}

#[derive(Debug)]
pub enum IterationEvent {
    Finished {
        index: u64,
        worker: usize,
        result: ProbeResult,
    },
    /// No worker was free when the iteration was due.
    Dropped { index: u64 },
}

impl IterationEvent {
    pub fn index(&self) -> u64 {
        match self {
            IterationEvent::Finished { index, .. } | IterationEvent::Dropped { index } => *index,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub iterations: u64,
    pub checks_passed: u64,
    pub checks_failed: u64,
    pub http_fail: u64,
    pub other_fail: u64,
    pub dropped: u64,
}

impl Counters {
    pub fn apply(&mut self, ev: &IterationEvent) {
        let result = match ev {
            IterationEvent::Finished { result, .. } => result,
            IterationEvent::Dropped { .. } => {
                self.dropped += 1;
                return;
            }
        };

        self.iterations += 1;
        for passed in &result.checks {
            if *passed {
                self.checks_passed += 1;
            } else {
                self.checks_failed += 1;
            }
        }

        match &result.outcome {
            Ok(record) if record.status.as_u16() >= 400 => self.http_fail += 1,
            Ok(_) => (),
            Err(_) => self.other_fail += 1,
        }
    }

    pub fn check_pass_rate(&self) -> Option<f64> {
        let total = self.checks_passed + self.checks_failed;
        (total > 0).then(|| self.checks_passed as f64 / total as f64)
    }
}
