use std::{sync::Arc, time::Duration};

use rama::{
    Service,
    error::BoxError,
    graceful::ShutdownGuard,
    http::{Request, Response},
};
use tokio::sync::mpsc;

use super::{probe::Probe, reporter::IterationEvent};
use crate::config::ExecutorConfig;

mod arrival_rate;
mod constant_workers;

/// What the executor observed while dispatching iterations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorReport {
    /// Iterations handed to a worker.
    pub started: u64,
    pub dropped: u64,
    /// In-flight iterations aborted on shutdown or at the graceful stop limit.
    pub interrupted: u64,
    pub peak_workers: usize,
}

/// Drive the probe with the configured executor until its duration
/// expired (or shutdown got initiated) and all iterations are accounted for.
///
/// The `events` sender is dropped on return,
/// so the receiver side ends once all events are consumed.
pub(super) async fn run<S>(
    guard: ShutdownGuard,
    cfg: ExecutorConfig,
    probe: Probe<S>,
    events: mpsc::Sender<IterationEvent>,
    graceful_stop: Duration,
) -> ExecutorReport
where
    S: Service<Request, Output = Response, Error: Into<BoxError>>,
{
    let probe = Arc::new(probe);
    match cfg {
        ExecutorConfig::ConstantArrivalRate(cfg) => {
            arrival_rate::run(guard, cfg, probe, events, graceful_stop).await
        }
        ExecutorConfig::ConstantWorkers(cfg) => {
            constant_workers::run(guard, cfg, probe, events, graceful_stop).await
        }
    }
}
