use std::{sync::Arc, time::Duration};

use rama::{
    Service,
    error::BoxError,
    graceful::ShutdownGuard,
    http::{Request, Response},
    telemetry::tracing,
};
use tokio::sync::mpsc;

use super::ExecutorReport;
use crate::{
    cmd::run::{
        arrivals::ArrivalSchedule,
        pool::{Dispatch, Job, WorkerPool},
        probe::Probe,
        reporter::IterationEvent,
    },
    config::ArrivalRateConfig,
};

/// Open model: iterations start at a fixed rate,
/// regardless of how long previous iterations take.
pub(super) async fn run<S>(
    guard: ShutdownGuard,
    cfg: ArrivalRateConfig,
    probe: Arc<Probe<S>>,
    events: mpsc::Sender<IterationEvent>,
    graceful_stop: Duration,
) -> ExecutorReport
where
    S: Service<Request, Output = Response, Error: Into<BoxError>>,
{
    tracing::info!(
        rate = cfg.rate,
        time_unit = ?cfg.time_unit,
        duration = ?cfg.duration,
        workers.pre_allocated = cfg.pre_allocated_workers,
        workers.max = cfg.max_workers,
        burst_size = cfg.burst_size,
        iterations.max = cfg.expected_iterations(),
        "start constant-arrival-rate executor",
    );

    let mut pool = WorkerPool::new(
        probe,
        guard.clone(),
        events.clone(),
        cfg.pre_allocated_workers as usize,
        cfg.max_workers as usize,
    );
    let mut arrivals = ArrivalSchedule::new(&cfg);
    let mut cancelled = std::pin::pin!(guard.clone_weak().into_cancelled());

    let mut dropped = 0;

    loop {
        let next = tokio::select! {
            biased;

            _ = cancelled.as_mut() => {
                tracing::info!("stop dispatching iterations early: guard shutdown");
                break;
            }
            next = arrivals.next() => next,
        };
        let Some(index) = next else {
            tracing::debug!(
                "arrival schedule exhausted after {} iteration(s)",
                arrivals.issued()
            );
            break;
        };

        if pool.try_dispatch(Job { index }) == Dispatch::Dropped {
            dropped += 1;
            if dropped == 1 {
                tracing::warn!(
                    workers.max = cfg.max_workers,
                    "insufficient workers: first iteration dropped at index {index}",
                );
            }
            if events.send(IterationEvent::Dropped { index }).await.is_err() {
                tracing::debug!("event receiver closed: stop dispatching");
                break;
            }
        }
    }

    drop(events);

    let started = arrivals.issued() - dropped;
    let pool_report = pool.close(graceful_stop).await;
    tracing::info!(
        iterations.started = started,
        iterations.dropped = dropped,
        iterations.interrupted = pool_report.interrupted,
        workers.peak = pool_report.peak_workers,
        "constant-arrival-rate executor finished",
    );

    ExecutorReport {
        started,
        dropped,
        interrupted: pool_report.interrupted,
        peak_workers: pool_report.peak_workers,
    }
}
