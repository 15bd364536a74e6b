use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use rama::{
    Service,
    error::BoxError,
    graceful::ShutdownGuard,
    http::{Request, Response},
    telemetry::tracing,
};
use tokio::{sync::mpsc, time::Instant};

use super::ExecutorReport;
use crate::{
    cmd::run::{probe::Probe, reporter::IterationEvent, tasks::IterationTasks},
    config::ConstantWorkersConfig,
};

/// Closed model: a fixed amount of workers each run iterations back-to-back.
pub(super) async fn run<S>(
    guard: ShutdownGuard,
    cfg: ConstantWorkersConfig,
    probe: Arc<Probe<S>>,
    events: mpsc::Sender<IterationEvent>,
    graceful_stop: Duration,
) -> ExecutorReport
where
    S: Service<Request, Output = Response, Error: Into<BoxError>>,
{
    tracing::info!(
        workers = cfg.workers,
        duration = ?cfg.duration,
        pause = ?cfg.pause,
        "start constant-workers executor",
    );

    let deadline = Instant::now() + cfg.duration;
    let next_index = Arc::new(AtomicU64::new(0));
    let mut tasks = IterationTasks::new();

    for worker in 0..cfg.workers as usize {
        let probe = probe.clone();
        let events = events.clone();
        let next_index = next_index.clone();
        let cancelled = guard.clone_weak().into_cancelled();
        let interruptions = tasks.interruptions();
        let pause = cfg.pause;

        tasks.spawn(async move {
            let mut cancelled = std::pin::pin!(cancelled);
            while Instant::now() < deadline {
                let index = next_index.fetch_add(1, Ordering::Relaxed);

                let result = tokio::select! {
                    _ = cancelled.as_mut() => {
                        interruptions.record(worker, index);
                        return;
                    }
                    result = probe.execute() => result,
                };

                if let Err(err) = events
                    .send(IterationEvent::Finished {
                        index,
                        worker,
                        result,
                    })
                    .await
                {
                    tracing::debug!(worker, "failed to send iteration event: {err}");
                    return;
                }

                if !pause.is_zero() {
                    tokio::select! {
                        _ = cancelled.as_mut() => return,
                        _ = tokio::time::sleep(pause) => (),
                    }
                }
            }
            tracing::trace!(worker, "exit worker: duration expired");
        });
    }
    drop(events);

    tokio::select! {
        _ = guard.cancelled() => {
            tracing::info!("stop constant-workers executor early: guard shutdown");
        }
        _ = tokio::time::sleep_until(deadline) => {
            tracing::debug!("executor duration expired");
        }
    }

    let interrupted = tasks.drain(graceful_stop).await;

    let started = next_index.load(Ordering::Relaxed);
    tracing::info!(
        iterations.started = started,
        iterations.interrupted = interrupted,
        "constant-workers executor finished",
    );

    ExecutorReport {
        started,
        dropped: 0,
        interrupted,
        peak_workers: cfg.workers as usize,
    }
}

#[cfg(test)]
mod tests {
    use rama::{graceful::Shutdown, http::StatusCode};

    use super::*;
    use crate::{
        cmd::run::probe::{
            ProbeTarget,
            tests::{StaticStatus, default_checks},
        },
        config::ExecutorConfig,
    };

    async fn run_executor(
        cfg: ConstantWorkersConfig,
        latency: Duration,
        graceful_stop: Duration,
    ) -> (ExecutorReport, Vec<IterationEvent>) {
        run_executor_until(std::future::pending::<()>(), cfg, latency, graceful_stop).await
    }

    async fn run_executor_until(
        signal: impl Future<Output: Send + 'static> + Send + 'static,
        cfg: ConstantWorkersConfig,
        latency: Duration,
        graceful_stop: Duration,
    ) -> (ExecutorReport, Vec<IterationEvent>) {
        let shutdown = Shutdown::new(signal);
        let probe = Probe::new(
            StaticStatus {
                status: StatusCode::OK,
                latency,
            },
            ProbeTarget::Url("http://127.0.0.1:9001".parse().unwrap()),
            default_checks(),
            Duration::from_secs(60),
        );

        let (tx, mut rx) = mpsc::channel(16);
        let collector = tokio::spawn(async move {
            let mut events = Vec::new();
            while let Some(ev) = rx.recv().await {
                events.push(ev);
            }
            events
        });

        let report = super::super::run(
            shutdown.guard(),
            ExecutorConfig::ConstantWorkers(cfg),
            probe,
            tx,
            graceful_stop,
        )
        .await;
        (report, collector.await.unwrap())
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_workers_loop_until_duration() {
        let (report, events) = run_executor(
            ConstantWorkersConfig {
                workers: 3,
                duration: Duration::from_secs(1),
                pause: Duration::ZERO,
            },
            Duration::from_millis(100),
            Duration::from_secs(30),
        )
        .await;

        // 3 workers x 10 iterations of 100ms
        assert_eq!(report.started, 30);
        assert_eq!(report.dropped, 0);
        assert_eq!(report.interrupted, 0);
        assert_eq!(report.peak_workers, 3);
        assert_eq!(events.len(), 30);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_pause_between_iterations() {
        let (report, events) = run_executor(
            ConstantWorkersConfig {
                workers: 2,
                duration: Duration::from_secs(1),
                pause: Duration::from_millis(150),
            },
            Duration::from_millis(100),
            Duration::from_secs(30),
        )
        .await;

        // each worker starts at 0, 250, 500 and 750ms
        assert_eq!(report.started, 8);
        assert_eq!(events.len(), 8);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_slow_iterations_are_interrupted() {
        let (report, events) = run_executor(
            ConstantWorkersConfig {
                workers: 4,
                duration: Duration::from_secs(1),
                pause: Duration::ZERO,
            },
            Duration::from_secs(10),
            Duration::from_secs(2),
        )
        .await;

        assert_eq!(report.started, 4);
        assert_eq!(report.interrupted, 4);
        assert!(events.is_empty());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_shutdown_interrupts_in_flight_iterations() {
        let (report, events) = run_executor_until(
            tokio::time::sleep(Duration::from_millis(500)),
            ConstantWorkersConfig {
                workers: 3,
                duration: Duration::from_secs(60),
                pause: Duration::ZERO,
            },
            Duration::from_secs(5),
            Duration::from_secs(30),
        )
        .await;

        assert_eq!(report.started, 3);
        assert_eq!(report.interrupted, 3);
        assert_eq!(report.started, events.len() as u64 + report.interrupted);
    }
}
