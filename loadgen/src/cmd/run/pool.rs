use std::{sync::Arc, time::Duration};

use rama::{
    Service,
    error::BoxError,
    graceful::ShutdownGuard,
    http::{Request, Response},
    telemetry::tracing,
};
use tokio::sync::mpsc;

use super::{probe::Probe, reporter::IterationEvent, tasks::IterationTasks};

#[derive(Debug)]
pub(super) struct Job {
    pub(super) index: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Dispatch {
    Started { worker: usize },
    Dropped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(super) struct PoolReport {
    pub(super) peak_workers: usize,
    pub(super) interrupted: u64,
}

/// Bounded, growable set of workers.
///
/// Every worker owns a single-slot job channel and puts its id
/// on the shared idle queue whenever it is ready for a new job.
/// Dispatching never waits: it either hands the job to an idle worker,
/// allocates a new worker (while below the maximum) or drops the job.
pub(super) struct WorkerPool<S> {
    probe: Arc<Probe<S>>,
    guard: ShutdownGuard,
    events: mpsc::Sender<IterationEvent>,
    idle_tx: mpsc::UnboundedSender<usize>,
    idle_rx: mpsc::UnboundedReceiver<usize>,
    workers: Vec<mpsc::Sender<Job>>,
    max_workers: usize,
    tasks: IterationTasks,
}

impl<S> WorkerPool<S>
where
    S: Service<Request, Output = Response, Error: Into<BoxError>>,
{
    pub(super) fn new(
        probe: Arc<Probe<S>>,
        guard: ShutdownGuard,
        events: mpsc::Sender<IterationEvent>,
        pre_allocated_workers: usize,
        max_workers: usize,
    ) -> Self {
        let (idle_tx, idle_rx) = mpsc::unbounded_channel();
        let max_workers = max_workers.max(1);

        let mut pool = Self {
            probe,
            guard,
            events,
            idle_tx,
            idle_rx,
            workers: Vec::with_capacity(max_workers),
            max_workers,
            tasks: IterationTasks::new(),
        };

        for _ in 0..pre_allocated_workers.min(max_workers) {
            let id = pool.spawn_worker();
            if pool.idle_tx.send(id).is_err() {
                tracing::debug!(worker = id, "idle queue closed before worker start");
            }
        }
        tracing::debug!(
            workers.pre_allocated = pool.workers.len(),
            workers.max = max_workers,
            "worker pool ready"
        );

        pool
    }

    /// Amount of workers allocated so far.
    pub(super) fn allocated(&self) -> usize {
        self.workers.len()
    }

    pub(super) fn try_dispatch(&mut self, job: Job) -> Dispatch {
        let worker = match self.idle_rx.try_recv() {
            Ok(id) => id,
            Err(_) if self.workers.len() < self.max_workers => {
                let id = self.spawn_worker();
                tracing::trace!(worker = id, "allocated extra worker");
                id
            }
            Err(_) => return Dispatch::Dropped,
        };

        match self.workers[worker].try_send(job) {
            Ok(()) => Dispatch::Started { worker },
            Err(err) => {
                tracing::debug!(worker, "worker unavailable, drop job: {err}");
                Dispatch::Dropped
            }
        }
    }

    /// Spawn a worker which is busy until it receives its first job.
    fn spawn_worker(&mut self) -> usize {
        let id = self.workers.len();
        let (job_tx, mut job_rx) = mpsc::channel::<Job>(1);
        self.workers.push(job_tx);

        let probe = self.probe.clone();
        let events = self.events.clone();
        let idle_tx = self.idle_tx.clone();
        let cancelled = self.guard.clone_weak().into_cancelled();
        let interruptions = self.tasks.interruptions();

        self.tasks.spawn(async move {
            let mut cancelled = std::pin::pin!(cancelled);
            loop {
                let job = tokio::select! {
                    _ = cancelled.as_mut() => {
                        if let Ok(job) = job_rx.try_recv() {
                            interruptions.record(id, job.index);
                        }
                        tracing::debug!(worker = id, "exit worker: guard shutdown");
                        return;
                    }
                    maybe_job = job_rx.recv() => {
                        let Some(job) = maybe_job else {
                            tracing::trace!(worker = id, "exit worker: pool closed");
                            return;
                        };
                        job
                    }
                };

                let result = tokio::select! {
                    _ = cancelled.as_mut() => {
                        interruptions.record(id, job.index);
                        return;
                    }
                    result = probe.execute() => result,
                };

                if let Err(err) = events
                    .send(IterationEvent::Finished {
                        index: job.index,
                        worker: id,
                        result,
                    })
                    .await
                {
                    tracing::debug!(worker = id, "failed to send iteration event: {err}");
                    return;
                }

                if idle_tx.send(id).is_err() {
                    return;
                }
            }
        });

        id
    }

    /// Stop accepting jobs and wait up to `graceful_stop` for in-flight iterations.
    /// Whatever is still running afterwards is aborted. Both those and
    /// the iterations aborted on shutdown are counted as interrupted.
    pub(super) async fn close(self, graceful_stop: Duration) -> PoolReport {
        let Self { workers, tasks, .. } = self;
        let peak_workers = workers.len();
        drop(workers);

        PoolReport {
            peak_workers,
            interrupted: tasks.drain(graceful_stop).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use rama::{graceful::Shutdown, http::StatusCode};
    use tokio::task::yield_now;

    use super::*;
    use crate::cmd::run::probe::{
        ProbeTarget,
        tests::{StaticStatus, default_checks},
    };

    fn probe(latency: Duration) -> Arc<Probe<StaticStatus>> {
        Arc::new(Probe::new(
            StaticStatus {
                status: StatusCode::OK,
                latency,
            },
            ProbeTarget::Url("http://127.0.0.1:9001".parse().unwrap()),
            default_checks(),
            Duration::from_secs(60),
        ))
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_dispatch_reuses_idle_then_grows_then_drops() {
        let shutdown = Shutdown::new(std::future::pending::<()>());
        let (tx, mut rx) = mpsc::channel(16);
        let mut pool = WorkerPool::new(probe(Duration::from_secs(1)), shutdown.guard(), tx, 1, 2);
        assert_eq!(pool.allocated(), 1);

        assert_eq!(pool.try_dispatch(Job { index: 0 }), Dispatch::Started { worker: 0 });
        assert_eq!(pool.try_dispatch(Job { index: 1 }), Dispatch::Started { worker: 1 });
        assert_eq!(pool.allocated(), 2);
        assert_eq!(pool.try_dispatch(Job { index: 2 }), Dispatch::Dropped);

        let mut indices = vec![rx.recv().await.unwrap().index(), rx.recv().await.unwrap().index()];
        indices.sort();
        assert_eq!(indices, [0, 1]);

        // let the workers announce themselves as idle again
        yield_now().await;
        yield_now().await;
        assert!(matches!(
            pool.try_dispatch(Job { index: 3 }),
            Dispatch::Started { .. }
        ));
        assert_eq!(pool.allocated(), 2);

        let report = pool.close(Duration::from_secs(5)).await;
        assert_eq!(
            report,
            PoolReport {
                peak_workers: 2,
                interrupted: 0,
            }
        );
        assert_eq!(rx.recv().await.unwrap().index(), 3);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_close_interrupts_slow_iterations() {
        let shutdown = Shutdown::new(std::future::pending::<()>());
        let (tx, mut rx) = mpsc::channel(16);
        let mut pool = WorkerPool::new(probe(Duration::from_secs(30)), shutdown.guard(), tx, 2, 2);

        assert!(matches!(pool.try_dispatch(Job { index: 0 }), Dispatch::Started { .. }));
        assert!(matches!(pool.try_dispatch(Job { index: 1 }), Dispatch::Started { .. }));

        let report = pool.close(Duration::from_secs(1)).await;
        assert_eq!(
            report,
            PoolReport {
                peak_workers: 2,
                interrupted: 2,
            }
        );

        // aborted workers never report
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_shutdown_interrupts_busy_workers() {
        let shutdown = Shutdown::new(tokio::time::sleep(Duration::from_millis(500)));
        let (tx, mut rx) = mpsc::channel(16);
        let mut pool = WorkerPool::new(probe(Duration::from_secs(5)), shutdown.guard(), tx, 3, 3);

        assert!(matches!(pool.try_dispatch(Job { index: 0 }), Dispatch::Started { .. }));
        assert!(matches!(pool.try_dispatch(Job { index: 1 }), Dispatch::Started { .. }));

        tokio::time::sleep(Duration::from_secs(1)).await;

        // one busy worker per job, the idle one exits without an iteration
        let report = pool.close(Duration::from_secs(30)).await;
        assert_eq!(
            report,
            PoolReport {
                peak_workers: 3,
                interrupted: 2,
            }
        );
        assert!(rx.recv().await.is_none());
    }
}
