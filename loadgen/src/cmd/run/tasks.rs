use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use rama::telemetry::tracing;
use tokio::task::JoinSet;

/// Tally of iterations a worker gave up on because of a shutdown.
#[derive(Debug, Clone, Default)]
pub(super) struct Interruptions(Arc<AtomicU64>);

impl Interruptions {
    pub(super) fn record(&self, worker: usize, index: u64) {
        tracing::debug!(worker, "abort iteration {index}: guard shutdown");
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    fn count(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Worker tasks of an executor.
#[derive(Debug, Default)]
pub(super) struct IterationTasks {
    tasks: JoinSet<()>,
    interruptions: Interruptions,
}

impl IterationTasks {
    pub(super) fn new() -> Self {
        Self::default()
    }

    /// Handle for workers to record an iteration aborted on shutdown.
    pub(super) fn interruptions(&self) -> Interruptions {
        self.interruptions.clone()
    }

    pub(super) fn spawn<F>(&mut self, worker: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(worker);
    }

    /// Wait up to `graceful_stop` for all workers to exit and return
    /// the amount of interrupted iterations: those the workers aborted
    /// on shutdown plus those still running once the limit expired.
    ///
    /// Workers must not be handed new iterations anymore.
    pub(super) async fn drain(mut self, graceful_stop: Duration) -> u64 {
        let tasks = &mut self.tasks;
        let drained = tokio::time::timeout(graceful_stop, async {
            while tasks.join_next().await.is_some() {}
        })
        .await
        .is_ok();

        let timed_out = if drained {
            0
        } else {
            let remaining = self.tasks.len() as u64;
            tracing::info!(
                "graceful stop of {graceful_stop:?} expired: interrupt {remaining} iteration(s)"
            );
            self.tasks.shutdown().await;
            remaining
        };

        self.interruptions.count() + timed_out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_drain_counts_aborted_and_expired_workers() {
        let mut tasks = IterationTasks::new();

        let interruptions = tasks.interruptions();
        tasks.spawn(async move { interruptions.record(0, 7) });
        tasks.spawn(tokio::time::sleep(Duration::from_millis(10)));
        tasks.spawn(tokio::time::sleep(Duration::from_secs(60)));
        tasks.spawn(tokio::time::sleep(Duration::from_secs(60)));

        assert_eq!(tasks.drain(Duration::from_secs(1)).await, 3);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_drain_of_finished_workers() {
        let mut tasks = IterationTasks::new();
        tasks.spawn(tokio::time::sleep(Duration::from_millis(10)));

        assert_eq!(tasks.drain(Duration::from_secs(1)).await, 0);
    }
}
