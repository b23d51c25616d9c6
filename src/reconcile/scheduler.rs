//! Batch scheduler: runs the per-target pipeline sequentially or over a
//! bounded pool, and folds outcomes into the run summary.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::stream::{self, StreamExt};
use futures::FutureExt;

use crate::reconcile::model::{Classification, RunOutcome};
use crate::reconcile::reporter::ProgressReporter;
use crate::reconcile::summary::RunSummary;

/// Per-target pipeline for one reconciliation mode
pub trait Reconciler: Send + Sync {
    type Target: Send + Sync;

    /// Identifier and classification reported if the pipeline panics
    fn describe(&self, target: &Self::Target) -> (String, Classification);

    /// Reconcile one target. Must not return an error: every outcome,
    /// failures included, is expressed in the returned record.
    fn reconcile(&self, target: &Self::Target) -> impl Future<Output = RunOutcome> + Send;

    fn is_dry_run(&self) -> bool;
}

#[derive(Debug, Clone, Copy)]
pub struct BatchScheduler {
    concurrency: usize,
    batch_size: usize,
}

impl BatchScheduler {
    pub fn new(concurrency: usize, batch_size: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            batch_size: batch_size.max(1),
        }
    }

    pub fn sequential() -> Self {
        Self::new(1, 1)
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub async fn run<R: Reconciler>(
        &self,
        reconciler: &R,
        targets: &[R::Target],
        reporter: &mut ProgressReporter,
    ) -> RunSummary {
        let mut summary = RunSummary::new(reconciler.is_dry_run());

        if self.concurrency == 1 {
            for target in targets {
                let outcome = guarded(reconciler, target).await;
                summary.record(outcome);
                reporter.observe(&summary);
            }
        } else {
            let batches = targets.len().div_ceil(self.batch_size);
            for (index, batch) in targets.chunks(self.batch_size).enumerate() {
                let outcomes: Vec<RunOutcome> = stream::iter(batch)
                    .map(|target| guarded(reconciler, target))
                    .buffer_unordered(self.concurrency)
                    .collect()
                    .await;

                // Workers have rejoined; only this loop touches the counters
                let mut batch_summary = RunSummary::new(summary.simulated);
                for outcome in outcomes {
                    batch_summary.record(outcome);
                }
                summary.merge(batch_summary);

                tracing::info!(
                    batch = index + 1,
                    batches,
                    processed = summary.processed,
                    "Batch complete"
                );
                reporter.observe(&summary);
            }
        }

        reporter.finish(&mut summary);
        summary
    }
}

/// Run one target, turning a panic into an `Unexpected` outcome
async fn guarded<R: Reconciler>(reconciler: &R, target: &R::Target) -> RunOutcome {
    match AssertUnwindSafe(reconciler.reconcile(target))
        .catch_unwind()
        .await
    {
        Ok(outcome) => outcome,
        Err(payload) => {
            let (identifier, classification) = reconciler.describe(target);
            let message = panic_message(payload.as_ref());
            tracing::error!(target_id = %identifier, "Unexpected failure: {}", message);
            RunOutcome::unexpected(identifier, classification, message)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic while processing target".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::model::ActionTaken;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        panic_on: Option<usize>,
    }

    impl Counting {
        fn new(panic_on: Option<usize>) -> Self {
            Self {
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                panic_on,
            }
        }
    }

    impl Reconciler for Counting {
        type Target = usize;

        fn describe(&self, target: &usize) -> (String, Classification) {
            (format!("target-{}", target), Classification::Individual)
        }

        async fn reconcile(&self, target: &usize) -> RunOutcome {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.panic_on == Some(*target) {
                panic!("boom on {}", target);
            }
            let mut outcome = RunOutcome::new(format!("target-{}", target), Classification::Individual);
            outcome.actions.push(ActionTaken::RetentionAssigned);
            outcome
        }

        fn is_dry_run(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_sequential_processes_every_target() {
        let reconciler = Counting::new(None);
        let targets: Vec<usize> = (0..7).collect();
        let mut reporter = ProgressReporter::quiet(500);

        let summary = BatchScheduler::sequential()
            .run(&reconciler, &targets, &mut reporter)
            .await;

        assert_eq!(summary.processed, 7);
        assert_eq!(summary.retention_assigned, 7);
        assert_eq!(reconciler.peak.load(Ordering::SeqCst), 1);
        assert!(summary.simulated);
    }

    #[tokio::test]
    async fn test_parallel_bounds_in_flight_and_counts_every_target() {
        let reconciler = Counting::new(None);
        let targets: Vec<usize> = (0..250).collect();
        let mut reporter = ProgressReporter::quiet(100);

        let summary = BatchScheduler::new(4, 100)
            .run(&reconciler, &targets, &mut reporter)
            .await;

        assert_eq!(summary.processed, 250);
        assert_eq!(summary.succeeded, 250);
        assert!(reconciler.peak.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test]
    async fn test_panic_is_isolated_to_one_target() {
        let reconciler = Counting::new(Some(3));
        let targets: Vec<usize> = (0..10).collect();
        let mut reporter = ProgressReporter::quiet(500);

        let summary = BatchScheduler::new(3, 4)
            .run(&reconciler, &targets, &mut reporter)
            .await;

        assert_eq!(summary.processed, 10);
        assert_eq!(summary.succeeded, 9);
        assert_eq!(summary.failed_unexpected, 1);
        assert_eq!(summary.failures[0].identifier, "target-3");
        assert!(summary.failures[0].message.contains("boom on 3"));
    }
}
