//! Run-level counters

use std::time::Duration;

use crate::reconcile::model::{ActionTaken, FailureKind, RunOutcome};

/// A target that ended the run with at least one failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedTarget {
    pub identifier: String,
    pub kind: FailureKind,
    pub operation: String,
    pub message: String,
}

/// Aggregated outcome of a run.
///
/// Only the scheduler folds outcomes into it, after workers have rejoined.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub simulated: bool,
    pub processed: usize,
    pub skipped_ineligible: usize,
    pub skipped_exempt: usize,
    pub succeeded: usize,
    pub already_satisfied: usize,
    pub failed_permanent: usize,
    pub failed_transient: usize,
    pub failed_unexpected: usize,

    pub retention_assigned: usize,
    pub archive_enabled: usize,
    pub permissions_added: usize,
    pub permissions_removed: usize,

    pub failures: Vec<FailedTarget>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn new(simulated: bool) -> Self {
        Self {
            simulated,
            ..Default::default()
        }
    }

    pub fn record(&mut self, outcome: RunOutcome) {
        self.processed += 1;

        if outcome.ineligible.is_some() {
            self.skipped_ineligible += 1;
            return;
        }

        for action in &outcome.actions {
            match action {
                ActionTaken::RetentionAssigned => self.retention_assigned += 1,
                ActionTaken::ArchiveEnabled => self.archive_enabled += 1,
                ActionTaken::ArchiveSkippedExempt => self.skipped_exempt += 1,
                ActionTaken::PermissionAdded(_) => self.permissions_added += 1,
                ActionTaken::PermissionRemoved(_) => self.permissions_removed += 1,
                ActionTaken::RetentionAlreadySet
                | ActionTaken::ArchiveAlreadyEnabled
                | ActionTaken::ArchiveSkippedAfterFailure
                | ActionTaken::InSync => {}
            }
        }

        if let Some(worst) = outcome.worst_failure() {
            match worst.kind {
                FailureKind::Permanent => self.failed_permanent += 1,
                FailureKind::TransientExhausted => self.failed_transient += 1,
                FailureKind::Unexpected => self.failed_unexpected += 1,
            }
            self.failures.push(FailedTarget {
                identifier: outcome.identifier.clone(),
                kind: worst.kind,
                operation: worst.operation.clone(),
                message: worst.message.clone(),
            });
        } else if outcome.changed() {
            self.succeeded += 1;
        } else {
            self.already_satisfied += 1;
        }
    }

    /// Fold another summary into this one
    pub fn merge(&mut self, other: RunSummary) {
        self.processed += other.processed;
        self.skipped_ineligible += other.skipped_ineligible;
        self.skipped_exempt += other.skipped_exempt;
        self.succeeded += other.succeeded;
        self.already_satisfied += other.already_satisfied;
        self.failed_permanent += other.failed_permanent;
        self.failed_transient += other.failed_transient;
        self.failed_unexpected += other.failed_unexpected;
        self.retention_assigned += other.retention_assigned;
        self.archive_enabled += other.archive_enabled;
        self.permissions_added += other.permissions_added;
        self.permissions_removed += other.permissions_removed;
        self.failures.extend(other.failures);
    }

    pub fn failed(&self) -> usize {
        self.failed_permanent + self.failed_transient + self.failed_unexpected
    }

    /// Whether the run should exit non-zero
    pub fn has_permanent_failures(&self) -> bool {
        self.failed_permanent > 0 || self.failed_unexpected > 0
    }

    /// Objects per second over the whole run
    pub fn overall_rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.processed as f64 / secs
        } else {
            0.0
        }
    }
}
