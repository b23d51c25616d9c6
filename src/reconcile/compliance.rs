//! Compliance mode: retention policy assignment then archive enablement.

use crate::reconcile::eligibility::{EligibilityEvaluator, EligibilityVerdict, IneligibleReason};
use crate::reconcile::executor::{MutationExecutor, MutationResult};
use crate::reconcile::model::{ActionTaken, Classification, Failure, MailboxTarget, RunOutcome};
use crate::reconcile::reference::ReferenceData;
use crate::reconcile::scheduler::Reconciler;
use crate::reconcile::traits::{Mutation, MutationTarget};

pub struct ComplianceReconciler<'a, M> {
    reference: &'a ReferenceData,
    evaluator: EligibilityEvaluator,
    executor: MutationExecutor<'a, M>,
    archive_requires_retention: bool,
}

impl<'a, M: MutationTarget> ComplianceReconciler<'a, M> {
    pub fn new(
        reference: &'a ReferenceData,
        evaluator: EligibilityEvaluator,
        executor: MutationExecutor<'a, M>,
    ) -> Self {
        Self {
            reference,
            evaluator,
            executor,
            archive_requires_retention: true,
        }
    }

    /// Skip archive enablement on a target whose retention assignment failed
    pub fn archive_requires_retention(mut self, required: bool) -> Self {
        self.archive_requires_retention = required;
        self
    }

    /// Run one mutation, recording the action on success or the failure otherwise.
    /// Returns whether the mutation went through (or was simulated).
    async fn run_mutation(
        &self,
        outcome: &mut RunOutcome,
        mutation: Mutation,
        operation: &str,
        on_success: ActionTaken,
    ) -> bool {
        match self.executor.execute(&mutation).await {
            MutationResult::Applied { .. } | MutationResult::Simulated => {
                outcome.actions.push(on_success);
                true
            }
            MutationResult::Failed {
                kind,
                attempts,
                message,
            } => {
                outcome.failures.push(Failure {
                    operation: operation.to_string(),
                    kind,
                    attempts,
                    message,
                });
                false
            }
        }
    }
}

impl<M: MutationTarget> Reconciler for ComplianceReconciler<'_, M> {
    type Target = MailboxTarget;

    fn describe(&self, target: &MailboxTarget) -> (String, Classification) {
        (target.identifier.clone(), target.classification)
    }

    fn is_dry_run(&self) -> bool {
        self.executor.is_dry_run()
    }

    async fn reconcile(&self, target: &MailboxTarget) -> RunOutcome {
        let plan = self.evaluator.evaluate(target, self.reference);

        if let Some(reason) = plan.ineligible_reason() {
            tracing::debug!(mailbox = %target.identifier, %reason, "Skipping ineligible mailbox");
            return RunOutcome::ineligible(&target.identifier, target.classification, reason.to_string());
        }

        let mut outcome = RunOutcome::new(&target.identifier, target.classification);

        let retention_ok = match plan.retention {
            EligibilityVerdict::AlreadySatisfied => {
                outcome.actions.push(ActionTaken::RetentionAlreadySet);
                true
            }
            EligibilityVerdict::Eligible => {
                let mutation = Mutation::AssignPolicy {
                    mailbox: target.identifier.clone(),
                    policy: self.evaluator.policy_name().to_string(),
                };
                self.run_mutation(&mut outcome, mutation, "assign retention policy", ActionTaken::RetentionAssigned)
                    .await
            }
            EligibilityVerdict::Ineligible(_) => false,
        };

        match plan.archive {
            EligibilityVerdict::Ineligible(IneligibleReason::Exempt) => {
                outcome.actions.push(ActionTaken::ArchiveSkippedExempt);
            }
            EligibilityVerdict::Ineligible(_) => {}
            EligibilityVerdict::AlreadySatisfied => {
                outcome.actions.push(ActionTaken::ArchiveAlreadyEnabled);
            }
            EligibilityVerdict::Eligible if !retention_ok && self.archive_requires_retention => {
                outcome.actions.push(ActionTaken::ArchiveSkippedAfterFailure);
            }
            EligibilityVerdict::Eligible => {
                let mutation = Mutation::EnableArchive {
                    mailbox: target.identifier.clone(),
                };
                self.run_mutation(&mut outcome, mutation, "enable archive", ActionTaken::ArchiveEnabled)
                    .await;
            }
        }

        outcome
    }
}
