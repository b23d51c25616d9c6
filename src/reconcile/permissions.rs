//! Permission mode: keep FullAccess grants on each shared mailbox equal to the
//! membership of its permission group.

use std::collections::HashSet;

use crate::reconcile::differ::diff;
use crate::reconcile::executor::{MutationExecutor, MutationResult};
use crate::reconcile::model::{
    normalize, ActionTaken, Classification, Failure, MailboxResolution, PermissionTarget, RunOutcome,
};
use crate::reconcile::reference::ReferenceData;
use crate::reconcile::scheduler::Reconciler;
use crate::reconcile::traits::{DirectorySource, Mutation, MutationTarget};

pub struct PermissionReconciler<'a, D, M> {
    source: &'a D,
    reference: &'a ReferenceData,
    executor: MutationExecutor<'a, M>,
    auto_mapping: bool,
}

impl<'a, D: DirectorySource, M: MutationTarget> PermissionReconciler<'a, D, M> {
    pub fn new(source: &'a D, reference: &'a ReferenceData, executor: MutationExecutor<'a, M>) -> Self {
        Self {
            source,
            reference,
            executor,
            auto_mapping: true,
        }
    }

    pub fn auto_mapping(mut self, enabled: bool) -> Self {
        self.auto_mapping = enabled;
        self
    }

    async fn current_grants(&self, mailbox: &str) -> Result<HashSet<String>, Failure> {
        match self.source.mailbox_permissions(mailbox).await {
            Ok(entries) => Ok(entries
                .iter()
                .filter(|e| e.is_managed_grant())
                .map(|e| normalize(&e.principal))
                .collect()),
            Err(e) => Err(Failure {
                operation: "read mailbox permissions".into(),
                kind: self.executor.classifier().failure_kind(&e),
                attempts: 1,
                message: e.to_string(),
            }),
        }
    }

    async fn sync(&self, mailbox: &str, group_id: &str) -> RunOutcome {
        let mut outcome = RunOutcome::new(mailbox, Classification::Shared);

        let actual = match self.current_grants(mailbox).await {
            Ok(actual) => actual,
            Err(failure) => {
                outcome.failures.push(failure);
                return outcome;
            }
        };
        let desired = self.reference.members_of(group_id);
        let changes = diff(&desired, &actual);

        if changes.is_in_sync() {
            tracing::debug!(mailbox, members = desired.len(), "Permissions in sync");
            outcome.actions.push(ActionTaken::InSync);
            return outcome;
        }

        for principal in changes.to_add {
            let mutation = Mutation::GrantPermission {
                mailbox: mailbox.to_string(),
                principal: principal.clone(),
                auto_mapping: self.auto_mapping,
            };
            self.record(&mut outcome, &mutation, ActionTaken::PermissionAdded(principal))
                .await;
        }

        for principal in changes.to_remove {
            let mutation = Mutation::RevokePermission {
                mailbox: mailbox.to_string(),
                principal: principal.clone(),
            };
            self.record(&mut outcome, &mutation, ActionTaken::PermissionRemoved(principal))
                .await;
        }

        outcome
    }

    async fn record(&self, outcome: &mut RunOutcome, mutation: &Mutation, on_success: ActionTaken) {
        match self.executor.execute(mutation).await {
            MutationResult::Applied { .. } | MutationResult::Simulated => outcome.actions.push(on_success),
            MutationResult::Failed {
                kind,
                attempts,
                message,
            } => outcome.failures.push(Failure {
                operation: mutation.to_string(),
                kind,
                attempts,
                message,
            }),
        }
    }
}

impl<D: DirectorySource, M: MutationTarget> Reconciler for PermissionReconciler<'_, D, M> {
    type Target = PermissionTarget;

    fn describe(&self, target: &PermissionTarget) -> (String, Classification) {
        (target.identifier(), Classification::Shared)
    }

    fn is_dry_run(&self) -> bool {
        self.executor.is_dry_run()
    }

    async fn reconcile(&self, target: &PermissionTarget) -> RunOutcome {
        match &target.mailbox {
            MailboxResolution::Resolved(mailbox) => self.sync(mailbox, &target.group_id).await,
            MailboxResolution::NoMatchingMailbox(identity) => RunOutcome::ineligible(
                &target.group_name,
                Classification::Shared,
                format!("no matching shared mailbox for '{}'", identity),
            ),
            MailboxResolution::Ambiguous(identity) => RunOutcome::ineligible(
                &target.group_name,
                Classification::Shared,
                format!("'{}' matches more than one shared mailbox", identity),
            ),
            MailboxResolution::MalformedName => RunOutcome::ineligible(
                &target.group_name,
                Classification::Shared,
                "group name does not name a mailbox",
            ),
        }
    }
}
