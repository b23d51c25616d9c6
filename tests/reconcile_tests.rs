//! End-to-end engine scenarios against an in-memory tenant

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use m365sync::config::ReconcileSettings;
use m365sync::error::{Result, SyncError};
use m365sync::graph::Page;
use m365sync::reconcile::differ::plan_permission_targets;
use m365sync::reconcile::model::{Classification, MailboxTarget, PermissionEntry};
use m365sync::reconcile::traits::{
    DirectorySource, GroupRef, LicenseAssignment, Mutation, MutationTarget, SkuInfo,
};
use m365sync::reconcile::{
    BatchScheduler, ComplianceReconciler, EligibilityEvaluator, LicenseRules, MutationExecutor,
    PermissionReconciler, ProgressReporter, ReferenceData, RunSummary,
};

const E3_SKU: &str = "05e9a617-0261-4cee-bb44-138d3ef5d965";
const ARCHIVE_GUID: &str = "6d1c1b5e-0000-4000-8000-000000000001";

/// Tenant held in memory. Applied mutations change its state so a second
/// run observes the first one.
#[derive(Default)]
struct FakeTenant {
    license_pages: Vec<Vec<LicenseAssignment>>,
    groups: Vec<GroupRef>,
    members: HashMap<String, Vec<String>>,
    mailboxes: Mutex<Vec<MailboxTarget>>,
    permissions: Mutex<HashMap<String, Vec<PermissionEntry>>>,
    /// Mailbox -> error every apply against it returns
    failing: HashMap<String, (u16, String)>,
    panic_on: Option<String>,

    applied: Mutex<Vec<Mutation>>,
    apply_calls: AtomicUsize,
    verify_calls: AtomicUsize,
    license_page_calls: AtomicUsize,
}

impl FakeTenant {
    fn with_mailbox(self, mailbox: MailboxTarget) -> Self {
        self.mailboxes.lock().unwrap().push(mailbox);
        self
    }

    fn licensed(mut self, principal: &str) -> Self {
        let assignment = LicenseAssignment {
            principal: principal.into(),
            sku_ids: vec![E3_SKU.into()],
        };
        match self.license_pages.last_mut() {
            Some(page) => page.push(assignment),
            None => self.license_pages.push(vec![assignment]),
        }
        self
    }

    fn with_group(mut self, id: &str, name: &str, members: &[&str]) -> Self {
        self.groups.push(GroupRef {
            id: id.into(),
            display_name: name.into(),
        });
        self.members
            .insert(id.into(), members.iter().map(|m| m.to_string()).collect());
        self
    }

    fn with_exempt(self, members: &[&str]) -> Self {
        self.with_group("exempt-id", "Archive-Exempt", members)
    }

    fn applied(&self) -> Vec<Mutation> {
        self.applied.lock().unwrap().clone()
    }
}

impl DirectorySource for FakeTenant {
    async fn subscribed_skus(&self) -> Result<Vec<SkuInfo>> {
        Ok(vec![SkuInfo {
            sku_id: E3_SKU.into(),
            part_number: "SPE_E3".into(),
        }])
    }

    async fn license_page(&self, next: Option<String>) -> Result<Page<LicenseAssignment>> {
        self.license_page_calls.fetch_add(1, Ordering::SeqCst);
        let index = match next {
            None => 0,
            Some(token) => token
                .trim_start_matches("page-")
                .parse::<usize>()
                .map_err(|_| SyncError::FetchError(format!("bad token {}", token)))?,
        };
        let items = self.license_pages.get(index).cloned().unwrap_or_default();
        let next = (index + 1 < self.license_pages.len()).then(|| format!("page-{}", index + 1));
        Ok(Page { items, next })
    }

    async fn find_group(&self, display_name: &str) -> Result<Option<GroupRef>> {
        Ok(self
            .groups
            .iter()
            .find(|g| g.display_name.eq_ignore_ascii_case(display_name))
            .cloned())
    }

    async fn groups_with_prefix(&self, prefix: &str) -> Result<Vec<GroupRef>> {
        Ok(self
            .groups
            .iter()
            .filter(|g| g.display_name.to_lowercase().starts_with(&prefix.to_lowercase()))
            .cloned()
            .collect())
    }

    async fn group_members(&self, group_id: &str) -> Result<Vec<String>> {
        Ok(self.members.get(group_id).cloned().unwrap_or_default())
    }

    async fn mailboxes(&self) -> Result<Vec<MailboxTarget>> {
        Ok(self.mailboxes.lock().unwrap().clone())
    }

    async fn shared_mailboxes(&self) -> Result<Vec<MailboxTarget>> {
        Ok(self
            .mailboxes
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.classification == Classification::Shared)
            .cloned()
            .collect())
    }

    async fn mailbox_permissions(&self, mailbox: &str) -> Result<Vec<PermissionEntry>> {
        Ok(self
            .permissions
            .lock()
            .unwrap()
            .get(mailbox)
            .cloned()
            .unwrap_or_default())
    }
}

impl MutationTarget for FakeTenant {
    async fn apply(&self, mutation: &Mutation) -> Result<()> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);

        if self.panic_on.as_deref() == Some(mutation.mailbox()) {
            panic!("unexpected response for {}", mutation.mailbox());
        }
        if let Some((status, message)) = self.failing.get(mutation.mailbox()) {
            return Err(SyncError::RemoteError {
                status: *status,
                message: message.clone(),
            });
        }

        match mutation {
            Mutation::AssignPolicy { mailbox, policy } => {
                let mut mailboxes = self.mailboxes.lock().unwrap();
                if let Some(m) = mailboxes.iter_mut().find(|m| &m.identifier == mailbox) {
                    m.retention_policy = Some(policy.clone());
                }
            }
            Mutation::EnableArchive { mailbox } => {
                let mut mailboxes = self.mailboxes.lock().unwrap();
                if let Some(m) = mailboxes.iter_mut().find(|m| &m.identifier == mailbox) {
                    m.archive_guid = Some(ARCHIVE_GUID.into());
                }
            }
            Mutation::GrantPermission {
                mailbox, principal, ..
            } => {
                self.permissions
                    .lock()
                    .unwrap()
                    .entry(mailbox.clone())
                    .or_default()
                    .push(PermissionEntry::full_access(principal.clone()));
            }
            Mutation::RevokePermission { mailbox, principal } => {
                if let Some(entries) = self.permissions.lock().unwrap().get_mut(mailbox) {
                    entries.retain(|e| !e.principal.eq_ignore_ascii_case(principal));
                }
            }
        }

        self.applied.lock().unwrap().push(mutation.clone());
        Ok(())
    }

    async fn verify(&self, _mutation: &Mutation) -> Result<()> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn settings() -> ReconcileSettings {
    ReconcileSettings {
        retry_backoff_secs: 0,
        ..Default::default()
    }
}

async fn run_compliance(tenant: &FakeTenant, dry_run: bool, scheduler: BatchScheduler) -> RunSummary {
    let settings = settings();
    let reference = ReferenceData::load_compliance(tenant, &settings.exempt_group)
        .await
        .unwrap();
    let targets = tenant.mailboxes().await.unwrap();

    let evaluator = EligibilityEvaluator::new(LicenseRules::from_settings(&settings), "Default");
    let executor = MutationExecutor::from_settings(tenant, &settings, dry_run);
    let reconciler = ComplianceReconciler::new(&reference, evaluator, executor);

    let mut reporter = ProgressReporter::quiet(settings.progress_interval);
    scheduler.run(&reconciler, &targets, &mut reporter).await
}

async fn run_permissions(tenant: &FakeTenant, dry_run: bool) -> RunSummary {
    let settings = settings();
    let groups = tenant.groups_with_prefix(&settings.group_prefix).await.unwrap();
    let reference = ReferenceData::load_permissions(tenant, &groups).await.unwrap();
    let shared = tenant.shared_mailboxes().await.unwrap();
    let targets = plan_permission_targets(&groups, &shared, &settings.group_prefix);

    let executor = MutationExecutor::from_settings(tenant, &settings, dry_run);
    let reconciler = PermissionReconciler::new(tenant, &reference, executor);

    let mut reporter = ProgressReporter::quiet(settings.progress_interval);
    BatchScheduler::sequential()
        .run(&reconciler, &targets, &mut reporter)
        .await
}

fn three_mailbox_tenant() -> FakeTenant {
    FakeTenant::default()
        .with_mailbox(MailboxTarget::new("ann@contoso.com", Classification::Individual))
        .with_mailbox(MailboxTarget::new("sales@contoso.com", Classification::Shared))
        .with_mailbox(MailboxTarget::new("bob@contoso.com", Classification::Individual))
        .licensed("sales@contoso.com")
        .licensed("bob@contoso.com")
        .with_exempt(&["sales@contoso.com"])
}

#[tokio::test]
async fn test_three_mailbox_dry_run_scenario() {
    let tenant = three_mailbox_tenant();

    let summary = run_compliance(&tenant, true, BatchScheduler::sequential()).await;

    assert!(summary.simulated);
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.skipped_ineligible, 1);
    assert_eq!(summary.retention_assigned, 2);
    assert_eq!(summary.archive_enabled, 1);
    assert_eq!(summary.skipped_exempt, 1);
    assert!(!summary.has_permanent_failures());

    assert_eq!(tenant.apply_calls.load(Ordering::SeqCst), 0);
    assert_eq!(tenant.verify_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_ineligible_and_exempt_mutations() {
    let tenant = three_mailbox_tenant();

    run_compliance(&tenant, false, BatchScheduler::sequential()).await;

    let applied = tenant.applied();
    assert!(applied.iter().all(|m| m.mailbox() != "ann@contoso.com"));
    assert!(applied.contains(&Mutation::AssignPolicy {
        mailbox: "sales@contoso.com".into(),
        policy: "Default".into(),
    }));
    assert!(!applied.contains(&Mutation::EnableArchive {
        mailbox: "sales@contoso.com".into(),
    }));
    assert!(applied.contains(&Mutation::EnableArchive {
        mailbox: "bob@contoso.com".into(),
    }));
}

#[tokio::test]
async fn test_second_run_is_a_no_op() {
    let tenant = three_mailbox_tenant();

    let first = run_compliance(&tenant, false, BatchScheduler::sequential()).await;
    assert_eq!(first.succeeded, 2);
    let calls_after_first = tenant.apply_calls.load(Ordering::SeqCst);

    let second = run_compliance(&tenant, false, BatchScheduler::sequential()).await;

    assert_eq!(second.already_satisfied, first.succeeded);
    assert_eq!(second.succeeded, 0);
    assert_eq!(tenant.apply_calls.load(Ordering::SeqCst), calls_after_first);
}

#[tokio::test]
async fn test_unlicensed_shared_mailbox_is_reconciled() {
    let tenant = FakeTenant::default()
        .with_mailbox(MailboxTarget::new("room1@contoso.com", Classification::Shared))
        .with_exempt(&[]);

    let summary = run_compliance(&tenant, false, BatchScheduler::sequential()).await;

    assert_eq!(summary.skipped_ineligible, 0);
    assert_eq!(summary.retention_assigned, 1);
    assert_eq!(summary.archive_enabled, 1);
}

#[tokio::test]
async fn test_transient_failures_retried_and_not_fatal() {
    let mut tenant = FakeTenant::default()
        .with_mailbox(MailboxTarget::new("bob@contoso.com", Classification::Individual))
        .licensed("bob@contoso.com")
        .with_exempt(&[]);
    tenant.failing.insert(
        "bob@contoso.com".into(),
        (400, "A server side error has occurred. Please try again after some time".into()),
    );

    let summary = run_compliance(&tenant, false, BatchScheduler::sequential()).await;

    // Retention attempted three times, archive skipped after the failure
    assert_eq!(tenant.apply_calls.load(Ordering::SeqCst), 3);
    assert_eq!(summary.failed_transient, 1);
    assert_eq!(summary.failures[0].identifier, "bob@contoso.com");
    assert!(!summary.has_permanent_failures());
}

#[tokio::test]
async fn test_permanent_failure_attempted_once_and_fails_run() {
    let mut tenant = FakeTenant::default()
        .with_mailbox(MailboxTarget::new("bob@contoso.com", Classification::Individual))
        .licensed("bob@contoso.com")
        .with_exempt(&[]);
    tenant
        .failing
        .insert("bob@contoso.com".into(), (400, "Retention policy 'Default' not found".into()));

    let summary = run_compliance(&tenant, false, BatchScheduler::sequential()).await;

    assert_eq!(tenant.apply_calls.load(Ordering::SeqCst), 1);
    assert_eq!(summary.failed_permanent, 1);
    assert!(summary.has_permanent_failures());
}

#[tokio::test]
async fn test_panic_isolated_in_parallel_run() {
    let mut tenant = FakeTenant::default().with_exempt(&[]);
    for i in 0..5 {
        let upn = format!("user{}@contoso.com", i);
        tenant = tenant
            .with_mailbox(MailboxTarget::new(upn.clone(), Classification::Individual))
            .licensed(&upn);
    }
    tenant.panic_on = Some("user2@contoso.com".into());

    let summary = run_compliance(&tenant, false, BatchScheduler::new(3, 2)).await;

    assert_eq!(summary.processed, 5);
    assert_eq!(summary.succeeded, 4);
    assert_eq!(summary.failed_unexpected, 1);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].identifier, "user2@contoso.com");
}

#[tokio::test]
async fn test_parallel_run_produces_one_outcome_per_target() {
    let mut tenant = FakeTenant::default().with_exempt(&[]);
    for i in 0..250 {
        let upn = format!("user{}@contoso.com", i);
        tenant = tenant
            .with_mailbox(MailboxTarget::new(upn.clone(), Classification::Individual))
            .licensed(&upn);
    }

    let summary = run_compliance(&tenant, true, BatchScheduler::new(10, 100)).await;

    assert_eq!(summary.processed, 250);
    assert_eq!(summary.retention_assigned, 250);
    assert_eq!(summary.archive_enabled, 250);
    assert_eq!(tenant.apply_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_license_pages_accumulate() {
    let mut tenant = FakeTenant::default().with_exempt(&[]);
    tenant.license_pages = (0..3)
        .map(|page| {
            vec![LicenseAssignment {
                principal: format!("user{}@contoso.com", page),
                sku_ids: vec![E3_SKU.into()],
            }]
        })
        .collect();

    let reference = ReferenceData::load_compliance(&tenant, "Archive-Exempt")
        .await
        .unwrap();

    assert_eq!(tenant.license_page_calls.load(Ordering::SeqCst), 3);
    for page in 0..3 {
        let skus = reference
            .licenses_for(&format!("USER{}@contoso.com", page))
            .unwrap();
        assert!(skus.contains("SPE_E3"));
    }
}

#[tokio::test]
async fn test_missing_exempt_group_is_fatal() {
    let tenant = FakeTenant::default().licensed("bob@contoso.com");

    let err = ReferenceData::load_compliance(&tenant, "Archive-Exempt")
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::FetchError(_)));
}

#[tokio::test]
async fn test_permission_sync_converges() {
    let tenant = FakeTenant::default()
        .with_mailbox(MailboxTarget::new("sales@contoso.com", Classification::Shared).with_alias("sales"))
        .with_group("g-sales", "MBX-FA-Sales", &["ann@contoso.com", "Bob@contoso.com"])
        .with_group("g-ghost", "MBX-FA-ghost", &["ann@contoso.com"]);
    tenant.permissions.lock().unwrap().insert(
        "sales@contoso.com".into(),
        vec![
            PermissionEntry::full_access("bob@contoso.com"),
            PermissionEntry::full_access("dan@contoso.com"),
            PermissionEntry::full_access("NT AUTHORITY\\SELF"),
        ],
    );

    let first = run_permissions(&tenant, false).await;

    assert_eq!(first.processed, 2);
    assert_eq!(first.skipped_ineligible, 1);
    assert_eq!(first.permissions_added, 1);
    assert_eq!(first.permissions_removed, 1);
    assert!(tenant.applied().contains(&Mutation::RevokePermission {
        mailbox: "sales@contoso.com".into(),
        principal: "dan@contoso.com".into(),
    }));

    let calls = tenant.apply_calls.load(Ordering::SeqCst);
    let second = run_permissions(&tenant, false).await;

    assert_eq!(second.already_satisfied, 1);
    assert_eq!(tenant.apply_calls.load(Ordering::SeqCst), calls);
}

#[tokio::test]
async fn test_permission_dry_run_sends_nothing() {
    let tenant = FakeTenant::default()
        .with_mailbox(MailboxTarget::new("sales@contoso.com", Classification::Shared))
        .with_group("g-sales", "MBX-FA-sales", &["ann@contoso.com"]);

    let summary = run_permissions(&tenant, true).await;

    assert!(summary.simulated);
    assert_eq!(summary.permissions_added, 1);
    assert_eq!(tenant.apply_calls.load(Ordering::SeqCst), 0);
    assert_eq!(tenant.verify_calls.load(Ordering::SeqCst), 1);
}
