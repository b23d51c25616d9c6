//! Reconciliation engine
//!
//! Two modes share one pipeline:
//! - compliance: every mailbox gets the retention policy and, unless exempt,
//!   an archive
//! - permissions: FullAccess grants on each shared mailbox follow the members
//!   of its `MBX-FA-<mailbox>` group
//!
//! Reference data is loaded in bulk first ([`reference`]); targets are then
//! evaluated ([`eligibility`], [`differ`]), mutated through the retrying
//! [`executor`], and scheduled sequentially or in bounded parallel batches
//! ([`scheduler`]).

pub mod compliance;
pub mod differ;
pub mod eligibility;
pub mod executor;
pub mod model;
pub mod permissions;
pub mod reference;
pub mod reporter;
pub mod scheduler;
pub mod summary;
pub mod traits;

pub use compliance::ComplianceReconciler;
pub use eligibility::{EligibilityEvaluator, LicenseRules};
pub use executor::MutationExecutor;
pub use model::{ActionTaken, Classification, FailureKind, MailboxTarget, PermissionTarget, RunOutcome};
pub use permissions::PermissionReconciler;
pub use reference::ReferenceData;
pub use reporter::ProgressReporter;
pub use scheduler::{BatchScheduler, Reconciler};
pub use summary::RunSummary;
pub use traits::{DirectorySource, Mutation, MutationTarget};
