//! Seams between the engine and the remote services.
//!
//! The engine only sees these traits. [`crate::graph::session::TenantSession`]
//! implements them against Graph and the Exchange admin API; tests implement
//! them in memory.

use std::fmt;
use std::future::Future;

use crate::error::Result;
use crate::graph::Page;
use crate::reconcile::model::{MailboxTarget, PermissionEntry};

/// SKU id and its part number (e.g. `SPE_E3`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkuInfo {
    pub sku_id: String,
    pub part_number: String,
}

/// SKU ids assigned to one principal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseAssignment {
    pub principal: String,
    pub sku_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRef {
    pub id: String,
    pub display_name: String,
}

/// Read-only view of the directory and mailbox store
pub trait DirectorySource: Send + Sync {
    fn subscribed_skus(&self) -> impl Future<Output = Result<Vec<SkuInfo>>> + Send;

    /// One page of license assignments. `next` is the token returned with the
    /// previous page; `None` requests the first page.
    fn license_page(
        &self,
        next: Option<String>,
    ) -> impl Future<Output = Result<Page<LicenseAssignment>>> + Send;

    /// Group with this exact display name (compared case-insensitively)
    fn find_group(&self, display_name: &str)
        -> impl Future<Output = Result<Option<GroupRef>>> + Send;

    /// Groups whose display name starts with `prefix`
    fn groups_with_prefix(&self, prefix: &str) -> impl Future<Output = Result<Vec<GroupRef>>> + Send;

    /// Principal names of the (transitive) members of a group
    fn group_members(&self, group_id: &str) -> impl Future<Output = Result<Vec<String>>> + Send;

    fn mailboxes(&self) -> impl Future<Output = Result<Vec<MailboxTarget>>> + Send;

    fn shared_mailboxes(&self) -> impl Future<Output = Result<Vec<MailboxTarget>>> + Send;

    fn mailbox_permissions(
        &self,
        mailbox: &str,
    ) -> impl Future<Output = Result<Vec<PermissionEntry>>> + Send;
}

/// Write-side of the mailbox store
pub trait MutationTarget: Send + Sync {
    /// Perform the state change
    fn apply(&self, mutation: &Mutation) -> impl Future<Output = Result<()>> + Send;

    /// Read-only check that the mutation could be applied (dry-run path)
    fn verify(&self, mutation: &Mutation) -> impl Future<Output = Result<()>> + Send;
}

/// One idempotent state change against a mailbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    AssignPolicy { mailbox: String, policy: String },
    EnableArchive { mailbox: String },
    GrantPermission { mailbox: String, principal: String, auto_mapping: bool },
    RevokePermission { mailbox: String, principal: String },
}

impl Mutation {
    pub fn mailbox(&self) -> &str {
        match self {
            Mutation::AssignPolicy { mailbox, .. }
            | Mutation::EnableArchive { mailbox }
            | Mutation::GrantPermission { mailbox, .. }
            | Mutation::RevokePermission { mailbox, .. } => mailbox,
        }
    }
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mutation::AssignPolicy { mailbox, policy } => {
                write!(f, "assign retention policy '{}' to {}", policy, mailbox)
            }
            Mutation::EnableArchive { mailbox } => write!(f, "enable archive on {}", mailbox),
            Mutation::GrantPermission {
                mailbox, principal, ..
            } => write!(f, "grant FullAccess on {} to {}", mailbox, principal),
            Mutation::RevokePermission { mailbox, principal } => {
                write!(f, "revoke FullAccess on {} from {}", mailbox, principal)
            }
        }
    }
}
