//! Target objects and per-target outcome records

use crate::error::{Result, SyncError};
use crate::graph::exchange_online::{MailboxPermissionRecord, MailboxRecord};
use std::fmt;

const EMPTY_GUID: &str = "00000000-0000-0000-0000-000000000000";

/// Lower-case an identifier for case-insensitive matching
pub fn normalize(identifier: &str) -> String {
    identifier.trim().to_lowercase()
}

/// Individual (licensed per user) vs shared-resource mailbox
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Individual,
    Shared,
}

impl Classification {
    /// Map `RecipientTypeDetails`. Room and equipment mailboxes are shared resources.
    pub fn from_recipient_type(kind: &str) -> Self {
        match kind.to_ascii_lowercase().as_str() {
            "sharedmailbox" | "roommailbox" | "equipmentmailbox" => Classification::Shared,
            _ => Classification::Individual,
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Individual => write!(f, "individual"),
            Classification::Shared => write!(f, "shared"),
        }
    }
}

/// Mailbox reconciled by compliance mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxTarget {
    pub identifier: String,
    pub alias: Option<String>,
    pub primary_smtp: Option<String>,
    pub classification: Classification,
    pub retention_policy: Option<String>,
    pub archive_guid: Option<String>,
    pub archive_status: Option<String>,
}

impl MailboxTarget {
    pub fn new(identifier: impl Into<String>, classification: Classification) -> Self {
        Self {
            identifier: identifier.into(),
            alias: None,
            primary_smtp: None,
            classification,
            retention_policy: None,
            archive_guid: None,
            archive_status: None,
        }
    }

    pub fn with_retention_policy(mut self, policy: impl Into<String>) -> Self {
        self.retention_policy = Some(policy.into());
        self
    }

    pub fn with_archive(mut self, guid: impl Into<String>) -> Self {
        self.archive_guid = Some(guid.into());
        self.archive_status = Some("Active".into());
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn key(&self) -> String {
        normalize(&self.identifier)
    }

    /// Archive already provisioned: a non-empty archive GUID or an active status
    pub fn has_archive(&self) -> bool {
        let guid_set = self
            .archive_guid
            .as_deref()
            .map(str::trim)
            .is_some_and(|g| !g.is_empty() && g != EMPTY_GUID);
        let status_active = self
            .archive_status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("active"));
        guid_set || status_active
    }
}

impl TryFrom<MailboxRecord> for MailboxTarget {
    type Error = SyncError;

    fn try_from(record: MailboxRecord) -> Result<Self> {
        let identifier = record
            .user_principal_name
            .filter(|u| !u.trim().is_empty())
            .ok_or(SyncError::MalformedRecord {
                kind: "mailbox",
                field: "UserPrincipalName",
            })?;

        let classification = record
            .recipient_type_details
            .as_deref()
            .map(Classification::from_recipient_type)
            .unwrap_or(Classification::Individual);

        Ok(Self {
            identifier,
            alias: record.alias,
            primary_smtp: record.primary_smtp_address,
            classification,
            retention_policy: record.retention_policy,
            archive_guid: record.archive_guid,
            archive_status: record.archive_status,
        })
    }
}

/// Explicit permission entry on a mailbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionEntry {
    pub principal: String,
    pub access_rights: Vec<String>,
    pub is_inherited: bool,
    pub deny: bool,
}

impl PermissionEntry {
    pub fn full_access(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            access_rights: vec!["FullAccess".into()],
            is_inherited: false,
            deny: false,
        }
    }

    /// Non-inherited, non-deny FullAccess grant to a directory user.
    ///
    /// Principals without an `@` (`NT AUTHORITY\SELF`, SIDs, `DOMAIN\Group`)
    /// are service or system entries and are never managed.
    pub fn is_managed_grant(&self) -> bool {
        !self.is_inherited
            && !self.deny
            && self.principal.contains('@')
            && self
                .access_rights
                .iter()
                .any(|r| r.eq_ignore_ascii_case("FullAccess"))
    }
}

impl TryFrom<MailboxPermissionRecord> for PermissionEntry {
    type Error = SyncError;

    fn try_from(record: MailboxPermissionRecord) -> Result<Self> {
        let principal = record
            .user
            .filter(|u| !u.trim().is_empty())
            .ok_or(SyncError::MalformedRecord {
                kind: "mailbox permission",
                field: "User",
            })?;

        Ok(Self {
            principal,
            access_rights: record.access_rights,
            is_inherited: record.is_inherited,
            deny: record.deny,
        })
    }
}

/// How a permission group resolved to a shared mailbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailboxResolution {
    Resolved(String),
    /// Name yielded an identity but no shared mailbox carries it
    NoMatchingMailbox(String),
    /// Identity matches more than one shared mailbox
    Ambiguous(String),
    /// Name did not yield an identity at all
    MalformedName,
}

/// Shared mailbox / permission group pair reconciled by permission mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionTarget {
    pub group_id: String,
    pub group_name: String,
    pub mailbox: MailboxResolution,
}

impl PermissionTarget {
    pub fn identifier(&self) -> String {
        match &self.mailbox {
            MailboxResolution::Resolved(mailbox) => mailbox.clone(),
            _ => self.group_name.clone(),
        }
    }
}

/// What happened to one sub-action of a target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionTaken {
    RetentionAssigned,
    RetentionAlreadySet,
    ArchiveEnabled,
    ArchiveAlreadyEnabled,
    ArchiveSkippedExempt,
    /// Archive not attempted because the retention assignment failed
    ArchiveSkippedAfterFailure,
    PermissionAdded(String),
    PermissionRemoved(String),
    InSync,
}

impl ActionTaken {
    /// Whether this action sent (or simulated) a write
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            ActionTaken::RetentionAssigned
                | ActionTaken::ArchiveEnabled
                | ActionTaken::PermissionAdded(_)
                | ActionTaken::PermissionRemoved(_)
        )
    }
}

impl fmt::Display for ActionTaken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionTaken::RetentionAssigned => write!(f, "assigned"),
            ActionTaken::RetentionAlreadySet => write!(f, "already-set"),
            ActionTaken::ArchiveEnabled => write!(f, "enabled"),
            ActionTaken::ArchiveAlreadyEnabled => write!(f, "already-enabled"),
            ActionTaken::ArchiveSkippedExempt => write!(f, "archive-exempt"),
            ActionTaken::ArchiveSkippedAfterFailure => write!(f, "archive-skipped"),
            ActionTaken::PermissionAdded(p) => write!(f, "added {}", p),
            ActionTaken::PermissionRemoved(p) => write!(f, "removed {}", p),
            ActionTaken::InSync => write!(f, "in-sync"),
        }
    }
}

/// Failure kinds, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FailureKind {
    TransientExhausted,
    Permanent,
    Unexpected,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::TransientExhausted => write!(f, "transient-exhausted"),
            FailureKind::Permanent => write!(f, "permanent"),
            FailureKind::Unexpected => write!(f, "unexpected"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub operation: String,
    pub kind: FailureKind,
    pub attempts: u32,
    pub message: String,
}

/// Result of reconciling one target. Exactly one per target per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub identifier: String,
    pub classification: Classification,
    pub actions: Vec<ActionTaken>,
    /// Set when the target did not qualify; no mutation was attempted
    pub ineligible: Option<String>,
    pub failures: Vec<Failure>,
}

impl RunOutcome {
    pub fn new(identifier: impl Into<String>, classification: Classification) -> Self {
        Self {
            identifier: identifier.into(),
            classification,
            actions: Vec::new(),
            ineligible: None,
            failures: Vec::new(),
        }
    }

    pub fn ineligible(
        identifier: impl Into<String>,
        classification: Classification,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            ineligible: Some(reason.into()),
            ..Self::new(identifier, classification)
        }
    }

    /// A target whose processing panicked
    pub fn unexpected(
        identifier: impl Into<String>,
        classification: Classification,
        message: impl Into<String>,
    ) -> Self {
        let mut outcome = Self::new(identifier, classification);
        outcome.failures.push(Failure {
            operation: "reconcile".into(),
            kind: FailureKind::Unexpected,
            attempts: 1,
            message: message.into(),
        });
        outcome
    }

    /// Most severe failure recorded for this target
    pub fn worst_failure(&self) -> Option<&Failure> {
        self.failures.iter().max_by_key(|f| f.kind)
    }

    pub fn changed(&self) -> bool {
        self.actions.iter().any(ActionTaken::is_mutation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_from_recipient_type() {
        assert_eq!(
            Classification::from_recipient_type("SharedMailbox"),
            Classification::Shared
        );
        assert_eq!(
            Classification::from_recipient_type("RoomMailbox"),
            Classification::Shared
        );
        assert_eq!(
            Classification::from_recipient_type("UserMailbox"),
            Classification::Individual
        );
    }

    #[test]
    fn test_has_archive() {
        let mut mailbox = MailboxTarget::new("a@contoso.com", Classification::Individual);
        assert!(!mailbox.has_archive());

        mailbox.archive_guid = Some(EMPTY_GUID.into());
        mailbox.archive_status = Some("None".into());
        assert!(!mailbox.has_archive());

        mailbox.archive_guid = Some("6d1c1b5e-0000-4000-8000-000000000001".into());
        assert!(mailbox.has_archive());
    }

    #[test]
    fn test_mailbox_without_upn_is_malformed() {
        let record = MailboxRecord {
            display_name: Some("Ghost".into()),
            ..Default::default()
        };
        let err = MailboxTarget::try_from(record).unwrap_err();
        assert!(matches!(
            err,
            SyncError::MalformedRecord {
                field: "UserPrincipalName",
                ..
            }
        ));
    }

    #[test]
    fn test_managed_grant_filter() {
        assert!(PermissionEntry::full_access("ann@contoso.com").is_managed_grant());
        assert!(!PermissionEntry::full_access("NT AUTHORITY\\SELF").is_managed_grant());

        let mut inherited = PermissionEntry::full_access("bob@contoso.com");
        inherited.is_inherited = true;
        assert!(!inherited.is_managed_grant());

        let mut read_only = PermissionEntry::full_access("cat@contoso.com");
        read_only.access_rights = vec!["ReadPermission".into()];
        assert!(!read_only.is_managed_grant());
    }

    #[test]
    fn test_worst_failure() {
        let mut outcome = RunOutcome::new("x", Classification::Shared);
        outcome.failures.push(Failure {
            operation: "grant".into(),
            kind: FailureKind::TransientExhausted,
            attempts: 3,
            message: "busy".into(),
        });
        outcome.failures.push(Failure {
            operation: "revoke".into(),
            kind: FailureKind::Permanent,
            attempts: 1,
            message: "denied".into(),
        });
        assert_eq!(outcome.worst_failure().unwrap().kind, FailureKind::Permanent);
    }
}
