//! Desired-vs-actual permission diff and group naming convention

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::reconcile::model::{normalize, MailboxResolution, MailboxTarget, PermissionTarget};
use crate::reconcile::traits::GroupRef;

/// Actions needed to make `actual` equal `desired`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionDiff {
    pub to_add: BTreeSet<String>,
    pub to_remove: BTreeSet<String>,
}

impl PermissionDiff {
    pub fn is_in_sync(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// `to_add = desired - actual`, `to_remove = actual - desired`.
///
/// Sets are expected to hold normalized identifiers. Output is sorted only to
/// keep logs stable; no application order is implied.
pub fn diff(desired: &HashSet<String>, actual: &HashSet<String>) -> PermissionDiff {
    PermissionDiff {
        to_add: desired.difference(actual).cloned().collect(),
        to_remove: actual.difference(desired).cloned().collect(),
    }
}

/// Derive the shared mailbox identity from a permission group name.
///
/// Strips `prefix` (case-insensitive, once) and, if the remainder contains
/// an `@`, everything from the last `@` on. Returns `None` when the name does
/// not carry the prefix or nothing is left.
pub fn derive_mailbox_identity(group_name: &str, prefix: &str) -> Option<String> {
    let name = group_name.trim();
    if name.len() < prefix.len() || !name.is_char_boundary(prefix.len()) {
        return None;
    }
    let (head, rest) = name.split_at(prefix.len());
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }

    let identity = match rest.rfind('@') {
        Some(at) => &rest[..at],
        None => rest,
    };
    let identity = identity.trim();

    if identity.is_empty() {
        None
    } else {
        Some(normalize(identity))
    }
}

/// Pair each permission group with the shared mailbox it governs.
///
/// A derived identity matches a mailbox alias first, then the local part of
/// its primary SMTP address or UPN; all comparisons are exact after
/// lower-casing. An identity that hits several mailboxes at the first level
/// that matches at all is reported as ambiguous.
pub fn plan_permission_targets(
    groups: &[GroupRef],
    shared_mailboxes: &[MailboxTarget],
    prefix: &str,
) -> Vec<PermissionTarget> {
    let mut by_alias: HashMap<String, BTreeSet<&str>> = HashMap::new();
    let mut by_local_part: HashMap<String, BTreeSet<&str>> = HashMap::new();

    for mailbox in shared_mailboxes {
        if let Some(alias) = &mailbox.alias {
            by_alias
                .entry(normalize(alias))
                .or_default()
                .insert(&mailbox.identifier);
        }
        for address in [mailbox.primary_smtp.as_deref(), Some(mailbox.identifier.as_str())]
            .into_iter()
            .flatten()
        {
            if let Some((local, _)) = address.split_once('@') {
                by_local_part
                    .entry(normalize(local))
                    .or_default()
                    .insert(&mailbox.identifier);
            }
        }
    }

    groups
        .iter()
        .map(|group| {
            let mailbox = match derive_mailbox_identity(&group.display_name, prefix) {
                None => MailboxResolution::MalformedName,
                Some(identity) => {
                    let candidates = by_alias
                        .get(&identity)
                        .or_else(|| by_local_part.get(&identity));
                    match candidates {
                        None => MailboxResolution::NoMatchingMailbox(identity),
                        Some(found) if found.len() > 1 => {
                            tracing::warn!(
                                group = %group.display_name,
                                candidates = ?found,
                                "Permission group matches several shared mailboxes"
                            );
                            MailboxResolution::Ambiguous(identity)
                        }
                        Some(found) => match found.iter().next() {
                            Some(upn) => MailboxResolution::Resolved(upn.to_string()),
                            None => MailboxResolution::NoMatchingMailbox(identity),
                        },
                    }
                }
            };

            PermissionTarget {
                group_id: group.id.clone(),
                group_name: group.display_name.clone(),
                mailbox,
            }
        })
        .collect()
}
