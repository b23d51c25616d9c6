//! Reference data cache
//!
//! Bulk-loaded once per run, read-only afterwards and shared by every worker.
//! No per-target network call may be made for license or SKU resolution.

use std::collections::{HashMap, HashSet};

use crate::error::{Result, SyncError};
use crate::reconcile::model::normalize;
use crate::reconcile::traits::{DirectorySource, GroupRef};

#[derive(Debug, Clone, Default)]
pub struct ReferenceData {
    /// Normalized principal -> upper-cased SKU part numbers
    entitlements: HashMap<String, HashSet<String>>,
    /// SKU id -> part number
    sku_names: HashMap<String, String>,
    /// Normalized members of the archive-exempt group
    exempt: HashSet<String>,
    /// Group id -> normalized members
    group_members: HashMap<String, HashSet<String>>,
}

impl ReferenceData {
    /// Load SKU catalog, every license assignment and the exempt group
    pub async fn load_compliance<D: DirectorySource>(source: &D, exempt_group: &str) -> Result<Self> {
        let mut data = ReferenceData::default();

        for sku in source
            .subscribed_skus()
            .await
            .map_err(|e| e.into_fetch_error("subscribed SKUs"))?
        {
            data.sku_names.insert(sku.sku_id.to_lowercase(), sku.part_number);
        }

        let mut next: Option<String> = None;
        let mut pages = 0usize;
        loop {
            let page = source
                .license_page(next.take())
                .await
                .map_err(|e| e.into_fetch_error("license assignments"))?;
            pages += 1;

            for assignment in page.items {
                let skus: HashSet<String> = assignment
                    .sku_ids
                    .iter()
                    .map(|id| data.part_number(id))
                    .collect();
                data.entitlements
                    .entry(normalize(&assignment.principal))
                    .or_default()
                    .extend(skus);
            }

            match page.next {
                Some(token) => next = Some(token),
                None => break,
            }
        }

        let group = source
            .find_group(exempt_group)
            .await
            .map_err(|e| e.into_fetch_error("exempt group lookup"))?
            .ok_or_else(|| {
                SyncError::FetchError(format!("exempt group '{}' not found", exempt_group))
            })?;
        let members = source
            .group_members(&group.id)
            .await
            .map_err(|e| e.into_fetch_error("exempt group members"))?;
        data.exempt = members.iter().map(|m| normalize(m)).collect();

        tracing::info!(
            skus = data.sku_names.len(),
            principals = data.entitlements.len(),
            license_pages = pages,
            exempt = data.exempt.len(),
            "Reference data loaded"
        );

        Ok(data)
    }

    /// Load the members of every permission-management group
    pub async fn load_permissions<D: DirectorySource>(source: &D, groups: &[GroupRef]) -> Result<Self> {
        let mut data = ReferenceData::default();

        for group in groups {
            let members = source
                .group_members(&group.id)
                .await
                .map_err(|e| e.into_fetch_error(&format!("members of '{}'", group.display_name)))?;
            data.insert_group(&group.id, members);
        }

        tracing::info!(groups = data.group_members.len(), "Group membership loaded");

        Ok(data)
    }

    fn part_number(&self, sku_id: &str) -> String {
        self.sku_names
            .get(&sku_id.to_lowercase())
            .cloned()
            .unwrap_or_else(|| sku_id.to_string())
            .to_uppercase()
    }

    /// SKU part numbers held by a principal, `None` if it holds no license at all
    pub fn licenses_for(&self, principal: &str) -> Option<&HashSet<String>> {
        self.entitlements
            .get(&normalize(principal))
            .filter(|skus| !skus.is_empty())
    }

    pub fn is_exempt(&self, principal: &str) -> bool {
        self.exempt.contains(&normalize(principal))
    }

    /// Normalized members of a group; empty when the group has none
    pub fn members_of(&self, group_id: &str) -> HashSet<String> {
        self.group_members.get(group_id).cloned().unwrap_or_default()
    }

    pub fn insert_entitlement<I, S>(&mut self, principal: &str, part_numbers: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.entitlements
            .entry(normalize(principal))
            .or_default()
            .extend(part_numbers.into_iter().map(|s| s.as_ref().to_uppercase()));
    }

    pub fn insert_exempt(&mut self, principal: &str) {
        self.exempt.insert(normalize(principal));
    }

    pub fn insert_group<I, S>(&mut self, group_id: &str, members: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.group_members.insert(
            group_id.to_string(),
            members.into_iter().map(|m| normalize(m.as_ref())).collect(),
        );
    }
}
