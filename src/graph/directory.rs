//! Directory reads against Microsoft Graph
//!
//! License catalog, per-user license assignments and group membership.
//! Everything here is read-only and bulk: callers fetch once per run.

use crate::error::Result;
use crate::graph::{odata_quote, GraphClient, Page};
use serde::Deserialize;

const USER_LICENSES_ENDPOINT: &str =
    "users?$select=userPrincipalName,assignedLicenses&$top=999";

/// Tenant SKU from `subscribedSkus`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribedSku {
    pub sku_id: Option<String>,
    pub sku_part_number: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignedLicense {
    pub sku_id: Option<String>,
}

/// User with the licenses assigned to it
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserLicenses {
    pub user_principal_name: Option<String>,
    #[serde(default)]
    pub assigned_licenses: Vec<AssignedLicense>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryGroup {
    pub id: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryMember {
    #[serde(default)]
    pub user_principal_name: Option<String>,
}

pub async fn list_subscribed_skus(client: &GraphClient) -> Result<Vec<SubscribedSku>> {
    client.get_all_pages("subscribedSkus").await
}

/// One page of user license assignments; `next` continues a previous page
pub async fn user_licenses_page(
    client: &GraphClient,
    next: Option<&str>,
) -> Result<Page<UserLicenses>> {
    client.get_page(USER_LICENSES_ENDPOINT, next).await
}

/// Find a group by exact display name
pub async fn find_group(client: &GraphClient, display_name: &str) -> Result<Option<DirectoryGroup>> {
    let filter = format!("displayName eq '{}'", odata_quote(display_name));
    let endpoint = format!(
        "groups?$filter={}&$select=id,displayName",
        urlencoding::encode(&filter)
    );
    let groups: Vec<DirectoryGroup> = client.get_all_pages(&endpoint).await?;

    // Graph compares case-insensitively already; prefer an exact-case hit if several come back
    let exact = groups
        .iter()
        .position(|g| g.display_name.as_deref() == Some(display_name));
    Ok(match exact {
        Some(i) => groups.into_iter().nth(i),
        None => groups.into_iter().next(),
    })
}

/// Groups whose display name starts with `prefix`
pub async fn list_groups_with_prefix(
    client: &GraphClient,
    prefix: &str,
) -> Result<Vec<DirectoryGroup>> {
    let filter = format!("startswith(displayName,'{}')", odata_quote(prefix));
    let endpoint = format!(
        "groups?$filter={}&$select=id,displayName&$top=999",
        urlencoding::encode(&filter)
    );
    client.get_all_pages(&endpoint).await
}

/// User principal names of the transitive user members of a group
pub async fn list_group_members(client: &GraphClient, group_id: &str) -> Result<Vec<String>> {
    let endpoint = format!(
        "groups/{}/transitiveMembers/microsoft.graph.user?$select=userPrincipalName&$top=999",
        group_id
    );
    let members: Vec<DirectoryMember> = client.get_all_pages(&endpoint).await?;
    Ok(members
        .into_iter()
        .filter_map(|m| m.user_principal_name)
        .collect())
}
