//! Exchange Online Management
//!
//! Mailbox reads and mailbox mutations through the Exchange Online admin API
//! (`InvokeCommand`), which runs the same cmdlets as the management shell:
//! - `Get-Mailbox` / `Get-MailboxPermission`
//! - `Set-Mailbox -RetentionPolicy`
//! - `Enable-Mailbox -Archive`
//! - `Add-MailboxPermission` / `Remove-MailboxPermission`
//!
//! Bulk reads retry 429/5xx internally. Mutations and the dry-run mailbox
//! check are sent exactly once; the reconciliation executor owns their retry
//! policy.

use crate::error::{Result, SyncError};
use crate::graph::{check_status, send_with_retry, PaginatedResponse};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;

pub const EXCHANGE_ADMIN_BASE: &str = "https://outlook.office365.com/adminapi/beta";

/// Raw `Get-Mailbox` record
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MailboxRecord {
    #[serde(default)]
    pub user_principal_name: Option<String>,
    #[serde(default)]
    pub primary_smtp_address: Option<String>,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub recipient_type_details: Option<String>,
    #[serde(default)]
    pub retention_policy: Option<String>,
    #[serde(default)]
    pub archive_guid: Option<String>,
    #[serde(default)]
    pub archive_status: Option<String>,
}

/// Raw `Get-MailboxPermission` record
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MailboxPermissionRecord {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub access_rights: Vec<String>,
    #[serde(default)]
    pub is_inherited: bool,
    #[serde(default)]
    pub deny: bool,
}

/// Client for the Exchange Online admin API of one tenant
#[derive(Clone)]
pub struct ExchangeClient {
    client: Client,
    access_token: String,
    base_url: String,
    initial_backoff: Duration,
}

impl ExchangeClient {
    pub fn new(access_token: String, tenant_id: &str) -> Self {
        Self::with_base_url(access_token, &format!("{}/{}", EXCHANGE_ADMIN_BASE, tenant_id))
    }

    pub fn with_base_url(access_token: String, base_url: &str) -> Self {
        Self {
            client: Client::new(),
            access_token,
            base_url: base_url.trim_end_matches('/').to_string(),
            initial_backoff: Duration::from_secs(1),
        }
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Same client and endpoint, new bearer token
    pub fn with_access_token(&self, access_token: String) -> Self {
        Self {
            access_token,
            ..self.clone()
        }
    }

    fn command_url(&self) -> String {
        format!("{}/InvokeCommand", self.base_url)
    }

    fn command_body(cmdlet: &str, parameters: Map<String, Value>) -> Value {
        json!({
            "CmdletInput": {
                "CmdletName": cmdlet,
                "Parameters": parameters
            }
        })
    }

    /// Run a cmdlet once, without retry
    pub async fn invoke_once(&self, cmdlet: &str, parameters: Map<String, Value>) -> Result<()> {
        self.send_once(cmdlet, parameters).await?;
        Ok(())
    }

    async fn send_once(
        &self,
        cmdlet: &str,
        parameters: Map<String, Value>,
    ) -> Result<reqwest::Response> {
        let body = Self::command_body(cmdlet, parameters);

        tracing::debug!(cmdlet, "Invoking Exchange cmdlet");

        let resp = self
            .client
            .post(self.command_url())
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;

        check_status(resp).await
    }

    /// Run a read cmdlet and collect every page of its output
    pub async fn invoke_paged<T: for<'de> Deserialize<'de>>(
        &self,
        cmdlet: &str,
        parameters: Map<String, Value>,
    ) -> Result<Vec<T>> {
        let body = Self::command_body(cmdlet, parameters);
        let mut url = self.command_url();
        let mut items = Vec::new();

        loop {
            let resp = send_with_retry(
                || {
                    self.client
                        .post(&url)
                        .bearer_auth(&self.access_token)
                        .json(&body)
                },
                cmdlet,
                self.initial_backoff,
            )
            .await?;

            let page: PaginatedResponse<T> = resp.json().await?;
            items.extend(page.value);

            match page.next_link {
                Some(next) => url = next,
                None => break,
            }
        }

        Ok(items)
    }

    /// All mailboxes, optionally restricted to one `RecipientTypeDetails` value
    pub async fn list_mailboxes(&self, recipient_type: Option<&str>) -> Result<Vec<MailboxRecord>> {
        let mut params = Map::new();
        params.insert("ResultSize".into(), json!("Unlimited"));
        if let Some(kind) = recipient_type {
            params.insert("RecipientTypeDetails".into(), json!(kind));
        }
        self.invoke_paged("Get-Mailbox", params).await
    }

    /// Look up a single mailbox; `None` if it does not exist
    pub async fn get_mailbox(&self, identity: &str) -> Result<Option<MailboxRecord>> {
        let params = Self::identity_params(identity);
        not_found_as_none(self.invoke_paged::<MailboxRecord>("Get-Mailbox", params).await)
            .map(|records| records.and_then(|mut r| r.pop()))
    }

    /// Like [`Self::get_mailbox`] but sent exactly once, for callers that
    /// retry on their own
    pub async fn get_mailbox_once(&self, identity: &str) -> Result<Option<MailboxRecord>> {
        let params = Self::identity_params(identity);
        let fetched = async {
            let page: PaginatedResponse<MailboxRecord> =
                self.send_once("Get-Mailbox", params).await?.json().await?;
            Ok::<_, SyncError>(page.value)
        }
        .await;
        not_found_as_none(fetched).map(|records| records.and_then(|mut r| r.pop()))
    }

    fn identity_params(identity: &str) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("Identity".into(), json!(identity));
        params
    }

    pub async fn get_mailbox_permissions(
        &self,
        identity: &str,
    ) -> Result<Vec<MailboxPermissionRecord>> {
        let mut params = Map::new();
        params.insert("Identity".into(), json!(identity));
        self.invoke_paged("Get-MailboxPermission", params).await
    }

    pub async fn set_retention_policy(&self, identity: &str, policy: &str) -> Result<()> {
        let mut params = Map::new();
        params.insert("Identity".into(), json!(identity));
        params.insert("RetentionPolicy".into(), json!(policy));
        self.invoke_once("Set-Mailbox", params).await
    }

    pub async fn enable_archive(&self, identity: &str) -> Result<()> {
        let mut params = Map::new();
        params.insert("Identity".into(), json!(identity));
        params.insert("Archive".into(), json!(true));
        self.invoke_once("Enable-Mailbox", params).await
    }

    pub async fn add_full_access(&self, identity: &str, user: &str, auto_mapping: bool) -> Result<()> {
        let mut params = Map::new();
        params.insert("Identity".into(), json!(identity));
        params.insert("User".into(), json!(user));
        params.insert("AccessRights".into(), json!(["FullAccess"]));
        params.insert("InheritanceType".into(), json!("All"));
        params.insert("AutoMapping".into(), json!(auto_mapping));
        self.invoke_once("Add-MailboxPermission", params).await
    }

    pub async fn remove_full_access(&self, identity: &str, user: &str) -> Result<()> {
        let mut params = Map::new();
        params.insert("Identity".into(), json!(identity));
        params.insert("User".into(), json!(user));
        params.insert("AccessRights".into(), json!(["FullAccess"]));
        params.insert("InheritanceType".into(), json!("All"));
        params.insert("Confirm".into(), json!(false));
        self.invoke_once("Remove-MailboxPermission", params).await
    }
}

/// Exchange reports an unknown identity as 404 or, on some paths, as a
/// generic error whose message says so
fn not_found_as_none<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(SyncError::RemoteError { status, message })
            if status == 404 || message.contains("couldn't be found") =>
        {
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
