//! Per-tenant session: the Graph and Exchange clients of one run, passed
//! explicitly to everything that talks to the tenant.
//!
//! Graph is only read while loading reference data at the start of a run.
//! Exchange is called for every target, so a run can outlive its Exchange
//! token; a 401 from Exchange re-acquires the token once and repeats the call.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::RwLock;

use crate::config::{ConfigManager, TenantConfig};
use crate::error::{Result, SyncError};
use crate::graph::auth::{GraphAuth, Resource};
use crate::graph::directory;
use crate::graph::exchange_online::ExchangeClient;
use crate::graph::{GraphClient, Page};
use crate::reconcile::model::{MailboxTarget, PermissionEntry};
use crate::reconcile::traits::{
    DirectorySource, GroupRef, LicenseAssignment, Mutation, MutationTarget, SkuInfo,
};

type TokenSource = Arc<dyn Fn() -> BoxFuture<'static, Result<String>> + Send + Sync>;

pub struct TenantSession {
    graph: GraphClient,
    exchange: RwLock<ExchangeClient>,
    refresh_exchange: Option<TokenSource>,
}

impl TenantSession {
    /// Acquire tokens for both resources and build the clients
    pub async fn connect(config: &ConfigManager, tenant: &TenantConfig) -> Result<Self> {
        let auth = Arc::new(GraphAuth::new(config.clone()));
        let graph_token = auth.get_access_token(tenant, Resource::Graph).await?;
        let exchange_token = auth.get_access_token(tenant, Resource::Exchange).await?;

        tracing::info!(tenant = %tenant.name, "Connected");

        let tenant_config = tenant.clone();
        Ok(Self::from_clients(
            GraphClient::new(graph_token),
            ExchangeClient::new(exchange_token, &tenant.tenant_id),
        )
        .with_exchange_token_refresh(move || {
            let auth = Arc::clone(&auth);
            let tenant = tenant_config.clone();
            async move { auth.refresh_access_token(&tenant, Resource::Exchange).await }
        }))
    }

    pub fn from_clients(graph: GraphClient, exchange: ExchangeClient) -> Self {
        Self {
            graph,
            exchange: RwLock::new(exchange),
            refresh_exchange: None,
        }
    }

    /// Source of a new Exchange token once the current one is rejected
    pub fn with_exchange_token_refresh<F, Fut>(mut self, refresh: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        self.refresh_exchange = Some(Arc::new(move || refresh().boxed()));
        self
    }

    /// Run an Exchange call, repeating it once with a new token on a 401
    async fn with_exchange<T, F, Fut>(&self, call: F) -> Result<T>
    where
        F: Fn(ExchangeClient) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let client = self.exchange.read().await.clone();
        let stale = client.access_token().to_string();

        match call(client).await {
            Err(SyncError::RemoteError { status: 401, .. }) if self.refresh_exchange.is_some() => {
                let client = self.refresh_exchange_client(&stale).await?;
                call(client).await
            }
            other => other,
        }
    }

    async fn refresh_exchange_client(&self, stale: &str) -> Result<ExchangeClient> {
        let mut current = self.exchange.write().await;

        // Another task already swapped the token while we waited for the lock
        if current.access_token() != stale {
            return Ok(current.clone());
        }

        let refresh = self
            .refresh_exchange
            .as_ref()
            .ok_or_else(|| SyncError::AuthError("No token source for Exchange".into()))?;
        let token = refresh().await?;
        *current = current.with_access_token(token);
        Ok(current.clone())
    }

    async fn load_mailboxes(&self, recipient_type: Option<&str>) -> Result<Vec<MailboxTarget>> {
        self.with_exchange(|exchange| async move { exchange.list_mailboxes(recipient_type).await })
            .await?
            .into_iter()
            .map(MailboxTarget::try_from)
            .collect()
    }
}

fn group_ref(group: directory::DirectoryGroup) -> Result<GroupRef> {
    Ok(GroupRef {
        id: group.id.ok_or(SyncError::MalformedRecord {
            kind: "group",
            field: "id",
        })?,
        display_name: group.display_name.unwrap_or_default(),
    })
}

impl DirectorySource for TenantSession {
    async fn subscribed_skus(&self) -> Result<Vec<SkuInfo>> {
        directory::list_subscribed_skus(&self.graph)
            .await?
            .into_iter()
            .map(|sku| {
                Ok(SkuInfo {
                    sku_id: sku.sku_id.ok_or(SyncError::MalformedRecord {
                        kind: "subscribed SKU",
                        field: "skuId",
                    })?,
                    part_number: sku.sku_part_number.unwrap_or_default(),
                })
            })
            .collect()
    }

    async fn license_page(&self, next: Option<String>) -> Result<Page<LicenseAssignment>> {
        let page = directory::user_licenses_page(&self.graph, next.as_deref()).await?;

        let items = page
            .items
            .into_iter()
            .map(|user| {
                let principal = user.user_principal_name.ok_or(SyncError::MalformedRecord {
                    kind: "user",
                    field: "userPrincipalName",
                })?;
                Ok(LicenseAssignment {
                    principal,
                    sku_ids: user
                        .assigned_licenses
                        .into_iter()
                        .filter_map(|l| l.sku_id)
                        .collect(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Page {
            items,
            next: page.next,
        })
    }

    async fn find_group(&self, display_name: &str) -> Result<Option<GroupRef>> {
        directory::find_group(&self.graph, display_name)
            .await?
            .map(group_ref)
            .transpose()
    }

    async fn groups_with_prefix(&self, prefix: &str) -> Result<Vec<GroupRef>> {
        directory::list_groups_with_prefix(&self.graph, prefix)
            .await?
            .into_iter()
            .map(group_ref)
            .collect()
    }

    async fn group_members(&self, group_id: &str) -> Result<Vec<String>> {
        directory::list_group_members(&self.graph, group_id).await
    }

    async fn mailboxes(&self) -> Result<Vec<MailboxTarget>> {
        self.load_mailboxes(None).await
    }

    async fn shared_mailboxes(&self) -> Result<Vec<MailboxTarget>> {
        self.load_mailboxes(Some("SharedMailbox")).await
    }

    async fn mailbox_permissions(&self, mailbox: &str) -> Result<Vec<PermissionEntry>> {
        self.with_exchange(|exchange| async move { exchange.get_mailbox_permissions(mailbox).await })
            .await?
            .into_iter()
            .map(PermissionEntry::try_from)
            .collect()
    }
}

impl MutationTarget for TenantSession {
    async fn apply(&self, mutation: &Mutation) -> Result<()> {
        self.with_exchange(|exchange| async move {
            match mutation {
                Mutation::AssignPolicy { mailbox, policy } => {
                    exchange.set_retention_policy(mailbox, policy).await
                }
                Mutation::EnableArchive { mailbox } => exchange.enable_archive(mailbox).await,
                Mutation::GrantPermission {
                    mailbox,
                    principal,
                    auto_mapping,
                } => {
                    exchange
                        .add_full_access(mailbox, principal, *auto_mapping)
                        .await
                }
                Mutation::RevokePermission { mailbox, principal } => {
                    exchange.remove_full_access(mailbox, principal).await
                }
            }
        })
        .await
    }

    async fn verify(&self, mutation: &Mutation) -> Result<()> {
        let mailbox = mutation.mailbox();
        let found = self
            .with_exchange(|exchange| async move { exchange.get_mailbox_once(mailbox).await })
            .await?;
        match found {
            Some(_) => Ok(()),
            None => Err(SyncError::RemoteError {
                status: 404,
                message: format!("Mailbox '{}' couldn't be found", mailbox),
            }),
        }
    }
}
