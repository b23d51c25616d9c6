use crate::config::{ConfigManager, TenantConfig, TokenCache};
use crate::error::{Result, SyncError};
use oauth2::{
    basic::BasicClient, reqwest::async_http_client, AuthUrl, ClientId, ClientSecret, Scope,
    TokenResponse, TokenUrl,
};
use std::time::Duration;

const MICROSOFT_AUTHORITY: &str = "https://login.microsoftonline.com";

/// Resource a token is issued for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Graph,
    Exchange,
}

impl Resource {
    pub fn scope(&self) -> &'static str {
        match self {
            Resource::Graph => "https://graph.microsoft.com/.default",
            Resource::Exchange => "https://outlook.office365.com/.default",
        }
    }

    /// Key used in the token cache file name
    pub fn cache_key(&self) -> &'static str {
        match self {
            Resource::Graph => "graph",
            Resource::Exchange => "exchange",
        }
    }
}

/// App-only token acquisition for unattended runs
pub struct GraphAuth {
    config_manager: ConfigManager,
}

impl GraphAuth {
    pub fn new(config_manager: ConfigManager) -> Self {
        Self { config_manager }
    }

    /// Get valid access token, from cache or via client credentials
    pub async fn get_access_token(
        &self,
        tenant_config: &TenantConfig,
        resource: Resource,
    ) -> Result<String> {
        match self
            .config_manager
            .load_token(&tenant_config.name, resource.cache_key())
        {
            Ok(token) => Ok(token.access_token),
            Err(SyncError::AuthError(_)) | Err(SyncError::TokenNotFound) => {
                let token = self.login_client_credentials(tenant_config, resource).await?;
                Ok(token.access_token)
            }
            Err(e) => Err(e),
        }
    }

    /// Fetch a fresh token, bypassing the cache, after the service rejected
    /// the cached one
    pub async fn refresh_access_token(
        &self,
        tenant_config: &TenantConfig,
        resource: Resource,
    ) -> Result<String> {
        tracing::info!(
            tenant = %tenant_config.name,
            resource = resource.cache_key(),
            "Access token rejected, requesting a new one"
        );
        let token = self.login_client_credentials(tenant_config, resource).await?;
        Ok(token.access_token)
    }

    /// Authenticate using client credentials flow (non-interactive)
    async fn login_client_credentials(
        &self,
        tenant_config: &TenantConfig,
        resource: Resource,
    ) -> Result<TokenCache> {
        let client_secret = tenant_config
            .client_secret
            .as_ref()
            .ok_or(SyncError::TokenNotFound)?;

        tracing::debug!(
            tenant = %tenant_config.name,
            resource = resource.cache_key(),
            "Requesting client credentials token"
        );

        let tenant_id = &tenant_config.tenant_id;

        let auth_url = AuthUrl::new(format!(
            "{}/{}/oauth2/v2.0/authorize",
            MICROSOFT_AUTHORITY, tenant_id
        ))
        .map_err(|e| SyncError::AuthError(format!("Invalid auth URL: {}", e)))?;

        let token_url = TokenUrl::new(format!(
            "{}/{}/oauth2/v2.0/token",
            MICROSOFT_AUTHORITY, tenant_id
        ))
        .map_err(|e| SyncError::AuthError(format!("Invalid token URL: {}", e)))?;

        let client = BasicClient::new(
            ClientId::new(tenant_config.client_id.clone()),
            Some(ClientSecret::new(client_secret.clone())),
            auth_url,
            Some(token_url),
        );

        let token = client
            .exchange_client_credentials()
            .add_scope(Scope::new(resource.scope().to_string()))
            .request_async(async_http_client)
            .await
            .map_err(|e| {
                SyncError::AuthError(format!("Client credentials exchange failed: {}", e))
            })?;

        let lifetime = token.expires_in().unwrap_or(Duration::from_secs(3600));
        let expires_at = chrono::Utc::now()
            + chrono::Duration::from_std(lifetime).unwrap_or_else(|_| chrono::Duration::hours(1));

        let token_cache = TokenCache {
            access_token: token.access_token().secret().clone(),
            expires_at,
            tenant_id: tenant_id.clone(),
            resource: resource.cache_key().to_string(),
        };

        self.config_manager
            .save_token(&tenant_config.name, &token_cache)?;

        Ok(token_cache)
    }
}
