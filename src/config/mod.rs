use crate::error::{Result, SyncError};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub log_level: String,

    #[serde(default)]
    pub current_tenant: Option<String>,

    #[serde(default)]
    pub reconcile: ReconcileSettings,
}

/// Tunables for the reconciliation engine.
///
/// Every field has a default so an empty `[reconcile]` table (or none at all)
/// yields a usable configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileSettings {
    /// SKU part numbers that make an individual mailbox eligible
    pub accepted_skus: Vec<String>,

    /// Plan that covers archiving on its own
    pub full_plan_sku: String,

    /// Plan that covers archiving only together with `archive_addon_sku`
    pub base_plan_sku: String,

    pub archive_addon_sku: String,

    /// Group whose members skip archive enablement
    pub exempt_group: String,

    /// Display-name prefix of permission-management groups
    pub group_prefix: String,

    /// Case-insensitive substrings that mark a failure as transient
    pub transient_patterns: Vec<String>,

    pub max_attempts: u32,
    pub retry_backoff_secs: u64,
    pub batch_size: usize,
    pub progress_interval: usize,
    pub parallel_concurrency: usize,

    /// Skip archive enablement for a mailbox whose retention assignment failed
    pub archive_requires_retention: bool,

    /// Outlook auto-mapping flag used when granting FullAccess
    pub auto_mapping: bool,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            accepted_skus: [
                "SPE_E3",
                "SPE_E5",
                "ENTERPRISEPACK",
                "ENTERPRISEPREMIUM",
                "EXCHANGEENTERPRISE",
                "EXCHANGEARCHIVE",
                "M365_G3_GOV",
                "SPE_F1",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            full_plan_sku: "EXCHANGEENTERPRISE".into(),
            base_plan_sku: "EXCHANGESTANDARD".into(),
            archive_addon_sku: "EXCHANGEARCHIVE_ADDON".into(),
            exempt_group: "Archive-Exempt".into(),
            group_prefix: "MBX-FA-".into(),
            transient_patterns: vec![
                "server side error".into(),
                "try again after some time".into(),
                "throttl".into(),
                "temporarily unavailable".into(),
                "timed out".into(),
            ],
            max_attempts: 3,
            retry_backoff_secs: 2,
            batch_size: 100,
            progress_interval: 500,
            parallel_concurrency: 10,
            archive_requires_retention: true,
            auto_mapping: true,
        }
    }
}

impl ReconcileSettings {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(SyncError::InvalidConfig("max_attempts must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(SyncError::InvalidConfig("batch_size must be at least 1".into()));
        }
        if self.parallel_concurrency == 0 {
            return Err(SyncError::InvalidConfig(
                "parallel_concurrency must be at least 1".into(),
            ));
        }
        if self.group_prefix.trim().is_empty() {
            return Err(SyncError::InvalidConfig("group_prefix must not be empty".into()));
        }
        Ok(())
    }
}

/// Tenant-specific configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TenantConfig {
    pub name: String,
    pub tenant_id: String,
    pub client_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Token cache structure
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenCache {
    pub access_token: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub tenant_id: String,
    pub resource: String,
}

/// Configuration manager
#[derive(Clone)]
pub struct ConfigManager {
    config_dir: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self> {
        let project_dirs = ProjectDirs::from("com", "m365sync", "m365sync").ok_or_else(|| {
            SyncError::ConfigError("Failed to determine config directory".into())
        })?;

        Self::with_dir(project_dirs.config_dir())
    }

    /// Use an explicit directory instead of the platform config location
    pub fn with_dir(dir: &Path) -> Result<Self> {
        let config_dir = dir.to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)?;
        }

        Ok(Self { config_dir })
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    pub fn tenants_file(&self) -> PathBuf {
        self.config_dir.join("tenants.toml")
    }

    pub fn token_cache_file(&self, tenant_name: &str, resource: &str) -> PathBuf {
        self.config_dir
            .join("cache")
            .join(format!("{}.{}.token", tenant_name, resource))
    }

    /// Load main config
    pub fn load_config(&self) -> Result<Config> {
        let config_path = self.config_file();

        if !config_path.exists() {
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(config_path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save main config
    pub fn save_config(&self, config: &Config) -> Result<()> {
        let contents = toml::to_string_pretty(config)
            .map_err(|e| SyncError::ConfigError(format!("Failed to serialize config: {}", e)))?;
        fs::write(self.config_file(), contents)?;
        Ok(())
    }

    /// Load all tenants
    pub fn load_tenants(&self) -> Result<Vec<TenantConfig>> {
        let tenants_path = self.tenants_file();

        if !tenants_path.exists() {
            return Ok(Vec::new());
        }

        let contents = fs::read_to_string(tenants_path)?;

        #[derive(Deserialize)]
        struct TenantsFile {
            #[serde(default)]
            tenants: Vec<TenantConfig>,
        }

        let file: TenantsFile = toml::from_str(&contents)?;
        Ok(file.tenants)
    }

    /// Save all tenants
    pub fn save_tenants(&self, tenants: &[TenantConfig]) -> Result<()> {
        #[derive(Serialize)]
        struct TenantsFile<'a> {
            tenants: &'a [TenantConfig],
        }

        let contents = toml::to_string_pretty(&TenantsFile { tenants })
            .map_err(|e| SyncError::ConfigError(format!("Failed to serialize tenants: {}", e)))?;
        fs::write(self.tenants_file(), contents)?;
        Ok(())
    }

    /// Add or update tenant
    pub fn add_tenant(&self, tenant: TenantConfig) -> Result<()> {
        let mut tenants = self.load_tenants()?;
        tenants.retain(|t| !t.name.eq_ignore_ascii_case(&tenant.name));
        tenants.push(tenant);
        self.save_tenants(&tenants)
    }

    /// Get tenant by name
    pub fn get_tenant(&self, name: &str) -> Result<TenantConfig> {
        self.load_tenants()?
            .into_iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| SyncError::TenantNotFound(name.to_string()))
    }

    /// Get active tenant
    pub fn get_active_tenant(&self) -> Result<Option<TenantConfig>> {
        match self.load_config()?.current_tenant {
            Some(tenant_name) => Ok(Some(self.get_tenant(&tenant_name)?)),
            None => Ok(None),
        }
    }

    /// Resolve `--tenant` if given, else the active tenant
    pub fn resolve_tenant(&self, name: Option<&str>) -> Result<TenantConfig> {
        match name {
            Some(name) => self.get_tenant(name),
            None => self.get_active_tenant()?.ok_or_else(|| {
                SyncError::ConfigError(
                    "No active tenant. Run 'm365sync tenant add' and 'm365sync tenant switch' first"
                        .into(),
                )
            }),
        }
    }

    /// Set the active tenant
    pub fn set_active_tenant(&self, tenant_name: &str) -> Result<()> {
        let tenant = self.get_tenant(tenant_name)?;

        let mut config = self.load_config()?;
        config.current_tenant = Some(tenant.name);
        self.save_config(&config)
    }

    /// Remove a tenant by name
    pub fn remove_tenant(&self, tenant_name: &str) -> Result<()> {
        let mut tenants = self.load_tenants()?;
        let original_len = tenants.len();
        tenants.retain(|t| !t.name.eq_ignore_ascii_case(tenant_name));

        if tenants.len() == original_len {
            return Err(SyncError::TenantNotFound(tenant_name.to_string()));
        }

        self.save_tenants(&tenants)?;

        let cache_dir = self.config_dir.join("cache");
        if cache_dir.exists() {
            let prefix = format!("{}.", tenant_name);
            for entry in fs::read_dir(&cache_dir)? {
                let entry = entry?;
                if entry.file_name().to_string_lossy().starts_with(&prefix) {
                    let _ = fs::remove_file(entry.path());
                }
            }
        }

        let config = self.load_config()?;
        if config
            .current_tenant
            .as_deref()
            .is_some_and(|c| c.eq_ignore_ascii_case(tenant_name))
        {
            let mut updated_config = config;
            updated_config.current_tenant = None;
            self.save_config(&updated_config)?;
        }

        Ok(())
    }

    /// Save token cache
    pub fn save_token(&self, tenant_name: &str, token: &TokenCache) -> Result<()> {
        let cache_dir = self.config_dir.join("cache");
        if !cache_dir.exists() {
            fs::create_dir_all(&cache_dir)?;
        }

        let contents = serde_json::to_string_pretty(token)?;
        fs::write(self.token_cache_file(tenant_name, &token.resource), contents)?;
        Ok(())
    }

    /// Load token cache, rejecting expired tokens
    pub fn load_token(&self, tenant_name: &str, resource: &str) -> Result<TokenCache> {
        let token_path = self.token_cache_file(tenant_name, resource);

        if !token_path.exists() {
            return Err(SyncError::TokenNotFound);
        }

        let contents = fs::read_to_string(token_path)?;
        let token: TokenCache = serde_json::from_str(&contents)?;

        // Leave a minute of slack so a long run does not start on a dying token
        if token.expires_at < chrono::Utc::now() + chrono::Duration::minutes(1) {
            return Err(SyncError::AuthError("Token expired".into()));
        }

        Ok(token)
    }
}
