use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Non-success response from Microsoft Graph or the Exchange admin API
    #[error("Remote call failed (HTTP {status}): {message}")]
    RemoteError { status: u16, message: String },

    /// Bulk enumeration of reference data could not complete
    #[error("Reference data fetch failed: {0}")]
    FetchError(String),

    /// A record returned by the remote side lacks a required field
    #[error("Malformed {kind} record: missing {field}")]
    MalformedRecord { kind: &'static str, field: &'static str },

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Token not found. Run 'm365sync tenant add' with a client secret first")]
    TokenNotFound,

    #[error("Tenant '{0}' not found")]
    TenantNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SyncError {
    /// HTTP status of a remote failure, if the error came back from a service
    pub fn status(&self) -> Option<u16> {
        match self {
            SyncError::RemoteError { status, .. } => Some(*status),
            SyncError::HttpError(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Wrap any failure during reference-data loading as a fetch error
    pub fn into_fetch_error(self, what: &str) -> SyncError {
        match self {
            SyncError::FetchError(_) => self,
            other => SyncError::FetchError(format!("{}: {}", what, other)),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

pub use SyncError as Error;

/// Parse a Graph or Exchange admin API error body and provide helpful context
pub fn enhance_remote_error(error_response: &str) -> String {
    if let Ok(error_json) = serde_json::from_str::<serde_json::Value>(error_response) {
        if let Some(error_obj) = error_json.get("error") {
            let code = error_obj
                .get("code")
                .and_then(|c| c.as_str())
                .unwrap_or("Unknown");
            let message = error_obj
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("No message");

            let hint = match code {
                "Unauthorized" | "InvalidAuthenticationToken" => {
                    "\nHint: the cached token may have expired. Delete the token cache and retry."
                }
                "Forbidden" | "InsufficientPrivileges" | "Authorization_RequestDenied" => {
                    "\nHint: the app registration needs Exchange.ManageAsApp, the Exchange Administrator role and Directory.Read.All."
                }
                "NotFound" | "Request_ResourceNotFound" => {
                    "\nHint: the object does not exist or has not replicated yet."
                }
                "TooManyRequests" => "\nHint: the service is throttling this tenant.",
                _ => "",
            };

            return format!("{}: {}{}", code, message, hint);
        }
    }

    error_response.to_string()
}
