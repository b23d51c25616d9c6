pub mod auth;
pub mod directory;
pub mod exchange_online;
pub mod session;

use crate::error::{Result, SyncError};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use std::time::Duration;

pub const GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";

/// Default retry configuration for read calls
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 1000;
const MAX_BACKOFF_MS: u64 = 30000;
const JITTER_FACTOR: f64 = 0.3; // +/- 30% jitter

/// Calculate backoff with jitter for exponential backoff
fn calculate_backoff_with_jitter(initial: Duration, attempt: u32) -> Duration {
    let base_backoff = initial.as_millis() as u64 * 2u64.pow(attempt);
    let capped_backoff = base_backoff.min(MAX_BACKOFF_MS);

    let jitter_range = (capped_backoff as f64 * JITTER_FACTOR) as u64;
    let jitter = if jitter_range > 0 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        std::time::SystemTime::now().hash(&mut hasher);
        (hasher.finish() % (jitter_range * 2)) as i64 - jitter_range as i64
    } else {
        0
    };

    Duration::from_millis((capped_backoff as i64 + jitter).max(0) as u64)
}

/// Send a read request, retrying 429, 5xx and connection failures.
///
/// `build` is called once per attempt because a `RequestBuilder` is consumed
/// by `send`. Non-success responses that are not retried become
/// [`SyncError::RemoteError`] carrying the status and the unpacked error body.
pub(crate) async fn send_with_retry<F>(
    build: F,
    label: &str,
    initial_backoff: Duration,
) -> Result<Response>
where
    F: Fn() -> RequestBuilder,
{
    let mut last_error = None;

    for attempt in 0..MAX_RETRIES {
        let is_last = attempt + 1 == MAX_RETRIES;

        match build().send().await {
            Ok(resp) => {
                let status = resp.status();

                if status == reqwest::StatusCode::TOO_MANY_REQUESTS && !is_last {
                    let wait_time = resp
                        .headers()
                        .get("Retry-After")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok())
                        .map(Duration::from_secs)
                        .unwrap_or_else(|| calculate_backoff_with_jitter(initial_backoff, attempt));

                    tracing::warn!(
                        request = label,
                        attempt = attempt + 1,
                        wait_ms = wait_time.as_millis() as u64,
                        "Rate limited (429), retrying"
                    );
                    tokio::time::sleep(wait_time).await;
                    continue;
                }

                if status.is_server_error() && !is_last {
                    let wait_time = calculate_backoff_with_jitter(initial_backoff, attempt);
                    tracing::warn!(
                        request = label,
                        %status,
                        attempt = attempt + 1,
                        wait_ms = wait_time.as_millis() as u64,
                        "Server error, retrying"
                    );
                    tokio::time::sleep(wait_time).await;
                    continue;
                }

                return check_status(resp).await;
            }
            Err(e) => {
                if !is_last {
                    let wait_time = calculate_backoff_with_jitter(initial_backoff, attempt);
                    tracing::warn!(
                        request = label,
                        error = %e,
                        attempt = attempt + 1,
                        "Connection error, retrying"
                    );
                    tokio::time::sleep(wait_time).await;
                    last_error = Some(e);
                    continue;
                }
                return Err(e.into());
            }
        }
    }

    Err(last_error.map(SyncError::from).unwrap_or_else(|| {
        SyncError::FetchError(format!("{} failed after {} retries", label, MAX_RETRIES))
    }))
}

/// Turn a non-success response into a `RemoteError`
pub(crate) async fn check_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let error_text = resp.text().await.unwrap_or_default();
    Err(SyncError::RemoteError {
        status: status.as_u16(),
        message: crate::error::enhance_remote_error(&error_text),
    })
}

/// Generic paginated response
///
/// Both Graph and the Exchange admin API return an OData `value` array and
/// an `@odata.nextLink` while more pages remain.
#[derive(Debug, Deserialize)]
pub struct PaginatedResponse<T> {
    pub value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

/// One page of results plus the token for the next one
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<String>,
}

/// Microsoft Graph read client
#[derive(Clone)]
pub struct GraphClient {
    client: Client,
    access_token: String,
    base_url: String,
    initial_backoff: Duration,
}

impl GraphClient {
    pub fn new(access_token: String) -> Self {
        Self::with_base_url(access_token, GRAPH_API_BASE)
    }

    /// Point the client at another base URL (mock servers, national clouds)
    pub fn with_base_url(access_token: String, base_url: &str) -> Self {
        Self {
            client: Client::new(),
            access_token,
            base_url: base_url.trim_end_matches('/').to_string(),
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        }
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    /// GET a single page. `next` is the `@odata.nextLink` of the previous page;
    /// `None` starts at `endpoint`.
    pub async fn get_page<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        next: Option<&str>,
    ) -> Result<Page<T>> {
        let url = match next {
            Some(link) => link.to_string(),
            None => self.endpoint_url(endpoint),
        };
        let response: PaginatedResponse<T> = self.get_raw_url(&url).await?;
        Ok(Page {
            items: response.value,
            next: response.next_link,
        })
    }

    /// Fetch all pages of a paginated endpoint, following `@odata.nextLink`
    pub async fn get_all_pages<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
    ) -> Result<Vec<T>> {
        let mut all_items: Vec<T> = Vec::new();
        let mut next: Option<String> = None;

        loop {
            let page: Page<T> = self.get_page(endpoint, next.as_deref()).await?;
            all_items.extend(page.items);

            match page.next {
                Some(link) => next = Some(link),
                None => break,
            }
        }

        Ok(all_items)
    }

    /// GET a raw URL (for following nextLink)
    async fn get_raw_url<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T> {
        let resp = send_with_retry(
            || {
                self.client
                    .get(url)
                    .bearer_auth(&self.access_token)
                    .header("ConsistencyLevel", "eventual")
            },
            url,
            self.initial_backoff,
        )
        .await?;

        Ok(resp.json::<T>().await?)
    }
}

/// Quote a value for use inside an OData string literal
pub fn odata_quote(value: &str) -> String {
    value.replace('\'', "''")
}
