//! Upstream paperless-ngx client: typed port trait plus the HTTP adapter.
//!
//! The engine only depends on `PaperlessClient`; the HTTP implementation
//! carries the transport policy: token auth, a per-call deadline, a global
//! concurrency cap, and exponential-backoff retry for transient failures
//! (transport errors, 429, 5xx). Any other 4xx is permanent and recorded
//! against the item instead of retried.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use dedupe_core::DedupeConfig;

use crate::error::{EngineError, Result};

// ── Wire types ─────────────────────────────────────────────────────────────

/// One upstream document as listed by the catalog endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamDocument {
    pub id: i64,
    pub title: String,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    #[serde(default)]
    pub correspondent: Option<String>,
    #[serde(default)]
    pub document_type: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub original_file_name: Option<String>,
    #[serde(default)]
    pub archive_file_name: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub archive_serial_number: Option<i64>,
}

/// One page of the upstream catalog.
#[derive(Debug, Clone, Default)]
pub struct DocumentPage {
    pub documents: Vec<UpstreamDocument>,
    pub total: u64,
    pub has_next: bool,
}

/// Partial metadata update pushed back upstream (batch tag/metadata kinds
/// and accepted AI suggestions).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correspondent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub add_tags: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub remove_tags: Vec<String>,
}

impl DocumentPatch {
    pub fn is_empty(&self) -> bool {
        self == &DocumentPatch::default()
    }
}

// ── Port trait ─────────────────────────────────────────────────────────────

/// What the engine needs from the upstream document server.
#[async_trait]
pub trait PaperlessClient: Send + Sync {
    /// One catalog page, 1-indexed.
    async fn list_documents(&self, page: u32, page_size: u32) -> Result<DocumentPage>;

    /// Extracted OCR text for one document.
    async fn get_content(&self, upstream_id: i64) -> Result<String>;

    /// Delete a document upstream. Only the batch orchestrator calls this.
    async fn delete_document(&self, upstream_id: i64) -> Result<()>;

    /// Apply a metadata patch upstream.
    async fn update_document(&self, upstream_id: i64, patch: &DocumentPatch) -> Result<()>;
}

// ── Retry policy ───────────────────────────────────────────────────────────

/// Exponential backoff for transient upstream failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub factor: u32,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            factor: 2,
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): base * factor^attempt,
    /// capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.factor.saturating_pow(attempt.min(16));
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Run `call` under the retry policy. Shared by the HTTP client and the
/// batch orchestrator's per-item upstream calls.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, op: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay(attempt);
                warn!(
                    "{op}: transient failure (attempt {}/{}), retrying in {:?}: {err}",
                    attempt + 1,
                    policy.max_attempts,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

// ── HTTP adapter ───────────────────────────────────────────────────────────

enum Auth {
    Token(String),
    Basic { username: String, password: String },
}

/// reqwest-backed client with the full transport policy applied.
pub struct HttpPaperlessClient {
    http: reqwest::Client,
    base_url: String,
    auth: Auth,
    limiter: Arc<Semaphore>,
    retry: RetryPolicy,
}

impl HttpPaperlessClient {
    pub fn new(config: &DedupeConfig) -> Result<Self> {
        if config.paperless_url.is_empty() {
            return Err(EngineError::InvalidConfig(
                "paperless_url is not configured".to_string(),
            ));
        }
        let auth = match (&config.paperless_api_token, &config.paperless_username) {
            (Some(token), _) => Auth::Token(token.clone()),
            (None, Some(username)) => Auth::Basic {
                username: username.clone(),
                password: config.paperless_password.clone().unwrap_or_default(),
            },
            (None, None) => {
                return Err(EngineError::InvalidConfig(
                    "either paperless_api_token or paperless_username is required".to_string(),
                ))
            }
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| EngineError::Internal(e.into()))?;

        Ok(Self {
            http,
            base_url: config.paperless_url.trim_end_matches('/').to_string(),
            auth,
            limiter: Arc::new(Semaphore::new(config.max_concurrent_requests)),
            retry: RetryPolicy::default(),
        })
    }

    fn apply_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            Auth::Token(token) => request.header("Authorization", format!("Token {token}")),
            Auth::Basic { username, password } => request.basic_auth(username, Some(password)),
        }
    }

    async fn send(&self, op: &str, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| EngineError::Internal(anyhow::anyhow!("request limiter closed")))?;

        let response = request
            .send()
            .await
            .map_err(|e| EngineError::transient(None, format!("{op}: {e}")))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = format!("{op}: upstream returned {status}");
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Err(EngineError::transient(Some(status.as_u16()), message))
        } else if status == StatusCode::NOT_FOUND {
            Err(EngineError::permanent(404, message))
        } else {
            Err(EngineError::permanent(status.as_u16(), message))
        }
    }
}

#[derive(Deserialize)]
struct DocumentListResponse {
    count: u64,
    next: Option<String>,
    results: Vec<UpstreamDocument>,
}

#[derive(Deserialize)]
struct DocumentDetailResponse {
    #[serde(default)]
    content: String,
}

#[async_trait]
impl PaperlessClient for HttpPaperlessClient {
    async fn list_documents(&self, page: u32, page_size: u32) -> Result<DocumentPage> {
        let url = format!(
            "{}/api/documents/?page={page}&page_size={page_size}&ordering=id",
            self.base_url
        );
        let url = url.as_str();
        with_retry(&self.retry, "list_documents", || async move {
            let response = self
                .send("list_documents", self.apply_auth(self.http.get(url)))
                .await?;
            let body: DocumentListResponse = response
                .json()
                .await
                .map_err(|e| EngineError::transient(None, format!("list_documents: {e}")))?;
            debug!(
                "list_documents page {page}: {} of {} documents",
                body.results.len(),
                body.count
            );
            Ok(DocumentPage {
                documents: body.results,
                total: body.count,
                has_next: body.next.is_some(),
            })
        })
        .await
    }

    async fn get_content(&self, upstream_id: i64) -> Result<String> {
        let url = format!("{}/api/documents/{upstream_id}/", self.base_url);
        let url = url.as_str();
        with_retry(&self.retry, "get_content", || async move {
            let response = self
                .send("get_content", self.apply_auth(self.http.get(url)))
                .await?;
            let body: DocumentDetailResponse = response
                .json()
                .await
                .map_err(|e| EngineError::transient(None, format!("get_content: {e}")))?;
            Ok(body.content)
        })
        .await
    }

    async fn delete_document(&self, upstream_id: i64) -> Result<()> {
        let url = format!("{}/api/documents/{upstream_id}/", self.base_url);
        let url = url.as_str();
        with_retry(&self.retry, "delete_document", || async move {
            self.send("delete_document", self.apply_auth(self.http.delete(url)))
                .await?;
            Ok(())
        })
        .await
    }

    async fn update_document(&self, upstream_id: i64, patch: &DocumentPatch) -> Result<()> {
        let url = format!("{}/api/documents/{upstream_id}/", self.base_url);
        let url = url.as_str();
        with_retry(&self.retry, "update_document", || async move {
            self.send(
                "update_document",
                self.apply_auth(self.http.patch(url)).json(patch),
            )
            .await?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_retry_delay_progression() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_millis(500));
        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(2), Duration::from_secs(2));
        // Capped at 30s no matter how many attempts.
        assert_eq!(policy.delay(10), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_with_retry_recovers_from_transient() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(1),
            ..Default::default()
        };
        let attempts = AtomicU32::new(0);
        let attempts = &attempts;

        let result = with_retry(&policy, "test", || async move {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(EngineError::transient(Some(500), "boom"))
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_gives_up_after_max_attempts() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(1),
            max_attempts: 3,
            ..Default::default()
        };
        let attempts = AtomicU32::new(0);
        let attempts = &attempts;

        let result: Result<()> = with_retry(&policy, "test", || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(EngineError::transient(Some(503), "still down"))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_does_not_retry_permanent() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(1),
            ..Default::default()
        };
        let attempts = AtomicU32::new(0);
        let attempts = &attempts;

        let result: Result<()> = with_retry(&policy, "test", || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(EngineError::permanent(404, "gone"))
        })
        .await;

        assert!(matches!(
            result,
            Err(EngineError::UpstreamPermanent { status: 404, .. })
        ));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_client_requires_url_and_auth() {
        let config = DedupeConfig::default();
        assert!(matches!(
            HttpPaperlessClient::new(&config),
            Err(EngineError::InvalidConfig(_))
        ));

        let mut config = DedupeConfig::default();
        config.paperless_url = "http://paperless.local:8000".to_string();
        assert!(matches!(
            HttpPaperlessClient::new(&config),
            Err(EngineError::InvalidConfig(_))
        ));

        config.paperless_api_token = Some("secret".to_string());
        assert!(HttpPaperlessClient::new(&config).is_ok());
    }

    #[test]
    fn test_patch_serialization_skips_empty_fields() {
        let patch = DocumentPatch {
            title: Some("New title".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(json, serde_json::json!({"title": "New title"}));
        assert!(!patch.is_empty());
        assert!(DocumentPatch::default().is_empty());
    }

    #[test]
    fn test_upstream_document_deserializes_with_missing_optionals() {
        let doc: UpstreamDocument = serde_json::from_str(
            r#"{
                "id": 12,
                "title": "Invoice",
                "created": "2024-03-01T10:00:00Z",
                "modified": "2024-03-02T10:00:00Z"
            }"#,
        )
        .unwrap();
        assert_eq!(doc.id, 12);
        assert!(doc.tags.is_empty());
        assert!(doc.file_size.is_none());
    }
}
