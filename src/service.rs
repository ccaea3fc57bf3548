//! Extraction-service seam: the capability the lifecycle engine consumes,
//! plus the production NanoNets client.
//!
//! ## Why a trait?
//!
//! The lifecycle engine only needs two operations — accept bytes and return
//! a handle, then report the status of that handle — and the whole
//! resumability story depends on the engine never doing more than one poll
//! per invocation. Putting the capability behind [`ExtractionService`] keeps
//! the engine testable with a scripted mock and keeps retry/backoff policy
//! out of the core entirely (it belongs to whichever client implements the
//! trait, if anywhere).
//!
//! Handles are canonically `String` on both sides of the seam. The service
//! emits numeric-looking record ids, but they are persisted as text in the
//! lock record and compared as text when polling, so a single textual
//! representation is the only one that cannot drift.

use crate::error::Chunk2MdError;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Progress snapshot reported by the service while a job is processing.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Progress {
    /// Pages the service has finished so far.
    pub pages_done: u64,
    /// Wall-clock seconds the job has been processing.
    pub elapsed_secs: f64,
}

/// Result of a single status poll.
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus {
    /// Extraction finished; the rendered Markdown is attached. May be empty
    /// for legitimately blank inputs.
    Completed(String),
    /// Still processing — check again on a later run.
    Processing(Progress),
    /// The service declared the job failed. `retryable` is an extension
    /// point; the production API does not disambiguate, so the client
    /// reports `false` and leaves the decision to the operator.
    Failed { retryable: bool },
}

/// Asynchronous document-extraction capability.
///
/// `poll` must be a single check-and-return — implementations never block
/// waiting for completion. Waiting between polls is the outer scheduler's
/// job; that separation is what makes the pipeline resumable.
#[async_trait]
pub trait ExtractionService: Send + Sync {
    /// Upload one chunk for extraction. Returns the submission handle.
    async fn submit(&self, file_name: &str, bytes: Vec<u8>) -> Result<String, Chunk2MdError>;

    /// Check the status of a previously submitted job exactly once.
    async fn poll(&self, handle: &str) -> Result<PollStatus, Chunk2MdError>;
}

// ── NanoNets client ──────────────────────────────────────────────────────

const API_BASE: &str = "https://extraction-api.nanonets.com";

/// Production client for the NanoNets asynchronous extraction API.
#[derive(Debug, Clone)]
pub struct NanonetsClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    success: bool,
    record_id: Option<serde_json::Value>,
    message: Option<String>,
}

/// Raw status document for one record, as returned by `GET /files/{id}`.
///
/// Exposed (via [`NanonetsClient::file_status`]) for the CLI's
/// `--file-status` mode, which prints these fields verbatim.
#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct FileStatus {
    pub success: bool,
    #[serde(default)]
    pub processing_status: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub pages_processed: Option<u64>,
    #[serde(default)]
    pub processing_time: Option<f64>,
    #[serde(default)]
    pub detail: Option<String>,
}

impl FileStatus {
    /// The effective status string: the API has shipped it under both
    /// `processing_status` and `status` over time.
    pub fn effective_status(&self) -> Option<&str> {
        self.processing_status
            .as_deref()
            .or(self.status.as_deref())
    }
}

impl NanonetsClient {
    /// Create a client with the given bearer key and per-request timeout.
    pub fn new(api_key: impl Into<String>, timeout_secs: u64) -> Result<Self, Chunk2MdError> {
        Self::with_base_url(api_key, timeout_secs, API_BASE)
    }

    /// Create a client against a non-default endpoint (tests, proxies).
    pub fn with_base_url(
        api_key: impl Into<String>,
        timeout_secs: u64,
        base_url: impl Into<String>,
    ) -> Result<Self, Chunk2MdError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| Chunk2MdError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: base_url.into(),
        })
    }

    /// Fetch the raw status document for a handle.
    pub async fn file_status(&self, handle: &str) -> Result<FileStatus, Chunk2MdError> {
        let url = format!("{}/files/{}", self.base_url, handle);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| Chunk2MdError::PollTransport {
                handle: handle.into(),
                detail: e.to_string(),
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Chunk2MdError::PollTransport {
                handle: handle.into(),
                detail: e.to_string(),
            })?;

        if !status.is_success() {
            return Err(Chunk2MdError::PollTransport {
                handle: handle.into(),
                detail: format!("HTTP {status}: {body}"),
            });
        }

        serde_json::from_str(&body).map_err(|e| Chunk2MdError::PollTransport {
            handle: handle.into(),
            detail: format!("unparseable status body: {e}"),
        })
    }
}

#[async_trait]
impl ExtractionService for NanonetsClient {
    async fn submit(&self, file_name: &str, bytes: Vec<u8>) -> Result<String, Chunk2MdError> {
        let url = format!("{}/extract-async", self.base_url);
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str("application/pdf")
            .map_err(|e| Chunk2MdError::Internal(format!("multipart: {e}")))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("output_type", "markdown")
            .text("model_type", "nanonets");

        let chunk = file_name.to_string();
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Chunk2MdError::Submission {
                chunk: chunk.clone(),
                detail: e.to_string(),
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Chunk2MdError::Submission {
                chunk: chunk.clone(),
                detail: e.to_string(),
            })?;

        if !status.is_success() {
            return Err(Chunk2MdError::Submission {
                chunk,
                detail: format!("HTTP {status}: {body}"),
            });
        }

        let parsed: SubmitResponse =
            serde_json::from_str(&body).map_err(|e| Chunk2MdError::Submission {
                chunk: chunk.clone(),
                detail: format!("unparseable response: {e}"),
            })?;

        if !parsed.success {
            return Err(Chunk2MdError::Submission {
                chunk,
                detail: parsed
                    .message
                    .unwrap_or_else(|| "service reported failure with no message".into()),
            });
        }

        // record_id arrives as a number or a string depending on API
        // version; normalize to text either way.
        let handle = match parsed.record_id {
            Some(serde_json::Value::String(s)) => s,
            Some(serde_json::Value::Number(n)) => n.to_string(),
            other => {
                return Err(Chunk2MdError::Submission {
                    chunk,
                    detail: format!("missing or malformed record_id: {other:?}"),
                });
            }
        };

        debug!(chunk = file_name, handle, "submission accepted");
        Ok(handle)
    }

    async fn poll(&self, handle: &str) -> Result<PollStatus, Chunk2MdError> {
        let status = self.file_status(handle).await?;

        if !status.success {
            return Err(Chunk2MdError::PollTransport {
                handle: handle.into(),
                detail: status
                    .detail
                    .unwrap_or_else(|| "service reported an unspecified error".into()),
            });
        }

        match status.effective_status() {
            Some("completed") => Ok(PollStatus::Completed(
                status.content.unwrap_or_default(),
            )),
            Some("processing") => Ok(PollStatus::Processing(Progress {
                pages_done: status.pages_processed.unwrap_or(0),
                elapsed_secs: status.processing_time.unwrap_or(0.0),
            })),
            Some("failed") => Ok(PollStatus::Failed { retryable: false }),
            other => {
                warn!(handle, status = ?other, "unknown processing status");
                Err(Chunk2MdError::PollTransport {
                    handle: handle.into(),
                    detail: format!("unknown status: {other:?}"),
                })
            }
        }
    }
}
