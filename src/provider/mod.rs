//! Queue-based generation provider protocol
//!
//! A job goes through three round-trips against the provider queue:
//!
//! - submit: `POST {base}/{model}` returns a `request_id`
//! - status: `GET {base}/{model}/requests/{id}/status` until terminal
//! - result: one of several endpoint/payload shapes, see [`client`]
//!
//! [`GenerationProvider`] is the seam the orchestrator drives; the production
//! implementation is [`ProviderJobClient`].

pub mod client;
pub mod error;
pub mod extract;
pub mod http;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

pub use client::{ProviderClientConfig, ProviderJobClient};
pub use error::{ProviderError, Result};
pub use http::{HttpConfig, ProviderHttp};

/// Kind of generation job, used for pricing and model selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    Generate,
    Edit,
    Merge,
    Upscale,
    FaceSwap,
    Retouch,
}

impl JobKind {
    pub const ALL: [JobKind; 6] = [
        JobKind::Generate,
        JobKind::Edit,
        JobKind::Merge,
        JobKind::Upscale,
        JobKind::FaceSwap,
        JobKind::Retouch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Generate => "generate",
            JobKind::Edit => "edit",
            JobKind::Merge => "merge",
            JobKind::Upscale => "upscale",
            JobKind::FaceSwap => "face-swap",
            JobKind::Retouch => "retouch",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        JobKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown job kind: {}", s))
    }
}

/// Normalized remote job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Succeeded,
    Failed,
    NotFound,
}

impl JobStatus {
    /// Map a raw provider status string
    pub fn from_provider(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "COMPLETED" | "COMPLETED_WITH_WARNINGS" | "SUCCEEDED" => JobStatus::Succeeded,
            "FAILED" | "ERROR" => JobStatus::Failed,
            "IN_QUEUE" => JobStatus::Queued,
            _ => JobStatus::Processing,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::NotFound
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::NotFound => "not_found",
        };
        f.write_str(s)
    }
}

/// One observation of a remote job
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub status: JobStatus,
    /// Where the result can be fetched once succeeded
    pub result_ref: Option<String>,
    pub error: Option<String>,
    pub raw: Option<Value>,
}

impl StatusReport {
    pub fn not_found() -> Self {
        Self {
            status: JobStatus::NotFound,
            result_ref: None,
            error: None,
            raw: None,
        }
    }
}

/// A resolved generation result
#[derive(Debug, Clone, PartialEq)]
pub enum Asset {
    Url {
        url: String,
        file_name: Option<String>,
    },
    Inline {
        data: Bytes,
        content_type: Option<String>,
        file_name: Option<String>,
    },
}

impl Asset {
    pub fn file_name(&self) -> Option<&str> {
        match self {
            Asset::Url { file_name, .. } | Asset::Inline { file_name, .. } => file_name.as_deref(),
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            Asset::Url { url, .. } => Some(url),
            Asset::Inline { .. } => None,
        }
    }
}

/// Provider surface driven by the orchestrator
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Submit a job and return the provider task id
    async fn submit(&self, kind: JobKind, model: &str, payload: &Value) -> Result<String>;

    /// Observe a submitted job. `model` locates the status endpoint when the
    /// task is not cached locally; tasks the provider does not know report
    /// `not_found`.
    async fn poll_status(&self, task_id: &str, model: &str) -> Result<StatusReport>;

    /// Turn a result reference into an asset
    async fn resolve_result(&self, result_ref: &str) -> Result<Asset>;
}
