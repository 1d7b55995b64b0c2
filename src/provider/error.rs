use crate::retry::Classification;
use thiserror::Error;

const MAX_BODY_CHARS: usize = 512;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Request timed out")]
    Timeout,

    #[error("HTTP {status} from {url}: {body}")]
    Status { status: u16, url: String, body: String },

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("Provider response did not include a request_id")]
    MissingTaskId,

    #[error("No result available for {0}")]
    NoResult(String),

    #[error("Provider configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    pub fn status(status: u16, url: impl Into<String>, body: &str) -> Self {
        let body = if body.chars().count() > MAX_BODY_CHARS {
            let cut: String = body.chars().take(MAX_BODY_CHARS).collect();
            format!("{}...", cut)
        } else {
            body.to_string()
        };
        ProviderError::Status {
            status,
            url: url.into(),
            body,
        }
    }

    /// Single source of truth for retry decisions on provider calls.
    ///
    /// 401 is retried within budget: the provider has been seen to return it
    /// transiently under load.
    pub fn classify(&self) -> Classification {
        match self {
            ProviderError::Connect(_) | ProviderError::Timeout => Classification::Retryable,
            ProviderError::Status { status, .. } => match status {
                500 | 502 | 503 | 401 => Classification::Retryable,
                _ => Classification::Fatal,
            },
            _ => Classification::Fatal,
        }
    }

    /// 404/405/422: the endpoint does not serve this shape, try the next one
    pub fn is_unsupported_shape(&self) -> bool {
        matches!(
            self,
            ProviderError::Status {
                status: 404 | 405 | 422,
                ..
            }
        )
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            ProviderError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::InvalidResponse(err.to_string())
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if let Some(status) = err.status() {
            ProviderError::status(status.as_u16(), err.url().map(|u| u.as_str()).unwrap_or(""), "")
        } else {
            ProviderError::Connect(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;
