//! LLM error types and their classification

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// How a failure should be handled by the caller
///
/// Only `Retryable` failures are worth another attempt. `DataQuality` covers responses that
/// arrived but cannot be used; the structured-output extractor deals with those.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Retryable,
    Fatal,
    DataQuality,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorClass::Retryable => "retryable",
            ErrorClass::Fatal => "fatal",
            ErrorClass::DataQuality => "data_quality",
        };
        write!(f, "{}", s)
    }
}

/// Errors that can occur during LLM operations
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Empty response from model")]
    EmptyResponse,

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Statuses worth retrying: request timeout, throttling, server side failures
fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429) || status >= 500
}

impl LlmError {
    /// Classify this error for the retry policy
    pub fn class(&self) -> ErrorClass {
        match self {
            LlmError::RateLimited { .. } => ErrorClass::Retryable,
            LlmError::ApiError { status, .. } if is_retryable_status(*status) => ErrorClass::Retryable,
            LlmError::ApiError { .. } => ErrorClass::Fatal,
            LlmError::Network(e) if e.is_builder() => ErrorClass::Fatal,
            LlmError::Network(_) => ErrorClass::Retryable,
            LlmError::Connection(_) => ErrorClass::Retryable,
            LlmError::Timeout(_) => ErrorClass::Retryable,
            LlmError::Config(_) => ErrorClass::Fatal,
            LlmError::InvalidResponse(_) => ErrorClass::DataQuality,
            LlmError::EmptyResponse => ErrorClass::DataQuality,
            LlmError::Json(_) => ErrorClass::DataQuality,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }

    /// Get the retry duration if this is a rate limit error
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Map a transport failure onto the error taxonomy
pub(crate) fn from_transport(err: reqwest::Error, timeout: Duration) -> LlmError {
    if err.is_timeout() {
        LlmError::Timeout(timeout)
    } else if err.is_connect() {
        LlmError::Connection(err.to_string())
    } else {
        LlmError::Network(err)
    }
}

/// Turn a non-success HTTP response into an `LlmError`, pass successes through
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    let status = response.status().as_u16();
    if response.status().is_success() {
        return Ok(response);
    }

    if status == 429 {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(60);
        return Err(LlmError::RateLimited {
            retry_after: Duration::from_secs(retry_after),
        });
    }

    let message = response.text().await.unwrap_or_default();
    Err(LlmError::ApiError { status, message })
}
