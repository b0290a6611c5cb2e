//! Ingestion error types

use thiserror::Error;

/// Failures talking to the metrics provider
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestError {
    #[error("Provider request timed out")]
    Timeout,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited by provider")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Provider error {status}: {message}")]
    Provider { status: u16, message: String },

    /// Private, deleted or never existed; retrying will not help
    #[error("Content unavailable: {reason}")]
    ContentUnavailable { reason: String },

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("Provider configuration error: {0}")]
    Config(String),
}

impl IngestError {
    /// Permanent failures reject the submission instead of leaving it stale
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::ContentUnavailable { .. })
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::ContentUnavailable {
            reason: reason.into(),
        }
    }
}

impl From<reqwest::Error> for IngestError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            IngestError::Timeout
        } else if e.is_decode() {
            IngestError::InvalidResponse(e.to_string())
        } else {
            IngestError::Network(e.to_string())
        }
    }
}

pub type IngestResult<T> = Result<T, IngestError>;

/// Reasons an inbound webhook is refused before processing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WebhookError {
    #[error("Missing signature header")]
    MissingSignature,

    #[error("Signature mismatch")]
    InvalidSignature,

    #[error("Source address {0} not allowed")]
    ForbiddenSource(String),

    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Invalid allowlist entry: {0}")]
    InvalidAllowlist(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unavailable_content_is_permanent() {
        assert!(IngestError::unavailable("private").is_permanent());
        assert!(!IngestError::Timeout.is_permanent());
        assert!(!IngestError::RateLimited {
            retry_after_secs: Some(30)
        }
        .is_permanent());
        assert!(!IngestError::Provider {
            status: 503,
            message: "busy".into()
        }
        .is_permanent());
    }
}
