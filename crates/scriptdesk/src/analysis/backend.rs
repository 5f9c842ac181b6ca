use async_trait::async_trait;
use thiserror::Error;

use super::retry::{Classify, ErrorKind};

/// Failures from a language-model backend.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Request timed out")]
    Timeout,

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Invalid reply: {0}")]
    InvalidReply(String),
}

impl Classify for LlmError {
    fn kind(&self) -> ErrorKind {
        match self {
            LlmError::RateLimited { .. } | LlmError::Connection(_) | LlmError::Timeout => {
                ErrorKind::Transient
            }
            LlmError::Api { status, .. } if *status >= 500 => ErrorKind::Transient,
            LlmError::Api { .. } | LlmError::Auth(_) | LlmError::InvalidReply(_) => {
                ErrorKind::Permanent
            }
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LlmError::Timeout
        } else if e.is_connect() || e.is_request() {
            LlmError::Connection(e.to_string())
        } else if e.is_decode() {
            LlmError::InvalidReply(e.to_string())
        } else {
            LlmError::Connection(e.to_string())
        }
    }
}

/// A chat-style completion endpoint: one system instruction, one user turn,
/// one text reply.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError>;
}
