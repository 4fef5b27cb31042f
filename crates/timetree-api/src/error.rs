//! TimeTree-specific error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TimeTreeError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limited (HTTP 429)")]
    RateLimited { retry_after: Option<u64> },

    #[error("API error: HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Connection error: {0}")]
    Connection(#[from] reqwest::Error),

    #[error("Invalid input: {0}")]
    Validation(String),
}

impl TimeTreeError {
    /// User-friendly error message for UI display.
    pub fn user_message(&self) -> String {
        match self {
            Self::Authentication(_) => {
                "Your TimeTree session has expired. Please sign in again.".to_string()
            }
            Self::RateLimited {
                retry_after: Some(secs),
            } => format!("Too many requests. Please wait {} seconds.", secs),
            Self::RateLimited { retry_after: None } => {
                "Too many requests. Please wait a moment.".to_string()
            }
            Self::Api { status, .. } => format!("TimeTree error (HTTP {})", status),
            Self::Connection(_) => "Network error. Check your connection.".to_string(),
            Self::Validation(msg) => format!("Invalid event: {}", msg),
        }
    }

    /// Whether this error should trigger a re-authentication attempt.
    pub fn should_reauthenticate(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }

    /// Whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Connection(_))
    }
}
