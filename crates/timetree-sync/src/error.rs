//! Sync-layer error types.

use thiserror::Error;
use timetree_api::TimeTreeError;

/// Errors surfaced by the sync coordinator and view mapping.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The session expired and re-authentication with the stored credentials
    /// failed. Terminal for the refresh cycle; the caller must obtain new
    /// credentials before trying again.
    #[error("Authentication failed: {0}")]
    AuthFailed(#[source] TimeTreeError),

    /// A transient failure. The local snapshot and cursor are unchanged and
    /// the caller may retry later.
    #[error("Update failed: {0}")]
    UpdateFailed(#[source] TimeTreeError),

    /// Malformed mutation input. Never sent over the wire.
    #[error("Invalid event input: {0}")]
    InvalidInput(String),
}

impl SyncError {
    /// Whether the caller may simply retry later without intervention.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::UpdateFailed(_))
    }

    /// User-friendly message for display.
    pub fn user_message(&self) -> String {
        match self {
            Self::AuthFailed(_) => {
                "Your TimeTree session has expired. Please sign in again.".to_string()
            }
            Self::UpdateFailed(_) => {
                "TimeTree is currently unavailable. Your calendar will refresh automatically."
                    .to_string()
            }
            Self::InvalidInput(msg) => format!("Invalid event data: {msg}"),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;

    #[test]
    fn test_recoverability() {
        let auth = SyncError::AuthFailed(TimeTreeError::Authentication("expired".into()));
        let update = SyncError::UpdateFailed(TimeTreeError::Api {
            status: 500,
            body: "boom".into(),
        });
        assert!(!auth.is_recoverable());
        assert!(update.is_recoverable());
        assert!(!SyncError::InvalidInput("bad".into()).is_recoverable());
    }

    #[test]
    fn test_user_messages() {
        let err = SyncError::InvalidInput("missing end time".into());
        assert!(err.user_message().contains("missing end time"));
    }
}
