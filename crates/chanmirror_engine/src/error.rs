//! Error types for the sync engine and scheduler.

use chanmirror_store::StoreError;
use std::time::Duration;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Invalid interval or settings. Never retried.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The remote history fetch failed.
    #[error("fetch failed: {message}")]
    Fetch {
        /// Error message.
        message: String,
        /// Whether the fetch can be retried.
        retryable: bool,
    },

    /// The remote source asked us to back off.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// Mandatory wait before the next request.
        retry_after: Duration,
    },

    /// A sync pass exceeded its time budget.
    #[error("Sync timeout after {0:?}")]
    Timeout(Duration),

    /// A sync pass is already running.
    #[error("Sync already in progress")]
    AlreadyInProgress,

    /// The retry budget for a channel was exhausted.
    #[error("sync of channel {channel_id} failed after {attempts} attempts: {message}")]
    PersistentFailure {
        /// Channel that could not be synced.
        channel_id: String,
        /// Attempts made, including the first.
        attempts: u32,
        /// Last error message.
        message: String,
    },

    /// One or more channels failed during a multi-channel pass.
    #[error("{} channel(s) failed to sync: {}", failures.len(), summarize(failures))]
    ChannelsFailed {
        /// Failed channel ids with their error messages.
        failures: Vec<(String, String)>,
    },

    /// Sync state could not be read or persisted.
    #[error("sync state error: {0}")]
    Store(#[from] StoreError),

    /// The executor task failed outside of a normal error return.
    #[error("executor error: {0}")]
    Executor(String),

    /// No async runtime was available to drive timers.
    #[error("no tokio runtime available")]
    NoRuntime,
}

impl SyncError {
    /// Creates a retryable fetch error.
    pub fn fetch_retryable(message: impl Into<String>) -> Self {
        Self::Fetch {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable fetch error.
    pub fn fetch_fatal(message: impl Into<String>) -> Self {
        Self::Fetch {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Fetch { retryable, .. } => *retryable,
            SyncError::RateLimited { .. } => true,
            SyncError::Timeout(_) => true,
            SyncError::PersistentFailure { .. } => true,
            SyncError::ChannelsFailed { .. } => true,
            SyncError::Executor(_) => true,
            SyncError::Store(_) => true,
            SyncError::Configuration(_) | SyncError::AlreadyInProgress | SyncError::NoRuntime => {
                false
            }
        }
    }
}

fn summarize(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(channel, message)| format!("{channel}: {message}"))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::fetch_retryable("connection reset").is_retryable());
        assert!(!SyncError::fetch_fatal("invalid_auth").is_retryable());
        assert!(SyncError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!SyncError::Configuration("bad".into()).is_retryable());
        assert!(!SyncError::AlreadyInProgress.is_retryable());
    }

    #[test]
    fn error_display() {
        assert_eq!(
            SyncError::AlreadyInProgress.to_string(),
            "Sync already in progress"
        );
        assert!(SyncError::Timeout(Duration::from_secs(30))
            .to_string()
            .starts_with("Sync timeout"));

        let err = SyncError::ChannelsFailed {
            failures: vec![("C1".into(), "boom".into()), ("C2".into(), "bang".into())],
        };
        let text = err.to_string();
        assert!(text.contains("2 channel(s)"));
        assert!(text.contains("C1: boom"));
        assert!(text.contains("C2: bang"));
    }
}
