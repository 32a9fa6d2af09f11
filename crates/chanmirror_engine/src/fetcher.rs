//! Remote history boundary.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// A message as returned by the remote source.
///
/// Only the timestamp is interpreted by the engine. Everything else is
/// passed through to the [`MessageApplier`](crate::MessageApplier).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// String-encoded fractional epoch seconds, e.g. `"1701425400.000100"`.
    pub ts: String,
    /// Author id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Message body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Remaining fields, kept verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Message {
    /// Creates a message with a timestamp and text.
    pub fn new(ts: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            ts: ts.into(),
            user: None,
            text: Some(text.into()),
            extra: serde_json::Map::new(),
        }
    }

    /// Parses the timestamp, or `None` if it is not a finite number.
    pub fn timestamp(&self) -> Option<f64> {
        self.ts.trim().parse::<f64>().ok().filter(|ts| ts.is_finite())
    }
}

/// Options for one history request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryOptions {
    /// Inclusive lower bound, string-encoded like [`Message::ts`].
    pub oldest: Option<String>,
    /// Page size for the transport's own pagination.
    pub limit: u32,
}

/// Errors reported by a [`HistoryFetcher`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    /// The remote source asked for a pause before the next request.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// How long to wait.
        retry_after: Duration,
    },

    /// Any other failure.
    #[error("{message}")]
    Failed {
        /// Error message.
        message: String,
        /// Whether repeating the request may succeed.
        retryable: bool,
    },
}

impl FetchError {
    /// A transient failure (network, 5xx).
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            retryable: true,
        }
    }

    /// A failure that repeating the request cannot fix.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            retryable: false,
        }
    }

    /// A rate-limit signal.
    pub fn rate_limited(retry_after: Duration) -> Self {
        Self::RateLimited { retry_after }
    }
}

/// Retrieves channel history from the remote source.
///
/// Implementations own pagination, authentication and rate-limit plumbing
/// beneath this single call: they return every message at or after
/// `options.oldest`, in any order.
#[async_trait]
pub trait HistoryFetcher: Send + Sync {
    /// Fetches the channel's messages.
    async fn get_channel_history(
        &self,
        channel_id: &str,
        options: &HistoryOptions,
    ) -> Result<Vec<Message>, FetchError>;
}

#[async_trait]
impl<T: HistoryFetcher + ?Sized> HistoryFetcher for Arc<T> {
    async fn get_channel_history(
        &self,
        channel_id: &str,
        options: &HistoryOptions,
    ) -> Result<Vec<Message>, FetchError> {
        (**self).get_channel_history(channel_id, options).await
    }
}

/// An in-memory fetcher for testing.
///
/// Serves seeded channel histories newest-first, honouring `oldest` as an
/// inclusive bound. Scripted failures are returned before any data.
#[derive(Debug, Default)]
pub struct MockFetcher {
    histories: Mutex<HashMap<String, Vec<Message>>>,
    failures: Mutex<VecDeque<FetchError>>,
    requests: Mutex<Vec<(String, HistoryOptions)>>,
}

impl MockFetcher {
    /// Creates an empty mock fetcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a message to a channel's history.
    pub fn push_message(&self, channel_id: &str, message: Message) {
        self.histories
            .lock()
            .entry(channel_id.to_string())
            .or_default()
            .push(message);
    }

    /// Queues an error for the next request.
    pub fn fail_next(&self, error: FetchError) {
        self.failures.lock().push_back(error);
    }

    /// Queues the same error for the next `times` requests.
    pub fn fail_times(&self, times: usize, error: FetchError) {
        let mut failures = self.failures.lock();
        for _ in 0..times {
            failures.push_back(error.clone());
        }
    }

    /// Returns every request received so far.
    pub fn requests(&self) -> Vec<(String, HistoryOptions)> {
        self.requests.lock().clone()
    }

    /// Number of requests received so far.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl HistoryFetcher for MockFetcher {
    async fn get_channel_history(
        &self,
        channel_id: &str,
        options: &HistoryOptions,
    ) -> Result<Vec<Message>, FetchError> {
        self.requests
            .lock()
            .push((channel_id.to_string(), options.clone()));

        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }

        let oldest = options.oldest.as_deref().and_then(|o| o.parse::<f64>().ok());
        let mut messages: Vec<Message> = self
            .histories
            .lock()
            .get(channel_id)
            .map(|history| {
                history
                    .iter()
                    .filter(|m| match (oldest, m.timestamp()) {
                        (Some(bound), Some(ts)) => ts >= bound,
                        _ => true,
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        messages.sort_by(|a, b| {
            b.timestamp()
                .partial_cmp(&a.timestamp())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(messages)
    }
}
