//! Full sync passes over a set of channels.

use crate::applier::{DiscardApplier, MessageApplier};
use crate::differential::DifferentialSyncEngine;
use crate::error::{SyncError, SyncResult};
use crate::fetcher::HistoryFetcher;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Result of one successful sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncOutcome {
    /// Messages incorporated across all channels.
    pub messages_count: u64,
    /// Wall time of the pass.
    pub duration: Duration,
}

/// Performs one full sync pass.
///
/// The executor is the authority on single-flight: the scheduler and manual
/// triggers both consult [`is_sync_in_progress`](Self::is_sync_in_progress)
/// instead of keeping their own locks.
#[async_trait]
pub trait SyncExecutor: Send + Sync {
    /// Syncs `channels`, or the executor's default set when empty.
    async fn execute_sync(&self, channels: &[String]) -> SyncResult<SyncOutcome>;

    /// Returns true while a pass is running.
    fn is_sync_in_progress(&self) -> bool;
}

#[async_trait]
impl<T: SyncExecutor + ?Sized> SyncExecutor for Arc<T> {
    async fn execute_sync(&self, channels: &[String]) -> SyncResult<SyncOutcome> {
        (**self).execute_sync(channels).await
    }

    fn is_sync_in_progress(&self) -> bool {
        (**self).is_sync_in_progress()
    }
}

/// Sequential multi-channel executor built on [`DifferentialSyncEngine`].
///
/// A failing channel does not stop the pass; the remaining channels are
/// still synced and the pass then fails with [`SyncError::ChannelsFailed`].
/// Because watermarks are per channel, retrying the whole pass only
/// re-fetches what the failed channels are missing.
pub struct ChannelSyncExecutor<F: HistoryFetcher, A: MessageApplier = DiscardApplier> {
    engine: DifferentialSyncEngine<F, A>,
    default_channels: RwLock<Vec<String>>,
    in_progress: AtomicBool,
}

impl<F: HistoryFetcher, A: MessageApplier> ChannelSyncExecutor<F, A> {
    /// Creates an executor syncing `default_channels` when asked for none.
    pub fn new(engine: DifferentialSyncEngine<F, A>, default_channels: Vec<String>) -> Self {
        Self {
            engine,
            default_channels: RwLock::new(default_channels),
            in_progress: AtomicBool::new(false),
        }
    }

    /// Returns the underlying engine.
    pub fn engine(&self) -> &DifferentialSyncEngine<F, A> {
        &self.engine
    }

    /// Returns the default channel set.
    pub fn default_channels(&self) -> Vec<String> {
        self.default_channels.read().clone()
    }

    /// Replaces the default channel set.
    pub fn set_default_channels(&self, channels: Vec<String>) {
        *self.default_channels.write() = channels;
    }
}

#[async_trait]
impl<F: HistoryFetcher, A: MessageApplier> SyncExecutor for ChannelSyncExecutor<F, A> {
    async fn execute_sync(&self, channels: &[String]) -> SyncResult<SyncOutcome> {
        let _guard = InProgressGuard::acquire(&self.in_progress)?;

        let channels = if channels.is_empty() {
            self.default_channels()
        } else {
            channels.to_vec()
        };

        let start = Instant::now();
        let mut messages_count = 0u64;
        let mut failures = Vec::new();

        for channel_id in &channels {
            let result = self.engine.sync_channel(channel_id).await;
            messages_count += result.messages_retrieved;
            if !result.success {
                failures.push((
                    channel_id.clone(),
                    result.error.unwrap_or_else(|| "unknown error".into()),
                ));
            }
        }

        let duration = start.elapsed();
        if !failures.is_empty() {
            warn!(
                channels = channels.len(),
                failed = failures.len(),
                messages = messages_count,
                "sync pass finished with failures"
            );
            return Err(SyncError::ChannelsFailed { failures });
        }

        info!(
            channels = channels.len(),
            messages = messages_count,
            ?duration,
            "sync pass finished"
        );
        Ok(SyncOutcome {
            messages_count,
            duration,
        })
    }

    fn is_sync_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }
}

/// Holds the in-progress flag for the lifetime of a pass.
struct InProgressGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InProgressGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> SyncResult<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| SyncError::AlreadyInProgress)?;
        Ok(Self { flag })
    }
}

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DifferentialConfig;
    use crate::fetcher::{FetchError, Message, MockFetcher};
    use crate::retry::RetryPolicy;
    use chanmirror_store::{InMemoryBackend, SyncStateStore, SyncStatus};

    fn executor(fetcher: MockFetcher, channels: &[&str]) -> ChannelSyncExecutor<MockFetcher> {
        let store = Arc::new(SyncStateStore::open(InMemoryBackend::new()).unwrap());
        let config = DifferentialConfig::new().with_retry(RetryPolicy::no_retry());
        let engine = DifferentialSyncEngine::new(config, fetcher, store);
        ChannelSyncExecutor::new(engine, channels.iter().map(|c| c.to_string()).collect())
    }

    #[tokio::test]
    async fn empty_request_uses_default_channels() {
        let fetcher = MockFetcher::new();
        fetcher.push_message("C1", Message::new("1.0", "a"));
        fetcher.push_message("C2", Message::new("2.0", "b"));
        fetcher.push_message("C2", Message::new("3.0", "c"));

        let executor = executor(fetcher, &["C1", "C2"]);
        let outcome = executor.execute_sync(&[]).await.unwrap();

        assert_eq!(outcome.messages_count, 3);
        assert!(!executor.is_sync_in_progress());
    }

    #[tokio::test]
    async fn explicit_channels_override_defaults() {
        let fetcher = MockFetcher::new();
        fetcher.push_message("C1", Message::new("1.0", "a"));
        fetcher.push_message("C9", Message::new("2.0", "b"));

        let executor = executor(fetcher, &["C1"]);
        executor.execute_sync(&["C9".to_string()]).await.unwrap();

        let requests = executor.engine().fetcher().requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0, "C9");
    }

    #[tokio::test]
    async fn failing_channel_does_not_stop_pass() {
        let fetcher = MockFetcher::new();
        fetcher.fail_next(FetchError::transient("gateway timeout"));
        fetcher.push_message("C2", Message::new("5.0", "b"));

        let executor = executor(fetcher, &["C1", "C2"]);
        let err = executor.execute_sync(&[]).await.unwrap_err();

        match err {
            SyncError::ChannelsFailed { failures } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].0, "C1");
                assert!(failures[0].1.contains("gateway timeout"));
            }
            other => panic!("unexpected error: {other}"),
        }

        let store = executor.engine().store();
        assert_eq!(store.get("C1").unwrap().last_sync_status, SyncStatus::Failed);
        assert_eq!(store.get("C2").unwrap().last_sync_timestamp, Some(5.0));
    }

    #[test]
    fn guard_is_exclusive() {
        let flag = AtomicBool::new(false);
        let guard = InProgressGuard::acquire(&flag).unwrap();
        assert!(matches!(
            InProgressGuard::acquire(&flag),
            Err(SyncError::AlreadyInProgress)
        ));

        drop(guard);
        assert!(InProgressGuard::acquire(&flag).is_ok());
    }
}
