//! Differential channel sync.

use crate::applier::{DiscardApplier, MessageApplier};
use crate::config::DifferentialConfig;
use crate::error::{SyncError, SyncResult};
use crate::fetcher::{FetchError, HistoryFetcher, HistoryOptions, Message};
use chanmirror_store::{SyncStateStore, SyncStateUpdate};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Outcome of syncing one channel.
///
/// [`DifferentialSyncEngine::sync_channel`] never returns an error; every
/// outcome is encoded here.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSyncResult {
    /// Channel that was synced.
    pub channel_id: String,
    /// Whether every new message was incorporated.
    pub success: bool,
    /// New messages incorporated by this call.
    pub messages_retrieved: u64,
    /// Watermark after this call.
    pub last_timestamp: Option<f64>,
    /// Error description when `success` is false.
    pub error: Option<String>,
}

/// Fetches only messages newer than each channel's watermark.
///
/// For every call the engine:
///
/// 1. Reads the channel's watermark from the [`SyncStateStore`]
/// 2. Fetches history with the watermark as inclusive `oldest` bound (no
///    bound on the first sync)
/// 3. Drops messages at or below the watermark and hands the rest, oldest
///    first, to the [`MessageApplier`]
/// 4. Persists the new watermark, status and count
///
/// Rate-limit signals are always waited out and do not consume the retry
/// budget. Transient failures re-issue the identical request until the
/// [`RetryPolicy`](crate::RetryPolicy) gives up; the watermark is left
/// untouched so the next attempt resumes from the same point.
pub struct DifferentialSyncEngine<F: HistoryFetcher, A: MessageApplier = DiscardApplier> {
    config: DifferentialConfig,
    fetcher: F,
    applier: A,
    store: Arc<SyncStateStore>,
}

impl<F: HistoryFetcher> DifferentialSyncEngine<F, DiscardApplier> {
    /// Creates an engine that only tracks watermarks and counts.
    pub fn new(config: DifferentialConfig, fetcher: F, store: Arc<SyncStateStore>) -> Self {
        Self::with_applier(config, fetcher, DiscardApplier, store)
    }
}

impl<F: HistoryFetcher, A: MessageApplier> DifferentialSyncEngine<F, A> {
    /// Creates an engine that writes new messages through `applier`.
    pub fn with_applier(
        config: DifferentialConfig,
        fetcher: F,
        applier: A,
        store: Arc<SyncStateStore>,
    ) -> Self {
        Self {
            config,
            fetcher,
            applier,
            store,
        }
    }

    /// Returns the sync-state store.
    pub fn store(&self) -> &Arc<SyncStateStore> {
        &self.store
    }

    /// Returns the configuration.
    pub fn config(&self) -> &DifferentialConfig {
        &self.config
    }

    /// Returns the history fetcher.
    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Returns the message applier.
    pub fn applier(&self) -> &A {
        &self.applier
    }

    /// Forgets a channel's progress so the next sync is a full fetch.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be persisted.
    pub fn reset_channel(&self, channel_id: &str) -> SyncResult<()> {
        self.store.clear(channel_id)?;
        info!(channel = channel_id, "sync state reset");
        Ok(())
    }

    /// Syncs one channel.
    pub async fn sync_channel(&self, channel_id: &str) -> ChannelSyncResult {
        let watermark = self
            .store
            .get(channel_id)
            .and_then(|state| state.last_sync_timestamp);
        let options = HistoryOptions {
            oldest: watermark.map(format_timestamp),
            limit: self.config.page_limit,
        };

        debug!(channel = channel_id, oldest = ?options.oldest, "fetching channel history");

        let fetched = match self.fetch_with_retry(channel_id, &options).await {
            Ok(messages) => messages,
            Err(e) => {
                let message = e.to_string();
                error!(channel = channel_id, error = %message, "channel sync failed");
                self.record(channel_id, SyncStateUpdate::failed(message.clone()));
                return ChannelSyncResult {
                    channel_id: channel_id.to_string(),
                    success: false,
                    messages_retrieved: 0,
                    last_timestamp: watermark,
                    error: Some(message),
                };
            }
        };

        let batch = new_messages(channel_id, fetched, watermark);
        let timestamps: Vec<Option<f64>> = batch.iter().map(Message::timestamp).collect();

        match self.applier.apply(channel_id, &batch).await {
            Ok(()) => {
                let newest = newest_of(&timestamps);
                let count = batch.len() as u64;
                let last_timestamp = newest.or(watermark);

                if let Err(e) = self
                    .store
                    .update(channel_id, SyncStateUpdate::success(newest, count))
                {
                    let message = format!("failed to persist sync state: {e}");
                    error!(channel = channel_id, error = %message, "channel sync failed");
                    return ChannelSyncResult {
                        channel_id: channel_id.to_string(),
                        success: false,
                        messages_retrieved: count,
                        last_timestamp: watermark,
                        error: Some(message),
                    };
                }

                info!(
                    channel = channel_id,
                    messages = count,
                    watermark = ?last_timestamp,
                    "channel synced"
                );
                ChannelSyncResult {
                    channel_id: channel_id.to_string(),
                    success: true,
                    messages_retrieved: count,
                    last_timestamp,
                    error: None,
                }
            }
            Err(e) => {
                let applied = e.applied.min(batch.len());
                let newest = newest_of(&timestamps[..applied]);
                let message = e.to_string();

                warn!(
                    channel = channel_id,
                    applied,
                    total = batch.len(),
                    error = %message,
                    "channel partially synced"
                );
                self.record(
                    channel_id,
                    SyncStateUpdate::partial(newest, applied as u64, message.clone()),
                );
                ChannelSyncResult {
                    channel_id: channel_id.to_string(),
                    success: false,
                    messages_retrieved: applied as u64,
                    last_timestamp: newest.or(watermark),
                    error: Some(message),
                }
            }
        }
    }

    async fn fetch_with_retry(
        &self,
        channel_id: &str,
        options: &HistoryOptions,
    ) -> SyncResult<Vec<Message>> {
        let policy = &self.config.retry;
        let mut retry_count = 0u32;

        loop {
            match self.fetcher.get_channel_history(channel_id, options).await {
                Ok(messages) => return Ok(messages),
                Err(FetchError::RateLimited { retry_after }) => {
                    warn!(channel = channel_id, ?retry_after, "rate limited, waiting");
                    tokio::time::sleep(retry_after).await;
                }
                Err(FetchError::Failed { message, retryable }) => {
                    if !retryable {
                        return Err(SyncError::fetch_fatal(message));
                    }
                    if !policy.should_retry(retry_count) {
                        return Err(SyncError::PersistentFailure {
                            channel_id: channel_id.to_string(),
                            attempts: retry_count + 1,
                            message,
                        });
                    }

                    let delay = policy.calculate_delay(retry_count);
                    retry_count += 1;
                    warn!(
                        channel = channel_id,
                        attempt = retry_count,
                        ?delay,
                        error = %message,
                        "fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn record(&self, channel_id: &str, update: SyncStateUpdate) {
        if let Err(e) = self.store.update(channel_id, update) {
            error!(channel = channel_id, error = %e, "failed to persist sync state");
        }
    }
}

/// Drops messages the watermark already covers and orders the rest oldest
/// first. Messages without a parseable timestamp cannot be placed against
/// the watermark and are skipped.
fn new_messages(channel_id: &str, fetched: Vec<Message>, watermark: Option<f64>) -> Vec<Message> {
    let mut batch: Vec<Message> = fetched
        .into_iter()
        .filter(|message| match (message.timestamp(), watermark) {
            (Some(ts), Some(mark)) => ts > mark,
            (None, _) => {
                warn!(channel = channel_id, ts = %message.ts, "skipping message with unparseable timestamp");
                false
            }
            (Some(_), None) => true,
        })
        .collect();

    batch.sort_by(|a, b| {
        a.timestamp()
            .partial_cmp(&b.timestamp())
            .unwrap_or(Ordering::Equal)
    });
    batch
}

fn newest_of(timestamps: &[Option<f64>]) -> Option<f64> {
    timestamps.iter().flatten().copied().reduce(f64::max)
}

fn format_timestamp(ts: f64) -> String {
    format!("{ts}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_formatting() {
        assert_eq!(format_timestamp(1234567890.0), "1234567890");
        assert_eq!(format_timestamp(1234567892.0002), "1234567892.0002");
    }

    #[test]
    fn boundary_messages_dropped() {
        let fetched = vec![
            Message::new("30.0", "c"),
            Message::new("20.0", "b"),
            Message::new("10.0", "a"),
        ];
        let batch = new_messages("C1", fetched, Some(20.0));

        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].ts, "30.0");
    }

    #[test]
    fn batch_sorted_oldest_first() {
        let fetched = vec![Message::new("3", "c"), Message::new("1", "a"), Message::new("2", "b")];
        let batch = new_messages("C1", fetched, None);

        let ts: Vec<_> = batch.iter().map(|m| m.ts.as_str()).collect();
        assert_eq!(ts, vec!["1", "2", "3"]);
    }

    #[test]
    fn unparseable_timestamps_skipped() {
        let fetched = vec![Message::new("garbage", "x"), Message::new("5.5", "y")];
        let batch = new_messages("C1", fetched.clone(), Some(1.0));
        let timestamps: Vec<_> = batch.iter().map(Message::timestamp).collect();

        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].ts, "5.5");
        assert!(new_messages("C1", fetched, None).iter().all(|m| m.ts != "garbage"));
        assert_eq!(newest_of(&timestamps), Some(5.5));
        assert_eq!(newest_of(&[None]), None);
    }
}
