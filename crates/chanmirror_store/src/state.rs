//! Sync-state records and the persisted document layout.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Outcome of the most recent sync attempt for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Every fetched message was incorporated.
    #[default]
    Success,
    /// Nothing was incorporated; the watermark did not move.
    Failed,
    /// Some messages were incorporated before a failure.
    Partial,
}

impl SyncStatus {
    /// Returns the wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Success => "success",
            SyncStatus::Failed => "failed",
            SyncStatus::Partial => "partial",
        }
    }

    /// Returns true for statuses that carry an error description.
    pub fn is_error(&self) -> bool {
        matches!(self, SyncStatus::Failed | SyncStatus::Partial)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Last-known sync progress of one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    /// Channel identifier. Never changes once the record exists.
    pub channel_id: String,
    /// Watermark: timestamp (epoch seconds) of the newest incorporated
    /// message. `None` means the channel was never synced successfully.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_timestamp: Option<f64>,
    /// Outcome of the most recent attempt.
    #[serde(default)]
    pub last_sync_status: SyncStatus,
    /// Messages incorporated by the most recent attempt (not cumulative).
    #[serde(default)]
    pub last_sync_message_count: u64,
    /// Error description, present for failed or partial attempts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_error: Option<String>,
}

impl SyncState {
    /// Creates a zero-valued record for a channel.
    pub fn new(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            last_sync_timestamp: None,
            last_sync_status: SyncStatus::Success,
            last_sync_message_count: 0,
            last_sync_error: None,
        }
    }

    /// Returns true if a watermark has been recorded.
    pub fn has_watermark(&self) -> bool {
        self.last_sync_timestamp.is_some()
    }

    /// Merges a partial update into this record.
    ///
    /// Returns `false` if the update tried to move the watermark backwards;
    /// the stored watermark is kept in that case and the rest of the update
    /// still applies.
    pub(crate) fn merge(&mut self, update: SyncStateUpdate) -> bool {
        let mut monotonic = true;

        if let Some(new_ts) = update.last_sync_timestamp {
            match self.last_sync_timestamp {
                Some(current) if new_ts < current => monotonic = false,
                _ => self.last_sync_timestamp = Some(new_ts),
            }
        }

        if let Some(status) = update.last_sync_status {
            self.last_sync_status = status;
        }

        if let Some(count) = update.last_sync_message_count {
            self.last_sync_message_count = count;
        }

        match update.last_sync_error {
            Some(error) => self.last_sync_error = Some(error),
            None if !self.last_sync_status.is_error() => self.last_sync_error = None,
            None => {}
        }

        monotonic
    }
}

/// Fields to merge onto a [`SyncState`]. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStateUpdate {
    /// New watermark.
    pub last_sync_timestamp: Option<f64>,
    /// New status.
    pub last_sync_status: Option<SyncStatus>,
    /// New message count.
    pub last_sync_message_count: Option<u64>,
    /// New error description.
    pub last_sync_error: Option<String>,
}

impl SyncStateUpdate {
    /// A successful attempt. A `None` timestamp keeps the current watermark.
    pub fn success(timestamp: impl Into<Option<f64>>, message_count: u64) -> Self {
        Self {
            last_sync_timestamp: timestamp.into(),
            last_sync_status: Some(SyncStatus::Success),
            last_sync_message_count: Some(message_count),
            last_sync_error: None,
        }
    }

    /// A failed attempt. The watermark is left untouched.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            last_sync_timestamp: None,
            last_sync_status: Some(SyncStatus::Failed),
            last_sync_message_count: Some(0),
            last_sync_error: Some(error.into()),
        }
    }

    /// An attempt that incorporated `message_count` messages, the newest at
    /// `timestamp`, before failing.
    pub fn partial(
        timestamp: impl Into<Option<f64>>,
        message_count: u64,
        error: impl Into<String>,
    ) -> Self {
        Self {
            last_sync_timestamp: timestamp.into(),
            last_sync_status: Some(SyncStatus::Partial),
            last_sync_message_count: Some(message_count),
            last_sync_error: Some(error.into()),
        }
    }
}

/// The persisted document: every channel's record keyed by channel id.
///
/// ```json
/// { "syncHistory": { "C1": { "channelId": "C1", "lastSyncTimestamp": 1701425400.0001, ... } } }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncHistory {
    /// Records keyed by channel id.
    #[serde(default)]
    pub sync_history: BTreeMap<String, SyncState>,
}
