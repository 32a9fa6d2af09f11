//! Configuration for the sync engine and scheduler.

use crate::error::{SyncError, SyncResult};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Minimum spacing between two timer-driven sync passes, regardless of the
/// configured interval.
pub const MIN_SYNC_SPACING: Duration = Duration::from_secs(60);

/// Auto-sync scheduler settings.
///
/// Field names serialize in camelCase so a settings file reads:
///
/// ```json
/// { "enabled": true, "intervalMs": 1800000, "initialSyncOnStartup": true,
///   "maxRetryCount": 3, "retryBackoffMs": 1000, "syncTimeoutMs": 300000 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerSettings {
    /// Whether the scheduler should run.
    pub enabled: bool,
    /// Period between timer-driven passes, in milliseconds.
    pub interval_ms: u64,
    /// Run a manual-tagged pass as soon as the scheduler starts.
    pub initial_sync_on_startup: bool,
    /// Retries after a failed pass.
    pub max_retry_count: u32,
    /// Base backoff delay, in milliseconds.
    pub retry_backoff_ms: u64,
    /// Time budget for one executor call, in milliseconds.
    pub sync_timeout_ms: u64,
    /// Cap for any single backoff delay, in milliseconds.
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
}

fn default_max_retry_delay_ms() -> u64 {
    300_000
}

impl SchedulerSettings {
    /// Creates settings with the given interval and defaults elsewhere.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_ms: u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            ..Self::default()
        }
    }

    /// Sets whether the scheduler is enabled.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets whether to sync immediately on start.
    pub fn with_initial_sync(mut self, initial_sync_on_startup: bool) -> Self {
        self.initial_sync_on_startup = initial_sync_on_startup;
        self
    }

    /// Sets the retry budget and base backoff.
    pub fn with_retry(mut self, max_retry_count: u32, retry_backoff: Duration) -> Self {
        self.max_retry_count = max_retry_count;
        self.retry_backoff_ms = u64::try_from(retry_backoff.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the per-pass timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Checks every field.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Configuration`] naming the first invalid field.
    pub fn validate(&self) -> SyncResult<()> {
        validate_interval_ms(self.interval_ms)?;
        if self.retry_backoff_ms == 0 {
            return Err(SyncError::Configuration(
                "retryBackoffMs must be greater than 0".into(),
            ));
        }
        if self.sync_timeout_ms == 0 {
            return Err(SyncError::Configuration(
                "syncTimeoutMs must be greater than 0".into(),
            ));
        }
        if self.max_retry_delay_ms < self.retry_backoff_ms {
            return Err(SyncError::Configuration(format!(
                "maxRetryDelayMs ({}) must not be below retryBackoffMs ({})",
                self.max_retry_delay_ms, self.retry_backoff_ms
            )));
        }
        Ok(())
    }

    /// The sync interval.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// The per-pass timeout.
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    /// Backoff policy for failed passes.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.retry_backoff_ms),
            self.max_retry_count,
        )
        .with_max_delay(Duration::from_millis(self.max_retry_delay_ms))
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: 30 * 60 * 1000,
            initial_sync_on_startup: false,
            max_retry_count: 3,
            retry_backoff_ms: 1000,
            sync_timeout_ms: 5 * 60 * 1000,
            max_retry_delay_ms: default_max_retry_delay_ms(),
        }
    }
}

pub(crate) fn validate_interval_ms(interval_ms: u64) -> SyncResult<()> {
    if interval_ms == 0 {
        return Err(SyncError::Configuration(
            "invalid interval: intervalMs must be greater than 0".into(),
        ));
    }
    Ok(())
}

/// Configuration for differential channel sync.
#[derive(Debug, Clone)]
pub struct DifferentialConfig {
    /// Page size passed to the history fetcher.
    pub page_limit: u32,
    /// Retry policy for transient fetch failures. Rate-limit waits do not
    /// count against it.
    pub retry: RetryPolicy,
}

impl DifferentialConfig {
    /// Creates the default configuration: 1000 messages per page, three
    /// attempts in total.
    pub fn new() -> Self {
        Self {
            page_limit: 1000,
            retry: RetryPolicy::new(Duration::from_secs(1), 2)
                .with_max_delay(Duration::from_secs(30)),
        }
    }

    /// Sets the page size.
    pub fn with_page_limit(mut self, page_limit: u32) -> Self {
        self.page_limit = page_limit;
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for DifferentialConfig {
    fn default() -> Self {
        Self::new()
    }
}
