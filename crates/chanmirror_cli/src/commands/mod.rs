//! CLI command implementations.

pub mod inspect;
pub mod reset;
pub mod status;
pub mod sync;
pub mod watch;

use crate::fixture::FixtureFetcher;
use crate::jsonl::JsonlApplier;
use chanmirror_engine::{ChannelSyncExecutor, DifferentialConfig, DifferentialSyncEngine};
use chanmirror_store::{FileBackend, SyncHistory, SyncState, SyncStateStore};
use std::error::Error;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Result type for commands.
pub type CommandResult<T = ()> = Result<T, Box<dyn Error>>;

/// Executor used by `sync` and `watch`.
pub type FixtureExecutor = ChannelSyncExecutor<FixtureFetcher, JsonlApplier>;

/// Reads the state document without taking the writer lock.
///
/// Writers replace the file atomically, so a read never sees a torn
/// document even while `watch` is running.
pub fn read_history(path: &Path) -> CommandResult<SyncHistory> {
    match fs::read(path) {
        Ok(data) if data.iter().all(u8::is_ascii_whitespace) => Ok(SyncHistory::default()),
        Ok(data) => Ok(serde_json::from_slice(&data)
            .map_err(|e| format!("corrupted state file {}: {e}", path.display()))?),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(SyncHistory::default()),
        Err(e) => Err(e.into()),
    }
}

/// Opens the state store for writing.
pub fn open_store(path: &Path) -> CommandResult<Arc<SyncStateStore>> {
    let backend = FileBackend::open_with_create_dirs(path)?;
    Ok(Arc::new(SyncStateStore::open(backend)?))
}

/// Builds an executor over a fixture. With no explicit channels every
/// channel in the fixture is synced.
pub fn build_executor(
    state: &Path,
    fixture: &Path,
    channels: Vec<String>,
    out: Option<PathBuf>,
) -> CommandResult<FixtureExecutor> {
    let fetcher = FixtureFetcher::new(fixture);
    let channels = if channels.is_empty() {
        fetcher.channels()?
    } else {
        channels
    };

    let engine = DifferentialSyncEngine::with_applier(
        DifferentialConfig::new(),
        fetcher,
        JsonlApplier::new(out),
        open_store(state)?,
    );
    Ok(ChannelSyncExecutor::new(engine, channels))
}

/// Formats a watermark for display.
pub fn format_watermark(state: &SyncState) -> String {
    state
        .last_sync_timestamp
        .map_or_else(|| "-".to_string(), |ts| format!("{ts}"))
}
