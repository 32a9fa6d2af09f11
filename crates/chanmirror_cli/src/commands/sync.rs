//! One-shot sync command implementation.

use super::{build_executor, CommandResult};
use chanmirror_engine::{
    AutoSyncScheduler, SchedulerSettings, SyncEvent, SyncEventKind, SyncOutcome,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// Runs one manual sync pass and prints a per-channel summary.
pub fn run(
    state: &Path,
    fixture: &Path,
    channels: Vec<String>,
    out: Option<PathBuf>,
) -> CommandResult {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let outcome = runtime.block_on(sync_once(state, fixture, channels, out))?;

    println!(
        "Synced {} new message(s) in {:.2?}",
        outcome.messages_count, outcome.duration
    );
    Ok(())
}

/// Drives a single pass through a stopped scheduler so the pass gets the
/// same retry, timeout and event handling as a scheduled one.
pub async fn sync_once(
    state: &Path,
    fixture: &Path,
    channels: Vec<String>,
    out: Option<PathBuf>,
) -> CommandResult<SyncOutcome> {
    let executor = Arc::new(build_executor(state, fixture, channels, out)?);
    let scheduler = AutoSyncScheduler::new(Arc::clone(&executor), SchedulerSettings::default())?;
    let mut events = scheduler.subscribe();

    let result = scheduler.force_sync_now(&[]).await;

    while let Ok(event) = events.try_recv() {
        report(&event);
    }
    for channel in executor.default_channels() {
        if let Some(record) = executor.engine().store().get(&channel) {
            println!(
                "  {channel}: {} ({} message(s))",
                record.last_sync_status, record.last_sync_message_count
            );
        }
    }

    Ok(result?)
}

fn report(event: &SyncEvent) {
    if let SyncEventKind::Error { error, retry_count } = &event.kind {
        warn!(retry_count, %error, "sync attempt failed");
    }
}
