//! Watch command implementation.

use super::{build_executor, CommandResult};
use chanmirror_engine::{AutoSyncScheduler, SchedulerSettings, SyncEvent, SyncEventKind};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{error, info};

/// Runs the auto-sync scheduler until Ctrl-C.
pub fn run(
    state: &Path,
    fixture: &Path,
    config: &Path,
    channels: Vec<String>,
    out: Option<PathBuf>,
) -> CommandResult {
    let settings = load_settings(config)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let executor = Arc::new(build_executor(state, fixture, channels, out)?);
        let scheduler = AutoSyncScheduler::new(executor, settings.clone().with_enabled(true))?;

        let mut events = scheduler.subscribe();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                log_event(&event);
            }
        });

        scheduler.start();
        info!(
            instance = scheduler.instance_id(),
            interval_ms = settings.interval_ms,
            next_in_secs = seconds_until(scheduler.next_sync_time()),
            "watching; press Ctrl-C to stop"
        );

        tokio::signal::ctrl_c().await?;
        scheduler.stop();
        info!("stopped");
        Ok::<_, Box<dyn std::error::Error>>(())
    })
}

/// Reads scheduler settings from a JSON file.
pub fn load_settings(path: &Path) -> CommandResult<SchedulerSettings> {
    let data = fs::read(path)
        .map_err(|e| format!("cannot read settings {}: {e}", path.display()))?;
    let settings: SchedulerSettings = serde_json::from_slice(&data)
        .map_err(|e| format!("invalid settings {}: {e}", path.display()))?;
    settings.validate()?;
    Ok(settings)
}

fn seconds_until(at: Option<SystemTime>) -> u64 {
    at.and_then(|at| at.duration_since(SystemTime::now()).ok())
        .map_or(0, |d| d.as_secs())
}

fn log_event(event: &SyncEvent) {
    let channels = if event.channels.is_empty() {
        "default".to_string()
    } else {
        event.channels.join(",")
    };

    match &event.kind {
        SyncEventKind::Start => {
            info!(auto = event.is_auto_sync, %channels, "sync started");
        }
        SyncEventKind::Complete {
            messages_count,
            duration,
        } => {
            info!(
                auto = event.is_auto_sync,
                %channels,
                messages = messages_count,
                ?duration,
                "sync complete"
            );
        }
        SyncEventKind::Error { error, retry_count } => {
            error!(
                auto = event.is_auto_sync,
                %channels,
                retry_count,
                %error,
                "sync error"
            );
        }
    }
}
