//! Status command implementation.

use super::{format_watermark, read_history, CommandResult};
use chanmirror_store::SyncHistory;
use std::path::Path;

/// Runs the status command.
pub fn run(state: &Path, format: &str) -> CommandResult {
    let history = read_history(state)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&history)?);
        }
        _ => print!("{}", render_text(state, &history)),
    }

    Ok(())
}

fn render_text(state: &Path, history: &SyncHistory) -> String {
    let mut out = format!("Sync state: {}\n", state.display());

    if history.sync_history.is_empty() {
        out.push_str("No channels synced yet\n");
        return out;
    }

    out.push_str(&format!(
        "{:<16} {:<8} {:>8}  {:<22} {}\n",
        "CHANNEL", "STATUS", "MESSAGES", "WATERMARK", "ERROR"
    ));
    for (channel, record) in &history.sync_history {
        out.push_str(&format!(
            "{:<16} {:<8} {:>8}  {:<22} {}\n",
            channel,
            record.last_sync_status,
            record.last_sync_message_count,
            format_watermark(record),
            record.last_sync_error.as_deref().unwrap_or("")
        ));
    }

    let failing = history
        .sync_history
        .values()
        .filter(|r| r.last_sync_status.is_error())
        .count();
    out.push_str(&format!(
        "\n{} channel(s), {} with errors\n",
        history.sync_history.len(),
        failing
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chanmirror_store::{SyncState, SyncStatus};

    #[test]
    fn text_lists_every_channel() {
        let mut history = SyncHistory::default();
        let mut ok = SyncState::new("C1");
        ok.last_sync_timestamp = Some(1701425400.0001);
        ok.last_sync_message_count = 4;
        let mut bad = SyncState::new("C2");
        bad.last_sync_status = SyncStatus::Failed;
        bad.last_sync_error = Some("invalid_auth".into());
        history.sync_history.insert("C1".into(), ok);
        history.sync_history.insert("C2".into(), bad);

        let text = render_text(Path::new("state.json"), &history);

        assert!(text.contains("1701425400.0001"));
        assert!(text.contains("invalid_auth"));
        assert!(text.contains("2 channel(s), 1 with errors"));
    }

    #[test]
    fn text_for_empty_history() {
        let text = render_text(Path::new("state.json"), &SyncHistory::default());
        assert!(text.contains("No channels synced yet"));
    }
}
