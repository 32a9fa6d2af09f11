//! Inspect command implementation.

use super::{format_watermark, read_history, CommandResult};
use std::path::Path;

/// Runs the inspect command.
pub fn run(state: &Path, channel: &str, format: &str) -> CommandResult {
    let history = read_history(state)?;
    let record = history
        .sync_history
        .get(channel)
        .ok_or_else(|| format!("Channel {channel} has never been synced"))?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(record)?);
        }
        _ => {
            println!("Channel:   {}", record.channel_id);
            println!("Status:    {}", record.last_sync_status);
            println!("Messages:  {}", record.last_sync_message_count);
            println!("Watermark: {}", format_watermark(record));
            if let Some(error) = &record.last_sync_error {
                println!("Error:     {error}");
            }
        }
    }

    Ok(())
}
