//! Reset command implementation.

use super::{open_store, CommandResult};
use std::path::Path;

/// Clears one channel's record, or every record with `all`.
pub fn run(state: &Path, channel: Option<&str>, all: bool) -> CommandResult {
    let store = open_store(state)?;

    if all {
        let count = store.len();
        store.clear_all()?;
        println!("Reset {count} channel(s)");
        return Ok(());
    }

    let channel = channel.ok_or("Either a channel or --all is required")?;
    let existed = store.get(channel).is_some();
    store.clear(channel)?;

    if existed {
        println!("Reset {channel}; the next sync fetches its full history");
    } else {
        println!("{channel} had no sync state");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::read_history;
    use chanmirror_store::SyncStateUpdate;
    use tempfile::tempdir;

    fn seed(path: &Path) {
        let store = open_store(path).unwrap();
        store.update("C1", SyncStateUpdate::success(1.0, 1)).unwrap();
        store.update("C2", SyncStateUpdate::success(2.0, 1)).unwrap();
    }

    #[test]
    fn reset_single_channel() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        seed(&path);

        run(&path, Some("C1"), false).unwrap();

        let history = read_history(&path).unwrap();
        assert!(!history.sync_history.contains_key("C1"));
        assert!(history.sync_history.contains_key("C2"));
    }

    #[test]
    fn reset_all_channels() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        seed(&path);

        run(&path, None, true).unwrap();
        assert!(read_history(&path).unwrap().sync_history.is_empty());
    }

    #[test]
    fn reset_requires_target() {
        let dir = tempdir().unwrap();
        assert!(run(&dir.path().join("state.json"), None, false).is_err());
    }
}
