//! JSON-lines message sink.

use async_trait::async_trait;
use chanmirror_engine::{ApplyError, Message, MessageApplier};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Appends each new message as one JSON line to `<dir>/<channel>.jsonl`.
///
/// Without an output directory messages are only counted.
#[derive(Debug, Clone, Default)]
pub struct JsonlApplier {
    out_dir: Option<PathBuf>,
}

impl JsonlApplier {
    /// Creates an applier writing under `out_dir`, if given.
    pub fn new(out_dir: Option<PathBuf>) -> Self {
        Self { out_dir }
    }

    fn append(&self, channel_id: &str, messages: &[Message]) -> Result<(), ApplyError> {
        let Some(dir) = &self.out_dir else {
            return Ok(());
        };
        if !is_plain_file_name(channel_id) {
            return Err(ApplyError::new(
                0,
                format!("channel id {channel_id:?} is not a valid file name"),
            ));
        }

        fs::create_dir_all(dir).map_err(|e| ApplyError::new(0, e.to_string()))?;
        let path = dir.join(format!("{channel_id}.jsonl"));
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| ApplyError::new(0, format!("{}: {e}", path.display())))?;

        write_lines(&mut file, messages)
            .map_err(|e| ApplyError::new(e.applied, format!("{}: {}", path.display(), e.message)))?;

        debug!(channel = channel_id, path = %path.display(), count = messages.len(), "messages appended");
        Ok(())
    }
}

/// Writes one line per message, unbuffered, so `applied` on failure counts
/// only lines the writer accepted in full.
fn write_lines<W: Write>(writer: &mut W, messages: &[Message]) -> Result<(), ApplyError> {
    for (written, message) in messages.iter().enumerate() {
        let mut line =
            serde_json::to_vec(message).map_err(|e| ApplyError::new(written, e.to_string()))?;
        line.push(b'\n');
        writer
            .write_all(&line)
            .and_then(|()| writer.flush())
            .map_err(|e| ApplyError::new(written, e.to_string()))?;
    }
    Ok(())
}

/// True if `channel_id` is a single normal path component.
fn is_plain_file_name(channel_id: &str) -> bool {
    let mut components = Path::new(channel_id).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(name)), None) if name == channel_id
    ) && !channel_id.contains(['/', '\\'])
}

#[async_trait]
impl MessageApplier for JsonlApplier {
    async fn apply(&self, channel_id: &str, messages: &[Message]) -> Result<(), ApplyError> {
        if messages.is_empty() {
            return Ok(());
        }
        self.append(channel_id, messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chanmirror_engine::{DifferentialConfig, DifferentialSyncEngine, MockFetcher};
    use chanmirror_store::{InMemoryBackend, SyncStateStore, SyncStatus};
    use std::io;
    use std::sync::Arc;
    use tempfile::tempdir;

    /// Accepts `capacity` bytes, then fails every write.
    struct FullAfter {
        capacity: usize,
        accepted: Vec<u8>,
    }

    impl Write for FullAfter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let room = self.capacity - self.accepted.len();
            if room == 0 {
                return Err(io::Error::other("no space left"));
            }
            let n = room.min(buf.len());
            self.accepted.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn appends_one_line_per_message() {
        let dir = tempdir().unwrap();
        let applier = JsonlApplier::new(Some(dir.path().join("out")));

        applier
            .apply("C1", &[Message::new("1.0", "a"), Message::new("2.0", "b")])
            .await
            .unwrap();
        applier.apply("C1", &[Message::new("3.0", "c")]).await.unwrap();

        let contents = fs::read_to_string(dir.path().join("out/C1.jsonl")).unwrap();
        let lines: Vec<Message> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2].ts, "3.0");
    }

    #[tokio::test]
    async fn without_directory_nothing_is_written() {
        let applier = JsonlApplier::default();
        assert!(applier.apply("C1", &[Message::new("1.0", "a")]).await.is_ok());
    }

    #[test]
    fn torn_line_is_not_counted() {
        let messages = vec![
            Message::new("1.0", "a".repeat(100)),
            Message::new("2.0", "b".repeat(100)),
            Message::new("3.0", "c".repeat(100)),
        ];
        let first_line = serde_json::to_vec(&messages[0]).unwrap().len() + 1;
        let mut writer = FullAfter {
            capacity: first_line + 10,
            accepted: Vec::new(),
        };

        let err = write_lines(&mut writer, &messages).unwrap_err();
        assert_eq!(err.applied, 1);
    }

    #[test]
    fn failure_on_first_line_applies_nothing() {
        let mut writer = FullAfter {
            capacity: 0,
            accepted: Vec::new(),
        };
        let err = write_lines(&mut writer, &[Message::new("1.0", "a")]).unwrap_err();
        assert_eq!(err.applied, 0);
    }

    #[tokio::test]
    async fn channel_id_cannot_escape_output_dir() {
        let dir = tempdir().unwrap();
        let applier = JsonlApplier::new(Some(dir.path().join("out")));

        for id in ["../escape", "a/b", "..", ".", "", "a\\b"] {
            let err = applier
                .apply(id, &[Message::new("1.0", "a")])
                .await
                .unwrap_err();
            assert_eq!(err.applied, 0, "{id:?}");
        }
        assert!(!dir.path().join("escape.jsonl").exists());
        assert!(applier.apply("C024BE91L", &[Message::new("1.0", "a")]).await.is_ok());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn full_disk_does_not_advance_watermark() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out");
        fs::create_dir_all(&out).unwrap();
        std::os::unix::fs::symlink("/dev/full", out.join("C1.jsonl")).unwrap();

        let fetcher = MockFetcher::new();
        for ts in ["1.0", "2.0", "3.0"] {
            fetcher.push_message("C1", Message::new(ts, "x".repeat(5000)));
        }
        let store = Arc::new(SyncStateStore::open(InMemoryBackend::new()).unwrap());
        let engine = DifferentialSyncEngine::with_applier(
            DifferentialConfig::new(),
            fetcher,
            JsonlApplier::new(Some(out)),
            Arc::clone(&store),
        );

        let result = engine.sync_channel("C1").await;
        assert!(!result.success);
        assert_eq!(result.messages_retrieved, 0);

        let state = store.get("C1").unwrap();
        assert_eq!(state.last_sync_status, SyncStatus::Partial);
        assert_eq!(state.last_sync_timestamp, None);
    }
}
