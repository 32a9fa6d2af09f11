//! The sync-state store.

use crate::backend::StateBackend;
use crate::error::{StoreError, StoreResult};
use crate::state::{SyncHistory, SyncState, SyncStateUpdate};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Persisted key-value record of per-channel sync progress.
///
/// The store keeps the full document in memory and rewrites it through its
/// [`StateBackend`] on every mutation. Call frequency is bounded by sync
/// frequency, so a full rewrite is cheap enough.
///
/// # Thread Safety
///
/// All methods take `&self`; the store can be shared behind an `Arc`.
/// Mutations are serialized by an internal lock that is held across the
/// rewrite, so the persisted document always matches memory.
pub struct SyncStateStore {
    backend: Box<dyn StateBackend>,
    records: RwLock<BTreeMap<String, SyncState>>,
}

impl SyncStateStore {
    /// Opens a store over `backend`, loading any existing document.
    ///
    /// A backend with no document (or an empty one) yields an empty store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupted`] if the document cannot be decoded.
    pub fn open<B: StateBackend + 'static>(backend: B) -> StoreResult<Self> {
        let records = match backend.load()? {
            Some(data) if !data.iter().all(u8::is_ascii_whitespace) => {
                let history: SyncHistory = serde_json::from_slice(&data)
                    .map_err(|e| StoreError::Corrupted(e.to_string()))?;
                history.sync_history
            }
            _ => BTreeMap::new(),
        };

        debug!(channels = records.len(), "sync state loaded");

        Ok(Self {
            backend: Box::new(backend),
            records: RwLock::new(records),
        })
    }

    /// Returns the record for `channel_id`, or `None` if never synced.
    pub fn get(&self, channel_id: &str) -> Option<SyncState> {
        self.records.read().get(channel_id).cloned()
    }

    /// Returns every record keyed by channel id.
    pub fn get_all(&self) -> BTreeMap<String, SyncState> {
        self.records.read().clone()
    }

    /// Number of tracked channels.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if no channel has been synced yet.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Merges `update` onto the channel's record and persists the document.
    ///
    /// A missing record is created with zero defaults first. The stored
    /// `channel_id` is never overwritten, and a watermark lower than the
    /// stored one is ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be persisted. The in-memory
    /// record is rolled back in that case.
    pub fn update(&self, channel_id: &str, update: SyncStateUpdate) -> StoreResult<SyncState> {
        let mut records = self.records.write();
        let previous = records.get(channel_id).cloned();

        let record = records
            .entry(channel_id.to_string())
            .or_insert_with(|| SyncState::new(channel_id));
        if !record.merge(update) {
            warn!(
                channel = channel_id,
                watermark = ?record.last_sync_timestamp,
                "ignored watermark regression"
            );
        }
        let merged = record.clone();

        if let Err(e) = self.persist(&records) {
            match previous {
                Some(prev) => records.insert(channel_id.to_string(), prev),
                None => records.remove(channel_id),
            };
            return Err(e);
        }

        debug!(
            channel = channel_id,
            status = %merged.last_sync_status,
            watermark = ?merged.last_sync_timestamp,
            "sync state updated"
        );
        Ok(merged)
    }

    /// Removes the channel's record. Clearing an unknown channel is a no-op
    /// apart from the rewrite.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be persisted.
    pub fn clear(&self, channel_id: &str) -> StoreResult<()> {
        let mut records = self.records.write();
        let removed = records.remove(channel_id);

        if let Err(e) = self.persist(&records) {
            if let Some(state) = removed {
                records.insert(channel_id.to_string(), state);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Removes every record.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be persisted.
    pub fn clear_all(&self) -> StoreResult<()> {
        let mut records = self.records.write();
        let removed = std::mem::take(&mut *records);

        if let Err(e) = self.persist(&records) {
            *records = removed;
            return Err(e);
        }
        Ok(())
    }

    fn persist(&self, records: &BTreeMap<String, SyncState>) -> StoreResult<()> {
        let history = SyncHistory {
            sync_history: records.clone(),
        };
        let data =
            serde_json::to_vec_pretty(&history).map_err(|e| StoreError::Encode(e.to_string()))?;
        self.backend.store(&data)
    }
}

impl std::fmt::Debug for SyncStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncStateStore")
            .field("channels", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;
    use crate::state::SyncStatus;

    struct FailingBackend;

    impl StateBackend for FailingBackend {
        fn load(&self) -> StoreResult<Option<Vec<u8>>> {
            Ok(None)
        }

        fn store(&self, _data: &[u8]) -> StoreResult<()> {
            Err(StoreError::Io(std::io::Error::other("disk full")))
        }
    }

    #[test]
    fn unknown_channel_is_absent() {
        let store = SyncStateStore::open(InMemoryBackend::new()).unwrap();
        assert!(store.get("C1").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn update_creates_record_lazily() {
        let store = SyncStateStore::open(InMemoryBackend::new()).unwrap();
        let state = store.update("C1", SyncStateUpdate::failed("timeout")).unwrap();

        assert_eq!(state.channel_id, "C1");
        assert_eq!(state.last_sync_status, SyncStatus::Failed);
        assert!(state.last_sync_timestamp.is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn every_mutation_rewrites_backend() {
        let backend = InMemoryBackend::new();
        let store = SyncStateStore::open(backend.clone()).unwrap();

        store.update("C1", SyncStateUpdate::success(1.0, 1)).unwrap();
        store.update("C2", SyncStateUpdate::success(2.0, 1)).unwrap();
        store.clear("C3").unwrap();
        assert_eq!(backend.write_count(), 3);
    }

    #[test]
    fn clear_is_idempotent() {
        let store = SyncStateStore::open(InMemoryBackend::new()).unwrap();
        store.update("C1", SyncStateUpdate::success(1.0, 1)).unwrap();

        store.clear("C1").unwrap();
        store.clear("C1").unwrap();
        assert!(store.get("C1").is_none());
    }

    #[test]
    fn clear_all_empties_store() {
        let store = SyncStateStore::open(InMemoryBackend::new()).unwrap();
        store.update("C1", SyncStateUpdate::success(1.0, 1)).unwrap();
        store.update("C2", SyncStateUpdate::success(2.0, 1)).unwrap();

        store.clear_all().unwrap();
        assert!(store.get_all().is_empty());
    }

    #[test]
    fn reopen_restores_records() {
        let backend = InMemoryBackend::new();
        {
            let store = SyncStateStore::open(backend.clone()).unwrap();
            store
                .update("C1", SyncStateUpdate::partial(42.5, 3, "write failed"))
                .unwrap();
        }

        let store = SyncStateStore::open(backend).unwrap();
        let state = store.get("C1").unwrap();
        assert_eq!(state.last_sync_timestamp, Some(42.5));
        assert_eq!(state.last_sync_status, SyncStatus::Partial);
        assert_eq!(state.last_sync_message_count, 3);
        assert_eq!(state.last_sync_error.as_deref(), Some("write failed"));
    }

    #[test]
    fn empty_document_is_no_records() {
        let store = SyncStateStore::open(InMemoryBackend::with_data("  \n")).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn corrupted_document_is_rejected() {
        let result = SyncStateStore::open(InMemoryBackend::with_data("{not json"));
        assert!(matches!(result, Err(StoreError::Corrupted(_))));
    }

    #[test]
    fn failed_persist_rolls_back() {
        let store = SyncStateStore::open(FailingBackend).unwrap();
        assert!(store.update("C1", SyncStateUpdate::success(1.0, 1)).is_err());
        assert!(store.get("C1").is_none());
    }
}
