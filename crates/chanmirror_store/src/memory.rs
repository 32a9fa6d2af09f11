//! In-memory backend for testing.

use crate::backend::StateBackend;
use crate::error::StoreResult;
use parking_lot::RwLock;
use std::sync::Arc;

/// An in-memory sync-state backend.
///
/// Clones share the same buffer, so a test can drop a
/// [`SyncStateStore`](crate::SyncStateStore) and reopen another one over
/// the same data to simulate a restart.
///
/// # Example
///
/// ```rust
/// use chanmirror_store::{InMemoryBackend, StateBackend};
///
/// let backend = InMemoryBackend::new();
/// assert!(backend.load().unwrap().is_none());
///
/// backend.store(b"{}").unwrap();
/// assert_eq!(backend.load().unwrap().unwrap(), b"{}");
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    data: Arc<RwLock<Option<Vec<u8>>>>,
    writes: Arc<RwLock<u64>>,
}

impl InMemoryBackend {
    /// Creates a new empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend that already holds `data`.
    ///
    /// Useful for recovery and corruption tests.
    #[must_use]
    pub fn with_data(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Arc::new(RwLock::new(Some(data.into()))),
            writes: Arc::default(),
        }
    }

    /// Returns a copy of the stored document.
    #[must_use]
    pub fn data(&self) -> Option<Vec<u8>> {
        self.data.read().clone()
    }

    /// Number of full rewrites performed so far.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        *self.writes.read()
    }
}

impl StateBackend for InMemoryBackend {
    fn load(&self) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.data.read().clone())
    }

    fn store(&self, data: &[u8]) -> StoreResult<()> {
        *self.data.write() = Some(data.to_vec());
        *self.writes.write() += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_backend_loads_none() {
        let backend = InMemoryBackend::new();
        assert!(backend.load().unwrap().is_none());
        assert_eq!(backend.write_count(), 0);
    }

    #[test]
    fn store_replaces_document() {
        let backend = InMemoryBackend::new();
        backend.store(b"first").unwrap();
        backend.store(b"second").unwrap();

        assert_eq!(backend.load().unwrap().unwrap(), b"second");
        assert_eq!(backend.write_count(), 2);
    }

    #[test]
    fn clones_share_data() {
        let backend = InMemoryBackend::new();
        let other = backend.clone();

        backend.store(b"shared").unwrap();
        assert_eq!(other.data().unwrap(), b"shared");
    }
}
