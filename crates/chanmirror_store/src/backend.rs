//! Backend trait for the persisted sync-state document.

use crate::error::StoreResult;

/// A byte store holding the single sync-state document.
///
/// Backends are **opaque**. They never interpret the bytes they hold; the
/// [`SyncStateStore`](crate::SyncStateStore) owns the document format.
///
/// # Invariants
///
/// - `load` returns exactly the bytes of the last successful `store`
/// - `store` replaces the whole document; there is no append path
/// - A backend that never stored anything loads as `None`
/// - Backends must be `Send + Sync` so a store can be shared across tasks
pub trait StateBackend: Send + Sync {
    /// Loads the current document, or `None` if nothing was ever stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying medium cannot be read.
    fn load(&self) -> StoreResult<Option<Vec<u8>>>;

    /// Replaces the document with `data`.
    ///
    /// After this returns successfully the new document must survive a
    /// process restart (for durable backends).
    ///
    /// # Errors
    ///
    /// Returns an error if the write cannot be completed.
    fn store(&self, data: &[u8]) -> StoreResult<()>;
}
