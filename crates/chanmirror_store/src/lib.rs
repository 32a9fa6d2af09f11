//! # chanmirror store
//!
//! Persisted record of per-channel sync progress.
//!
//! Each mirrored channel owns one [`SyncState`] holding its *watermark*: the
//! timestamp of the newest remote message already incorporated locally. The
//! differential sync engine reads the watermark to bound the next fetch and
//! writes it back after every attempt.
//!
//! ## Design Principles
//!
//! - Records are mutated with read-modify-write merges, never replaced
//! - A channel's watermark never moves backwards
//! - Every mutation rewrites the whole backing document before returning
//! - Backends are opaque byte stores with no knowledge of the document format
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral state
//! - [`FileBackend`] - Lock-protected JSON file with atomic rewrites
//!
//! ## Example
//!
//! ```rust
//! use chanmirror_store::{InMemoryBackend, SyncStateStore, SyncStateUpdate, SyncStatus};
//!
//! let store = SyncStateStore::open(InMemoryBackend::new()).unwrap();
//! store
//!     .update("C024BE91L", SyncStateUpdate::success(1701425400.0001, 10))
//!     .unwrap();
//!
//! let state = store.get("C024BE91L").unwrap();
//! assert_eq!(state.last_sync_status, SyncStatus::Success);
//! assert_eq!(state.last_sync_timestamp, Some(1701425400.0001));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;
mod state;
mod store;

pub use backend::StateBackend;
pub use error::{StoreError, StoreResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
pub use state::{SyncHistory, SyncState, SyncStateUpdate, SyncStatus};
pub use store::SyncStateStore;
