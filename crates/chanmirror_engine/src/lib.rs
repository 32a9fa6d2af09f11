//! # chanmirror engine
//!
//! Differential channel sync and the scheduler that drives it.
//!
//! This crate provides:
//! - Per-channel differential sync bounded by a persisted watermark
//! - Exponential backoff retry policy
//! - A timer-driven auto-sync scheduler with single-flight, timeout and
//!   lifecycle events
//! - Fetcher and applier abstractions with in-memory test doubles
//!
//! ## Architecture
//!
//! ```text
//! AutoSyncScheduler --> SyncExecutor --> DifferentialSyncEngine
//!                                          |            |
//!                                   HistoryFetcher  SyncStateStore
//!                                          |
//!                                   MessageApplier
//! ```
//!
//! The scheduler owns timing and retries of whole passes. The executor owns
//! single-flight. The engine owns per-channel progress and retries of single
//! fetches.
//!
//! ## Key Invariants
//!
//! - A channel's watermark never moves backwards
//! - A failed fetch never moves the watermark
//! - At most one sync pass runs at a time
//! - Timer-driven passes are at least [`MIN_SYNC_SPACING`] apart

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod applier;
mod config;
mod differential;
mod error;
mod events;
mod executor;
mod fetcher;
mod retry;
mod scheduler;

pub use applier::{ApplyError, DiscardApplier, MemoryApplier, MessageApplier};
pub use config::{DifferentialConfig, SchedulerSettings, MIN_SYNC_SPACING};
pub use differential::{ChannelSyncResult, DifferentialSyncEngine};
pub use error::{SyncError, SyncResult};
pub use events::{EventBus, SyncEvent, SyncEventKind};
pub use executor::{ChannelSyncExecutor, SyncExecutor, SyncOutcome};
pub use fetcher::{FetchError, HistoryFetcher, HistoryOptions, Message, MockFetcher};
pub use retry::RetryPolicy;
pub use scheduler::{AutoSyncScheduler, SchedulerState};

/// Version of the sync engine.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
