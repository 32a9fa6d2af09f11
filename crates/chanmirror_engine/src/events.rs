//! Sync lifecycle events.
//!
//! Every sync pass emits events in order:
//!
//! ```text
//! Start -> Error* -> Complete | Error
//! ```
//!
//! One `Error` is emitted per failed attempt, so a pass that succeeds after
//! two retries emits `Start, Error, Error, Complete`.
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut events = scheduler.subscribe();
//! tokio::spawn(async move {
//!     while let Some(event) = events.recv().await {
//!         println!("{:?}", event.kind);
//!     }
//! });
//! ```

use parking_lot::RwLock;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// What happened in a sync pass.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEventKind {
    /// A pass started.
    Start,
    /// A pass finished successfully.
    Complete {
        /// Messages incorporated by the pass.
        messages_count: u64,
        /// Wall time of the pass, including retries.
        duration: Duration,
    },
    /// An attempt failed.
    Error {
        /// Error message.
        error: String,
        /// Retries already made before this failure.
        retry_count: u32,
    },
}

/// A lifecycle event from a scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncEvent {
    /// When the event was emitted.
    pub timestamp: SystemTime,
    /// Id of the emitting scheduler.
    pub instance_id: String,
    /// Channels the pass covers; empty means the executor's defaults.
    pub channels: Vec<String>,
    /// True for timer-driven passes, false for manual ones.
    pub is_auto_sync: bool,
    /// Event payload.
    pub kind: SyncEventKind,
}

impl SyncEvent {
    /// Returns true for `Start` events.
    pub fn is_start(&self) -> bool {
        matches!(self.kind, SyncEventKind::Start)
    }

    /// Returns true for `Complete` events.
    pub fn is_complete(&self) -> bool {
        matches!(self.kind, SyncEventKind::Complete { .. })
    }

    /// Returns true for `Error` events.
    pub fn is_error(&self) -> bool {
        matches!(self.kind, SyncEventKind::Error { .. })
    }
}

/// Distributes events to any number of subscribers.
///
/// Receivers that have been dropped are pruned on the next emit.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<UnboundedSender<SyncEvent>>>,
}

impl EventBus {
    /// Creates a bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a receiver for all future events.
    pub fn subscribe(&self) -> UnboundedReceiver<SyncEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Sends `event` to every live subscriber.
    pub fn emit(&self, event: SyncEvent) {
        self.subscribers
            .write()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start_event() -> SyncEvent {
        SyncEvent {
            timestamp: SystemTime::now(),
            instance_id: "test".into(),
            channels: vec!["C1".into()],
            is_auto_sync: false,
            kind: SyncEventKind::Start,
        }
    }

    #[test]
    fn multiple_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.emit(start_event());

        assert!(rx1.try_recv().unwrap().is_start());
        assert!(rx2.try_recv().unwrap().is_start());
    }

    #[test]
    fn dropped_subscribers_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        let _kept = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        drop(rx);
        bus.emit(start_event());
        assert_eq!(bus.subscriber_count(), 1);
    }
}
