//! Local write boundary.

use crate::fetcher::Message;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// A write that stopped part-way through a batch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message} (after {applied} message(s))")]
pub struct ApplyError {
    /// Messages from the front of the batch that were written.
    pub applied: usize,
    /// Error message.
    pub message: String,
}

impl ApplyError {
    /// Creates an apply error.
    pub fn new(applied: usize, message: impl Into<String>) -> Self {
        Self {
            applied,
            message: message.into(),
        }
    }
}

/// Incorporates fetched messages into the local store.
///
/// Messages arrive in ascending timestamp order. Writes must be idempotent:
/// delivery is at-least-once.
#[async_trait]
pub trait MessageApplier: Send + Sync {
    /// Writes the batch for `channel_id`.
    ///
    /// On failure the error reports how many messages from the front of the
    /// batch were written before it stopped.
    async fn apply(&self, channel_id: &str, messages: &[Message]) -> Result<(), ApplyError>;
}

#[async_trait]
impl<T: MessageApplier + ?Sized> MessageApplier for Arc<T> {
    async fn apply(&self, channel_id: &str, messages: &[Message]) -> Result<(), ApplyError> {
        (**self).apply(channel_id, messages).await
    }
}

/// An applier that accepts and drops every message.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardApplier;

#[async_trait]
impl MessageApplier for DiscardApplier {
    async fn apply(&self, _channel_id: &str, _messages: &[Message]) -> Result<(), ApplyError> {
        Ok(())
    }
}

/// An in-memory applier for testing.
#[derive(Debug, Default)]
pub struct MemoryApplier {
    applied: Mutex<HashMap<String, Vec<Message>>>,
    fail_after: Mutex<Option<(usize, String)>>,
}

impl MemoryApplier {
    /// Creates an empty applier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `apply` stop after `applied` messages with `message`.
    pub fn fail_after(&self, applied: usize, message: impl Into<String>) {
        *self.fail_after.lock() = Some((applied, message.into()));
    }

    /// Returns the messages written for a channel.
    pub fn messages(&self, channel_id: &str) -> Vec<Message> {
        self.applied
            .lock()
            .get(channel_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessageApplier for MemoryApplier {
    async fn apply(&self, channel_id: &str, messages: &[Message]) -> Result<(), ApplyError> {
        let failure = self.fail_after.lock().take();
        let limit = failure
            .as_ref()
            .map_or(messages.len(), |(n, _)| (*n).min(messages.len()));

        self.applied
            .lock()
            .entry(channel_id.to_string())
            .or_default()
            .extend(messages[..limit].iter().cloned());

        match failure {
            Some((_, message)) => Err(ApplyError::new(limit, message)),
            None => Ok(()),
        }
    }
}
