//! JSON fixture history source.
//!
//! A fixture file maps channel ids to message arrays:
//!
//! ```json
//! { "C024BE91L": [ { "ts": "1701425400.000100", "user": "U1", "text": "hi" } ] }
//! ```
//!
//! The file is re-read on every request, so appending messages to it while
//! `watch` runs is picked up by the next scheduled pass.

use async_trait::async_trait;
use chanmirror_engine::{FetchError, HistoryFetcher, HistoryOptions, Message};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors reading a fixture file.
#[derive(Debug, Error)]
pub enum FixtureError {
    /// The file could not be read.
    #[error("cannot read fixture {path}: {source}")]
    Io {
        /// Fixture path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The file is not a channel-to-messages map.
    #[error("invalid fixture {path}: {source}")]
    Parse {
        /// Fixture path.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },
}

/// Channel histories loaded from a fixture file.
pub type Fixture = BTreeMap<String, Vec<Message>>;

/// Reads and parses a fixture file.
pub fn load(path: &Path) -> Result<Fixture, FixtureError> {
    let data = fs::read(path).map_err(|source| FixtureError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&data).map_err(|source| FixtureError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// A [`HistoryFetcher`] backed by a fixture file.
#[derive(Debug, Clone)]
pub struct FixtureFetcher {
    path: PathBuf,
}

impl FixtureFetcher {
    /// Creates a fetcher reading `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Channel ids present in the fixture.
    pub fn channels(&self) -> Result<Vec<String>, FixtureError> {
        Ok(load(&self.path)?.into_keys().collect())
    }
}

#[async_trait]
impl HistoryFetcher for FixtureFetcher {
    async fn get_channel_history(
        &self,
        channel_id: &str,
        options: &HistoryOptions,
    ) -> Result<Vec<Message>, FetchError> {
        let mut fixture = load(&self.path).map_err(|e| match &e {
            FixtureError::Io { source, .. } if source.kind() != ErrorKind::NotFound => {
                FetchError::transient(e.to_string())
            }
            _ => FetchError::fatal(e.to_string()),
        })?;

        let history = fixture
            .remove(channel_id)
            .ok_or_else(|| FetchError::fatal(format!("channel_not_found: {channel_id}")))?;

        let oldest = options.oldest.as_deref().and_then(|o| o.parse::<f64>().ok());
        let mut messages: Vec<Message> = history
            .into_iter()
            .filter(|m| match (oldest, m.timestamp()) {
                (Some(bound), Some(ts)) => ts >= bound,
                _ => true,
            })
            .collect();

        messages.sort_by(|a, b| {
            b.timestamp()
                .partial_cmp(&a.timestamp())
                .unwrap_or(Ordering::Equal)
        });
        Ok(messages)
    }
}
