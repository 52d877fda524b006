//! Loader: read one artifact and upsert its events into the raw zone.
//!
//! Rows are keyed by `event_id` with conflict-ignore semantics, so loading
//! the same artifact twice leaves the table unchanged.

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use super::Event;
use crate::objstore::{ObjectStore, StorageError};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("line {line}: invalid event: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("warehouse write failed: {0:#}")]
    Sink(anyhow::Error),
}

/// Destination for raw events.
#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    /// Insert `events`, skipping any whose `event_id` already exists.
    /// Returns the number of rows actually inserted.
    async fn upsert_events(&self, events: &[Event]) -> anyhow::Result<usize>;
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LoadSummary {
    pub key: String,
    pub parsed: usize,
    pub inserted: usize,
}

impl LoadSummary {
    pub fn skipped(&self) -> usize {
        self.parsed - self.inserted
    }
}

/// Parse newline-delimited events, ignoring blank lines.
pub fn parse_jsonl(body: &str) -> Result<Vec<Event>, LoadError> {
    body.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).map_err(|source| LoadError::Parse {
                line: idx + 1,
                source,
            })
        })
        .collect()
}

pub async fn load_artifact(
    store: &dyn ObjectStore,
    sink: &dyn EventSink,
    key: &str,
) -> Result<LoadSummary, LoadError> {
    let data = store.get(key).await?;
    let body = String::from_utf8_lossy(&data);
    let events = parse_jsonl(&body)?;

    if events.is_empty() {
        println!("No rows found in object.");
        return Ok(LoadSummary {
            key: key.to_string(),
            parsed: 0,
            inserted: 0,
        });
    }

    let inserted = sink.upsert_events(&events).await.map_err(LoadError::Sink)?;
    let summary = LoadSummary {
        key: key.to_string(),
        parsed: events.len(),
        inserted,
    };

    info!(%key, parsed = summary.parsed, inserted, skipped = summary.skipped(), "Artifact loaded");
    println!(
        "Loaded {} events from {} into raw_events ({} new, {} already present; deduped by event_id)",
        summary.parsed,
        store.uri(key),
        summary.inserted,
        summary.skipped()
    );
    Ok(summary)
}
