//! Artifact locator: newest raw-event artifact under a prefix.
//!
//! Lists keys, keeps those within `max_depth` segments of the prefix that end
//! with the artifact suffix, and returns the lexicographic maximum. The
//! `dt=YYYY-MM-DD` partition layout written by the generator is what makes
//! that the most recent artifact; the locator does not check it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::objstore::{normalize_prefix, ArtifactKey, ObjectStore, StorageError};

#[derive(Debug, Error)]
pub enum LocatorError {
    #[error("no artifact matching '*{suffix}' under '{prefix}': {reason}")]
    NotFound {
        prefix: String,
        suffix: String,
        reason: String,
    },

    #[error("storage configuration error: {0}")]
    Configuration(String),
}

/// Where artifacts live and what they look like.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactsConfig {
    pub prefix: String,
    pub suffix: String,
    /// Maximum key depth below the prefix (the filename counts as one).
    pub max_depth: usize,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            prefix: "events".to_string(),
            suffix: ".jsonl".to_string(),
            max_depth: 6,
        }
    }
}

pub struct ArtifactLocator {
    store: Arc<dyn ObjectStore>,
    suffix: String,
    max_depth: usize,
}

impl ArtifactLocator {
    pub fn new(store: Arc<dyn ObjectStore>, config: &ArtifactsConfig) -> Self {
        Self {
            store,
            suffix: config.suffix.clone(),
            max_depth: config.max_depth,
        }
    }

    /// Most recent artifact key under `prefix`.
    pub async fn latest_key(&self, prefix: &str) -> Result<ArtifactKey, LocatorError> {
        let not_found = |reason: String| LocatorError::NotFound {
            prefix: prefix.to_string(),
            suffix: self.suffix.clone(),
            reason,
        };

        let normalized = normalize_prefix(prefix).map_err(|e| not_found(e.to_string()))?;
        let keys = match self.store.list(&normalized).await {
            Ok(keys) => keys,
            Err(StorageError::MissingCredentials(msg)) | Err(StorageError::Config(msg)) => {
                return Err(LocatorError::Configuration(msg));
            }
            Err(e) => return Err(not_found(format!("listing failed: {}", e))),
        };
        let listed = keys.len();

        let latest = keys
            .into_iter()
            .filter(|k| self.matches(&normalized, k))
            .max()
            .map(ArtifactKey::new)
            .ok_or_else(|| not_found(format!("{} key(s) listed, none matched", listed)))?;

        debug!(%prefix, listed, "Artifact listing complete");
        info!(%prefix, key = %latest, uri = %self.store.uri(latest.as_str()), "Located latest artifact");
        Ok(latest)
    }

    fn matches(&self, prefix: &str, key: &str) -> bool {
        let Some(rest) = key.strip_prefix(prefix) else {
            return false;
        };
        !rest.is_empty()
            && rest.ends_with(&self.suffix)
            && rest.split('/').count() <= self.max_depth
    }
}
