//! Object storage for raw-event artifacts -- S3 (MinIO) or a local directory.

pub mod fs;
pub mod s3;

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::fs::FsObjectStore;
pub use self::s3::S3ObjectStore;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("missing storage credentials: {0}")]
    MissingCredentials(String),

    #[error("invalid object key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid storage configuration: {0}")]
    Config(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Minimal object-store capability the agent needs.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// List every key under `prefix`, in no particular order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<(), StorageError>;

    /// `s3://bucket/key` style URI, for messages.
    fn uri(&self, key: &str) -> String;
}

/// Object storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
    S3(S3Config),
    Fs(FsConfig),
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::S3(S3Config::default())
    }
}

/// S3-compatible store settings. Credentials are referenced by env var name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    pub bucket: String,
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key_env: String,
    pub secret_key_env: String,
    /// Path-style addressing, needed by MinIO.
    pub force_path_style: bool,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: "lake-raw".to_string(),
            endpoint: Some("http://minio:9000".to_string()),
            region: "us-east-1".to_string(),
            access_key_env: "MINIO_ROOT_USER".to_string(),
            secret_key_env: "MINIO_ROOT_PASSWORD".to_string(),
            force_path_style: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    pub root: std::path::PathBuf,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            root: std::path::PathBuf::from("data/lake-raw"),
        }
    }
}

/// Build the configured object store.
pub fn open(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>, StorageError> {
    match config {
        StorageConfig::S3(cfg) => Ok(Arc::new(S3ObjectStore::new(cfg)?)),
        StorageConfig::Fs(cfg) => Ok(Arc::new(FsObjectStore::new(&cfg.root))),
    }
}

/// Normalize a key prefix to `segment/segment/` form (empty for the root).
pub fn normalize_prefix(prefix: &str) -> Result<String, StorageError> {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        return Ok(String::new());
    }
    validate_key(trimmed)?;
    Ok(format!("{}/", trimmed))
}

/// Reject keys that would escape their prefix or are otherwise malformed.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    let invalid = |reason: &str| StorageError::InvalidKey {
        key: key.to_string(),
        reason: reason.to_string(),
    };
    if key.is_empty() {
        return Err(invalid("empty"));
    }
    if key.starts_with('/') {
        return Err(invalid("must be relative"));
    }
    for segment in key.split('/') {
        match segment {
            "" => return Err(invalid("empty segment")),
            "." | ".." => return Err(invalid("dot segment")),
            _ => {}
        }
    }
    Ok(())
}

/// A raw-event artifact key: `<prefix>/dt=<YYYY-MM-DD>/<filename>`.
///
/// Zero-padded dates make lexicographic order chronological; the ordering
/// derives from the string so `max()` picks the newest partition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ArtifactKey(String);

impl ArtifactKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key the generator writes for `date`.
    pub fn for_date(prefix: &str, date: NaiveDate) -> Self {
        let prefix = prefix.trim_matches('/');
        let dt = date.format("%Y-%m-%d");
        Self(format!("{}/dt={}/events_{}.jsonl", prefix, dt, dt))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_for_date_is_zero_padded() {
        let key = ArtifactKey::for_date("events/", NaiveDate::from_ymd_opt(2026, 1, 7).unwrap());
        assert_eq!(key.as_str(), "events/dt=2026-01-07/events_2026-01-07.jsonl");
    }

    #[test]
    fn test_keys_order_chronologically() {
        let older = ArtifactKey::new("events/dt=2025-01-01/a.jsonl");
        let newer = ArtifactKey::new("events/dt=2025-01-02/b.jsonl");
        assert!(newer > older);
        let later_year = ArtifactKey::new("events/dt=2025-12-31/z.jsonl");
        assert!(later_year > newer);
    }

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix("events").unwrap(), "events/");
        assert_eq!(normalize_prefix("/events/").unwrap(), "events/");
        assert_eq!(normalize_prefix("  ").unwrap(), "");
        assert!(normalize_prefix("events/../secrets").is_err());
    }

    #[test]
    fn test_validate_key_rejects_escapes() {
        assert!(validate_key("events/dt=2025-01-01/a.jsonl").is_ok());
        assert!(validate_key("/abs").is_err());
        assert!(validate_key("a//b").is_err());
        assert!(validate_key("a/./b").is_err());
        assert!(validate_key("").is_err());
    }
}
