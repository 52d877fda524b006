//! Run log: the append-only audit trail of cycle outcomes.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Pipeline label written on every run record.
pub const PIPELINE_NAME: &str = "freshness_agent";

/// Upper bound on stored details, in characters.
pub const MAX_DETAILS_CHARS: usize = 8000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Error,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(RunStatus::Success),
            "error" => Some(RunStatus::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One persisted cycle outcome. Never updated or deleted.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub pipeline: String,
    pub status: RunStatus,
    pub details: String,
    /// Set by the store on insert.
    pub created_at: Option<DateTime<Utc>>,
}

/// Append-only store for run records.
///
/// `log_run` opens one transaction, inserts one row and commits. Failures are
/// returned to the caller as-is; nothing is retried.
#[async_trait::async_trait]
pub trait RunLogStore: Send + Sync {
    async fn log_run(&self, status: RunStatus, details: &str) -> Result<()>;

    /// Most recent records first.
    async fn recent_runs(&self, limit: usize) -> Result<Vec<RunRecord>>;
}

/// Cut `details` to at most `MAX_DETAILS_CHARS` characters.
pub fn truncate_details(details: &str) -> &str {
    match details.char_indices().nth(MAX_DETAILS_CHARS) {
        Some((idx, _)) => &details[..idx],
        None => details,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_details_untouched() {
        assert_eq!(truncate_details("freshness OK"), "freshness OK");
    }

    #[test]
    fn test_truncates_to_max_chars() {
        let long = "x".repeat(MAX_DETAILS_CHARS + 500);
        assert_eq!(truncate_details(&long).len(), MAX_DETAILS_CHARS);
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        // 'é' is two bytes; a byte slice at MAX_DETAILS_CHARS would split one
        let long = "é".repeat(MAX_DETAILS_CHARS + 1);
        let cut = truncate_details(&long);
        assert_eq!(cut.chars().count(), MAX_DETAILS_CHARS);
        assert_eq!(cut.len(), MAX_DETAILS_CHARS * 2);
    }

    #[test]
    fn test_status_round_trips_through_column_text() {
        for status in [RunStatus::Success, RunStatus::Error] {
            assert_eq!(RunStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RunStatus::parse("running"), None);
    }
}
