//! Freshness verdict: what an oracle result means for the cycle.
//!
//! Exit 0 is fresh. A nonzero exit is stale only when the output carries one
//! of the two staleness markers, `ERROR STALE` or `STALE freshness`
//! (case-insensitive). `ERROR STALE` tolerates any run of whitespace between
//! its words; `STALE freshness` is matched literally. Any other nonzero exit
//! means the oracle itself failed.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::stage::StageResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FreshnessVerdict {
    Fresh,
    Stale,
    UnknownFailure,
}

impl FreshnessVerdict {
    pub fn classify(exit_code: i32, output: &str) -> Self {
        if exit_code == 0 {
            FreshnessVerdict::Fresh
        } else if has_staleness_marker(output) {
            FreshnessVerdict::Stale
        } else {
            FreshnessVerdict::UnknownFailure
        }
    }

    pub fn of(result: &StageResult) -> Self {
        Self::classify(result.exit_code, &result.output)
    }
}

impl std::fmt::Display for FreshnessVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FreshnessVerdict::Fresh => write!(f, "FRESH"),
            FreshnessVerdict::Stale => write!(f, "STALE"),
            FreshnessVerdict::UnknownFailure => write!(f, "UNKNOWN_FAILURE"),
        }
    }
}

fn staleness_marker() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| {
        Regex::new(r"(?i)ERROR\s+STALE|STALE freshness").expect("staleness marker pattern is valid")
    })
}

pub fn has_staleness_marker(output: &str) -> bool {
    staleness_marker().is_match(output)
}
