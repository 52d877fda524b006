//! Cycle report: the labeled text persisted as run-record details and
//! printed to the terminal.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::objstore::ArtifactKey;
use crate::stage::{StageName, StageResult};

/// Number of remediation stages whose exit codes decide the outcome.
pub const REMEDIATION_STAGES: usize = 5;

fn stamp(started: DateTime<Utc>) -> String {
    started.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Details for a cycle that found the data fresh.
pub fn fresh_details(started: DateTime<Utc>, pre_check: &StageResult) -> String {
    format!("[{}] freshness OK\n{}", stamp(started), pre_check.output)
}

/// Details for a cycle whose oracle failed without reporting staleness.
pub fn oracle_failure_details(started: DateTime<Utc>, pre_check: &StageResult) -> String {
    format!("[{}] freshness failed (non-stale)\n{}", stamp(started), pre_check.output)
}

/// Accumulates the remediation pipeline's results in execution order.
#[derive(Debug)]
pub struct RemediationReport {
    started: DateTime<Utc>,
    pre_check: StageResult,
    stages: Vec<StageResult>,
    latest_key: Option<ArtifactKey>,
    locator_error: Option<String>,
}

impl RemediationReport {
    pub fn new(started: DateTime<Utc>, pre_check: StageResult) -> Self {
        Self {
            started,
            pre_check,
            stages: Vec::with_capacity(REMEDIATION_STAGES),
            latest_key: None,
            locator_error: None,
        }
    }

    pub fn record(&mut self, result: StageResult) {
        self.stages.push(result);
    }

    pub fn set_latest_key(&mut self, key: ArtifactKey) {
        self.latest_key = Some(key);
    }

    pub fn set_locator_error(&mut self, error: impl Into<String>) {
        self.locator_error = Some(error.into());
    }

    /// Logical AND over the five remediation exit codes. The pre-check is
    /// not part of it; an incomplete pipeline never succeeds.
    pub fn succeeded(&self) -> bool {
        self.locator_error.is_none()
            && self.stages.len() == REMEDIATION_STAGES
            && self.stages.iter().all(StageResult::succeeded)
    }

    /// Stages that returned nonzero.
    pub fn failed_stages(&self) -> Vec<StageName> {
        self.stages
            .iter()
            .filter(|r| !r.succeeded())
            .map(|r| r.stage)
            .collect()
    }

    pub fn render(&self) -> String {
        let mut header = vec![format!("[{}] freshness=STALE -> remediate", stamp(self.started))];
        for result in &self.stages {
            header.push(format!(
                "{}_exit={}",
                result.stage.label().replace('-', "_"),
                result.exit_code
            ));
            if result.stage == StageName::Generate {
                header.push(self.key_line());
            }
        }
        if self.stages.iter().all(|r| r.stage != StageName::Generate) {
            header.push(self.key_line());
        }
        if let Some(err) = &self.locator_error {
            header.push(format!("locator_error={}", err));
        }

        let mut blob = header.join("\n");
        push_section(&mut blob, self.pre_check.stage.label(), &self.pre_check.output);
        for result in &self.stages {
            push_section(&mut blob, result.stage.label(), &result.output);
            if result.stage == StageName::Generate {
                if let Some(err) = &self.locator_error {
                    push_section(&mut blob, "locator", err);
                }
            }
        }
        blob
    }

    fn key_line(&self) -> String {
        match &self.latest_key {
            Some(key) => format!("latest_key={}", key),
            None => "latest_key=<none>".to_string(),
        }
    }
}

fn push_section(blob: &mut String, label: &str, output: &str) {
    blob.push_str("\n\n--- ");
    blob.push_str(label);
    blob.push_str(" ---\n");
    blob.push_str(output);
}
