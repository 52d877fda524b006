//! Remediation orchestrator: one check-and-remediate cycle.
//!
//! A cycle runs the freshness oracle and classifies its result. Fresh data
//! and oracle failures end the cycle at once. Stale data runs the fixed
//! remediation pipeline: generate, locate, load, transform-run,
//! transform-test and recheck. Every stage runs whatever the previous one
//! returned; the outcome is the AND of the five remediation exit codes.
//!
//! Exactly one run record is written per cycle, including when the locator
//! fails. `run_cycle` never returns an error: every failure becomes a
//! [`CycleExit`] with its process exit code.

pub mod report;
pub mod verdict;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::StagesConfig;
use crate::locator::{ArtifactLocator, LocatorError};
use crate::runlog::{RunLogStore, RunStatus};
use crate::stage::{CommandSpec, StageName, StageResult, StageRunner};

pub use self::report::RemediationReport;
pub use self::verdict::FreshnessVerdict;

/// How a cycle ended, ordered by the process exit code it maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CycleExit {
    Fresh,
    Remediated,
    /// Oracle failed without a staleness marker; carries its exit code.
    OracleFailed(i32),
    RemediationFailed,
    LocatorFailed,
    RunLogFailed,
    ConfigurationError,
}

impl CycleExit {
    pub fn code(self) -> i32 {
        match self {
            CycleExit::Fresh | CycleExit::Remediated => 0,
            CycleExit::OracleFailed(code) if (1..=255).contains(&code) => code,
            CycleExit::OracleFailed(_) => 1,
            CycleExit::RemediationFailed => 70,
            CycleExit::LocatorFailed => 71,
            CycleExit::RunLogFailed => 74,
            CycleExit::ConfigurationError => 78,
        }
    }
}

/// Everything the caller needs after a cycle: what to print and how to exit.
#[derive(Debug, Clone, Serialize)]
pub struct CycleOutcome {
    pub cycle_id: Uuid,
    /// `None` when the cycle ended before the oracle ran.
    pub verdict: Option<FreshnessVerdict>,
    pub status: RunStatus,
    pub exit: CycleExit,
    /// Full report; the stored record holds a truncated copy.
    pub report: String,
    /// Whether the run record was written.
    pub recorded: bool,
}

impl CycleOutcome {
    pub fn exit_code(&self) -> i32 {
        self.exit.code()
    }
}

pub struct Orchestrator {
    stages: StagesConfig,
    prefix: String,
    runner: Arc<dyn StageRunner>,
    locator: ArtifactLocator,
    run_log: Arc<dyn RunLogStore>,
}

impl Orchestrator {
    pub fn new(
        stages: StagesConfig,
        prefix: impl Into<String>,
        runner: Arc<dyn StageRunner>,
        locator: ArtifactLocator,
        run_log: Arc<dyn RunLogStore>,
    ) -> Self {
        Self {
            stages,
            prefix: prefix.into(),
            runner,
            locator,
            run_log,
        }
    }

    /// Run one cycle and record its outcome.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let cycle_id = Uuid::new_v4();
        let span = info_span!("cycle", %cycle_id);
        self.cycle(cycle_id).instrument(span).await
    }

    async fn cycle(&self, cycle_id: Uuid) -> CycleOutcome {
        let started = Utc::now();
        info!(prefix = %self.prefix, "Starting freshness cycle");

        let pre_check = self.stage(StageName::PreCheck, &self.stages.oracle).await;
        let verdict = FreshnessVerdict::of(&pre_check);
        info!(%verdict, exit_code = pre_check.exit_code, "Freshness pre-check complete");

        let (status, exit, report) = match verdict {
            FreshnessVerdict::Fresh => (
                RunStatus::Success,
                CycleExit::Fresh,
                report::fresh_details(started, &pre_check),
            ),
            FreshnessVerdict::UnknownFailure => {
                warn!(exit_code = pre_check.exit_code, "Oracle failed without a staleness marker, not remediating");
                (
                    RunStatus::Error,
                    CycleExit::OracleFailed(pre_check.exit_code),
                    report::oracle_failure_details(started, &pre_check),
                )
            }
            FreshnessVerdict::Stale => self.remediate(started, pre_check).await,
        };

        record(self.run_log.as_ref(), cycle_id, Some(verdict), status, exit, report).await
    }

    async fn remediate(
        &self,
        started: DateTime<Utc>,
        pre_check: StageResult,
    ) -> (RunStatus, CycleExit, String) {
        let mut report = RemediationReport::new(started, pre_check);

        report.record(self.stage(StageName::Generate, &self.stages.generator).await);

        let key = match self.locator.latest_key(&self.prefix).await {
            Ok(key) => key,
            Err(e) => {
                let exit = match e {
                    LocatorError::Configuration(_) => CycleExit::ConfigurationError,
                    LocatorError::NotFound { .. } => CycleExit::LocatorFailed,
                };
                error!(error = %e, "Artifact lookup failed, stopping remediation");
                report.set_locator_error(e.to_string());
                return (RunStatus::Error, exit, report.render());
            }
        };
        let loader = self.stages.loader.substitute("key", key.as_str());
        report.set_latest_key(key);

        report.record(self.stage(StageName::Load, &loader).await);
        report.record(self.stage(StageName::TransformRun, &self.stages.transform_run).await);
        report.record(self.stage(StageName::TransformTest, &self.stages.transform_test).await);
        report.record(self.stage(StageName::PostCheck, &self.stages.oracle).await);

        if report.succeeded() {
            info!("Remediation succeeded");
            (RunStatus::Success, CycleExit::Remediated, report.render())
        } else {
            warn!(failed = ?report.failed_stages(), "Remediation failed");
            (RunStatus::Error, CycleExit::RemediationFailed, report.render())
        }
    }

    async fn stage(&self, stage: StageName, invocation: &CommandSpec) -> StageResult {
        let result = self.runner.run_stage(stage, invocation).await;
        debug!(
            %stage,
            exit_code = result.exit_code,
            output_len = result.output.len(),
            elapsed_ms = result.duration.as_millis() as u64,
            "Stage result collected"
        );
        result
    }
}

/// Write the cycle's single run record. A failed write overrides `exit`.
pub async fn record(
    run_log: &dyn RunLogStore,
    cycle_id: Uuid,
    verdict: Option<FreshnessVerdict>,
    status: RunStatus,
    exit: CycleExit,
    report: String,
) -> CycleOutcome {
    let (exit, recorded) = match run_log.log_run(status, &report).await {
        Ok(()) => {
            info!(%status, exit_code = exit.code(), "Run record written");
            (exit, true)
        }
        Err(e) => {
            error!(error = %format!("{e:#}"), "Failed to write run record");
            (CycleExit::RunLogFailed, false)
        }
    };
    CycleOutcome {
        cycle_id,
        verdict,
        status,
        exit,
        report,
        recorded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::locator::ArtifactsConfig;
    use crate::objstore::{FsObjectStore, ObjectStore, S3Config, S3ObjectStore};
    use crate::runlog::RunRecord;

    /// Returns canned results per stage and remembers every invocation.
    #[derive(Default)]
    struct ScriptedRunner {
        script: HashMap<StageName, (i32, String)>,
        calls: Mutex<Vec<(StageName, CommandSpec)>>,
    }

    impl ScriptedRunner {
        fn stale_then_ok() -> Self {
            let mut runner = Self::default();
            runner.set(StageName::PreCheck, 1, "ERROR STALE: source X");
            for stage in [
                StageName::Generate,
                StageName::Load,
                StageName::TransformRun,
                StageName::TransformTest,
                StageName::PostCheck,
            ] {
                runner.set(stage, 0, &format!("{} ok", stage));
            }
            runner
        }

        fn set(&mut self, stage: StageName, code: i32, output: &str) {
            self.script.insert(stage, (code, output.to_string()));
        }

        fn invoked(&self) -> Vec<StageName> {
            self.calls.lock().unwrap().iter().map(|(s, _)| *s).collect()
        }
    }

    #[async_trait::async_trait]
    impl StageRunner for ScriptedRunner {
        async fn run_stage(&self, stage: StageName, invocation: &CommandSpec) -> StageResult {
            self.calls.lock().unwrap().push((stage, invocation.clone()));
            let (code, output) = self.script.get(&stage).cloned().unwrap_or((0, String::new()));
            StageResult::new(stage, code, output)
        }
    }

    #[derive(Default)]
    struct RecordingLog {
        records: Mutex<Vec<RunRecord>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl RunLogStore for RecordingLog {
        async fn log_run(&self, status: RunStatus, details: &str) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("connection refused");
            }
            self.records.lock().unwrap().push(RunRecord {
                pipeline: crate::runlog::PIPELINE_NAME.to_string(),
                status,
                details: details.to_string(),
                created_at: None,
            });
            Ok(())
        }

        async fn recent_runs(&self, _limit: usize) -> anyhow::Result<Vec<RunRecord>> {
            Ok(self.records.lock().unwrap().iter().rev().cloned().collect())
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        runner: Arc<ScriptedRunner>,
        log: Arc<RecordingLog>,
        orchestrator: Orchestrator,
    }

    async fn harness(runner: ScriptedRunner, artifacts: &[&str]) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        for key in artifacts {
            store.put(key, b"{}\n".to_vec(), "application/json").await.unwrap();
        }
        build(dir, Arc::new(store), runner, RecordingLog::default())
    }

    fn build(
        dir: tempfile::TempDir,
        store: Arc<dyn ObjectStore>,
        runner: ScriptedRunner,
        log: RecordingLog,
    ) -> Harness {
        let runner = Arc::new(runner);
        let log = Arc::new(log);
        let locator = ArtifactLocator::new(store, &ArtifactsConfig::default());
        let orchestrator = Orchestrator::new(
            StagesConfig::default(),
            "events",
            runner.clone(),
            locator,
            log.clone(),
        );
        Harness {
            _dir: dir,
            runner,
            log,
            orchestrator,
        }
    }

    fn records(h: &Harness) -> Vec<RunRecord> {
        h.log.records.lock().unwrap().clone()
    }

    const ARTIFACTS: &[&str] = &[
        "events/dt=2025-01-01/a.jsonl",
        "events/dt=2025-01-02/b.jsonl",
    ];

    #[tokio::test]
    async fn test_fresh_cycle_records_success() {
        let mut runner = ScriptedRunner::default();
        runner.set(StageName::PreCheck, 0, "ok");
        let h = harness(runner, &[]).await;

        let outcome = h.orchestrator.run_cycle().await;

        assert_eq!(outcome.exit, CycleExit::Fresh);
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(outcome.verdict, Some(FreshnessVerdict::Fresh));
        let recs = records(&h);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].status, RunStatus::Success);
        assert!(recs[0].details.ends_with("freshness OK\nok"));
        assert_eq!(h.runner.invoked(), vec![StageName::PreCheck]);
    }

    #[tokio::test]
    async fn test_stale_cycle_remediates_successfully() {
        let h = harness(ScriptedRunner::stale_then_ok(), ARTIFACTS).await;

        let outcome = h.orchestrator.run_cycle().await;

        assert_eq!(outcome.exit, CycleExit::Remediated);
        assert_eq!(outcome.exit_code(), 0);
        let recs = records(&h);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].status, RunStatus::Success);
        for label in ["pre-check", "generator", "loader", "transform-run", "transform-test", "post-check"] {
            assert!(recs[0].details.contains(&format!("--- {} ---", label)), "missing {label}");
        }
        assert_eq!(
            h.runner.invoked(),
            vec![
                StageName::PreCheck,
                StageName::Generate,
                StageName::Load,
                StageName::TransformRun,
                StageName::TransformTest,
                StageName::PostCheck,
            ]
        );
    }

    #[tokio::test]
    async fn test_loader_receives_latest_key() {
        let h = harness(ScriptedRunner::stale_then_ok(), ARTIFACTS).await;
        h.orchestrator.run_cycle().await;

        let calls = h.runner.calls.lock().unwrap();
        let (_, loader) = calls.iter().find(|(s, _)| *s == StageName::Load).unwrap();
        assert_eq!(loader.args, ["load", "--key", "events/dt=2025-01-02/b.jsonl"]);
    }

    #[tokio::test]
    async fn test_failed_loader_fails_cycle_but_later_stages_still_run() {
        let mut runner = ScriptedRunner::stale_then_ok();
        runner.set(StageName::Load, 3, "duplicate key violation");
        let h = harness(runner, ARTIFACTS).await;

        let outcome = h.orchestrator.run_cycle().await;

        assert_eq!(outcome.exit, CycleExit::RemediationFailed);
        assert_ne!(outcome.exit_code(), 0);
        let recs = records(&h);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].status, RunStatus::Error);
        assert!(recs[0].details.contains("loader_exit=3"));
        assert!(recs[0].details.contains("--- loader ---\nduplicate key violation"));
        assert_eq!(h.runner.invoked().len(), 6);
    }

    #[tokio::test]
    async fn test_oracle_failure_skips_remediation() {
        let mut runner = ScriptedRunner::default();
        runner.set(StageName::PreCheck, 1, "disk full");
        let h = harness(runner, ARTIFACTS).await;

        let outcome = h.orchestrator.run_cycle().await;

        assert_eq!(outcome.exit, CycleExit::OracleFailed(1));
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(outcome.verdict, Some(FreshnessVerdict::UnknownFailure));
        let recs = records(&h);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].status, RunStatus::Error);
        assert!(recs[0].details.ends_with("\ndisk full"));
        assert_eq!(h.runner.invoked(), vec![StageName::PreCheck]);
    }

    #[tokio::test]
    async fn test_failed_generator_still_loads_newest_existing_artifact() {
        let mut runner = ScriptedRunner::stale_then_ok();
        runner.set(StageName::Generate, 1, "generator crashed");
        let h = harness(runner, ARTIFACTS).await;

        let outcome = h.orchestrator.run_cycle().await;

        assert_eq!(outcome.exit, CycleExit::RemediationFailed);
        assert!(h.runner.invoked().contains(&StageName::Load));
        assert!(outcome.report.contains("latest_key=events/dt=2025-01-02/b.jsonl"));
    }

    #[tokio::test]
    async fn test_locator_failure_is_recorded() {
        let h = harness(ScriptedRunner::stale_then_ok(), &[]).await;

        let outcome = h.orchestrator.run_cycle().await;

        assert_eq!(outcome.exit, CycleExit::LocatorFailed);
        assert_eq!(outcome.exit_code(), 71);
        assert!(outcome.recorded);
        let recs = records(&h);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].status, RunStatus::Error);
        assert!(recs[0].details.contains("--- pre-check ---"));
        assert!(recs[0].details.contains("--- generator ---"));
        assert!(recs[0].details.contains("--- locator ---"));
        assert_eq!(h.runner.invoked(), vec![StageName::PreCheck, StageName::Generate]);
    }

    #[tokio::test]
    async fn test_missing_credentials_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = S3ObjectStore::new(&S3Config {
            access_key_env: "FRESHNESS_AGENT_TEST_ORCH_UNSET_AK".to_string(),
            secret_key_env: "FRESHNESS_AGENT_TEST_ORCH_UNSET_SK".to_string(),
            ..S3Config::default()
        })
        .unwrap();
        let h = build(dir, Arc::new(store), ScriptedRunner::stale_then_ok(), RecordingLog::default());

        let outcome = h.orchestrator.run_cycle().await;

        assert_eq!(outcome.exit, CycleExit::ConfigurationError);
        assert_eq!(outcome.exit_code(), 78);
        let recs = records(&h);
        assert_eq!(recs.len(), 1);
        assert!(recs[0].details.contains("FRESHNESS_AGENT_TEST_ORCH_UNSET_AK"));
    }

    #[tokio::test]
    async fn test_run_log_failure_overrides_exit() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = ScriptedRunner::default();
        runner.set(StageName::PreCheck, 0, "ok");
        let log = RecordingLog {
            fail: true,
            ..RecordingLog::default()
        };
        let h = build(dir, Arc::new(FsObjectStore::new("/nonexistent")), runner, log);

        let outcome = h.orchestrator.run_cycle().await;

        assert_eq!(outcome.exit, CycleExit::RunLogFailed);
        assert_eq!(outcome.exit_code(), 74);
        assert!(!outcome.recorded);
        assert_eq!(outcome.status, RunStatus::Success);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(CycleExit::Fresh.code(), 0);
        assert_eq!(CycleExit::Remediated.code(), 0);
        assert_eq!(CycleExit::OracleFailed(2).code(), 2);
        assert_eq!(CycleExit::OracleFailed(124).code(), 124);
        assert_eq!(CycleExit::OracleFailed(-1).code(), 1);
        assert_eq!(CycleExit::OracleFailed(300).code(), 1);
        assert_eq!(CycleExit::RemediationFailed.code(), 70);
        assert_eq!(CycleExit::LocatorFailed.code(), 71);
        assert_eq!(CycleExit::RunLogFailed.code(), 74);
        assert_eq!(CycleExit::ConfigurationError.code(), 78);
    }
}
