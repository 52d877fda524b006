//! freshness-agent -- keeps warehouse tables fresh.
//!
//! This crate checks a freshness oracle and, when the data is stale, runs a
//! bounded remediation pipeline (generate, locate, load, transform, retest,
//! recheck), recording exactly one auditable outcome per cycle.

pub mod config;
pub mod events;
pub mod locator;
pub mod objstore;
pub mod orchestrator;
pub mod runlog;
pub mod stage;
pub mod storage;

use std::sync::Arc;

use chrono::Utc;
use tracing::error;
use uuid::Uuid;

use crate::config::AgentConfig;
use crate::locator::ArtifactLocator;
use crate::orchestrator::{CycleExit, CycleOutcome, Orchestrator};
use crate::runlog::RunStatus;
use crate::stage::ProcessRunner;

/// Run one check-and-remediate cycle against the configured collaborators.
pub async fn run_cycle(config: &AgentConfig) -> CycleOutcome {
    // 1. Run log
    let warehouse = match storage::open(&config.warehouse) {
        Ok(wh) => wh,
        Err(e) => {
            let report = format!("run log unavailable: {e:#}");
            error!(error = %report, "Failed to open warehouse");
            return CycleOutcome {
                cycle_id: Uuid::new_v4(),
                verdict: None,
                status: RunStatus::Error,
                exit: CycleExit::RunLogFailed,
                report,
                recorded: false,
            };
        }
    };

    // 2. Object store
    let store = match objstore::open(&config.storage) {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "Invalid object storage configuration");
            let report = format!(
                "[{}] storage configuration error: {}",
                Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
                e
            );
            return orchestrator::record(
                warehouse.run_log.as_ref(),
                Uuid::new_v4(),
                None,
                RunStatus::Error,
                CycleExit::ConfigurationError,
                report,
            )
            .await;
        }
    };

    // 3. Cycle
    let locator = ArtifactLocator::new(store, &config.artifacts);
    Orchestrator::new(
        config.stages.clone(),
        config.artifacts.prefix.clone(),
        Arc::new(ProcessRunner),
        locator,
        warehouse.run_log,
    )
    .run_cycle()
    .await
}
