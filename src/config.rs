//! TOML configuration for the freshness agent.
//!
//! One explicit value describes every collaborator: the stage commands, the
//! artifact store, the warehouse and the generator. Secrets never appear in
//! the file; credential fields name the environment variables to read.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::events::GeneratorConfig;
use crate::locator::ArtifactsConfig;
use crate::objstore::StorageConfig;
use crate::stage::CommandSpec;
use crate::storage::WarehouseConfig;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "FRESHNESS_AGENT_CONFIG";

/// Standard system location for the config file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/freshness-agent/agent.toml";

const DBT_PROJECT_DIR: &str = "/workspace/services/dbt";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for the agent process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub stages: StagesConfig,
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub warehouse: WarehouseConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AgentConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded agent configuration");
        Ok(config)
    }

    /// Resolve the configuration, in order:
    /// 1. `explicit` (the `--config` flag or `FRESHNESS_AGENT_CONFIG`); must load.
    /// 2. `/etc/freshness-agent/agent.toml`, if present.
    /// 3. Compiled-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize configuration")
    }
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// Command descriptors for each external collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StagesConfig {
    /// Freshness oracle; used for both the pre-check and the post-check.
    pub oracle: CommandSpec,
    pub generator: CommandSpec,
    /// `{key}` in args or env is replaced with the located artifact key.
    pub loader: CommandSpec,
    pub transform_run: CommandSpec,
    pub transform_test: CommandSpec,
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self {
            oracle: CommandSpec::new("dbt", ["source", "freshness"]).in_dir(DBT_PROJECT_DIR),
            generator: CommandSpec::new("freshness-agent", ["generate"]),
            loader: CommandSpec::new("freshness-agent", ["load", "--key", "{key}"]),
            transform_run: CommandSpec::new("dbt", ["run"]).in_dir(DBT_PROJECT_DIR),
            transform_test: CommandSpec::new("dbt", ["test"]).in_dir(DBT_PROJECT_DIR),
        }
    }
}

impl StagesConfig {
    /// Hand `path` to every stage as `FRESHNESS_AGENT_CONFIG` so agent
    /// subcommands run as stages read the same storage and warehouse. A
    /// stage that already sets the variable keeps its own value.
    pub fn export_config_path(&mut self, path: &Path) {
        let value = path.to_string_lossy().into_owned();
        for spec in [
            &mut self.oracle,
            &mut self.generator,
            &mut self.loader,
            &mut self.transform_run,
            &mut self.transform_test,
        ] {
            spec.env
                .entry(CONFIG_ENV.to_string())
                .or_insert_with(|| value.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    /// `RUST_LOG` takes precedence.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
