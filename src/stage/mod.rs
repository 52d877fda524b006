//! Stage invocation: one vocabulary for every external collaborator call.
//!
//! The orchestrator never talks to dbt, the generator or the loader directly.
//! It hands a [`CommandSpec`] to a [`StageRunner`] and gets back a
//! [`StageResult`] holding the exit code and the combined output.

pub mod process;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use self::process::ProcessRunner;

/// Exit code reported when a stage exceeds its timeout (same as coreutils `timeout`).
pub const EXIT_TIMED_OUT: i32 = 124;

/// Exit code reported when a stage's program cannot be launched.
pub const EXIT_LAUNCH_FAILED: i32 = 127;

/// The fixed stages of a cycle, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StageName {
    PreCheck,
    Generate,
    Load,
    TransformRun,
    TransformTest,
    PostCheck,
}

impl StageName {
    /// Section label used in the cycle report.
    pub fn label(self) -> &'static str {
        match self {
            StageName::PreCheck => "pre-check",
            StageName::Generate => "generator",
            StageName::Load => "loader",
            StageName::TransformRun => "transform-run",
            StageName::TransformTest => "transform-test",
            StageName::PostCheck => "post-check",
        }
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcome of one stage invocation. Owned by the orchestrator for the
/// duration of a cycle and folded into the run record.
#[derive(Debug, Clone)]
pub struct StageResult {
    pub stage: StageName,
    pub exit_code: i32,
    /// stdout and stderr, interleaved in arrival order.
    pub output: String,
    pub duration: Duration,
    pub timed_out: bool,
}

impl StageResult {
    pub fn new(stage: StageName, exit_code: i32, output: impl Into<String>) -> Self {
        Self {
            stage,
            exit_code,
            output: output.into(),
            duration: Duration::ZERO,
            timed_out: false,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// How to launch one external collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSpec {
    /// Program name (resolved via `$PATH`) or absolute path.
    pub program: String,
    pub args: Vec<String>,
    /// Working directory; inherits the agent's when unset.
    pub cwd: Option<PathBuf>,
    /// Kill the stage after this many seconds. `0` disables the limit.
    pub timeout_secs: u64,
    /// Extra environment variables for the child.
    pub env: BTreeMap<String, String>,
}

impl Default for CommandSpec {
    fn default() -> Self {
        Self {
            program: String::new(),
            args: Vec::new(),
            cwd: None,
            timeout_secs: 1800,
            env: BTreeMap::new(),
        }
    }
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn in_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    /// Replace every `{name}` in args and env values with `value`.
    pub fn substitute(&self, name: &str, value: &str) -> Self {
        let placeholder = format!("{{{}}}", name);
        let mut spec = self.clone();
        for arg in spec.args.iter_mut() {
            *arg = arg.replace(&placeholder, value);
        }
        for v in spec.env.values_mut() {
            *v = v.replace(&placeholder, value);
        }
        spec
    }

    /// Human-readable command line, for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Executes stage invocations. Infallible by contract: launch errors and
/// timeouts come back as nonzero [`StageResult`]s.
#[async_trait::async_trait]
pub trait StageRunner: Send + Sync {
    async fn run_stage(&self, stage: StageName, invocation: &CommandSpec) -> StageResult;
}
