//! Child-process stage runner -- spawn, capture combined output, enforce timeouts.

use std::process::{ExitStatus, Stdio};
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::{CommandSpec, StageName, StageResult, StageRunner, EXIT_LAUNCH_FAILED, EXIT_TIMED_OUT};

/// Runs each stage as a blocking child process.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

#[async_trait::async_trait]
impl StageRunner for ProcessRunner {
    async fn run_stage(&self, stage: StageName, invocation: &CommandSpec) -> StageResult {
        let start = Instant::now();
        info!(%stage, command = %invocation.display(), "Starting stage");

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &invocation.cwd {
            cmd.current_dir(cwd);
        }
        // Own process group, so a timeout can take down everything the stage forked.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(%stage, program = %invocation.program, error = %e, "Failed to launch stage");
                let mut result = StageResult::new(
                    stage,
                    EXIT_LAUNCH_FAILED,
                    format!("failed to launch '{}': {}", invocation.program, e),
                );
                result.duration = start.elapsed();
                return result;
            }
        };

        let mut output = String::new();
        let waited = match invocation.timeout() {
            Some(limit) => tokio::time::timeout(limit, collect(&mut child, &mut output))
                .await
                .ok(),
            None => Some(collect(&mut child, &mut output).await),
        };

        let (exit_code, timed_out) = match waited {
            Some(code) => (code, false),
            None => {
                kill_process_group(&child);
                if let Err(e) = child.kill().await {
                    warn!(%stage, error = %e, "Failed to kill timed-out stage");
                }
                if !output.is_empty() && !output.ends_with('\n') {
                    output.push('\n');
                }
                output.push_str(&format!(
                    "[{} timed out after {}s]\n",
                    stage, invocation.timeout_secs
                ));
                (EXIT_TIMED_OUT, true)
            }
        };

        let duration = start.elapsed();
        if exit_code == 0 {
            info!(%stage, exit_code, elapsed_ms = duration.as_millis() as u64, "Stage finished");
        } else {
            warn!(%stage, exit_code, timed_out, elapsed_ms = duration.as_millis() as u64, "Stage failed");
        }

        StageResult {
            stage,
            exit_code,
            output,
            duration,
            timed_out,
        }
    }
}

/// SIGKILL the child's whole process group. The child is the group leader.
fn kill_process_group(child: &Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            unsafe {
                libc::kill(-(pid as i32), libc::SIGKILL);
            }
        }
    }
    #[cfg(not(unix))]
    let _ = child;
}

/// Drain stdout and stderr into `output` in arrival order, then reap the child.
async fn collect(child: &mut Child, output: &mut String) -> i32 {
    let (tx, mut rx) = mpsc::unbounded_channel();
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(pump(stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(pump(stderr, tx.clone()));
    }
    drop(tx);

    while let Some(chunk) = rx.recv().await {
        output.push_str(&chunk);
    }

    match child.wait().await {
        Ok(status) => exit_code(status),
        Err(e) => {
            output.push_str(&format!("[failed to wait for child: {}]\n", e));
            -1
        }
    }
}

async fn pump<R: AsyncRead + Unpin>(stream: R, tx: mpsc::UnboundedSender<String>) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                if tx.send(String::from_utf8_lossy(&buf).into_owned()).is_err() {
                    break;
                }
            }
        }
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}
