//! Shell execution: run a command string under a wall-clock timeout,
//! capturing stdout/stderr as strings. Grounded on `codex-rs/core/src/spawn.rs`'s
//! `Stdio::piped()` child-process plumbing, stripped of its sandboxing
//! machinery (Non-goal: "no true sandboxing").

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};

#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

/// Run `command` through `sh -c`, with `JOB_ID`, `JOB_ARTIFACTS_DIR`, and
/// `RUNNER_ARTIFACTS_DIR` set in its environment (all three pointing at
/// `artifacts_dir`). On timeout the child is killed, the exit code is `124`,
/// and a synthetic `\n[timeout after <ms>ms]` line is appended to stderr.
pub async fn run_command(
    job_id: &str,
    command: &str,
    timeout_secs: u64,
    artifacts_dir: &Path,
) -> Result<ExecOutcome> {
    let artifacts_dir_str = artifacts_dir.to_string_lossy().to_string();

    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .env("JOB_ID", job_id)
        .env("JOB_ARTIFACTS_DIR", &artifacts_dir_str)
        .env("RUNNER_ARTIFACTS_DIR", &artifacts_dir_str)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .context("failed to spawn shell")?;

    let mut stdout_pipe = child.stdout.take().context("child stdout was not piped")?;
    let mut stderr_pipe = child.stderr.take().context("child stderr was not piped")?;

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stdout_pipe.read_to_end(&mut buf).await;
        buf
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stderr_pipe.read_to_end(&mut buf).await;
        buf
    });

    let start = Instant::now();
    let wait_result = tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait()).await;

    let (exit_code, timed_out) = match wait_result {
        Ok(Ok(status)) => (status.code().unwrap_or(-1), false),
        Ok(Err(err)) => return Err(err).context("waiting for child process"),
        Err(_) => {
            kill_child(&mut child).await;
            (124, true)
        }
    };

    let stdout = String::from_utf8_lossy(&stdout_task.await.unwrap_or_default()).into_owned();
    let mut stderr = String::from_utf8_lossy(&stderr_task.await.unwrap_or_default()).into_owned();

    if timed_out {
        let duration_ms = start.elapsed().as_millis();
        stderr.push_str(&format!("\n[timeout after {duration_ms}ms]"));
    }

    Ok(ExecOutcome {
        exit_code,
        stdout,
        stderr,
        timed_out,
    })
}

async fn kill_child(child: &mut Child) {
    let _ = child.start_kill();
    let _ = child.wait().await;
}
