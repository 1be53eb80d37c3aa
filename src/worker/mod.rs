//! The Worker: a single-threaded poll loop that claims jobs, executes them
//! under a shell, and records attempts/artifacts/status.

mod exec;

pub use exec::{run_command, ExecOutcome};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::time::sleep;

use crate::ids::new_attempt_id;
use crate::jobdoc::{
    append_log_lines, build_manifest, Attempt, AttemptStatus, JobDir, JobDocument, LogLine,
    LogStream, Runner,
};
use crate::store::{JobStatus, Store};

pub struct WorkerConfig {
    pub jobs_dir: PathBuf,
    pub log_dir: PathBuf,
    pub poll_interval: Duration,
    pub timeout_secs: u64,
}

/// Append one NDJSON line to the shared `runner.ndjson`: operational events
/// for the poll loop itself (start, claim, claim error), as opposed to a
/// job's own captured output.
async fn log_runner_event(log_dir: &std::path::Path, event: &str, extra: serde_json::Value) {
    let mut payload = json!({
        "ts": crate::time::now_rfc3339_millis(),
        "event": event,
    });
    if let (Some(obj), Some(extra_obj)) = (payload.as_object_mut(), extra.as_object()) {
        for (k, v) in extra_obj {
            obj.insert(k.clone(), v.clone());
        }
    }
    let path = log_dir.join("runner.ndjson");
    if let Some(parent) = path.parent() {
        let _ = tokio::fs::create_dir_all(parent).await;
    }
    let mut bytes = match serde_json::to_vec(&payload) {
        Ok(b) => b,
        Err(_) => return,
    };
    bytes.push(b'\n');
    if let Ok(mut file) = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
    {
        use tokio::io::AsyncWriteExt;
        let _ = file.write_all(&bytes).await;
    }
}

/// Run the poll loop forever, or until `shutdown` resolves.
pub async fn run(store: Arc<dyn Store>, config: WorkerConfig, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
    log_runner_event(
        &config.log_dir,
        "runner_start",
        json!({"pid": std::process::id()}),
    )
    .await;

    loop {
        if shutdown.try_recv().is_ok() {
            return;
        }

        match store.claim_oldest_queued().await {
            Ok(Some(claimed)) => {
                log_runner_event(
                    &config.log_dir,
                    "job_claimed",
                    json!({"job_id": claimed.job_id}),
                )
                .await;
                log_runner_event(
                    &config.log_dir,
                    "job_running",
                    json!({"job_id": claimed.job_id, "command": claimed.command}),
                )
                .await;

                run_one_attempt(&store, &config, &claimed.job_id, &claimed.command).await;
            }
            Ok(None) => {}
            Err(err) => {
                log_runner_event(
                    &config.log_dir,
                    "claim_error",
                    json!({"error": err.to_string()}),
                )
                .await;
            }
        }

        tokio::select! {
            _ = sleep(config.poll_interval) => {}
            _ = &mut shutdown => return,
        }
    }
}

async fn run_one_attempt(store: &Arc<dyn Store>, config: &WorkerConfig, job_id: &str, command: &str) {
    let job_dir = JobDir::new(&config.jobs_dir, job_id);
    if let Err(err) = job_dir.ensure_dirs().await {
        log_runner_event(
            &config.log_dir,
            "job_error",
            json!({"job_id": job_id, "error": err.to_string()}),
        )
        .await;
        let _ = store.update_status(job_id, JobStatus::Failed).await;
        return;
    }

    let attempt_id = new_attempt_id();
    let started_at = Utc::now();

    let mut doc = job_dir.read_document().await.unwrap_or_else(|| {
        JobDocument::new_skeleton(
            job_id.to_string(),
            command.to_string(),
            started_at,
            None,
            Runner::requested_only(None),
        )
    });

    doc.status = JobStatus::Running;
    doc.runner.fill_selected_default();
    doc.attempts.push(Attempt {
        attempt_id: attempt_id.clone(),
        status: AttemptStatus::Running,
        started_at,
        finished_at: None,
        exit_code: None,
        error_summary: None,
    });
    if let Err(err) = job_dir.write_document(&doc).await {
        log_runner_event(
            &config.log_dir,
            "job_error",
            json!({"job_id": job_id, "error": err.to_string()}),
        )
        .await;
        let _ = store.update_status(job_id, JobStatus::Failed).await;
        return;
    }

    let artifacts_dir = job_dir.artifacts_dir();
    let worker_log_path = config.log_dir.join("worker.ndjson");
    let attempt_log_path = job_dir.attempt_log_path(&attempt_id);

    let outcome = run_command(job_id, command, config.timeout_secs, &artifacts_dir).await;

    let (status, exit_code, error_summary) = match &outcome {
        Ok(result) => {
            let lines = result.to_log_lines(job_id, &attempt_id);
            let _ = append_log_lines(&attempt_log_path, &lines).await;
            let _ = append_log_lines(&worker_log_path, &lines).await;

            let status = if result.exit_code == 0 && !result.timed_out {
                JobStatus::Succeeded
            } else {
                JobStatus::Failed
            };
            (status, Some(result.exit_code), None)
        }
        Err(err) => (JobStatus::Failed, None, Some(err.to_string())),
    };

    let finished_at = Utc::now();
    let duration_ms = (finished_at - started_at).num_milliseconds();

    if let Some(attempt) = doc.last_attempt_mut() {
        attempt.status = match status {
            JobStatus::Succeeded => AttemptStatus::Succeeded,
            _ => AttemptStatus::Failed,
        };
        attempt.finished_at = Some(finished_at);
        attempt.exit_code = exit_code;
        attempt.error_summary = error_summary.clone();
    }
    doc.status = status;
    doc.completed_at = Some(finished_at);
    doc.artifacts_manifest = build_manifest(&artifacts_dir).await.unwrap_or_default();

    if let Err(err) = job_dir.write_document(&doc).await {
        log_runner_event(
            &config.log_dir,
            "job_error",
            json!({"job_id": job_id, "error": err.to_string()}),
        )
        .await;
    }

    if let Err(err) = store.update_status(job_id, status).await {
        log_runner_event(
            &config.log_dir,
            "job_error",
            json!({"job_id": job_id, "error": err.to_string()}),
        )
        .await;
        return;
    }

    match error_summary {
        Some(error) => {
            log_runner_event(
                &config.log_dir,
                "job_error",
                json!({"job_id": job_id, "error": error, "duration_ms": duration_ms}),
            )
            .await;
        }
        None => {
            log_runner_event(
                &config.log_dir,
                "job_finished",
                json!({
                    "job_id": job_id,
                    "status": status.as_str(),
                    "exit_code": exit_code,
                    "duration_ms": duration_ms,
                }),
            )
            .await;
        }
    }
}

/// Helper used only by `run_one_attempt` to turn an `ExecOutcome` into NDJSON
/// log records.
impl ExecOutcome {
    fn to_log_lines(&self, job_id: &str, attempt_id: &str) -> Vec<LogLine> {
        let ts = Utc::now();
        let mut lines = Vec::new();
        for line in self.stdout.lines() {
            lines.push(LogLine {
                ts,
                job_id: job_id.to_string(),
                attempt_id: attempt_id.to_string(),
                stream: LogStream::Stdout,
                line: line.to_string(),
            });
        }
        for line in self.stderr.lines() {
            lines.push(LogLine {
                ts,
                job_id: job_id.to_string(),
                attempt_id: attempt_id.to_string(),
                stream: LogStream::Stderr,
                line: line.to_string(),
            });
        }
        lines
    }
}
