//! The Job State Directory: `<root>/<job_id>/{job.json, logs/, artifacts/}`.
//!
//! `job.json` is the authoritative mutable record, written whole on every
//! update (no partial patches); NDJSON log files are append-only per attempt;
//! the artifacts tree is populated by the command itself and then walked to
//! build a manifest. This module owns all three.

mod artifacts;
mod logs;

pub use artifacts::{build_manifest, resolve_artifact_path};
pub use logs::{append_log_lines, read_log_lines, LogLine, LogStream};

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::RunnerKind;

pub const JOB_DOCUMENT_VERSION: &str = "1.0";

/// The submitted resource limits. Field names mirror the two historical
/// variants the source carried side by side (`time_limit_seconds` and
/// `max_runtime_seconds`); both are accepted on write, and the API's public
/// view falls back from the latter to the former when reading (see
/// `server::routes::jobs::detail`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Limits {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_limit_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_runtime_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_mb: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Policy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowlist_domains: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limits: Option<Limits>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Runner {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested: Option<RunnerKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected: Option<RunnerKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection_reason: Option<String>,
}

impl Runner {
    pub fn requested_only(requested: Option<RunnerKind>) -> Self {
        Self {
            requested,
            selected: None,
            selection_reason: None,
        }
    }

    /// Fill in `selected`/`selection_reason` the way the Worker does at claim
    /// time: a null slot becomes `shell`, and the reason records whether the
    /// submitter asked for a runner explicitly.
    pub fn fill_selected_default(&mut self) {
        if self.selected.is_none() {
            self.selected = Some(self.requested.unwrap_or(RunnerKind::Shell));
        }
        if self.selection_reason.is_none() {
            self.selection_reason = Some(if self.requested.is_some() {
                "requested by user".to_string()
            } else {
                "default shell runner".to_string()
            });
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Running,
    Succeeded,
    Failed,
}

impl AttemptStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, AttemptStatus::Succeeded | AttemptStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    pub attempt_id: String,
    pub status: AttemptStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactManifestEntry {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub size_bytes: u64,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Links {
    #[serde(rename = "self")]
    pub self_: String,
    pub logs: String,
    pub artifacts: String,
}

impl Links {
    pub fn for_job(job_id: &str) -> Self {
        Self {
            self_: format!("/api/jobs/{job_id}"),
            logs: format!("/api/jobs/{job_id}/logs"),
            artifacts: format!("/api/jobs/{job_id}/artifacts"),
        }
    }
}

/// The full `job.json` document: a superset of the Store row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDocument {
    pub job_version: String,
    pub job_id: String,
    pub command: String,
    pub status: crate::store::JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<Policy>,
    pub runner: Runner,
    pub attempts: Vec<Attempt>,
    pub artifacts_manifest: Vec<ArtifactManifestEntry>,
    pub links: Links,
}

impl JobDocument {
    /// The skeleton written by the API at job creation: `queued`, no
    /// attempts, no manifest yet.
    pub fn new_skeleton(
        job_id: String,
        command: String,
        created_at: DateTime<Utc>,
        policy: Option<Policy>,
        runner: Runner,
    ) -> Self {
        let links = Links::for_job(&job_id);
        Self {
            job_version: JOB_DOCUMENT_VERSION.to_string(),
            job_id,
            command,
            status: crate::store::JobStatus::Queued,
            created_at,
            completed_at: None,
            policy,
            runner,
            attempts: Vec::new(),
            artifacts_manifest: Vec::new(),
            links,
        }
    }

    pub fn last_attempt(&self) -> Option<&Attempt> {
        self.attempts.last()
    }

    pub fn last_attempt_mut(&mut self) -> Option<&mut Attempt> {
        self.attempts.last_mut()
    }
}

/// Per-job directory layout under the Job State Directory root.
pub struct JobDir {
    root: PathBuf,
}

impl JobDir {
    pub fn new(jobs_root: &Path, job_id: &str) -> Self {
        Self {
            root: jobs_root.join(job_id),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn job_json_path(&self) -> PathBuf {
        self.root.join("job.json")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join("artifacts")
    }

    pub fn attempt_log_path(&self, attempt_id: &str) -> PathBuf {
        self.logs_dir().join(format!("attempt_{attempt_id}.ndjson"))
    }

    pub async fn ensure_dirs(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::create_dir_all(self.logs_dir()).await?;
        tokio::fs::create_dir_all(self.artifacts_dir()).await?;
        Ok(())
    }

    /// Read and parse `job.json`. Returns `None` if the file is missing or
    /// fails to parse — a malformed document is treated the same as an
    /// absent one, never surfaced as an error.
    pub async fn read_document(&self) -> Option<JobDocument> {
        let bytes = tokio::fs::read(self.job_json_path()).await.ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(doc) => Some(doc),
            Err(err) => {
                tracing::warn!(job_dir = %self.root.display(), error = %err, "job.json failed to parse");
                None
            }
        }
    }

    /// Serialize `doc` and replace `job.json`'s contents: write to a sibling
    /// temp file, then rename over the target.
    pub async fn write_document(&self, doc: &JobDocument) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let bytes = serde_json::to_vec_pretty(doc).context("serializing job.json")?;
        let tmp_path = self.root.join("job.json.tmp");
        tokio::fs::write(&tmp_path, &bytes)
            .await
            .with_context(|| format!("writing {}", tmp_path.display()))?;
        tokio::fs::rename(&tmp_path, self.job_json_path())
            .await
            .context("renaming job.json into place")?;
        Ok(())
    }
}
