//! The `jobs` table abstraction: queue ordering and lifecycle state.
//!
//! Two engines implement the same [`Store`] trait with two different atomic
//! claim strategies (see spec.md §4.1 and §9's "duck-typed DB driver" note):
//! a row-locking engine (Postgres, `FOR UPDATE SKIP LOCKED`) and a serialized
//! engine (SQLite, `BEGIN IMMEDIATE` + conditional update). Dialect
//! differences live entirely inside each implementation; callers only see
//! [`Store`].

pub mod postgres;
pub mod sqlite;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::cursor::Cursor;

/// A job's lifecycle state. Transitions are monotone:
/// `Queued -> Running -> {Succeeded, Failed}`; no transition leaves a
/// terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            other => Err(anyhow!("unknown job status: {other}")),
        }
    }
}

/// The execution strategy label for a job. This design implements only
/// `Shell`; `Docker` and `Vm` are accepted as requested/selected values but
/// never actually dispatched differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerKind {
    Shell,
    Docker,
    Vm,
}

impl RunnerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RunnerKind::Shell => "shell",
            RunnerKind::Docker => "docker",
            RunnerKind::Vm => "vm",
        }
    }
}

impl fmt::Display for RunnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunnerKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "shell" => Ok(RunnerKind::Shell),
            "docker" => Ok(RunnerKind::Docker),
            "vm" => Ok(RunnerKind::Vm),
            other => Err(anyhow!("unknown runner kind: {other}")),
        }
    }
}

/// A `jobs` table row.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub job_id: String,
    pub status: JobStatus,
    pub command: String,
    pub created_at: DateTime<Utc>,
    pub runner_requested: Option<RunnerKind>,
    pub runner_selected: Option<RunnerKind>,
}

/// Raw row shape shared by both engines: enums travel as `TEXT` so one
/// `sqlx::FromRow` derive works against either backend.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct JobRowRaw {
    pub job_id: String,
    pub status: String,
    pub command: String,
    pub created_at: DateTime<Utc>,
    pub runner_requested: Option<String>,
    pub runner_selected: Option<String>,
}

impl JobRowRaw {
    pub(crate) fn into_job_row(self) -> Result<JobRow> {
        Ok(JobRow {
            job_id: self.job_id,
            status: self.status.parse()?,
            command: self.command,
            created_at: self.created_at,
            runner_requested: self.runner_requested.map(|s| s.parse()).transpose()?,
            runner_selected: self.runner_selected.map(|s| s.parse()).transpose()?,
        })
    }
}

/// Optional filters for [`Store::list`].
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub status: Option<JobStatus>,
    pub q: Option<String>,
}

/// A claimed job ready for execution: just enough to run the command and
/// report back to the Store.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub job_id: String,
    pub command: String,
}

/// One page of [`Store::list`] results plus the cursor for the next page.
#[derive(Debug, Clone)]
pub struct ListPage {
    pub items: Vec<JobRow>,
    pub next_cursor: Option<Cursor>,
}

/// The `jobs` table capability. See spec.md §4.1 for the full contract.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a new `queued` row.
    async fn insert_queued(
        &self,
        job_id: &str,
        command: &str,
        created_at: DateTime<Utc>,
        runner_requested: Option<RunnerKind>,
        runner_selected: Option<RunnerKind>,
    ) -> Result<()>;

    /// Atomically claim the oldest `queued` row (by `created_at ASC, job_id
    /// ASC`) and transition it to `running`. Returns `None` if no `queued`
    /// row exists. If `runner_selected` is null, it is set to `shell`.
    async fn claim_oldest_queued(&self) -> Result<Option<ClaimedJob>>;

    /// Unconditionally update a row's status.
    async fn update_status(&self, job_id: &str, status: JobStatus) -> Result<()>;

    /// Read a row by id.
    async fn get(&self, job_id: &str) -> Result<Option<JobRow>>;

    /// Keyset-paginated listing, newest first, with optional filters.
    async fn list(&self, filter: ListFilter, limit: i64, cursor: Option<Cursor>) -> Result<ListPage>;

    /// Run the engine's startup migration (`CREATE TABLE IF NOT EXISTS`).
    async fn migrate(&self) -> Result<()>;

    /// A trivial connectivity probe for `/api/health`.
    async fn ping(&self) -> Result<()>;
}

/// Choose a [`Store`] implementation by inspecting `database_url`'s scheme,
/// exactly as the original `_db_engine` helper does: `sqlite://` selects the
/// serialized SQLite engine, anything else is treated as a Postgres URL.
pub async fn open_store(database_url: &str) -> Result<Arc<dyn Store>> {
    let store: Arc<dyn Store> = if database_url.starts_with("sqlite://") {
        Arc::new(sqlite::SqliteStore::connect(database_url).await?)
    } else {
        Arc::new(postgres::PostgresStore::connect(database_url).await?)
    };
    store.migrate().await?;
    Ok(store)
}
