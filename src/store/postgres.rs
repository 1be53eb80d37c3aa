//! Row-locking `Store` implementation: `FOR UPDATE SKIP LOCKED` claim.
//!
//! Grounded on `kernel/jobs/job.rs::claim_jobs` — same `WITH ... FOR UPDATE
//! SKIP LOCKED ... UPDATE ... RETURNING` shape, narrowed from that module's
//! lease/retry machinery down to the single-attempt claim spec.md specifies.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::cursor::Cursor;

use super::{ClaimedJob, JobRow, JobRowRaw, JobStatus, ListFilter, ListPage, RunnerKind, Store};

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn insert_queued(
        &self,
        job_id: &str,
        command: &str,
        created_at: DateTime<Utc>,
        runner_requested: Option<RunnerKind>,
        runner_selected: Option<RunnerKind>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (job_id, status, command, created_at, runner_requested, runner_selected)
            VALUES ($1, 'queued', $2, $3, $4, $5)
            "#,
        )
        .bind(job_id)
        .bind(command)
        .bind(created_at)
        .bind(runner_requested.map(|r| r.as_str()))
        .bind(runner_selected.map(|r| r.as_str()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn claim_oldest_queued(&self) -> Result<Option<ClaimedJob>> {
        let row: Option<(String, String)> = sqlx::query_as(
            r#"
            UPDATE jobs
            SET status = 'running',
                runner_selected = COALESCE(runner_selected, 'shell')
            WHERE job_id = (
                SELECT job_id
                FROM jobs
                WHERE status = 'queued'
                ORDER BY created_at ASC, job_id ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING job_id, command
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(job_id, command)| ClaimedJob { job_id, command }))
    }

    async fn update_status(&self, job_id: &str, status: JobStatus) -> Result<()> {
        sqlx::query("UPDATE jobs SET status = $1 WHERE job_id = $2")
            .bind(status.as_str())
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<JobRow>> {
        let raw: Option<JobRowRaw> = sqlx::query_as(
            r#"
            SELECT job_id, status, command, created_at, runner_requested, runner_selected
            FROM jobs
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        raw.map(JobRowRaw::into_job_row).transpose()
    }

    async fn list(&self, filter: ListFilter, limit: i64, cursor: Option<Cursor>) -> Result<ListPage> {
        let limit_plus = limit + 1;
        let mut sql = String::from(
            "SELECT job_id, status, command, created_at, runner_requested, runner_selected FROM jobs WHERE 1=1",
        );
        // $1 is reserved for LIMIT, appended last; numbering below must match
        // the bind() call order further down.
        let mut next_param = 2;
        if filter.status.is_some() {
            sql.push_str(&format!(" AND status = ${next_param}"));
            next_param += 1;
        }
        if filter.q.is_some() {
            sql.push_str(&format!(" AND command LIKE ${next_param}"));
            next_param += 1;
        }
        if cursor.is_some() {
            sql.push_str(&format!(
                " AND (created_at < ${a} OR (created_at = ${a} AND job_id < ${b}))",
                a = next_param,
                b = next_param + 1
            ));
        }
        sql.push_str(" ORDER BY created_at DESC, job_id DESC LIMIT $1");

        let mut query = sqlx::query_as::<_, JobRowRaw>(&sql).bind(limit_plus);
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }
        if let Some(q) = &filter.q {
            query = query.bind(format!("%{q}%"));
        }
        if let Some(cursor) = &cursor {
            query = query.bind(cursor.created_at).bind(cursor.job_id.clone());
        }

        let mut rows = query.fetch_all(&self.pool).await?;

        let next_cursor = if rows.len() > limit as usize {
            rows.truncate(limit as usize);
            rows.last()
                .map(|r| Cursor::new(r.created_at, r.job_id.clone()))
        } else {
            None
        };

        let items = rows
            .into_iter()
            .map(JobRowRaw::into_job_row)
            .collect::<Result<Vec<_>>>()?;

        Ok(ListPage { items, next_cursor })
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                job_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                command TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                runner_requested TEXT,
                runner_selected TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
