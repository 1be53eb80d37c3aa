//! Serialized `Store` implementation for engines without row locks.
//!
//! SQLite has no `FOR UPDATE SKIP LOCKED`, so the claim reserves a single
//! pooled connection, issues a raw `BEGIN IMMEDIATE` on it (taking the write
//! lock up front rather than letting it upgrade from a deferred read lock),
//! reads the oldest `queued` candidate, then updates it conditionally on
//! `status = 'queued'`; if the conditional update affects zero rows, a
//! concurrent claimer won and this call returns `None`. Grounded on the
//! original `_claim_job_sqlite`'s `BEGIN IMMEDIATE` strategy and on
//! `ddm-core`'s `sqlx::Sqlite` pool idiom (row access via `.get(...)`,
//! `SqlitePoolOptions`).

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::cursor::Cursor;

use super::{ClaimedJob, JobRow, JobRowRaw, JobStatus, ListFilter, ListPage, RunnerKind, Store};

pub struct SqliteStore {
    pool: SqlitePool,
}

/// Runs the select-then-conditional-update inside the `BEGIN IMMEDIATE`
/// reservation `claim_oldest_queued` already holds on `conn`. Caller commits
/// on `Ok`, rolls back on `Err`.
async fn claim_locked(conn: &mut SqliteConnection) -> Result<Option<ClaimedJob>> {
    let candidate = sqlx::query(
        r#"
        SELECT job_id, command
        FROM jobs
        WHERE status = 'queued'
        ORDER BY created_at ASC, job_id ASC
        LIMIT 1
        "#,
    )
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = candidate else {
        return Ok(None);
    };

    let job_id: String = row.get("job_id");
    let command: String = row.get("command");

    let updated = sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'running',
            runner_selected = COALESCE(runner_selected, 'shell')
        WHERE job_id = ?1 AND status = 'queued'
        "#,
    )
    .bind(&job_id)
    .execute(&mut *conn)
    .await?;

    if updated.rows_affected() == 0 {
        return Ok(None);
    }

    Ok(Some(ClaimedJob { job_id, command }))
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        // A single connection keeps an in-memory database (`sqlite://:memory:`,
        // used by tests) from handing different connections an empty,
        // unrelated database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 8 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl Store for SqliteStore {
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
            VALUES (?1, 'queued', ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(job_id)
        .bind(command)
        .bind(created_at.to_rfc3339())
        .bind(runner_requested.map(|r| r.as_str()))
        .bind(runner_selected.map(|r| r.as_str()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn claim_oldest_queued(&self) -> Result<Option<ClaimedJob>> {
        // `pool.begin()` already issues a (deferred) `BEGIN`, so a literal
        // `BEGIN IMMEDIATE` run inside it fails with "cannot start a
        // transaction within a transaction". Reserve the write lock up front
        // on a single checked-out connection instead, running the whole
        // select/update/commit as raw statements on it.
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        match claim_locked(&mut conn).await {
            Ok(result) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                Ok(result)
            }
            Err(err) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(err)
            }
        }
    }

    async fn update_status(&self, job_id: &str, status: JobStatus) -> Result<()> {
        sqlx::query("UPDATE jobs SET status = ?1 WHERE job_id = ?2")
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
            WHERE job_id = ?1
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
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if filter.q.is_some() {
            sql.push_str(" AND command LIKE ?");
        }
        if cursor.is_some() {
            sql.push_str(" AND (created_at < ? OR (created_at = ? AND job_id < ?))");
        }
        sql.push_str(" ORDER BY created_at DESC, job_id DESC LIMIT ?");

        let mut query = sqlx::query_as::<_, JobRowRaw>(&sql);
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }
        if let Some(q) = &filter.q {
            query = query.bind(format!("%{q}%"));
        }
        if let Some(cursor) = &cursor {
            query = query
                .bind(cursor.created_at.to_rfc3339())
                .bind(cursor.created_at.to_rfc3339())
                .bind(cursor.job_id.clone());
        }
        query = query.bind(limit_plus);

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
                created_at TEXT NOT NULL,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::new_job_id;

    async fn open_memory() -> SqliteStore {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    #[tokio::test]
    async fn insert_then_claim_transitions_to_running() {
        let store = open_memory().await;
        let job_id = new_job_id();
        store
            .insert_queued(&job_id, "echo hi", Utc::now(), None, None)
            .await
            .unwrap();

        let claimed = store.claim_oldest_queued().await.unwrap().unwrap();
        assert_eq!(claimed.job_id, job_id);

        let row = store.get(&job_id).await.unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Running);
        assert_eq!(row.runner_selected, Some(RunnerKind::Shell));
    }

    #[tokio::test]
    async fn claim_is_noop_when_queue_is_empty() {
        let store = open_memory().await;
        assert!(store.claim_oldest_queued().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_preserves_explicit_runner_selection() {
        let store = open_memory().await;
        let job_id = new_job_id();
        store
            .insert_queued(
                &job_id,
                "echo hi",
                Utc::now(),
                Some(RunnerKind::Docker),
                Some(RunnerKind::Docker),
            )
            .await
            .unwrap();

        store.claim_oldest_queued().await.unwrap().unwrap();
        let row = store.get(&job_id).await.unwrap().unwrap();
        assert_eq!(row.runner_selected, Some(RunnerKind::Docker));
    }

    #[tokio::test]
    async fn list_paginates_by_keyset_cursor() {
        let store = open_memory().await;
        let mut ids = Vec::new();
        for i in 0..3 {
            let job_id = new_job_id();
            let created_at = Utc::now() + chrono::Duration::seconds(i);
            store
                .insert_queued(&job_id, "echo hi", created_at, None, None)
                .await
                .unwrap();
            ids.push(job_id);
        }

        let page1 = store.list(ListFilter::default(), 2, None).await.unwrap();
        assert_eq!(page1.items.len(), 2);
        assert!(page1.next_cursor.is_some());
        // Newest first.
        assert_eq!(page1.items[0].job_id, ids[2]);
        assert_eq!(page1.items[1].job_id, ids[1]);

        let page2 = store
            .list(ListFilter::default(), 2, page1.next_cursor)
            .await
            .unwrap();
        assert_eq!(page2.items.len(), 1);
        assert_eq!(page2.items[0].job_id, ids[0]);
        assert!(page2.next_cursor.is_none());
    }

    #[tokio::test]
    async fn concurrent_claims_never_double_claim() {
        use std::sync::Arc;

        let store = Arc::new(open_memory().await);
        let mut ids = Vec::new();
        for i in 0..8 {
            let job_id = new_job_id();
            let created_at = Utc::now() + chrono::Duration::milliseconds(i);
            store
                .insert_queued(&job_id, "echo hi", created_at, None, None)
                .await
                .unwrap();
            ids.push(job_id);
        }

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(
                async move { store.claim_oldest_queued().await.unwrap() },
            ));
        }

        let mut claimed_ids = Vec::new();
        for handle in handles {
            if let Some(claimed) = handle.await.unwrap() {
                claimed_ids.push(claimed.job_id);
            }
        }

        claimed_ids.sort();
        let mut expected = ids.clone();
        expected.sort();
        assert_eq!(claimed_ids, expected, "every job claimed exactly once, nothing double-claimed");
    }
}
