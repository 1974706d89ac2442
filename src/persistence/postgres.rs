//! PostgreSQL implementation of the persistence layer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use super::models::{Collection, FindOptions, SortOrder, StoredDoc};
use super::DocumentStore;
use crate::domain::{Job, JobKind, JobSchedule};
use crate::error::AppError;
use crate::scheduler::JobStore;

fn db_err(e: sqlx::Error) -> AppError {
    AppError::Persistence(e.to_string())
}

/// PostgreSQL-backed document store using `sqlx::PgPool`.
///
/// Each collection is a `(id BIGSERIAL, body JSONB, created_at)` table
/// with a GIN index for containment queries.
#[derive(Debug, Clone)]
pub struct PostgresDocumentStore {
    pool: PgPool,
}

impl PostgresDocumentStore {
    /// Creates a new document store with the given connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

type DocRow = (i64, Value, DateTime<Utc>);

fn to_doc((id, body, created_at): DocRow) -> StoredDoc {
    StoredDoc {
        id,
        body,
        created_at,
    }
}

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    async fn ensure_collections(&self) -> Result<(), AppError> {
        for collection in Collection::ALL {
            let table = collection.table_name();
            sqlx::query(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (\
                 id BIGSERIAL PRIMARY KEY, \
                 body JSONB NOT NULL, \
                 created_at TIMESTAMPTZ NOT NULL DEFAULT now())"
            ))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_body ON {table} USING GIN (body jsonb_path_ops)"
            ))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_created_at ON {table} (created_at)"
            ))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        }
        tracing::info!("document collections ready");
        Ok(())
    }

    async fn find_docs(
        &self,
        collection: Collection,
        filter: &Value,
        options: FindOptions,
    ) -> Result<Vec<StoredDoc>, AppError> {
        let direction = match options.order {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        };
        let limit = options.limit.and_then(|l| i64::try_from(l).ok());
        let rows = sqlx::query_as::<_, DocRow>(&format!(
            "SELECT id, body, created_at FROM {} WHERE body @> $1 ORDER BY id {direction} LIMIT $2",
            collection.table_name()
        ))
        .bind(filter)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(to_doc).collect())
    }

    async fn insert_doc(&self, collection: Collection, body: &Value) -> Result<StoredDoc, AppError> {
        let row = sqlx::query_as::<_, DocRow>(&format!(
            "INSERT INTO {} (body) VALUES ($1) RETURNING id, body, created_at",
            collection.table_name()
        ))
        .bind(body)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(to_doc(row))
    }

    async fn update_doc(
        &self,
        collection: Collection,
        id: i64,
        body: &Value,
    ) -> Result<StoredDoc, AppError> {
        let table = collection.table_name();
        let row = sqlx::query_as::<_, DocRow>(&format!(
            "UPDATE {table} SET body = $2 WHERE id = $1 RETURNING id, body, created_at"
        ))
        .bind(id)
        .bind(body)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(to_doc)
            .ok_or_else(|| AppError::NotFound(format!("document {id} in {table}")))
    }

    async fn insert_doc_if(
        &self,
        collection: Collection,
        body: &Value,
        guard: Collection,
        guard_filter: &Value,
    ) -> Result<Option<StoredDoc>, AppError> {
        // Single statement: the EXISTS check and the insert see one snapshot.
        let row = sqlx::query_as::<_, DocRow>(&format!(
            "INSERT INTO {} (body) SELECT $1 \
             WHERE EXISTS (SELECT 1 FROM {} WHERE body @> $2) \
             RETURNING id, body, created_at",
            collection.table_name(),
            guard.table_name()
        ))
        .bind(body)
        .bind(guard_filter)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(to_doc))
    }

    async fn destroy(&self, collection: Collection, filter: &Value) -> Result<u64, AppError> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE body @> $1",
            collection.table_name()
        ))
        .bind(filter)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected())
    }

    async fn delete_older_than(
        &self,
        collection: Collection,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE created_at < $1",
            collection.table_name()
        ))
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected())
    }
}

/// PostgreSQL-backed job store over the `scheduled_jobs` table.
///
/// Claims use `FOR UPDATE SKIP LOCKED` so several workers can poll the
/// same table without running a job twice while its lock is live.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    /// Creates a new job store with the given connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const JOB_COLUMNS: &str = "id, kind, payload, unique_key, interval_secs, next_run_at, \
     locked_until, last_run_at, last_finished_at, failed_at, fail_reason, fail_count, created_at";

type JobRow = (
    Uuid,
    String,
    Value,
    Option<String>,
    Option<i64>,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
    Option<DateTime<Utc>>,
    Option<DateTime<Utc>>,
    Option<DateTime<Utc>>,
    Option<String>,
    i32,
    DateTime<Utc>,
);

fn to_job(row: JobRow) -> Result<Job, AppError> {
    let (
        id,
        kind,
        payload,
        unique_key,
        interval_secs,
        next_run_at,
        locked_until,
        last_run_at,
        last_finished_at,
        failed_at,
        fail_reason,
        fail_count,
        created_at,
    ) = row;
    let kind: JobKind = kind
        .parse()
        .map_err(|_| AppError::Persistence(format!("job {id} has unknown kind {kind}")))?;
    let schedule = match interval_secs {
        Some(secs) => JobSchedule::Recurring {
            interval_secs: u64::try_from(secs).unwrap_or(0),
        },
        None => JobSchedule::Once,
    };
    Ok(Job {
        id,
        kind,
        payload,
        unique_key,
        schedule,
        next_run_at,
        locked_until,
        last_run_at,
        last_finished_at,
        failed_at,
        fail_reason,
        fail_count: u32::try_from(fail_count).unwrap_or(0),
        created_at,
    })
}

fn interval_column(schedule: JobSchedule) -> Option<i64> {
    match schedule {
        JobSchedule::Recurring { interval_secs } => Some(i64::try_from(interval_secs).unwrap_or(i64::MAX)),
        JobSchedule::Once => None,
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn ensure_schema(&self) -> Result<(), AppError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS scheduled_jobs (\
             id UUID PRIMARY KEY, \
             kind TEXT NOT NULL, \
             payload JSONB NOT NULL, \
             unique_key TEXT, \
             interval_secs BIGINT, \
             next_run_at TIMESTAMPTZ NOT NULL, \
             locked_until TIMESTAMPTZ, \
             last_run_at TIMESTAMPTZ, \
             last_finished_at TIMESTAMPTZ, \
             failed_at TIMESTAMPTZ, \
             fail_reason TEXT, \
             fail_count INTEGER NOT NULL DEFAULT 0, \
             created_at TIMESTAMPTZ NOT NULL DEFAULT now())",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_scheduled_jobs_unique \
             ON scheduled_jobs (kind, unique_key) WHERE unique_key IS NOT NULL",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_scheduled_jobs_due ON scheduled_jobs (next_run_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn upsert_unique(&self, job: Job) -> Result<Job, AppError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "INSERT INTO scheduled_jobs (id, kind, payload, unique_key, interval_secs, next_run_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (kind, unique_key) WHERE unique_key IS NOT NULL DO UPDATE SET \
             payload = EXCLUDED.payload, \
             interval_secs = EXCLUDED.interval_secs, \
             next_run_at = EXCLUDED.next_run_at \
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(job.id)
        .bind(job.kind.as_str())
        .bind(&job.payload)
        .bind(&job.unique_key)
        .bind(interval_column(job.schedule))
        .bind(job.next_run_at)
        .bind(job.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        to_job(row)
    }

    async fn insert(&self, job: Job) -> Result<Job, AppError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "INSERT INTO scheduled_jobs (id, kind, payload, unique_key, interval_secs, next_run_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {JOB_COLUMNS}"
        ))
        .bind(job.id)
        .bind(job.kind.as_str())
        .bind(&job.payload)
        .bind(&job.unique_key)
        .bind(interval_column(job.schedule))
        .bind(job.next_run_at)
        .bind(job.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        to_job(row)
    }

    async fn remove_matching(&self, kind: JobKind, filter: &Value) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM scheduled_jobs WHERE kind = $1 AND payload @> $2")
            .bind(kind.as_str())
            .bind(filter)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(result.rows_affected())
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lock_until: DateTime<Utc>,
        kinds: &[JobKind],
        limit: usize,
    ) -> Result<Vec<Job>, AppError> {
        let kinds: Vec<String> = kinds.iter().map(|k| k.as_str().to_string()).collect();
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "UPDATE scheduled_jobs SET locked_until = $2, last_run_at = $1 \
             WHERE id IN (\
               SELECT id FROM scheduled_jobs \
               WHERE next_run_at <= $1 AND (locked_until IS NULL OR locked_until <= $1) \
               AND kind = ANY($4) \
               ORDER BY next_run_at LIMIT $3 FOR UPDATE SKIP LOCKED) \
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(now)
        .bind(lock_until)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(kinds)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(to_job).collect()
    }

    async fn renew_lock(&self, id: Uuid, until: DateTime<Utc>) -> Result<bool, AppError> {
        let result = sqlx::query("UPDATE scheduled_jobs SET locked_until = $2 WHERE id = $1")
            .bind(id)
            .bind(until)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_run(&self, job: &Job, keep: bool) -> Result<(), AppError> {
        if !keep {
            sqlx::query("DELETE FROM scheduled_jobs WHERE id = $1")
                .bind(job.id)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
            return Ok(());
        }
        sqlx::query(
            "UPDATE scheduled_jobs SET locked_until = NULL, next_run_at = $2, \
             last_finished_at = $3, failed_at = $4, fail_reason = $5, fail_count = $6 \
             WHERE id = $1",
        )
        .bind(job.id)
        .bind(job.next_run_at)
        .bind(job.last_finished_at)
        .bind(job.failed_at)
        .bind(&job.fail_reason)
        .bind(i32::try_from(job.fail_count).unwrap_or(i32::MAX))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn release_lock(&self, id: Uuid) -> Result<(), AppError> {
        sqlx::query("UPDATE scheduled_jobs SET locked_until = NULL WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Job>, AppError> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM scheduled_jobs ORDER BY created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(to_job).collect()
    }
}
