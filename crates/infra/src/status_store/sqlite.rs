//! SQLite-backed status store.
//!
//! One table, `batch_status`, appended to and never updated. Rows are ordered
//! by the `seq` rowid, which SQLite assigns monotonically on insert.
//!
//! ## Concurrency
//!
//! The database runs in WAL mode with a busy timeout, so several managers (in
//! one process through the shared pool, or in separate processes on the same
//! file) can append concurrently. Inserts never touch existing rows, so there
//! is nothing to lose to a race.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, instrument};

use batchline_core::{BatchId, BatchStatus, FileId, JobId, NewStatusRecord, StatusRecord};

use super::r#trait::{StatusStore, StatusStoreError};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS batch_status (
        seq                   INTEGER PRIMARY KEY AUTOINCREMENT,
        job_id                TEXT NOT NULL,
        openai_file_id        TEXT NULL,
        openai_batch_id       TEXT NULL,
        openai_output_file_id TEXT NULL,
        updated_at            TEXT NOT NULL,
        status                TEXT NOT NULL,
        message               TEXT NULL,
        progress              TEXT NULL
    )
"#;

const CREATE_INDEX: &str = r#"
    CREATE INDEX IF NOT EXISTS batch_status_job_seq
    ON batch_status (job_id, seq)
"#;

/// SQLite-backed append-only status store.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct SqliteStatusStore {
    pool: SqlitePool,
}

impl SqliteStatusStore {
    /// Open (creating if needed) the database file at `path`.
    ///
    /// With `reset`, the table is dropped and recreated first.
    #[instrument(skip_all, fields(path = %path.display(), reset = reset), err)]
    pub async fn open(path: &Path, reset: bool) -> Result<Self, StatusStoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StatusStoreError::storage(
                    "create_dir",
                    format!("failed to create {}: {e}", parent.display()),
                )
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        let store = Self { pool };
        if reset {
            store.drop_table().await?;
        }
        store.ensure_schema().await?;

        info!("opened status store");
        Ok(store)
    }

    /// A private in-memory database (tests/dev).
    ///
    /// Pinned to a single connection that never expires, because every SQLite
    /// `:memory:` connection is its own database.
    pub async fn in_memory() -> Result<Self, StatusStoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| map_sqlx_error("connect", e))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Close the pool, waiting for connections to be returned.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn ensure_schema(&self) -> Result<(), StatusStoreError> {
        sqlx::query(CREATE_TABLE)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("create_table", e))?;
        sqlx::query(CREATE_INDEX)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("create_index", e))?;
        debug!("status store schema ready");
        Ok(())
    }

    async fn drop_table(&self) -> Result<(), StatusStoreError> {
        sqlx::query("DROP TABLE IF EXISTS batch_status")
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("drop_table", e))?;
        Ok(())
    }
}

#[async_trait]
impl StatusStore for SqliteStatusStore {
    #[instrument(skip(self, record), fields(job_id = %record.job_id, status = %record.status), err)]
    async fn append(&self, record: NewStatusRecord) -> Result<StatusRecord, StatusStoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO batch_status (
                job_id,
                openai_file_id,
                openai_batch_id,
                openai_output_file_id,
                updated_at,
                status,
                message,
                progress
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(record.job_id.as_str())
        .bind(record.file_id.as_ref().map(FileId::as_str))
        .bind(record.batch_id.as_ref().map(BatchId::as_str))
        .bind(record.output_file_id.as_ref().map(FileId::as_str))
        .bind(record.updated_at.to_rfc3339())
        .bind(record.status.as_str())
        .bind(record.message.as_deref())
        .bind(record.progress.as_deref())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("append", e))?;

        let seq = result.last_insert_rowid();
        let seq = u64::try_from(seq).map_err(|_| StatusStoreError::Decode {
            seq,
            message: "negative rowid".to_string(),
        })?;

        Ok(record.into_stored(seq))
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn history(&self, job_id: &JobId) -> Result<Vec<StatusRecord>, StatusStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                seq,
                job_id,
                openai_file_id,
                openai_batch_id,
                openai_output_file_id,
                updated_at,
                status,
                message,
                progress
            FROM batch_status
            WHERE job_id = ?1
            ORDER BY seq ASC
            "#,
        )
        .bind(job_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("history", e))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(row_to_record(&row)?);
        }
        Ok(records)
    }

    async fn job_ids(&self) -> Result<Vec<JobId>, StatusStoreError> {
        let rows = sqlx::query("SELECT DISTINCT job_id FROM batch_status ORDER BY job_id ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("job_ids", e))?;

        rows.iter()
            .map(|row| {
                let raw: String = row
                    .try_get("job_id")
                    .map_err(|e| map_sqlx_error("job_ids", e))?;
                JobId::parse(raw).map_err(|e| StatusStoreError::Decode {
                    seq: -1,
                    message: e.to_string(),
                })
            })
            .collect()
    }

    #[instrument(skip(self), err)]
    async fn reset(&self) -> Result<(), StatusStoreError> {
        self.drop_table().await?;
        self.ensure_schema().await?;
        info!("status store reset");
        Ok(())
    }
}

/// Map a database row into a `StatusRecord`.
fn row_to_record(row: &SqliteRow) -> Result<StatusRecord, StatusStoreError> {
    let seq: i64 = row.try_get("seq").map_err(|e| map_sqlx_error("decode", e))?;
    let corrupt = |message: String| StatusStoreError::Decode { seq, message };

    let get_text = |column: &str| -> Result<String, StatusStoreError> {
        row.try_get(column).map_err(|e| map_sqlx_error("decode", e))
    };
    let get_opt = |column: &str| -> Result<Option<String>, StatusStoreError> {
        row.try_get(column).map_err(|e| map_sqlx_error("decode", e))
    };

    let job_id = JobId::parse(get_text("job_id")?).map_err(|e| corrupt(e.to_string()))?;
    let file_id = get_opt("openai_file_id")?
        .map(FileId::parse)
        .transpose()
        .map_err(|e| corrupt(e.to_string()))?;
    let batch_id = get_opt("openai_batch_id")?
        .map(BatchId::parse)
        .transpose()
        .map_err(|e| corrupt(e.to_string()))?;
    let output_file_id = get_opt("openai_output_file_id")?
        .map(FileId::parse)
        .transpose()
        .map_err(|e| corrupt(e.to_string()))?;

    let updated_at_raw = get_text("updated_at")?;
    let updated_at = DateTime::parse_from_rfc3339(&updated_at_raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| corrupt(format!("invalid updated_at '{updated_at_raw}': {e}")))?;

    Ok(StatusRecord {
        seq: u64::try_from(seq).map_err(|_| corrupt("negative seq".to_string()))?,
        job_id,
        file_id,
        batch_id,
        output_file_id,
        status: BatchStatus::from(get_text("status")?),
        message: get_opt("message")?,
        progress: get_opt("progress")?,
        updated_at,
    })
}

fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> StatusStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let busy = matches!(db_err.code().as_deref(), Some("5") | Some("6"));
            let message = if busy {
                format!("database busy: {}", db_err.message())
            } else {
                format!("database error: {}", db_err.message())
            };
            StatusStoreError::storage(operation, message)
        }
        sqlx::Error::PoolClosed => StatusStoreError::storage(operation, "connection pool closed"),
        sqlx::Error::PoolTimedOut => {
            StatusStoreError::storage(operation, "timed out acquiring a connection")
        }
        other => StatusStoreError::storage(operation, other.to_string()),
    }
}
