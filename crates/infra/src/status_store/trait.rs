use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use batchline_core::{JobId, NewStatusRecord, StatusRecord};

/// Status store operation error.
///
/// These are **infrastructure errors** (storage, decoding of persisted rows)
/// as opposed to domain errors.
#[derive(Debug, Error)]
pub enum StatusStoreError {
    #[error("storage error during {operation}: {message}")]
    Storage {
        operation: &'static str,
        message: String,
    },

    #[error("corrupt status row (seq {seq}): {message}")]
    Decode { seq: i64, message: String },
}

impl StatusStoreError {
    pub fn storage(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Storage {
            operation,
            message: message.into(),
        }
    }
}

/// Append-only job status log.
///
/// ## Append Semantics
///
/// `append()` inserts exactly one row and assigns it the next `seq`. Rows are
/// never updated in place. Concurrent appends for different jobs do not
/// contend on any row.
///
/// ## Load Semantics
///
/// `history()` returns every row for the job in ascending `seq` order
/// (oldest first), or an empty vector for an unknown job.
///
/// ## Reset
///
/// `reset()` drops and recreates the whole log. There is no per-job deletion.
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn append(&self, record: NewStatusRecord) -> Result<StatusRecord, StatusStoreError>;

    async fn history(&self, job_id: &JobId) -> Result<Vec<StatusRecord>, StatusStoreError>;

    /// Distinct job ids present in the log, sorted.
    async fn job_ids(&self) -> Result<Vec<JobId>, StatusStoreError>;

    async fn reset(&self) -> Result<(), StatusStoreError>;
}

#[async_trait]
impl<S> StatusStore for Arc<S>
where
    S: StatusStore + ?Sized,
{
    async fn append(&self, record: NewStatusRecord) -> Result<StatusRecord, StatusStoreError> {
        (**self).append(record).await
    }

    async fn history(&self, job_id: &JobId) -> Result<Vec<StatusRecord>, StatusStoreError> {
        (**self).history(job_id).await
    }

    async fn job_ids(&self) -> Result<Vec<JobId>, StatusStoreError> {
        (**self).job_ids().await
    }

    async fn reset(&self) -> Result<(), StatusStoreError> {
        (**self).reset().await
    }
}
