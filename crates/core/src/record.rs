//! Status records: the rows of the append-only job status log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{BatchId, FileId, JobId};
use crate::progress::RequestCounts;
use crate::status::BatchStatus;

/// A row ready to be appended to the status log (no position assigned yet).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStatusRecord {
    pub job_id: JobId,
    pub file_id: Option<FileId>,
    pub batch_id: Option<BatchId>,
    pub output_file_id: Option<FileId>,
    pub status: BatchStatus,
    pub message: Option<String>,
    pub progress: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// A persisted row of the status log.
///
/// `seq` is assigned by the store on append and strictly increases across the
/// whole log, so it orders rows even when `updated_at` values tie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub seq: u64,
    pub job_id: JobId,
    pub file_id: Option<FileId>,
    pub batch_id: Option<BatchId>,
    pub output_file_id: Option<FileId>,
    pub status: BatchStatus,
    pub message: Option<String>,
    pub progress: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl NewStatusRecord {
    /// A bare row for `job_id` with only a status set.
    pub fn new(job_id: JobId, status: BatchStatus) -> Self {
        Self {
            job_id,
            file_id: None,
            batch_id: None,
            output_file_id: None,
            status,
            message: None,
            progress: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_file_id(mut self, file_id: FileId) -> Self {
        self.file_id = Some(file_id);
        self
    }

    pub fn with_batch_id(mut self, batch_id: BatchId) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    pub fn with_output_file_id(mut self, output_file_id: FileId) -> Self {
        self.output_file_id = Some(output_file_id);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_progress(mut self, progress: impl Into<String>) -> Self {
        self.progress = Some(progress.into());
        self
    }

    pub fn at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = updated_at;
        self
    }

    /// Attach the store-assigned position.
    pub fn into_stored(self, seq: u64) -> StatusRecord {
        StatusRecord {
            seq,
            job_id: self.job_id,
            file_id: self.file_id,
            batch_id: self.batch_id,
            output_file_id: self.output_file_id,
            status: self.status,
            message: self.message,
            progress: self.progress,
            updated_at: self.updated_at,
        }
    }
}

impl StatusRecord {
    /// Parsed progress counters, if the row carries a well-formed snapshot.
    pub fn counts(&self) -> Option<RequestCounts> {
        self.progress.as_deref().and_then(|p| p.parse().ok())
    }
}
