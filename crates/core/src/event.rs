//! Lifecycle events: one tagged variant per transition.
//!
//! Each event lowers to exactly one status row. Which columns a row fills is
//! decided here, so the manager never assembles rows by hand.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{BatchId, FileId, JobId};
use crate::progress::RequestCounts;
use crate::record::NewStatusRecord;
use crate::status::BatchStatus;

/// Message stored with a user-initiated cancellation the provider accepted.
pub const CANCELLED_BY_USER: &str = "Batch cancelled by user";

/// Remote operation whose failure is recorded in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteOperation {
    Create,
    Poll,
}

impl RemoteOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteOperation::Create => "create",
            RemoteOperation::Poll => "poll",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    /// The shard was uploaded.
    Uploaded { file_id: FileId },

    /// The remote job was created.
    Created {
        batch_id: BatchId,
        status: BatchStatus,
        message: Option<String>,
    },

    /// A status poll observed the remote job.
    Polled {
        batch_id: BatchId,
        status: BatchStatus,
        counts: Option<RequestCounts>,
        output_file_id: Option<FileId>,
        message: Option<String>,
    },

    /// Cancellation was requested. `message` holds the provider's rejection
    /// text when the remote side refused.
    Cancelled {
        batch_id: BatchId,
        message: Option<String>,
    },

    /// A create or poll call failed remotely. `status` is the job's last
    /// known status, unchanged by the failure.
    RemoteFailure {
        operation: RemoteOperation,
        batch_id: Option<BatchId>,
        status: BatchStatus,
        message: String,
    },
}

impl JobEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            JobEvent::Uploaded { .. } => "batch.uploaded",
            JobEvent::Created { .. } => "batch.created",
            JobEvent::Polled { .. } => "batch.polled",
            JobEvent::Cancelled { .. } => "batch.cancelled",
            JobEvent::RemoteFailure { .. } => "batch.remote_failure",
        }
    }

    /// Status the row will carry.
    pub fn status(&self) -> BatchStatus {
        match self {
            JobEvent::Uploaded { .. } => BatchStatus::Uploaded,
            JobEvent::Created { status, .. } => status.clone(),
            JobEvent::Polled { status, .. } => status.clone(),
            JobEvent::Cancelled { .. } => BatchStatus::Cancelled,
            JobEvent::RemoteFailure { status, .. } => status.clone(),
        }
    }

    pub fn into_record(self, job_id: JobId, at: DateTime<Utc>) -> NewStatusRecord {
        let status = self.status();
        let mut record = NewStatusRecord::new(job_id, status).at(at);

        match self {
            JobEvent::Uploaded { file_id } => {
                record.file_id = Some(file_id);
            }
            JobEvent::Created {
                batch_id, message, ..
            } => {
                record.batch_id = Some(batch_id);
                record.message = message;
            }
            JobEvent::Polled {
                batch_id,
                counts,
                output_file_id,
                message,
                ..
            } => {
                record.batch_id = Some(batch_id);
                record.output_file_id = output_file_id;
                record.progress = counts.map(|c| c.to_string());
                record.message = message;
            }
            JobEvent::Cancelled { batch_id, message } => {
                record.batch_id = Some(batch_id);
                record.message = Some(message.unwrap_or_else(|| CANCELLED_BY_USER.to_string()));
            }
            JobEvent::RemoteFailure {
                operation,
                batch_id,
                message,
                ..
            } => {
                record.batch_id = batch_id;
                record.message = Some(format!("{} failed: {}", operation.as_str(), message));
            }
        }

        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> JobId {
        JobId::parse("job_0").unwrap()
    }

    #[test]
    fn uploaded_sets_only_file_id() {
        let file_id = FileId::parse("file-1").unwrap();
        let rec = JobEvent::Uploaded {
            file_id: file_id.clone(),
        }
        .into_record(job(), Utc::now());

        assert_eq!(rec.status, BatchStatus::Uploaded);
        assert_eq!(rec.file_id, Some(file_id));
        assert!(rec.batch_id.is_none());
        assert!(rec.output_file_id.is_none());
        assert!(rec.progress.is_none());
    }

    #[test]
    fn polled_formats_progress_and_keeps_output() {
        let rec = JobEvent::Polled {
            batch_id: BatchId::parse("batch_1").unwrap(),
            status: BatchStatus::Completed,
            counts: Some(RequestCounts::new(5, 0, 5)),
            output_file_id: Some(FileId::parse("file-out").unwrap()),
            message: None,
        }
        .into_record(job(), Utc::now());

        assert_eq!(rec.progress.as_deref(), Some("Completed: 5;Failed: 0;Total: 5"));
        assert_eq!(rec.output_file_id.unwrap().as_str(), "file-out");
        assert!(rec.file_id.is_none());
    }

    #[test]
    fn cancelled_defaults_message() {
        let rec = JobEvent::Cancelled {
            batch_id: BatchId::parse("batch_1").unwrap(),
            message: None,
        }
        .into_record(job(), Utc::now());

        assert_eq!(rec.status, BatchStatus::Cancelled);
        assert_eq!(rec.message.as_deref(), Some(CANCELLED_BY_USER));
    }

    #[test]
    fn remote_failure_prefixes_operation() {
        let rec = JobEvent::RemoteFailure {
            operation: RemoteOperation::Poll,
            batch_id: Some(BatchId::parse("batch_1").unwrap()),
            status: BatchStatus::InProgress,
            message: "HTTP 429: rate limited".to_string(),
        }
        .into_record(job(), Utc::now());

        assert_eq!(rec.status, BatchStatus::InProgress);
        assert_eq!(rec.message.as_deref(), Some("poll failed: HTTP 429: rate limited"));
    }
}
