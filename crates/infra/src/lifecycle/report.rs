use std::path::PathBuf;

use serde::Serialize;

use batchline_core::{BatchStatus, FileId, RequestCounts, StatusRecord};

use crate::normalize::MalformedLine;

/// Result of one status poll.
#[derive(Debug, Clone, Serialize)]
pub struct PollReport {
    pub status: BatchStatus,
    pub counts: Option<RequestCounts>,
    pub output_file_id: Option<FileId>,
    /// Diagnostic text the provider attached, if any.
    pub message: Option<String>,
    /// Every row for the job, newest first.
    pub history: Vec<StatusRecord>,
}

impl PollReport {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Output files written by a fetch.
#[derive(Debug, Clone, Serialize)]
pub struct FetchReport {
    pub raw_path: PathBuf,
    pub csv_path: PathBuf,
    pub rows: usize,
    pub skipped: Vec<MalformedLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The provider accepted the request and reported `status`.
    Accepted { status: BatchStatus },
    /// The provider refused (or could not be reached); `reason` is its answer.
    Rejected { reason: String },
}

/// Result of a cancel request. A `cancelled` row is recorded either way.
#[derive(Debug, Clone, Serialize)]
pub struct CancelReport {
    pub outcome: CancelOutcome,
    pub record: StatusRecord,
}

impl CancelReport {
    pub fn accepted(&self) -> bool {
        matches!(self.outcome, CancelOutcome::Accepted { .. })
    }
}
