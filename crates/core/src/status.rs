//! Batch status vocabulary.
//!
//! The store keeps status as a free-form string (whatever the provider said,
//! plus local sentinels). `BatchStatus` is the typed view over that string;
//! unknown values survive verbatim as `Other`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BatchStatus {
    /// Local sentinel: shard uploaded, no remote job yet.
    Uploaded,
    Validating,
    InProgress,
    Finalizing,
    Completed,
    Failed,
    /// The remote job missed its completion window.
    Expired,
    Cancelling,
    /// Terminal, remote-reported or local sentinel written by `cancel`.
    Cancelled,
    Other(String),
}

impl BatchStatus {
    pub fn as_str(&self) -> &str {
        match self {
            BatchStatus::Uploaded => "uploaded",
            BatchStatus::Validating => "validating",
            BatchStatus::InProgress => "in_progress",
            BatchStatus::Finalizing => "finalizing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::Expired => "expired",
            BatchStatus::Cancelling => "cancelling",
            BatchStatus::Cancelled => "cancelled",
            BatchStatus::Other(s) => s,
        }
    }

    /// No further transitions are expected.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed
                | BatchStatus::Failed
                | BatchStatus::Expired
                | BatchStatus::Cancelled
        )
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, BatchStatus::Completed)
    }
}

impl From<&str> for BatchStatus {
    fn from(value: &str) -> Self {
        match value {
            "uploaded" => BatchStatus::Uploaded,
            "validating" => BatchStatus::Validating,
            "in_progress" => BatchStatus::InProgress,
            "finalizing" => BatchStatus::Finalizing,
            "completed" => BatchStatus::Completed,
            "failed" => BatchStatus::Failed,
            "expired" => BatchStatus::Expired,
            "cancelling" => BatchStatus::Cancelling,
            "cancelled" => BatchStatus::Cancelled,
            other => BatchStatus::Other(other.to_string()),
        }
    }
}

impl From<String> for BatchStatus {
    fn from(value: String) -> Self {
        match BatchStatus::from(value.as_str()) {
            BatchStatus::Other(_) => BatchStatus::Other(value),
            known => known,
        }
    }
}

impl From<BatchStatus> for String {
    fn from(value: BatchStatus) -> Self {
        match value {
            BatchStatus::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl core::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
