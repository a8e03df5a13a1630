//! Per-job outcomes and the process exit policy.

use std::process::ExitCode;

use batchline_core::{BatchStatus, JobId};

/// What happened to one job during a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub job_id: String,
    pub status: Option<BatchStatus>,
    pub error: Option<String>,
}

impl JobOutcome {
    pub fn status(job_id: &JobId, status: Option<BatchStatus>) -> Self {
        Self {
            job_id: job_id.to_string(),
            status,
            error: None,
        }
    }

    pub fn failed(job_id: impl Into<String>, error: impl core::fmt::Display) -> Self {
        Self {
            job_id: job_id.into(),
            status: None,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// Every job completed.
    Success,
    /// A job failed, was cancelled or expired, or an operation errored.
    Failure,
    /// Nothing failed, but some job is not finished yet.
    Pending,
}

impl Exit {
    pub fn code(self) -> u8 {
        match self {
            Exit::Success => 0,
            Exit::Failure => 1,
            Exit::Pending => 2,
        }
    }

    /// Fold job outcomes into one exit status.
    pub fn from_outcomes(outcomes: &[JobOutcome]) -> Self {
        let failed = outcomes.iter().any(|o| {
            o.error.is_some()
                || o.status
                    .as_ref()
                    .is_some_and(|s| s.is_terminal() && !s.is_completed())
        });
        if failed {
            return Exit::Failure;
        }

        let pending = outcomes
            .iter()
            .any(|o| !o.status.as_ref().is_some_and(BatchStatus::is_completed));
        if pending { Exit::Pending } else { Exit::Success }
    }
}

impl From<Exit> for ExitCode {
    fn from(exit: Exit) -> Self {
        ExitCode::from(exit.code())
    }
}
