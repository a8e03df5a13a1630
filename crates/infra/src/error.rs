//! Errors crossing the lifecycle manager boundary.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use batchline_core::{BatchStatus, DomainError, JobId};

use crate::config::ConfigError;
use crate::provider::ProviderError;
use crate::status_store::StatusStoreError;

/// Discriminator for [`LifecycleError`], stable for callers that branch on the
/// failure class (exit codes, retry decisions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Precondition,
    NotCreated,
    NotReady,
    Upload,
    RemoteProvider,
    MalformedResponse,
    Timeout,
    Store,
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Precondition => "precondition",
            ErrorKind::NotCreated => "not_created",
            ErrorKind::NotReady => "not_ready",
            ErrorKind::Upload => "upload",
            ErrorKind::RemoteProvider => "remote_provider",
            ErrorKind::MalformedResponse => "malformed_response",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Store => "store",
            ErrorKind::Io => "io",
        }
    }
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("job {job_id}: {message}")]
    Precondition { job_id: JobId, message: String },

    #[error("job {job_id} has no remote batch yet; create it first")]
    NotCreated { job_id: JobId },

    #[error("job {job_id} has no output yet (status: {status}){}", note(.message))]
    NotReady {
        job_id: JobId,
        status: String,
        message: Option<String>,
    },

    #[error("upload of {} failed: {message}", path.display())]
    Upload {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<ProviderError>,
    },

    #[error("{operation} failed for job {job_id}: {source}")]
    RemoteProvider {
        job_id: JobId,
        operation: &'static str,
        #[source]
        source: ProviderError,
    },

    #[error("malformed response at line {line}: {reason}")]
    MalformedResponse { line: usize, reason: String },

    #[error("job {job_id} still {last_status} after {elapsed:?}")]
    Timeout {
        job_id: JobId,
        elapsed: Duration,
        last_status: BatchStatus,
    },

    #[error(transparent)]
    Store(#[from] StatusStoreError),

    #[error("writing {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LifecycleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LifecycleError::Configuration(_) => ErrorKind::Configuration,
            LifecycleError::Precondition { .. } => ErrorKind::Precondition,
            LifecycleError::NotCreated { .. } => ErrorKind::NotCreated,
            LifecycleError::NotReady { .. } => ErrorKind::NotReady,
            LifecycleError::Upload { .. } => ErrorKind::Upload,
            LifecycleError::RemoteProvider { .. } => ErrorKind::RemoteProvider,
            LifecycleError::MalformedResponse { .. } => ErrorKind::MalformedResponse,
            LifecycleError::Timeout { .. } => ErrorKind::Timeout,
            LifecycleError::Store(_) => ErrorKind::Store,
            LifecycleError::Io { .. } => ErrorKind::Io,
        }
    }

    /// Whether a later attempt at the same call could succeed. The manager
    /// itself never retries.
    pub fn is_retryable(&self) -> bool {
        match self {
            LifecycleError::Upload {
                source: Some(source),
                ..
            } => source.is_retryable(),
            LifecycleError::RemoteProvider { source, .. } => source.is_retryable(),
            LifecycleError::Timeout { .. } => true,
            _ => false,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<DomainError> for LifecycleError {
    fn from(err: DomainError) -> Self {
        LifecycleError::Configuration(err.to_string())
    }
}

impl From<ConfigError> for LifecycleError {
    fn from(err: ConfigError) -> Self {
        LifecycleError::Configuration(err.to_string())
    }
}

impl From<ProviderError> for LifecycleError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Configuration(message) => LifecycleError::Configuration(message),
            other => LifecycleError::Configuration(other.to_string()),
        }
    }
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

fn note(message: &Option<String>) -> String {
    message
        .as_deref()
        .map(|m| format!(": {m}"))
        .unwrap_or_default()
}
