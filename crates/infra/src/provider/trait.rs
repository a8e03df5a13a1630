use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use batchline_core::{BatchId, BatchStatus, FileId, RequestCounts};

/// Endpoint every request in a shard targets.
pub const CHAT_COMPLETIONS_ENDPOINT: &str = "/v1/chat/completions";

/// How long the provider may take to finish a job.
pub const COMPLETION_WINDOW: &str = "24h";

/// Parameters for creating a remote batch job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateBatch {
    pub input_file_id: FileId,
    pub endpoint: String,
    pub completion_window: String,
}

impl CreateBatch {
    /// A chat-completion job over `input_file_id` with the 24-hour window.
    pub fn chat_completions(input_file_id: FileId) -> Self {
        Self {
            input_file_id,
            endpoint: CHAT_COMPLETIONS_ENDPOINT.to_string(),
            completion_window: COMPLETION_WINDOW.to_string(),
        }
    }
}

/// One provider-reported validation/processing error for a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchError {
    pub code: Option<String>,
    pub message: Option<String>,
    pub param: Option<String>,
    pub line: Option<u64>,
}

impl core::fmt::Display for BatchError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let code = self.code.as_deref().unwrap_or("error");
        let message = self.message.as_deref().unwrap_or("(no message)");
        write!(f, "{code}: {message}")?;
        if let Some(line) = self.line {
            write!(f, " (line {line})")?;
        }
        Ok(())
    }
}

/// Provider view of a batch job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteBatch {
    pub id: BatchId,
    pub status: BatchStatus,
    pub errors: Vec<BatchError>,
    pub request_counts: Option<RequestCounts>,
    pub output_file_id: Option<FileId>,
    pub error_file_id: Option<FileId>,
}

impl RemoteBatch {
    pub fn new(id: BatchId, status: BatchStatus) -> Self {
        Self {
            id,
            status,
            errors: Vec::new(),
            request_counts: None,
            output_file_id: None,
            error_file_id: None,
        }
    }

    /// Errors joined into one diagnostic line, `None` when there are none.
    ///
    /// A batch that has an error file but no output file (every request
    /// failed) says so, with the error file id.
    pub fn error_summary(&self) -> Option<String> {
        let mut parts: Vec<String> = self.errors.iter().map(ToString::to_string).collect();
        if let (None, Some(error_file_id)) = (&self.output_file_id, &self.error_file_id) {
            parts.push(format!("no output file; request errors in {error_file_id}"));
        }
        if parts.is_empty() {
            return None;
        }
        Some(parts.join("; "))
    }
}

/// Remote provider error.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The provider answered with a non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The request never produced a response (connect, TLS, timeout).
    #[error("transport error: {0}")]
    Transport(String),

    /// The response could not be decoded.
    #[error("unexpected response: {0}")]
    Decode(String),

    /// The client could not be constructed.
    #[error("provider configuration: {0}")]
    Configuration(String),
}

impl ProviderError {
    /// Whether retrying later could succeed (rate limits, server errors,
    /// network trouble). The lifecycle manager never retries by itself.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Http { status, .. } => *status == 429 || *status >= 500,
            ProviderError::Transport(_) => true,
            ProviderError::Decode(_) | ProviderError::Configuration(_) => false,
        }
    }
}

/// Remote batch inference provider.
///
/// Thin capability over the external API; no retries, no caching. Every call
/// is one remote request.
#[async_trait]
pub trait BatchProvider: Send + Sync {
    /// Upload a shard, returning the remote file handle.
    async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> Result<FileId, ProviderError>;

    async fn create(&self, request: &CreateBatch) -> Result<RemoteBatch, ProviderError>;

    async fn status(&self, batch_id: &BatchId) -> Result<RemoteBatch, ProviderError>;

    async fn cancel(&self, batch_id: &BatchId) -> Result<RemoteBatch, ProviderError>;

    /// Download the raw content of a file (a job's output).
    async fn fetch(&self, file_id: &FileId) -> Result<Vec<u8>, ProviderError>;
}

#[async_trait]
impl<P> BatchProvider for Arc<P>
where
    P: BatchProvider + ?Sized,
{
    async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> Result<FileId, ProviderError> {
        (**self).upload(file_name, bytes).await
    }

    async fn create(&self, request: &CreateBatch) -> Result<RemoteBatch, ProviderError> {
        (**self).create(request).await
    }

    async fn status(&self, batch_id: &BatchId) -> Result<RemoteBatch, ProviderError> {
        (**self).status(batch_id).await
    }

    async fn cancel(&self, batch_id: &BatchId) -> Result<RemoteBatch, ProviderError> {
        (**self).cancel(batch_id).await
    }

    async fn fetch(&self, file_id: &FileId) -> Result<Vec<u8>, ProviderError> {
        (**self).fetch(file_id).await
    }
}
