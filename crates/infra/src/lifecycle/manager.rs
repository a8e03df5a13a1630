//! Batch job lifecycle manager.
//!
//! Drives one job through upload, create, poll, fetch and cancel. Every state
//! change appends one row to the status log; a handle already present in the
//! log is proof the step happened, so repeating a completed step makes no
//! remote call and appends nothing.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use batchline_core::{
    BatchId, BatchStatus, FileId, JobEvent, JobId, JobState, RemoteOperation, StatusRecord,
};

use crate::error::{LifecycleError, LifecycleResult};
use crate::normalize::normalize;
use crate::provider::{CreateBatch, ProviderError};
use crate::status_store::StatusStoreError;

use super::context::JobContext;
use super::report::{CancelOutcome, CancelReport, FetchReport, PollReport};

/// Lifecycle manager for one job.
///
/// Operations take `&mut self`: a job is advanced by one caller at a time.
#[derive(Debug)]
pub struct BatchJobManager {
    ctx: JobContext,
    shard_path: Option<PathBuf>,
    state: JobState,
}

impl BatchJobManager {
    /// Rehydrate `job_id` from the status log.
    ///
    /// A job with no uploaded file yet needs `shard_path`.
    #[instrument(skip_all, fields(job_id = %job_id), err)]
    pub async fn initialize(
        ctx: JobContext,
        job_id: JobId,
        shard_path: Option<PathBuf>,
    ) -> LifecycleResult<Self> {
        let history = ctx.store.history(&job_id).await?;
        let state = JobState::fold(job_id, &history)
            .map_err(|e| StatusStoreError::storage("history", e.to_string()))?;

        if state.file_id.is_none() && shard_path.is_none() {
            return Err(LifecycleError::Configuration(format!(
                "job {} has not been uploaded and no shard path was given",
                state.job_id()
            )));
        }

        debug!(rows = history.len(), stage = ?state.stage(), "job rehydrated");
        Ok(Self {
            ctx,
            shard_path,
            state,
        })
    }

    pub fn job_id(&self) -> &JobId {
        self.state.job_id()
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    pub fn shard_path(&self) -> Option<&Path> {
        self.shard_path.as_deref()
    }

    /// Upload the shard unless the log already holds a file id.
    #[instrument(skip(self), fields(job_id = %self.state.job_id()), err)]
    pub async fn upload(&mut self) -> LifecycleResult<FileId> {
        if let Some(file_id) = &self.state.file_id {
            debug!(file_id = %file_id, "already uploaded");
            return Ok(file_id.clone());
        }

        let path = self.shard_path.clone().ok_or_else(|| {
            LifecycleError::Configuration(format!(
                "job {} has no shard path to upload",
                self.state.job_id()
            ))
        })?;

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| LifecycleError::Upload {
                path: path.clone(),
                message: e.to_string(),
                source: None,
            })?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}.jsonl", self.state.job_id()));

        let file_id = self
            .ctx
            .provider
            .upload(&file_name, bytes)
            .await
            .map_err(|e| LifecycleError::Upload {
                path: path.clone(),
                message: "remote upload failed".to_string(),
                source: Some(e),
            })?;

        self.record(JobEvent::Uploaded {
            file_id: file_id.clone(),
        })
        .await?;
        info!(file_id = %file_id, "shard uploaded");
        Ok(file_id)
    }

    /// Create the remote job unless the log already holds a batch id.
    #[instrument(skip(self), fields(job_id = %self.state.job_id()), err)]
    pub async fn create_job(&mut self) -> LifecycleResult<BatchId> {
        if let Some(batch_id) = &self.state.batch_id {
            debug!(batch_id = %batch_id, "already created");
            return Ok(batch_id.clone());
        }

        let file_id = self
            .state
            .file_id
            .clone()
            .ok_or_else(|| LifecycleError::Precondition {
                job_id: self.state.job_id().clone(),
                message: "shard must be uploaded before the batch is created".to_string(),
            })?;

        let request = CreateBatch::chat_completions(file_id);
        let result = self.ctx.provider.create(&request).await;
        let remote = match result {
            Ok(remote) => remote,
            Err(e) => return Err(self.remote_failure(RemoteOperation::Create, e).await),
        };

        let batch_id = remote.id.clone();
        let message = remote.error_summary();
        self.record(JobEvent::Created {
            batch_id: batch_id.clone(),
            status: remote.status.clone(),
            message,
        })
        .await?;
        info!(batch_id = %batch_id, status = %remote.status, "batch created");
        Ok(batch_id)
    }

    /// Query the remote job and record what it reports.
    #[instrument(skip(self), fields(job_id = %self.state.job_id()), err)]
    pub async fn poll_status(&mut self) -> LifecycleResult<PollReport> {
        let batch_id = self.require_batch()?;

        let result = self.ctx.provider.status(&batch_id).await;
        let remote = match result {
            Ok(remote) => remote,
            Err(e) => return Err(self.remote_failure(RemoteOperation::Poll, e).await),
        };

        let message = remote.error_summary();
        self.record(JobEvent::Polled {
            batch_id,
            status: remote.status.clone(),
            counts: remote.request_counts,
            output_file_id: remote.output_file_id.clone(),
            message: message.clone(),
        })
        .await?;

        let progress = remote
            .request_counts
            .map(|c| c.to_string())
            .unwrap_or_default();
        info!(status = %remote.status, progress = %progress, "batch polled");

        let mut history = self.ctx.store.history(self.state.job_id()).await?;
        history.reverse();

        Ok(PollReport {
            status: remote.status,
            counts: remote.request_counts,
            output_file_id: self.state.output_file_id.clone(),
            message,
            history,
        })
    }

    /// Download, normalize and write the job's output.
    ///
    /// Writes `<output_dir>/<job_id>.jsonl` (raw) before normalizing, then
    /// `<output_dir>/<job_id>.csv`. Records no status row.
    #[instrument(skip(self), fields(job_id = %self.state.job_id()), err)]
    pub async fn fetch_output(&mut self) -> LifecycleResult<FetchReport> {
        let output_file_id =
            self.state
                .output_file_id
                .clone()
                .ok_or_else(|| LifecycleError::NotReady {
                    job_id: self.state.job_id().clone(),
                    status: self
                        .state
                        .status
                        .as_ref()
                        .map(|s| s.as_str().to_string())
                        .unwrap_or_else(|| "unstarted".to_string()),
                    message: self.state.message.clone(),
                })?;

        let raw = self
            .ctx
            .provider
            .fetch(&output_file_id)
            .await
            .map_err(|source| LifecycleError::RemoteProvider {
                job_id: self.state.job_id().clone(),
                operation: "fetch",
                source,
            })?;

        let dir = self.ctx.output_dir.clone();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| LifecycleError::io(&dir, e))?;

        let raw_path = dir.join(format!("{}.jsonl", self.state.job_id()));
        tokio::fs::write(&raw_path, &raw)
            .await
            .map_err(|e| LifecycleError::io(&raw_path, e))?;

        let table = normalize(&raw, self.ctx.malformed_policy).map_err(|bad| {
            LifecycleError::MalformedResponse {
                line: bad.line,
                reason: bad.reason,
            }
        })?;

        let csv_path = dir.join(format!("{}.csv", self.state.job_id()));
        let mut csv = Vec::new();
        table
            .write_csv(&mut csv)
            .map_err(|e| LifecycleError::io(&csv_path, e))?;
        tokio::fs::write(&csv_path, csv)
            .await
            .map_err(|e| LifecycleError::io(&csv_path, e))?;

        if !table.skipped.is_empty() {
            warn!(skipped = table.skipped.len(), "output had malformed lines");
        }
        info!(rows = table.len(), csv = %csv_path.display(), "output written");

        Ok(FetchReport {
            raw_path,
            csv_path,
            rows: table.len(),
            skipped: table.skipped,
        })
    }

    /// Request cancellation and record a `cancelled` row whatever the
    /// provider answers.
    #[instrument(skip(self), fields(job_id = %self.state.job_id()), err)]
    pub async fn cancel(&mut self) -> LifecycleResult<CancelReport> {
        let batch_id = self.require_batch()?;

        let result = self.ctx.provider.cancel(&batch_id).await;
        let (outcome, message) = match result {
            Ok(remote) => (
                CancelOutcome::Accepted {
                    status: remote.status,
                },
                None,
            ),
            Err(e) => {
                warn!(error = %e, "provider rejected cancellation");
                let reason = e.to_string();
                (
                    CancelOutcome::Rejected {
                        reason: reason.clone(),
                    },
                    Some(format!("cancel rejected: {reason}")),
                )
            }
        };

        let record = self
            .record(JobEvent::Cancelled { batch_id, message })
            .await?;
        info!(outcome = ?outcome, "cancellation recorded");
        Ok(CancelReport { outcome, record })
    }

    /// Full history for the job, newest first.
    pub async fn history(&self) -> LifecycleResult<Vec<StatusRecord>> {
        let mut rows = self.ctx.store.history(self.state.job_id()).await?;
        rows.reverse();
        Ok(rows)
    }

    fn require_batch(&self) -> LifecycleResult<BatchId> {
        self.state
            .batch_id
            .clone()
            .ok_or_else(|| LifecycleError::NotCreated {
                job_id: self.state.job_id().clone(),
            })
    }

    async fn record(&mut self, event: JobEvent) -> LifecycleResult<StatusRecord> {
        debug!(event = event.event_type(), status = %event.status(), "recording");
        let row = event.into_record(self.state.job_id().clone(), Utc::now());
        let stored = self.ctx.store.append(row).await?;
        self.state
            .apply(&stored)
            .map_err(|e| StatusStoreError::storage("append", e.to_string()))?;
        Ok(stored)
    }

    /// Persist a remote create/poll failure and build the error to return.
    async fn remote_failure(
        &mut self,
        operation: RemoteOperation,
        source: ProviderError,
    ) -> LifecycleError {
        warn!(
            operation = operation.as_str(),
            error = %source,
            retryable = source.is_retryable(),
            "remote call failed"
        );

        let event = JobEvent::RemoteFailure {
            operation,
            batch_id: self.state.batch_id.clone(),
            status: self.state.status.clone().unwrap_or(BatchStatus::Uploaded),
            message: source.to_string(),
        };
        if let Err(e) = self.record(event).await {
            return e;
        }

        LifecycleError::RemoteProvider {
            job_id: self.state.job_id().clone(),
            operation: operation.as_str(),
            source,
        }
    }
}
