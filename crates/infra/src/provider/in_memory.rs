use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use batchline_core::{BatchId, BatchStatus, FileId, RequestCounts};

use super::r#trait::{BatchError, BatchProvider, CreateBatch, ProviderError, RemoteBatch};

/// Number of calls each operation has received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub upload: usize,
    pub create: usize,
    pub status: usize,
    pub cancel: usize,
    pub fetch: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Upload,
    Create,
    Status,
    Cancel,
    Fetch,
}

#[derive(Debug, Default)]
struct Inner {
    calls: CallCounts,
    next_id: u64,
    files: HashMap<FileId, Vec<u8>>,
    batches: HashMap<BatchId, RemoteBatch>,
    /// Statuses each poll walks through before the job completes.
    scripts: HashMap<BatchId, VecDeque<BatchStatus>>,
    /// Request lines in each job's input file.
    totals: HashMap<BatchId, u64>,
    default_script: Vec<BatchStatus>,
    output: Vec<u8>,
    /// Completed jobs report every request failed: an error file, no output.
    requests_fail: bool,
    failures: Vec<(Operation, ProviderError)>,
}

/// In-memory batch provider.
///
/// Intended for tests/dev. Created jobs advance one scripted status per poll
/// (by default `in_progress`, `finalizing`, then `completed` with the
/// configured output). Failures can be injected per operation.
#[derive(Debug)]
pub struct InMemoryBatchProvider {
    inner: Mutex<Inner>,
}

impl Default for InMemoryBatchProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBatchProvider {
    pub fn new() -> Self {
        let inner = Inner {
            default_script: vec![
                BatchStatus::InProgress,
                BatchStatus::Finalizing,
                BatchStatus::Completed,
            ],
            ..Inner::default()
        };
        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Statuses polls report for every job created afterwards. The last entry
    /// sticks once reached.
    pub fn with_script(self, script: Vec<BatchStatus>) -> Self {
        if let Ok(mut inner) = self.inner.lock() {
            inner.default_script = script;
        }
        self
    }

    /// Content served for `fetch` of any completed job's output.
    pub fn with_output(self, output: impl Into<Vec<u8>>) -> Self {
        if let Ok(mut inner) = self.inner.lock() {
            inner.output = output.into();
        }
        self
    }

    /// Completed jobs report every request as failed, with an error file in
    /// place of an output file.
    pub fn with_failing_requests(self) -> Self {
        if let Ok(mut inner) = self.inner.lock() {
            inner.requests_fail = true;
        }
        self
    }

    /// Make the next call of `operation` fail with `error`.
    pub fn fail_next(&self, operation: Operation, error: ProviderError) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.failures.push((operation, error));
        }
    }

    pub fn calls(&self) -> CallCounts {
        self.inner.lock().map(|i| i.calls).unwrap_or_default()
    }

    /// Bytes uploaded under `file_id`.
    pub fn uploaded(&self, file_id: &FileId) -> Option<Vec<u8>> {
        self.inner
            .lock()
            .ok()
            .and_then(|i| i.files.get(file_id).cloned())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, ProviderError> {
        self.inner
            .lock()
            .map_err(|_| ProviderError::Transport("provider state poisoned".to_string()))
    }
}

impl Inner {
    fn take_failure(&mut self, operation: Operation) -> Result<(), ProviderError> {
        match self.failures.iter().position(|(op, _)| *op == operation) {
            Some(idx) => Err(self.failures.remove(idx).1),
            None => Ok(()),
        }
    }

    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn batch(&self, batch_id: &BatchId) -> Result<RemoteBatch, ProviderError> {
        self.batches
            .get(batch_id)
            .cloned()
            .ok_or_else(|| not_found(batch_id.as_str()))
    }
}

fn not_found(id: &str) -> ProviderError {
    ProviderError::Http {
        status: 404,
        body: format!("No such object: {id}"),
    }
}

#[async_trait]
impl BatchProvider for InMemoryBatchProvider {
    async fn upload(&self, _file_name: &str, bytes: Vec<u8>) -> Result<FileId, ProviderError> {
        let mut inner = self.lock()?;
        inner.calls.upload += 1;
        inner.take_failure(Operation::Upload)?;

        let id = FileId::parse(inner.next_id("file"))
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        inner.files.insert(id.clone(), bytes);
        Ok(id)
    }

    async fn create(&self, request: &CreateBatch) -> Result<RemoteBatch, ProviderError> {
        let mut inner = self.lock()?;
        inner.calls.create += 1;
        inner.take_failure(Operation::Create)?;

        let total = match inner.files.get(&request.input_file_id) {
            Some(bytes) => bytes
                .split(|b| *b == b'\n')
                .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
                .count() as u64,
            None => return Err(not_found(request.input_file_id.as_str())),
        };

        let id = BatchId::parse(inner.next_id("batch"))
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        let remote = RemoteBatch::new(id.clone(), BatchStatus::Validating);
        let script = inner.default_script.iter().cloned().collect();
        inner.scripts.insert(id.clone(), script);
        inner.totals.insert(id.clone(), total);
        inner.batches.insert(id, remote.clone());
        Ok(remote)
    }

    async fn status(&self, batch_id: &BatchId) -> Result<RemoteBatch, ProviderError> {
        let mut inner = self.lock()?;
        inner.calls.status += 1;
        inner.take_failure(Operation::Status)?;

        let mut remote = inner.batch(batch_id)?;
        if !remote.status.is_terminal() {
            if let Some(script) = inner.scripts.get_mut(batch_id) {
                let next = if script.len() > 1 {
                    script.pop_front()
                } else {
                    script.front().cloned()
                };
                if let Some(status) = next {
                    remote.status = status;
                }
            }
        }

        let total = inner.totals.get(batch_id).copied().unwrap_or(0);
        remote.request_counts = Some(match remote.status {
            BatchStatus::Completed if inner.requests_fail => RequestCounts::new(0, total, total),
            BatchStatus::Completed => RequestCounts::new(total, 0, total),
            _ => RequestCounts::new(0, 0, total),
        });
        if remote.status.is_completed() && inner.requests_fail {
            if remote.error_file_id.is_none() {
                let errors = FileId::parse(inner.next_id("file-err"))
                    .map_err(|e| ProviderError::Decode(e.to_string()))?;
                inner.files.insert(errors.clone(), Vec::new());
                remote.error_file_id = Some(errors);
            }
        } else if remote.status.is_completed() && remote.output_file_id.is_none() {
            let out = FileId::parse(inner.next_id("file-out"))
                .map_err(|e| ProviderError::Decode(e.to_string()))?;
            let output = inner.output.clone();
            inner.files.insert(out.clone(), output);
            remote.output_file_id = Some(out);
        }
        if remote.status == BatchStatus::Failed && remote.errors.is_empty() {
            remote.errors.push(BatchError {
                code: Some("invalid_request".to_string()),
                message: Some("scripted failure".to_string()),
                param: None,
                line: None,
            });
        }

        inner.batches.insert(batch_id.clone(), remote.clone());
        Ok(remote)
    }

    async fn cancel(&self, batch_id: &BatchId) -> Result<RemoteBatch, ProviderError> {
        let mut inner = self.lock()?;
        inner.calls.cancel += 1;
        inner.take_failure(Operation::Cancel)?;

        let mut remote = inner.batch(batch_id)?;
        if remote.status.is_terminal() {
            return Err(ProviderError::Http {
                status: 400,
                body: format!(
                    "Cannot cancel a batch with status '{}'.",
                    remote.status.as_str()
                ),
            });
        }
        remote.status = BatchStatus::Cancelling;
        inner.scripts.insert(
            batch_id.clone(),
            VecDeque::from([BatchStatus::Cancelled]),
        );
        inner.batches.insert(batch_id.clone(), remote.clone());
        Ok(remote)
    }

    async fn fetch(&self, file_id: &FileId) -> Result<Vec<u8>, ProviderError> {
        let mut inner = self.lock()?;
        inner.calls.fetch += 1;
        inner.take_failure(Operation::Fetch)?;

        inner
            .files
            .get(file_id)
            .cloned()
            .ok_or_else(|| not_found(file_id.as_str()))
    }
}
