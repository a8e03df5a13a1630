use std::collections::BTreeSet;
use std::sync::RwLock;

use async_trait::async_trait;

use batchline_core::{JobId, NewStatusRecord, StatusRecord};

use super::r#trait::{StatusStore, StatusStoreError};

/// In-memory append-only status log.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryStatusStore {
    rows: RwLock<Vec<StatusRecord>>,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of rows across all jobs.
    pub fn len(&self) -> usize {
        self.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StatusStore for InMemoryStatusStore {
    async fn append(&self, record: NewStatusRecord) -> Result<StatusRecord, StatusStoreError> {
        let mut rows = self
            .rows
            .write()
            .map_err(|_| StatusStoreError::storage("append", "lock poisoned"))?;

        let seq = rows.last().map(|r| r.seq).unwrap_or(0) + 1;
        let stored = record.into_stored(seq);
        rows.push(stored.clone());
        Ok(stored)
    }

    async fn history(&self, job_id: &JobId) -> Result<Vec<StatusRecord>, StatusStoreError> {
        let rows = self
            .rows
            .read()
            .map_err(|_| StatusStoreError::storage("history", "lock poisoned"))?;

        Ok(rows.iter().filter(|r| &r.job_id == job_id).cloned().collect())
    }

    async fn job_ids(&self) -> Result<Vec<JobId>, StatusStoreError> {
        let rows = self
            .rows
            .read()
            .map_err(|_| StatusStoreError::storage("job_ids", "lock poisoned"))?;

        let ids: BTreeSet<JobId> = rows.iter().map(|r| r.job_id.clone()).collect();
        Ok(ids.into_iter().collect())
    }

    async fn reset(&self) -> Result<(), StatusStoreError> {
        let mut rows = self
            .rows
            .write()
            .map_err(|_| StatusStoreError::storage("reset", "lock poisoned"))?;
        rows.clear();
        Ok(())
    }
}
