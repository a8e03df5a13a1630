//! Current job state, folded from the status log.
//!
//! Different transitions fill different columns (upload sets the file id,
//! create sets the batch id, a late poll sets the output id), so the remote
//! handles are recovered independently: each takes the most recent non-null
//! value in log order. A null never shadows an earlier value.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{DomainError, DomainResult};
use crate::id::{BatchId, FileId, JobId};
use crate::progress::RequestCounts;
use crate::record::StatusRecord;
use crate::status::BatchStatus;

/// Coarse lifecycle position of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Nothing recorded yet.
    Unstarted,
    /// Shard uploaded, no remote job.
    Uploaded,
    /// Remote job exists and is not terminal.
    Created,
    /// Remote job reached a terminal status.
    Terminal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobState {
    job_id: JobId,
    pub file_id: Option<FileId>,
    pub batch_id: Option<BatchId>,
    pub output_file_id: Option<FileId>,
    /// Status of the latest row.
    pub status: Option<BatchStatus>,
    /// Message of the latest row (cleared when the latest row has none).
    pub message: Option<String>,
    /// Most recent non-null progress snapshot.
    pub progress: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    last_seq: Option<u64>,
    version: u64,
}

impl JobState {
    /// State of a job with no recorded history.
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            file_id: None,
            batch_id: None,
            output_file_id: None,
            status: None,
            message: None,
            progress: None,
            updated_at: None,
            last_seq: None,
            version: 0,
        }
    }

    /// Fold a job's history (in any order) into its current state.
    pub fn fold<'a, I>(job_id: JobId, records: I) -> DomainResult<Self>
    where
        I: IntoIterator<Item = &'a StatusRecord>,
    {
        let mut ordered: Vec<&StatusRecord> = records.into_iter().collect();
        ordered.sort_by_key(|r| r.seq);

        let mut state = Self::new(job_id);
        for record in ordered {
            state.apply(record)?;
        }
        Ok(state)
    }

    /// Evolve state by one row. Rows must arrive in increasing `seq` order.
    pub fn apply(&mut self, record: &StatusRecord) -> DomainResult<()> {
        if record.job_id != self.job_id {
            return Err(DomainError::ForeignRecord {
                job: self.job_id.to_string(),
                record: record.job_id.to_string(),
            });
        }
        if let Some(last) = self.last_seq {
            if record.seq <= last {
                return Err(DomainError::validation(format!(
                    "status record seq {} applied after seq {}",
                    record.seq, last
                )));
            }
        }

        if let Some(file_id) = &record.file_id {
            self.file_id = Some(file_id.clone());
        }
        if let Some(batch_id) = &record.batch_id {
            self.batch_id = Some(batch_id.clone());
        }
        if let Some(output_file_id) = &record.output_file_id {
            self.output_file_id = Some(output_file_id.clone());
        }
        if let Some(progress) = &record.progress {
            self.progress = Some(progress.clone());
        }

        self.status = Some(record.status.clone());
        self.message = record.message.clone();
        self.updated_at = Some(record.updated_at);
        self.last_seq = Some(record.seq);
        self.version += 1;
        Ok(())
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Number of rows folded into this state.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn counts(&self) -> Option<RequestCounts> {
        self.progress.as_deref().and_then(|p| p.parse().ok())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.as_ref().is_some_and(BatchStatus::is_terminal)
    }

    pub fn stage(&self) -> Stage {
        if self.is_terminal() {
            Stage::Terminal
        } else if self.batch_id.is_some() {
            Stage::Created
        } else if self.file_id.is_some() {
            Stage::Uploaded
        } else {
            Stage::Unstarted
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::NewStatusRecord;
    use proptest::prelude::*;

    fn job() -> JobId {
        JobId::parse("j1").unwrap()
    }

    fn row(status: BatchStatus) -> NewStatusRecord {
        NewStatusRecord::new(job(), status)
    }

    #[test]
    fn empty_history_is_unstarted() {
        let state = JobState::fold(job(), std::iter::empty()).unwrap();
        assert_eq!(state.stage(), Stage::Unstarted);
        assert_eq!(state.version(), 0);
        assert!(state.status.is_none());
    }

    #[test]
    fn handles_are_recovered_per_field() {
        let rows = vec![
            row(BatchStatus::Uploaded)
                .with_file_id(FileId::parse("f1").unwrap())
                .into_stored(1),
            row(BatchStatus::Validating)
                .with_batch_id(BatchId::parse("b1").unwrap())
                .into_stored(2),
        ];

        let state = JobState::fold(job(), &rows).unwrap();
        assert_eq!(state.file_id.as_ref().unwrap().as_str(), "f1");
        assert_eq!(state.batch_id.as_ref().unwrap().as_str(), "b1");
        assert_eq!(state.status, Some(BatchStatus::Validating));
        assert_eq!(state.stage(), Stage::Created);
    }

    #[test]
    fn fold_orders_by_seq_not_input_order() {
        let rows = vec![
            row(BatchStatus::Completed)
                .with_batch_id(BatchId::parse("b1").unwrap())
                .with_output_file_id(FileId::parse("out").unwrap())
                .into_stored(7),
            row(BatchStatus::InProgress)
                .with_batch_id(BatchId::parse("b1").unwrap())
                .with_progress("Completed: 1;Failed: 0;Total: 2")
                .into_stored(3),
        ];

        let state = JobState::fold(job(), &rows).unwrap();
        assert_eq!(state.status, Some(BatchStatus::Completed));
        assert_eq!(state.output_file_id.as_ref().unwrap().as_str(), "out");
        assert_eq!(state.counts(), Some(RequestCounts::new(1, 0, 2)));
        assert_eq!(state.stage(), Stage::Terminal);
    }

    #[test]
    fn message_follows_latest_row() {
        let rows = vec![
            row(BatchStatus::InProgress)
                .with_message("poll failed: HTTP 500")
                .into_stored(1),
            row(BatchStatus::InProgress).into_stored(2),
        ];

        let state = JobState::fold(job(), &rows).unwrap();
        assert!(state.message.is_none());
    }

    #[test]
    fn rejects_foreign_and_out_of_order_rows() {
        let mut state = JobState::new(job());
        let foreign = NewStatusRecord::new(JobId::parse("other").unwrap(), BatchStatus::Uploaded)
            .into_stored(1);
        assert!(matches!(
            state.apply(&foreign),
            Err(DomainError::ForeignRecord { .. })
        ));

        state
            .apply(&row(BatchStatus::Uploaded).into_stored(5))
            .unwrap();
        assert!(state.apply(&row(BatchStatus::Uploaded).into_stored(5)).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: each handle equals the last non-null value written for it,
        /// independently of what the other columns did.
        #[test]
        fn each_handle_is_last_non_null(
            cols in prop::collection::vec(
                (prop::option::of(0u8..5), prop::option::of(0u8..5), prop::option::of(0u8..5)),
                0..20,
            )
        ) {
            let rows: Vec<StatusRecord> = cols
                .iter()
                .enumerate()
                .map(|(i, (f, b, o))| {
                    let mut rec = NewStatusRecord::new(job(), BatchStatus::InProgress);
                    rec.file_id = f.map(|v| FileId::parse(format!("f{v}")).unwrap());
                    rec.batch_id = b.map(|v| BatchId::parse(format!("b{v}")).unwrap());
                    rec.output_file_id = o.map(|v| FileId::parse(format!("o{v}")).unwrap());
                    rec.into_stored(i as u64 + 1)
                })
                .collect();

            let state = JobState::fold(job(), &rows).unwrap();
            prop_assert_eq!(state.version(), rows.len() as u64);

            let last_file = cols.iter().rev().find_map(|(f, _, _)| *f).map(|v| format!("f{v}"));
            let last_batch = cols.iter().rev().find_map(|(_, b, _)| *b).map(|v| format!("b{v}"));
            let last_output = cols.iter().rev().find_map(|(_, _, o)| *o).map(|v| format!("o{v}"));

            prop_assert_eq!(state.file_id.map(String::from), last_file);
            prop_assert_eq!(state.batch_id.map(String::from), last_batch);
            prop_assert_eq!(state.output_file_id.map(String::from), last_output);
        }
    }
}
