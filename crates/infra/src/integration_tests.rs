//! Integration tests for the job lifecycle.
//!
//! Tests: Shard → Upload → Create → Poll → Fetch, over the in-memory store and
//! provider.
//!
//! Verifies:
//! - Repeated upload/create make exactly one remote call
//! - Handles are recovered from history after a restart
//! - Every state change appends exactly one row
//! - Precondition errors carry the right kind

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Duration;

    use batchline_core::{BatchId, BatchStatus, FileId, JobId, NewStatusRecord, Stage};

    use crate::error::ErrorKind;
    use crate::lifecycle::{BatchJobManager, CancelOutcome, JobContext};
    use crate::normalize::MalformedPolicy;
    use crate::provider::{InMemoryBatchProvider, Operation, ProviderError};
    use crate::status_store::{InMemoryStatusStore, StatusStore};
    use crate::tracker::{wait_for_terminal, PollSchedule};

    const ANSWER_LINE: &str = r#"{"custom_id":"abc","response":{"body":{"model":"gpt-4o","choices":[{"message":{"content":"{\"category\":\"high\"}"}}]}}}"#;

    struct Harness {
        store: Arc<InMemoryStatusStore>,
        provider: Arc<InMemoryBatchProvider>,
        ctx: JobContext,
        dir: tempfile::TempDir,
    }

    fn harness(provider: InMemoryBatchProvider) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryStatusStore::new());
        let provider = Arc::new(provider);
        let ctx = JobContext::new(store.clone(), provider.clone(), dir.path().join("output"));
        Harness {
            store,
            provider,
            ctx,
            dir,
        }
    }

    fn job(id: &str) -> JobId {
        JobId::parse(id).unwrap()
    }

    fn write_shard(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(
            &path,
            "{\"custom_id\":\"r1\",\"method\":\"POST\",\"url\":\"/v1/chat/completions\",\"body\":{}}\n\
             {\"custom_id\":\"r2\",\"method\":\"POST\",\"url\":\"/v1/chat/completions\",\"body\":{}}\n",
        )
        .unwrap();
        path
    }

    async fn manager(h: &Harness, id: &str) -> BatchJobManager {
        let shard = write_shard(h.dir.path(), &format!("{id}.jsonl"));
        BatchJobManager::initialize(h.ctx.clone(), job(id), Some(shard))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn repeated_upload_calls_provider_once() {
        let h = harness(InMemoryBatchProvider::new());
        let mut m = manager(&h, "job_0").await;

        let first = m.upload().await.unwrap();
        let second = m.upload().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(h.provider.calls().upload, 1);
        assert_eq!(h.store.len(), 1);
        assert!(h.provider.uploaded(&first).unwrap().starts_with(b"{\"custom_id\":\"r1\""));
    }

    #[tokio::test]
    async fn repeated_create_calls_provider_once() {
        let h = harness(InMemoryBatchProvider::new());
        let mut m = manager(&h, "job_0").await;

        m.upload().await.unwrap();
        let first = m.create_job().await.unwrap();
        let second = m.create_job().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(h.provider.calls().create, 1);
        assert_eq!(m.state().status, Some(BatchStatus::Validating));
        assert_eq!(m.state().stage(), Stage::Created);
    }

    #[tokio::test]
    async fn resumes_upload_from_persisted_file_id() {
        let h = harness(InMemoryBatchProvider::new());
        h.store
            .append(
                NewStatusRecord::new(job("j1"), BatchStatus::Uploaded)
                    .with_file_id(FileId::parse("f1").unwrap()),
            )
            .await
            .unwrap();

        let mut m = BatchJobManager::initialize(h.ctx.clone(), job("j1"), None)
            .await
            .unwrap();

        assert_eq!(m.upload().await.unwrap().as_str(), "f1");
        assert_eq!(h.provider.calls().upload, 0);
        assert_eq!(h.store.len(), 1);
    }

    #[tokio::test]
    async fn partial_history_recovers_each_handle() {
        let h = harness(InMemoryBatchProvider::new());
        h.store
            .append(
                NewStatusRecord::new(job("j1"), BatchStatus::Uploaded)
                    .with_file_id(FileId::parse("f1").unwrap()),
            )
            .await
            .unwrap();
        h.store
            .append(
                NewStatusRecord::new(job("j1"), BatchStatus::Validating)
                    .with_batch_id(BatchId::parse("b1").unwrap()),
            )
            .await
            .unwrap();

        let mut m = BatchJobManager::initialize(h.ctx.clone(), job("j1"), None)
            .await
            .unwrap();

        assert_eq!(m.state().file_id.as_ref().unwrap().as_str(), "f1");
        assert_eq!(m.create_job().await.unwrap().as_str(), "b1");
        assert_eq!(h.provider.calls().create, 0);
    }

    #[tokio::test]
    async fn each_state_change_appends_one_row() {
        let h = harness(InMemoryBatchProvider::new());
        let mut m = manager(&h, "job_0").await;

        m.upload().await.unwrap();
        m.upload().await.unwrap();
        m.create_job().await.unwrap();
        m.create_job().await.unwrap();
        m.poll_status().await.unwrap();
        m.poll_status().await.unwrap();
        m.cancel().await.unwrap();

        let history = h.store.history(&job("job_0")).await.unwrap();
        let statuses: Vec<&str> = history.iter().map(|r| r.status.as_str()).collect();
        assert_eq!(
            statuses,
            vec!["uploaded", "validating", "in_progress", "finalizing", "cancelled"]
        );
        assert_eq!(m.state().version(), 5);
    }

    #[tokio::test]
    async fn fresh_job_without_shard_is_a_configuration_error() {
        let h = harness(InMemoryBatchProvider::new());
        let err = BatchJobManager::initialize(h.ctx.clone(), job("job_0"), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn operations_out_of_order_report_their_kind() {
        let h = harness(InMemoryBatchProvider::new());
        let mut m = manager(&h, "job_0").await;

        assert_eq!(m.create_job().await.unwrap_err().kind(), ErrorKind::Precondition);
        assert_eq!(m.poll_status().await.unwrap_err().kind(), ErrorKind::NotCreated);
        assert_eq!(m.cancel().await.unwrap_err().kind(), ErrorKind::NotCreated);

        m.upload().await.unwrap();
        m.create_job().await.unwrap();
        let err = m.fetch_output().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotReady);
        assert!(err.to_string().contains("validating"));

        assert_eq!(h.store.len(), 2);
        assert_eq!(h.provider.calls().status, 0);
    }

    #[tokio::test]
    async fn missing_shard_fails_upload_without_a_row() {
        let h = harness(InMemoryBatchProvider::new());
        let mut m = BatchJobManager::initialize(
            h.ctx.clone(),
            job("job_0"),
            Some(h.dir.path().join("absent.jsonl")),
        )
        .await
        .unwrap();

        let err = m.upload().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Upload);
        assert!(h.store.is_empty());
        assert_eq!(h.provider.calls().upload, 0);
    }

    #[tokio::test]
    async fn remote_poll_failure_is_recorded_with_last_status() {
        let h = harness(InMemoryBatchProvider::new());
        let mut m = manager(&h, "job_0").await;
        m.upload().await.unwrap();
        m.create_job().await.unwrap();

        h.provider.fail_next(
            Operation::Status,
            ProviderError::Http {
                status: 500,
                body: "boom".to_string(),
            },
        );
        let err = m.poll_status().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RemoteProvider);
        assert!(err.is_retryable());

        let latest = m.history().await.unwrap().remove(0);
        assert_eq!(latest.status, BatchStatus::Validating);
        assert_eq!(latest.message.as_deref(), Some("poll failed: HTTP 500: boom"));
        assert!(latest.batch_id.is_some());
        assert_eq!(m.state().batch_id, latest.batch_id);
    }

    #[tokio::test]
    async fn completed_job_output_is_fetched_and_normalized() {
        let h = harness(
            InMemoryBatchProvider::new()
                .with_script(vec![BatchStatus::Completed])
                .with_output(format!("{ANSWER_LINE}\n")),
        );
        let mut m = manager(&h, "job_0").await;
        m.upload().await.unwrap();
        m.create_job().await.unwrap();

        let poll = m.poll_status().await.unwrap();
        assert_eq!(poll.status, BatchStatus::Completed);
        assert!(poll.output_file_id.is_some());
        assert_eq!(poll.history.len(), 3);
        assert_eq!(poll.history[0].status, BatchStatus::Completed);
        assert_eq!(
            poll.history[0].progress.as_deref(),
            Some("Completed: 2;Failed: 0;Total: 2")
        );

        let rows_before = h.store.len();
        let fetched = m.fetch_output().await.unwrap();
        assert_eq!(fetched.rows, 1);
        assert!(fetched.skipped.is_empty());
        assert_eq!(h.store.len(), rows_before);

        assert_eq!(fetched.raw_path, h.dir.path().join("output").join("job_0.jsonl"));
        let csv = std::fs::read_to_string(&fetched.csv_path).unwrap();
        assert_eq!(csv, "custom_id,model,category\nabc,gpt-4o,high\n");
    }

    #[tokio::test]
    async fn completed_job_with_every_request_failed_names_the_error_file() {
        let h = harness(
            InMemoryBatchProvider::new()
                .with_script(vec![BatchStatus::Completed])
                .with_failing_requests(),
        );
        let mut m = manager(&h, "job_0").await;
        m.upload().await.unwrap();
        m.create_job().await.unwrap();

        let poll = m.poll_status().await.unwrap();
        assert_eq!(poll.status, BatchStatus::Completed);
        assert!(poll.output_file_id.is_none());
        let message = poll.message.clone().unwrap();
        assert!(message.contains("request errors in file-err-"), "{message}");
        assert_eq!(poll.history[0].message.as_deref(), Some(message.as_str()));
        assert_eq!(
            poll.history[0].progress.as_deref(),
            Some("Completed: 0;Failed: 2;Total: 2")
        );

        let err = m.fetch_output().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotReady);
        let text = err.to_string();
        assert!(text.contains("status: completed"), "{text}");
        assert!(text.contains("request errors in file-err-"), "{text}");
        assert_eq!(h.provider.calls().fetch, 0);
    }

    #[tokio::test]
    async fn abort_policy_fails_fetch_on_malformed_output() {
        let mut h = harness(
            InMemoryBatchProvider::new()
                .with_script(vec![BatchStatus::Completed])
                .with_output(format!("{ANSWER_LINE}\nnot json\n")),
        );
        h.ctx = h.ctx.clone().with_malformed_policy(MalformedPolicy::Abort);
        let mut m = manager(&h, "job_0").await;
        m.upload().await.unwrap();
        m.create_job().await.unwrap();
        m.poll_status().await.unwrap();

        let err = m.fetch_output().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedResponse);
        assert!(h.dir.path().join("output").join("job_0.jsonl").exists());
        assert!(!h.dir.path().join("output").join("job_0.csv").exists());
    }

    #[tokio::test]
    async fn skip_policy_reports_malformed_output() {
        let h = harness(
            InMemoryBatchProvider::new()
                .with_script(vec![BatchStatus::Completed])
                .with_output(format!("{ANSWER_LINE}\nnot json\n")),
        );
        let mut m = manager(&h, "job_0").await;
        m.upload().await.unwrap();
        m.create_job().await.unwrap();
        m.poll_status().await.unwrap();

        let fetched = m.fetch_output().await.unwrap();
        assert_eq!(fetched.rows, 1);
        assert_eq!(fetched.skipped.len(), 1);
        assert_eq!(fetched.skipped[0].line, 2);
    }

    #[tokio::test]
    async fn cancel_of_terminal_job_records_rejection() {
        let h = harness(InMemoryBatchProvider::new().with_script(vec![BatchStatus::Completed]));
        let mut m = manager(&h, "job_0").await;
        m.upload().await.unwrap();
        m.create_job().await.unwrap();
        m.poll_status().await.unwrap();

        let report = m.cancel().await.unwrap();
        assert!(!report.accepted());
        assert!(matches!(report.outcome, CancelOutcome::Rejected { .. }));
        assert_eq!(report.record.status, BatchStatus::Cancelled);
        assert!(report
            .record
            .message
            .as_deref()
            .unwrap()
            .starts_with("cancel rejected: HTTP 400"));
        assert_eq!(m.state().status, Some(BatchStatus::Cancelled));
        // output handle survives the cancel row
        assert!(m.state().output_file_id.is_some());
    }

    #[tokio::test]
    async fn accepted_cancel_uses_default_message() {
        let h = harness(InMemoryBatchProvider::new());
        let mut m = manager(&h, "job_0").await;
        m.upload().await.unwrap();
        m.create_job().await.unwrap();

        let report = m.cancel().await.unwrap();
        assert_eq!(
            report.outcome,
            CancelOutcome::Accepted {
                status: BatchStatus::Cancelling
            }
        );
        assert_eq!(
            report.record.message.as_deref(),
            Some(batchline_core::CANCELLED_BY_USER)
        );

        m.cancel().await.unwrap();
        assert_eq!(h.store.len(), 4);
    }

    #[tokio::test]
    async fn wait_returns_terminal_report() {
        let h = harness(InMemoryBatchProvider::new());
        let mut m = manager(&h, "job_0").await;
        m.upload().await.unwrap();
        m.create_job().await.unwrap();

        let report = wait_for_terminal(
            &mut m,
            PollSchedule::new(Duration::from_millis(1), Duration::from_secs(5)),
        )
        .await
        .unwrap();

        assert_eq!(report.status, BatchStatus::Completed);
        assert_eq!(report.history.len(), 5);
        assert_eq!(h.provider.calls().status, 3);
    }

    #[tokio::test]
    async fn wait_times_out_on_a_job_that_never_finishes() {
        let h = harness(InMemoryBatchProvider::new().with_script(vec![BatchStatus::InProgress]));
        let mut m = manager(&h, "job_0").await;
        m.upload().await.unwrap();
        m.create_job().await.unwrap();

        let err = wait_for_terminal(
            &mut m,
            PollSchedule::new(Duration::from_millis(5), Duration::from_millis(30)),
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        match err {
            crate::error::LifecycleError::Timeout { last_status, .. } => {
                assert_eq!(last_status, BatchStatus::InProgress)
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(h.provider.calls().status >= 1);
    }

    #[tokio::test]
    async fn wait_propagates_non_retryable_errors() {
        let h = harness(InMemoryBatchProvider::new());
        let mut m = manager(&h, "job_0").await;
        m.upload().await.unwrap();
        m.create_job().await.unwrap();
        h.provider.fail_next(
            Operation::Status,
            ProviderError::Http {
                status: 404,
                body: "gone".to_string(),
            },
        );

        let err = wait_for_terminal(&mut m, PollSchedule::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RemoteProvider);
    }
}
