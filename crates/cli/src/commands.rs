//! Command implementations. Each job-level command drives one lifecycle
//! manager per job, at most `--concurrency` at a time.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use batchline_core::{BatchStatus, JobId, StatusRecord};
use batchline_infra::{
    discover_shards, wait_for_terminal, BatchConfig, BatchJobManager, CancelOutcome, JobContext,
    LifecycleError, LifecycleResult, PollSchedule, Shard, SqliteStatusStore, StatusStore,
};

use crate::args::{Cli, Command};
use crate::outcome::{Exit, JobOutcome};

/// Resolve configuration (file, env, flags) and run the selected command.
pub async fn run(cli: Cli) -> anyhow::Result<Exit> {
    let config = resolve_config(&cli)?;
    let concurrency = cli.concurrency;
    info!(
        db = %config.db_path.display(),
        output_dir = %config.output_dir.display(),
        "configuration loaded"
    );

    match cli.command {
        Command::Reset { yes } => reset(&config, yes).await,
        Command::History { job_id, json } => history(&config, &job_id, json).await,
        Command::Submit { target, job_id } => {
            let shards = submit_targets(&target, job_id.as_deref()).await?;
            let outcomes = with_context(&config, |ctx| async move {
                for_each_job(shards, concurrency, move |shard| submit_one(ctx.clone(), shard))
                    .await
            })
            .await?;
            Ok(Exit::from_outcomes(&outcomes))
        }
        Command::Track {
            target,
            wait,
            interval,
            timeout,
        } => {
            let job_ids = track_targets(&target).await?;
            let schedule = wait.then(|| {
                PollSchedule::new(
                    interval.map(Duration::from_secs).unwrap_or(config.poll_interval()),
                    timeout.map(Duration::from_secs).unwrap_or(config.wait_timeout()),
                )
            });
            let outcomes = with_context(&config, |ctx| async move {
                for_each_job(job_ids, concurrency, move |job_id| {
                    track_one(ctx.clone(), job_id, schedule)
                })
                .await
            })
            .await?;
            Ok(Exit::from_outcomes(&outcomes))
        }
        Command::Fetch { job_id } => {
            let job_id = JobId::parse(job_id)?;
            let outcomes =
                with_context(&config, |ctx| async move { vec![fetch_one(ctx, job_id).await] })
                    .await?;
            Ok(Exit::from_outcomes(&outcomes))
        }
        Command::Cancel { job_id } => {
            let job_id = JobId::parse(job_id)?;
            let outcomes =
                with_context(&config, |ctx| async move { vec![cancel_one(ctx, job_id).await] })
                    .await?;
            // A recorded cancellation is the expected result here, not a failure.
            if outcomes.iter().any(|o| o.error.is_some()) {
                Ok(Exit::Failure)
            } else {
                Ok(Exit::Success)
            }
        }
    }
}

pub fn resolve_config(cli: &Cli) -> anyhow::Result<BatchConfig> {
    let mut config = BatchConfig::load(cli.config.as_deref())?;
    if let Some(db) = &cli.db {
        config.db_path = db.clone();
    }
    if let Some(dir) = &cli.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(policy) = cli.malformed {
        config.malformed_policy = policy;
    }
    Ok(config)
}

/// Open the store and provider, run `body`, close the store, and report the
/// jobs that errored.
async fn with_context<F, Fut>(config: &BatchConfig, body: F) -> anyhow::Result<Vec<JobOutcome>>
where
    F: FnOnce(JobContext) -> Fut,
    Fut: Future<Output = Vec<JobOutcome>>,
{
    let provider = config.provider().map_err(LifecycleError::from)?;
    let store = SqliteStatusStore::open(&config.db_path, false).await?;
    let ctx = JobContext::new(Arc::new(store.clone()), provider, &config.output_dir)
        .with_malformed_policy(config.malformed_policy);

    let outcomes = body(ctx).await;
    store.close().await;

    for outcome in outcomes.iter().filter(|o| o.error.is_some()) {
        eprintln!(
            "{}: {}",
            outcome.job_id,
            outcome.error.as_deref().unwrap_or_default()
        );
    }
    Ok(outcomes)
}

/// Run `job` for every item with at most `concurrency` in flight. Outcomes come
/// back in input order.
async fn for_each_job<T, F, Fut>(items: Vec<T>, concurrency: usize, job: F) -> Vec<JobOutcome>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = JobOutcome> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut set = JoinSet::new();
    for (idx, item) in items.into_iter().enumerate() {
        let semaphore = semaphore.clone();
        let fut = job(item);
        set.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            (idx, fut.await)
        });
    }

    let mut outcomes = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(pair) => outcomes.push(pair),
            Err(e) => outcomes.push((usize::MAX, JobOutcome::failed("<task>", e))),
        }
    }
    outcomes.sort_by_key(|(idx, _)| *idx);
    outcomes.into_iter().map(|(_, o)| o).collect()
}

async fn submit_targets(target: &Path, job_id: Option<&str>) -> anyhow::Result<Vec<Shard>> {
    if target.is_dir() {
        if job_id.is_some() {
            bail!("--job-id applies to a single shard file, not a directory");
        }
        let shards = discover_shards(target).await?;
        if shards.is_empty() {
            warn!(dir = %target.display(), "no *.jsonl shards found");
        }
        return Ok(shards);
    }

    let shard = match job_id {
        Some(id) => Shard {
            job_id: JobId::parse(id)?,
            path: target.to_path_buf(),
        },
        None => Shard::from_path(target)?,
    };
    Ok(vec![shard])
}

async fn track_targets(target: &str) -> anyhow::Result<Vec<JobId>> {
    let path = PathBuf::from(target);
    if path.is_dir() {
        let shards = discover_shards(&path).await?;
        return Ok(shards.into_iter().map(|s| s.job_id).collect());
    }
    Ok(vec![JobId::parse(target)?])
}

async fn submit_one(ctx: JobContext, shard: Shard) -> JobOutcome {
    let job_id = shard.job_id.clone();
    let result: LifecycleResult<_> = async {
        let mut m = BatchJobManager::initialize(ctx, shard.job_id, Some(shard.path)).await?;
        let file_id = m.upload().await?;
        let batch_id = m.create_job().await?;
        Ok((file_id, batch_id, m.state().status.clone()))
    }
    .await;

    match result {
        Ok((file_id, batch_id, status)) => {
            println!(
                "{job_id}\t{}\tfile={file_id}\tbatch={batch_id}",
                status_label(status.as_ref())
            );
            JobOutcome::status(&job_id, status)
        }
        Err(e) => job_error(&job_id, "submit", e),
    }
}

async fn track_one(ctx: JobContext, job_id: JobId, schedule: Option<PollSchedule>) -> JobOutcome {
    let result: LifecycleResult<_> = async {
        let mut m = BatchJobManager::initialize(ctx, job_id.clone(), None).await?;

        let (status, progress) = if m.state().is_terminal() {
            (m.state().status.clone(), m.state().progress.clone())
        } else {
            let report = match schedule {
                Some(schedule) => wait_for_terminal(&mut m, schedule).await?,
                None => m.poll_status().await?,
            };
            (Some(report.status), report.counts.map(|c| c.to_string()))
        };

        println!(
            "{job_id}\t{}\t{}",
            status_label(status.as_ref()),
            progress.unwrap_or_default()
        );

        if status.as_ref().is_some_and(BatchStatus::is_completed) {
            let fetched = m.fetch_output().await?;
            print_fetch(&job_id, &fetched);
        }
        Ok(status)
    }
    .await;

    match result {
        Ok(status) => JobOutcome::status(&job_id, status),
        Err(e) => job_error(&job_id, "track", e),
    }
}

async fn fetch_one(ctx: JobContext, job_id: JobId) -> JobOutcome {
    let result: LifecycleResult<_> = async {
        let mut m = BatchJobManager::initialize(ctx, job_id.clone(), None).await?;
        let fetched = m.fetch_output().await?;
        print_fetch(&job_id, &fetched);
        Ok(m.state().status.clone())
    }
    .await;

    match result {
        Ok(status) => JobOutcome::status(&job_id, status),
        Err(e) => job_error(&job_id, "fetch", e),
    }
}

async fn cancel_one(ctx: JobContext, job_id: JobId) -> JobOutcome {
    let result: LifecycleResult<_> = async {
        let mut m = BatchJobManager::initialize(ctx, job_id.clone(), None).await?;
        m.cancel().await
    }
    .await;

    match result {
        Ok(report) => {
            match &report.outcome {
                CancelOutcome::Accepted { status } => {
                    println!("{job_id}\tcancel requested\tprovider status: {status}")
                }
                CancelOutcome::Rejected { reason } => {
                    println!("{job_id}\tcancel rejected by provider\t{reason}")
                }
            }
            JobOutcome::status(&job_id, Some(report.record.status))
        }
        Err(e) => job_error(&job_id, "cancel", e),
    }
}

async fn history(config: &BatchConfig, job_id: &str, json: bool) -> anyhow::Result<Exit> {
    let job_id = JobId::parse(job_id)?;
    let store = SqliteStatusStore::open(&config.db_path, false).await?;
    let mut rows = store.history(&job_id).await?;
    store.close().await;
    rows.reverse();

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else if rows.is_empty() {
        println!("no history for {job_id}");
    } else {
        println!("seq\tupdated_at\tstatus\tfile\tbatch\toutput\tprogress\tmessage");
        for row in &rows {
            println!("{}", history_line(row));
        }
    }
    Ok(Exit::Success)
}

async fn reset(config: &BatchConfig, yes: bool) -> anyhow::Result<Exit> {
    if !yes {
        bail!("reset drops every recorded job; pass --yes to confirm");
    }
    let store = SqliteStatusStore::open(&config.db_path, true)
        .await
        .with_context(|| format!("resetting {}", config.db_path.display()))?;
    store.close().await;
    println!("status database {} reset", config.db_path.display());
    Ok(Exit::Success)
}

fn print_fetch(job_id: &JobId, fetched: &batchline_infra::FetchReport) {
    println!(
        "{job_id}\traw={}\tcsv={}\trows={}",
        fetched.raw_path.display(),
        fetched.csv_path.display(),
        fetched.rows
    );
    for bad in &fetched.skipped {
        println!("{job_id}\tskipped line {}: {}", bad.line, bad.reason);
    }
}

fn history_line(row: &StatusRecord) -> String {
    let opt = |v: Option<&str>| v.unwrap_or("-").to_string();
    [
        row.seq.to_string(),
        row.updated_at.to_rfc3339(),
        row.status.to_string(),
        opt(row.file_id.as_ref().map(|v| v.as_str())),
        opt(row.batch_id.as_ref().map(|v| v.as_str())),
        opt(row.output_file_id.as_ref().map(|v| v.as_str())),
        opt(row.progress.as_deref()),
        opt(row.message.as_deref()),
    ]
    .join("\t")
}

fn status_label(status: Option<&BatchStatus>) -> &str {
    status.map(BatchStatus::as_str).unwrap_or("unstarted")
}

fn job_error(job_id: &JobId, command: &str, e: LifecycleError) -> JobOutcome {
    error!(
        job_id = %job_id,
        command,
        kind = %e.kind(),
        retryable = e.is_retryable(),
        error = %e,
        "job failed"
    );
    JobOutcome::failed(job_id.to_string(), e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchline_core::FileId;
    use batchline_core::NewStatusRecord;

    #[tokio::test]
    async fn single_shard_job_id_defaults_to_stem() {
        let dir = tempfile::tempdir().unwrap();
        let shard = dir.path().join("job_5.jsonl");
        std::fs::write(&shard, "{}\n").unwrap();

        let shards = submit_targets(&shard, None).await.unwrap();
        assert_eq!(shards[0].job_id.as_str(), "job_5");

        let shards = submit_targets(&shard, Some("custom")).await.unwrap();
        assert_eq!(shards[0].job_id.as_str(), "custom");

        assert!(submit_targets(dir.path(), Some("custom")).await.is_err());
    }

    #[tokio::test]
    async fn directory_targets_list_job_ids() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["job_1.jsonl", "job_0.jsonl"] {
            std::fs::write(dir.path().join(name), "{}\n").unwrap();
        }
        let ids = track_targets(dir.path().to_str().unwrap()).await.unwrap();
        let ids: Vec<&str> = ids.iter().map(JobId::as_str).collect();
        assert_eq!(ids, vec!["job_0", "job_1"]);

        let ids = track_targets("job_9").await.unwrap();
        assert_eq!(ids[0].as_str(), "job_9");
    }

    #[tokio::test]
    async fn for_each_job_keeps_input_order() {
        let outcomes = for_each_job(vec![30u64, 0, 10], 2, |delay| async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            JobOutcome::failed(delay.to_string(), "done")
        })
        .await;
        let ids: Vec<&str> = outcomes.iter().map(|o| o.job_id.as_str()).collect();
        assert_eq!(ids, vec!["30", "0", "10"]);
    }

    #[test]
    fn history_line_renders_missing_columns_as_dash() {
        let row = NewStatusRecord::new(JobId::parse("job_0").unwrap(), BatchStatus::Uploaded)
            .with_file_id(FileId::parse("file-1").unwrap())
            .into_stored(1);
        let line = history_line(&row);
        let cells: Vec<&str> = line.split('\t').collect();
        assert_eq!(cells[0], "1");
        assert_eq!(cells[2], "uploaded");
        assert_eq!(cells[3], "file-1");
        assert_eq!(&cells[4..], &["-", "-", "-", "-"]);
    }
}
