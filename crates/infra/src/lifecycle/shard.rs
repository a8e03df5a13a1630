use std::path::{Path, PathBuf};

use batchline_core::JobId;

use crate::error::{LifecycleError, LifecycleResult};

/// A request shard on disk and the job it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    pub job_id: JobId,
    pub path: PathBuf,
}

impl Shard {
    pub fn from_path(path: impl Into<PathBuf>) -> LifecycleResult<Self> {
        let path = path.into();
        let job_id = JobId::from_shard_path(&path)?;
        Ok(Self { job_id, path })
    }
}

/// List the `*.jsonl` shards in `dir`, sorted by file name. Each job id is
/// the file stem (`job_3.jsonl` -> `job_3`).
pub async fn discover_shards(dir: &Path) -> LifecycleResult<Vec<Shard>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| LifecycleError::Configuration(format!("cannot read {}: {e}", dir.display())))?;

    let mut shards = Vec::new();
    loop {
        let entry = entries
            .next_entry()
            .await
            .map_err(|e| LifecycleError::Configuration(format!("cannot read {}: {e}", dir.display())))?;
        let Some(entry) = entry else { break };

        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
            continue;
        }
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        if !is_file {
            continue;
        }

        match Shard::from_path(&path) {
            Ok(shard) => shards.push(shard),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping shard"),
        }
    }

    shards.sort_by(|a, b| a.path.file_name().cmp(&b.path.file_name()));
    Ok(shards)
}
