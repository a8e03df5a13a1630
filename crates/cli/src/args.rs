use std::path::PathBuf;

use clap::{Parser, Subcommand};

use batchline_infra::MalformedPolicy;
use batchline_observability::{LogFormat, ObservabilityConfig};

/// batchline - submit and track shards on a remote batch inference API
#[derive(Parser, Debug)]
#[command(name = "batchline")]
#[command(version)]
#[command(about = "Submit, track and fetch batch inference jobs", long_about = None)]
pub struct Cli {
    /// TOML configuration file (overrides BATCHLINE_CONFIG_PATH)
    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Status database file
    #[arg(long = "db", global = true)]
    pub db: Option<PathBuf>,

    /// Directory for fetched output files
    #[arg(long = "output-dir", global = true)]
    pub output_dir: Option<PathBuf>,

    /// What to do with malformed output lines (skip or abort)
    #[arg(long = "malformed", global = true)]
    pub malformed: Option<MalformedPolicy>,

    /// Console log format (json or pretty)
    #[arg(long = "log-format", global = true, default_value = "pretty")]
    pub log_format: LogFormat,

    /// Also append JSON logs to this file
    #[arg(long = "log-file", global = true)]
    pub log_file: Option<PathBuf>,

    /// Jobs driven at the same time when a directory is given
    #[arg(long = "concurrency", global = true, default_value_t = 4)]
    pub concurrency: usize,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Upload a shard (or every shard in a directory) and create its batch
    Submit {
        /// Shard file or directory of *.jsonl shards
        target: PathBuf,

        /// Job id for a single shard (defaults to the file stem)
        #[arg(long = "job-id")]
        job_id: Option<String>,
    },

    /// Poll jobs and fetch their output once completed
    Track {
        /// Job id, or a directory of shards whose stems are job ids
        target: String,

        /// Keep polling until every job is terminal
        #[arg(long = "wait")]
        wait: bool,

        /// Seconds between polls with --wait
        #[arg(long = "interval")]
        interval: Option<u64>,

        /// Give up waiting after this many seconds
        #[arg(long = "timeout")]
        timeout: Option<u64>,
    },

    /// Download and normalize a completed job's output
    Fetch { job_id: String },

    /// Request cancellation of a job
    Cancel { job_id: String },

    /// Show every recorded status row for a job, newest first
    History {
        job_id: String,

        /// Print rows as JSON
        #[arg(long = "json")]
        json: bool,
    },

    /// Drop and recreate the status database
    Reset {
        /// Confirm the reset
        #[arg(long = "yes")]
        yes: bool,
    },
}

impl Cli {
    pub fn observability(&self) -> ObservabilityConfig {
        ObservabilityConfig {
            format: self.log_format,
            default_filter: None,
            log_file: self.log_file.clone(),
        }
    }
}
