//! Tracing/logging initialization.
//!
//! Console output goes to stderr (JSON or human-readable), so stdout stays
//! free for command results. An optional second layer appends JSON lines to a
//! log file. Filtering comes from `RUST_LOG`, defaulting to `info`.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::Deserialize;
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

impl core::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            other => Err(format!("unknown log format '{other}' (expected json or pretty)")),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ObservabilityConfig {
    pub format: LogFormat,
    /// Filter directives; `RUST_LOG` wins, then this, then `info`.
    pub default_filter: Option<String>,
    /// Also append JSON logs to this file.
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ObservabilityError {
    #[error("cannot open log file {}: {source}", path.display())]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Initialize tracing/logging for the process with defaults.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    let _ = init_with(ObservabilityConfig::default());
}

/// Initialize tracing/logging from `config`.
///
/// Returns `Ok(false)` when a global subscriber was already installed.
pub fn init_with(config: ObservabilityConfig) -> Result<bool, ObservabilityError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(config.default_filter.as_deref().unwrap_or("info"))
    });

    let file = match &config.log_file {
        Some(path) => Some(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| ObservabilityError::LogFile {
                    path: path.clone(),
                    source,
                })?,
        ),
        None => None,
    };

    let json_console = (config.format == LogFormat::Json).then(|| {
        fmt::layer()
            .json()
            .with_timer(fmt::time::SystemTime)
            .with_target(false)
            .with_writer(std::io::stderr)
    });
    let pretty_console = (config.format == LogFormat::Pretty).then(|| {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
    });
    let file_layer = file.map(|file| {
        fmt::layer()
            .json()
            .with_timer(fmt::time::SystemTime)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
    });

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(json_console)
        .with(pretty_console)
        .with(file_layer)
        .try_init()
        .is_ok();
    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_parses() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("text".parse::<LogFormat>(), Ok(LogFormat::Pretty));
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn unwritable_log_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = init_with(ObservabilityConfig {
            log_file: Some(dir.path().join("missing").join("app.log")),
            ..ObservabilityConfig::default()
        })
        .unwrap_err();
        assert!(err.to_string().contains("app.log"));
    }

    #[test]
    fn second_init_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("batchline.log");
        let first = init_with(ObservabilityConfig {
            format: LogFormat::Json,
            default_filter: Some("debug".to_string()),
            log_file: Some(log.clone()),
        })
        .unwrap();
        assert!(first);

        ::tracing::error!(job_id = "job_0", "hello from the test");
        let written = std::fs::read_to_string(&log).unwrap();
        assert!(written.contains("hello from the test"));

        assert!(!init_with(ObservabilityConfig::default()).unwrap());
        init();
    }
}
