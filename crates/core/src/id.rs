//! Strongly-typed identifiers used across the domain.
//!
//! `JobId` is chosen by the caller (one per logical unit of work). `FileId` and
//! `BatchId` are opaque handles minted by the remote provider.

use core::str::FromStr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Caller-supplied identifier of one logical batch job.
///
/// Also used to name output files, so it must be a single path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

/// Remote file handle (uploaded shard, or a job's output file).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileId(String);

/// Remote batch job handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BatchId(String);

macro_rules! impl_handle_newtype {
    ($t:ty, $name:literal, $validate:expr) => {
        impl $t {
            /// Parse and validate an identifier.
            pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
                let value = value.into();
                let check: fn(&str) -> Result<(), String> = $validate;
                check(&value).map_err(|reason| {
                    DomainError::invalid_id(format!("{} '{}': {}", $name, value, reason))
                })?;
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $t {
            type Error = DomainError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(value)
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.0
            }
        }
    };
}

fn non_empty(value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err("must not be empty".to_string());
    }
    Ok(())
}

fn single_path_segment(value: &str) -> Result<(), String> {
    non_empty(value)?;
    if value != value.trim() {
        return Err("must not have surrounding whitespace".to_string());
    }
    if value == "." || value == ".." {
        return Err("must not be a relative path component".to_string());
    }
    if value.chars().any(|c| c == '/' || c == '\\' || c.is_control()) {
        return Err("must not contain path separators or control characters".to_string());
    }
    Ok(())
}

impl_handle_newtype!(JobId, "JobId", single_path_segment);
impl_handle_newtype!(FileId, "FileId", non_empty);
impl_handle_newtype!(BatchId, "BatchId", non_empty);

impl JobId {
    /// Derive a job id from a shard file name (`shards/job_3.jsonl` -> `job_3`).
    pub fn from_shard_path(path: &Path) -> Result<Self, DomainError> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| {
                DomainError::invalid_id(format!("no usable file stem in {}", path.display()))
            })?;
        Self::parse(stem)
    }
}
