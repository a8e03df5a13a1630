//! Request counters reported by the provider for a running batch.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Completed/failed/total request counts for one remote job.
///
/// Persisted in the `progress` column as `Completed: N;Failed: N;Total: N`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestCounts {
    pub completed: u64,
    pub failed: u64,
    pub total: u64,
}

impl RequestCounts {
    pub fn new(completed: u64, failed: u64, total: u64) -> Self {
        Self {
            completed,
            failed,
            total,
        }
    }

    /// Requests the provider has not finished yet.
    pub fn pending(&self) -> u64 {
        self.total.saturating_sub(self.completed + self.failed)
    }
}

impl core::fmt::Display for RequestCounts {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "Completed: {};Failed: {};Total: {}",
            self.completed, self.failed, self.total
        )
    }
}

impl FromStr for RequestCounts {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut counts = RequestCounts::default();
        let mut seen = 0;

        for part in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (label, value) = part
                .split_once(':')
                .ok_or_else(|| DomainError::validation(format!("malformed progress segment '{part}'")))?;
            let value: u64 = value
                .trim()
                .parse()
                .map_err(|e| DomainError::validation(format!("progress count '{part}': {e}")))?;
            match label.trim() {
                "Completed" => counts.completed = value,
                "Failed" => counts.failed = value,
                "Total" => counts.total = value,
                other => {
                    return Err(DomainError::validation(format!(
                        "unknown progress label '{other}'"
                    )));
                }
            }
            seen += 1;
        }

        if seen == 0 {
            return Err(DomainError::validation("empty progress string"));
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_progress_column() {
        let counts = RequestCounts::new(40, 2, 100);
        assert_eq!(counts.to_string(), "Completed: 40;Failed: 2;Total: 100");
        assert_eq!(counts.pending(), 58);
    }

    #[test]
    fn parses_progress_column() {
        let counts: RequestCounts = "Completed: 3;Failed: 1;Total: 9".parse().unwrap();
        assert_eq!(counts, RequestCounts::new(3, 1, 9));
    }

    #[test]
    fn rejects_garbage() {
        assert!("".parse::<RequestCounts>().is_err());
        assert!("Completed=3".parse::<RequestCounts>().is_err());
        assert!("Done: 3".parse::<RequestCounts>().is_err());
        assert!("Completed: x".parse::<RequestCounts>().is_err());
    }
}
