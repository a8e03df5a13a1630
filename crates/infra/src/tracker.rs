//! Caller-side wait loop: poll a job until it reaches a terminal status.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::{LifecycleError, LifecycleResult};
use crate::lifecycle::{BatchJobManager, PollReport};

/// Poll interval and overall deadline for [`wait_for_terminal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(86_400),
        }
    }
}

impl PollSchedule {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// Poll `manager` every `schedule.interval` until a terminal status is seen.
///
/// Retryable provider errors are logged and the loop continues; anything else
/// is returned. Past the deadline this fails with a timeout carrying the last
/// observed status.
pub async fn wait_for_terminal(
    manager: &mut BatchJobManager,
    schedule: PollSchedule,
) -> LifecycleResult<PollReport> {
    let started = Instant::now();

    loop {
        match manager.poll_status().await {
            Ok(report) if report.is_terminal() => {
                info!(job_id = %manager.job_id(), status = %report.status, "job reached terminal status");
                return Ok(report);
            }
            Ok(report) => {
                info!(
                    job_id = %manager.job_id(),
                    status = %report.status,
                    elapsed_secs = started.elapsed().as_secs(),
                    "job still running"
                );
            }
            Err(e) if e.is_retryable() => {
                warn!(job_id = %manager.job_id(), error = %e, "poll failed, will retry");
            }
            Err(e) => return Err(e),
        }

        let elapsed = started.elapsed();
        if elapsed + schedule.interval > schedule.timeout {
            return Err(LifecycleError::Timeout {
                job_id: manager.job_id().clone(),
                elapsed,
                last_status: manager
                    .state()
                    .status
                    .clone()
                    .unwrap_or(batchline_core::BatchStatus::Uploaded),
            });
        }
        tokio::time::sleep(schedule.interval).await;
    }
}
