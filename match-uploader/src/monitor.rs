use std::time;

use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::error::ServiceError;
use crate::service::{JobHandle, JobStatus, MatchingService};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    Succeeded,
    Failed(JobStatus),
    /// The job was still pending or running when we stopped looking.
    TimedOut { elapsed: time::Duration },
}

impl MonitorOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, MonitorOutcome::Succeeded)
    }
}

/// Polls a job until it reaches a terminal status or `timeout` passes.
pub struct JobMonitor<'a, S: ?Sized> {
    service: &'a S,
    poll_interval: time::Duration,
    timeout: time::Duration,
}

impl<'a, S> JobMonitor<'a, S>
where
    S: MatchingService + ?Sized,
{
    pub fn new(service: &'a S, poll_interval: time::Duration, timeout: time::Duration) -> Self {
        Self {
            service,
            poll_interval,
            timeout,
        }
    }

    pub async fn wait(&self, job: &JobHandle) -> Result<MonitorOutcome, ServiceError> {
        info!(job = %job, timeout = ?self.timeout, "waiting for job to complete");
        let start = Instant::now();

        loop {
            let elapsed = start.elapsed();
            if elapsed >= self.timeout {
                warn!(job = %job, ?elapsed, "timed out waiting for job");
                return Ok(MonitorOutcome::TimedOut { elapsed });
            }

            let status = self.service.get_job_status(job).await?;
            info!(job = %job, %status, "job status");

            match status {
                JobStatus::Success => return Ok(MonitorOutcome::Succeeded),
                JobStatus::Failed | JobStatus::Cancelled => {
                    error!(job = %job, %status, "job did not complete");
                    return Ok(MonitorOutcome::Failed(status));
                }
                JobStatus::Pending | JobStatus::Running | JobStatus::Unknown => {}
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
