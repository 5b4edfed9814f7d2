//! # Uploader
//!
//! Drives one remote job through `Idle -> JobCreated -> UploadingBatches -> Running` and into
//! `Completed` or `Failed`. Batches are submitted strictly one after the other.
use std::time;

use match_common::metrics::BATCH_DURATION;
use match_common::record::MatchRecord;
use match_common::retry::{GaveUp, Retried, RetryPolicy};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::counters::RunCounters;
use crate::error::{RunError, ServiceError};
use crate::service::{JobHandle, MatchingService};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadSettings {
    pub batch_size: usize,
    /// Pause before every batch but the first.
    pub rate_limit_delay: time::Duration,
    pub partial_failure_enabled: bool,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            batch_size: 2500,
            rate_limit_delay: time::Duration::from_millis(500),
            partial_failure_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Idle,
    JobCreated,
    UploadingBatches,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchStatus {
    Succeeded,
    /// Accepted, but the service rejected some operations in it.
    PartiallyFailed { message: String },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    /// 1-based position of the batch in the upload.
    pub index: usize,
    pub size: usize,
    pub attempts: u32,
    pub status: BatchStatus,
}

impl BatchOutcome {
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }

    pub fn is_accepted(&self) -> bool {
        !matches!(self.status, BatchStatus::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    /// `None` when there was nothing to upload and no job was created.
    pub job: Option<JobHandle>,
    pub batches: Vec<BatchOutcome>,
    pub state: UploadState,
}

impl UploadReport {
    pub fn is_success(&self) -> bool {
        self.state == UploadState::Completed
    }

    pub fn batches_succeeded(&self) -> usize {
        self.batches.iter().filter(|batch| batch.is_accepted()).count()
    }
}

/// Split records into consecutive batches of at most `batch_size`, preserving order.
pub fn partition(records: &[MatchRecord], batch_size: usize) -> std::slice::Chunks<'_, MatchRecord> {
    records.chunks(batch_size.max(1))
}

pub struct BatchUploader<'a, S: ?Sized> {
    service: &'a S,
    retry_policy: RetryPolicy,
    settings: UploadSettings,
}

impl<'a, S> BatchUploader<'a, S>
where
    S: MatchingService + ?Sized,
{
    pub fn new(service: &'a S, retry_policy: RetryPolicy, settings: UploadSettings) -> Self {
        Self {
            service,
            retry_policy,
            settings,
        }
    }

    /// Upload `records` to `user_list_id` through a single job.
    ///
    /// Batch failures are recorded in the report and in `counters`. Only failing to create or
    /// to run the job is an error, in which case `counters` still reflects every batch attempted.
    pub async fn upload(
        &self,
        user_list_id: &str,
        records: &[MatchRecord],
        counters: &mut RunCounters,
    ) -> Result<UploadReport, RunError> {
        let mut state = UploadState::Idle;

        if records.is_empty() {
            info!("no records to upload, not creating a job");
            return Ok(UploadReport {
                job: None,
                batches: Vec::new(),
                state: UploadState::Completed,
            });
        }

        let job = self
            .service
            .create_job(user_list_id)
            .await
            .map_err(|error| {
                error!(%error, user_list_id, "failed to create upload job");
                RunError::CreateJob(error)
            })?;
        transition(&mut state, UploadState::JobCreated);
        info!(job = %job, user_list_id, records = records.len(), "created upload job");

        transition(&mut state, UploadState::UploadingBatches);
        let total = records.len().div_ceil(self.settings.batch_size.max(1));
        let mut batches = Vec::with_capacity(total);

        for (position, batch) in partition(records, self.settings.batch_size).enumerate() {
            if position > 0 && !self.settings.rate_limit_delay.is_zero() {
                tokio::time::sleep(self.settings.rate_limit_delay).await;
            }

            let index = position + 1;
            let span = info_span!("batch", index, total, size = batch.len(), job = %job);
            let outcome = self.submit(&job, index, batch).instrument(span).await;

            counters.record_batch(&outcome);
            batches.push(outcome);
        }

        let succeeded = batches.iter().filter(|batch| batch.is_accepted()).count();
        if succeeded < batches.len() {
            warn!(succeeded, total, "not every batch was accepted");
        }

        transition(&mut state, UploadState::Running);
        if let Err(error) = self.service.run_job(&job).await {
            error!(job = %job, %error, "failed to run upload job");
            transition(&mut state, UploadState::Failed);
            return Err(RunError::RunJob {
                job: job.to_string(),
                source: error,
            });
        }
        info!(job = %job, "upload job is running");

        if succeeded == 0 {
            error!(job = %job, total, "no batch was accepted");
            transition(&mut state, UploadState::Failed);
        } else {
            transition(&mut state, UploadState::Completed);
        }

        Ok(UploadReport {
            job: Some(job),
            batches,
            state,
        })
    }

    async fn submit(&self, job: &JobHandle, index: usize, batch: &[MatchRecord]) -> BatchOutcome {
        let started = time::Instant::now();
        let service = self.service;
        let partial_failure_enabled = self.settings.partial_failure_enabled;

        let result = self
            .retry_policy
            .execute(
                move |attempt| {
                    debug!(attempt, "submitting batch");
                    service.add_operations(job, batch, partial_failure_enabled)
                },
                ServiceError::is_transient,
            )
            .await;

        metrics::histogram!(BATCH_DURATION).record(started.elapsed().as_secs_f64());

        let (attempts, status) = match result {
            Ok(Retried { value, attempts }) => match value.partial_failure {
                Some(partial_failure) => {
                    warn!(
                        code = partial_failure.code,
                        message = %partial_failure.message,
                        attempts,
                        "batch accepted with partial failures"
                    );
                    (
                        attempts,
                        BatchStatus::PartiallyFailed {
                            message: partial_failure.message,
                        },
                    )
                }
                None => {
                    info!(attempts, "batch accepted");
                    (attempts, BatchStatus::Succeeded)
                }
            },
            Err(GaveUp { error, attempts }) => {
                error!(%error, attempts, "batch failed");
                (
                    attempts,
                    BatchStatus::Failed {
                        error: error.to_string(),
                    },
                )
            }
        };

        BatchOutcome {
            index,
            size: batch.len(),
            attempts,
            status,
        }
    }
}

fn transition(state: &mut UploadState, next: UploadState) {
    debug!(from = ?state, to = ?next, "upload state transition");
    *state = next;
}
