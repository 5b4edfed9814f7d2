#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use match_common::identifier::IdentifierBuilder;
use match_common::record::{MatchRecord, RawCustomerRow};
use match_common::retry::RetryPolicy;
use match_uploader::error::{ServiceError, SourceError};
use match_uploader::service::{
    AddOperationsResponse, JobHandle, JobStatus, MatchingService, PartialFailure,
};
use match_uploader::source::{CustomerSource, InMemorySource, SourceRow};
use match_uploader::tracking::{RunRecorder, UploadRunRecord};

pub const JOB: &str = "customers/1234567890/offlineUserDataJobs/42";

/// Scripted response to a single `add_operations` call.
#[derive(Debug, Clone)]
pub enum Reply {
    Accept,
    Partial(&'static str),
    Conflict,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateJob(String),
    AddOperations { size: usize, first: Option<String> },
    RunJob,
    GetJobStatus,
}

/// In-memory `MatchingService`. `add_operations` replies are consumed in call order and default
/// to `Accept` once the script runs out.
#[derive(Default)]
pub struct FakeService {
    pub fail_create: bool,
    pub fail_run: bool,
    pub fail_status: bool,
    pub(crate) replies: Mutex<VecDeque<Reply>>,
    pub(crate) statuses: Mutex<VecDeque<JobStatus>>,
    pub(crate) calls: Mutex<Vec<Call>>,
}

impl FakeService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replies(self, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.replies.lock().unwrap().extend(replies);
        self
    }

    /// Statuses returned by successive polls. `Pending` once exhausted.
    pub fn with_statuses(self, statuses: impl IntoIterator<Item = JobStatus>) -> Self {
        self.statuses.lock().unwrap().extend(statuses);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn add_operation_sizes(&self) -> Vec<usize> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::AddOperations { size, .. } => Some(size),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, wanted: fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|call| wanted(call)).count()
    }

    fn push(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl MatchingService for FakeService {
    async fn create_job(&self, user_list_id: &str) -> Result<JobHandle, ServiceError> {
        self.push(Call::CreateJob(user_list_id.to_owned()));
        if self.fail_create {
            return Err(ServiceError::Api {
                status: 403,
                message: "user list is not accessible".to_owned(),
            });
        }
        Ok(JobHandle::new(JOB))
    }

    async fn add_operations(
        &self,
        _job: &JobHandle,
        batch: &[MatchRecord],
        _partial_failure_enabled: bool,
    ) -> Result<AddOperationsResponse, ServiceError> {
        self.push(Call::AddOperations {
            size: batch.len(),
            first: batch
                .first()
                .and_then(|record| record.customer_number())
                .map(str::to_owned),
        });

        let reply = self.replies.lock().unwrap().pop_front().unwrap_or(Reply::Accept);
        match reply {
            Reply::Accept => Ok(AddOperationsResponse::default()),
            Reply::Partial(message) => Ok(AddOperationsResponse {
                partial_failure: Some(PartialFailure {
                    code: 3,
                    message: message.to_owned(),
                }),
            }),
            Reply::Conflict => Err(ServiceError::ConcurrentModification(
                "Multiple requests were attempting to modify the same resource at once."
                    .to_owned(),
            )),
            Reply::Reject => Err(ServiceError::Api {
                status: 400,
                message: "Request contains an invalid argument.".to_owned(),
            }),
        }
    }

    async fn run_job(&self, _job: &JobHandle) -> Result<(), ServiceError> {
        self.push(Call::RunJob);
        if self.fail_run {
            return Err(ServiceError::Api {
                status: 500,
                message: "Internal error encountered.".to_owned(),
            });
        }
        Ok(())
    }

    async fn get_job_status(&self, _job: &JobHandle) -> Result<JobStatus, ServiceError> {
        self.push(Call::GetJobStatus);
        if self.fail_status {
            return Err(ServiceError::UnexpectedResponse("job not found".to_owned()));
        }
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(JobStatus::Pending))
    }
}

/// Wraps a source and notes the wall clock time of the first fetch.
pub struct StampedSource {
    inner: InMemorySource,
    pub first_fetch: Option<DateTime<Utc>>,
}

impl StampedSource {
    pub fn new(inner: InMemorySource) -> Self {
        Self {
            inner,
            first_fetch: None,
        }
    }
}

#[async_trait]
impl CustomerSource for StampedSource {
    async fn next_page(&mut self) -> Result<Option<Vec<SourceRow>>, SourceError> {
        self.first_fetch.get_or_insert_with(Utc::now);
        self.inner.next_page().await
    }
}

#[derive(Default)]
pub struct RecordingRecorder {
    runs: Mutex<Vec<UploadRunRecord>>,
}

impl RecordingRecorder {
    pub fn runs(&self) -> Vec<UploadRunRecord> {
        self.runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl RunRecorder for RecordingRecorder {
    async fn record(&self, run: &UploadRunRecord) -> Result<(), anyhow::Error> {
        self.runs.lock().unwrap().push(run.clone());
        Ok(())
    }
}

/// Backoff of 1s, 2s, 4s... without jitter so paused-clock tests can assert exact timings.
pub fn retry_policy() -> RetryPolicy {
    RetryPolicy::build(2, time::Duration::from_secs(1))
        .max_attempts(3)
        .jitter(time::Duration::ZERO)
        .provide()
}

pub fn customer(n: usize) -> RawCustomerRow {
    RawCustomerRow {
        customer_number: Some(format!("C{n}")),
        email: Some(format!("customer{n}@example.com")),
        ..Default::default()
    }
}

pub fn records(count: usize) -> Vec<MatchRecord> {
    let builder = IdentifierBuilder::default();
    (0..count)
        .map(|n| builder.build(customer(n)).expect("customer has an email"))
        .collect()
}
