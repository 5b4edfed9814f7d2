use std::fmt;

use async_trait::async_trait;
use chrono::NaiveDate;
use match_common::record::MatchRecord;

use crate::error::ServiceError;

pub mod google_ads;

/// Resource name of a remote upload job. One per run, never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(resource_name: impl Into<String>) -> Self {
        JobHandle(resource_name.into())
    }

    pub fn resource_name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Some operations in an accepted batch were rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialFailure {
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddOperationsResponse {
    pub partial_failure: Option<PartialFailure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
    Unknown,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let status = match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Success => "SUCCESS",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
            JobStatus::Unknown => "UNKNOWN",
        };
        write!(f, "{}", status)
    }
}

/// Remote service accepting hashed customer identifiers through an asynchronous job.
#[async_trait]
pub trait MatchingService: Send + Sync {
    async fn create_job(&self, user_list_id: &str) -> Result<JobHandle, ServiceError>;

    async fn add_operations(
        &self,
        job: &JobHandle,
        batch: &[MatchRecord],
        partial_failure_enabled: bool,
    ) -> Result<AddOperationsResponse, ServiceError>;

    async fn run_job(&self, job: &JobHandle) -> Result<(), ServiceError>;

    async fn get_job_status(&self, job: &JobHandle) -> Result<JobStatus, ServiceError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserListSummary {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub size_for_display: Option<u64>,
    pub size_for_search: Option<u64>,
    pub membership_life_span: Option<u64>,
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUserList {
    pub name: String,
    pub description: String,
    pub membership_life_span_days: u32,
}

pub const BRAND_LIST_LIFE_SPAN_DAYS: u32 = 540;

impl NewUserList {
    /// A contact info list named `<Brand> Brand Customers - <date>`.
    pub fn for_brand(brand: &str, description: Option<String>, date: NaiveDate) -> Self {
        let brand = brand.trim();
        Self {
            name: format!(
                "{} Brand Customers - {}",
                title_case(brand),
                date.format("%Y-%m-%d")
            ),
            description: description
                .unwrap_or_else(|| format!("Customer list for {} brand", brand)),
            membership_life_span_days: BRAND_LIST_LIFE_SPAN_DAYS,
        }
    }
}

fn title_case(value: &str) -> String {
    let mut previous_is_letter = false;
    value
        .chars()
        .flat_map(|c| {
            let cased: Vec<char> = if previous_is_letter {
                c.to_lowercase().collect()
            } else {
                c.to_uppercase().collect()
            };
            previous_is_letter = c.is_alphabetic();
            cased
        })
        .collect()
}

/// Administration of customer match user lists.
#[async_trait]
pub trait UserListService: Send + Sync {
    async fn list_user_lists(&self) -> Result<Vec<UserListSummary>, ServiceError>;

    /// Returns the id of the created list.
    async fn create_user_list(&self, list: &NewUserList) -> Result<String, ServiceError>;
}
