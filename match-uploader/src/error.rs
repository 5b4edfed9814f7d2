use match_common::normalize::UnknownRegion;
use thiserror::Error;

/// Enumeration of errors returned by the remote matching service.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("the job was modified concurrently and the request can be retried: {0}")]
    ConcurrentModification(String),
    #[error("the matching service rejected the request with status {status}: {message}")]
    Api { status: u16, message: String },
    #[error("failed to reach the matching service")]
    Transport(#[from] reqwest::Error),
    #[error("failed to authenticate with the matching service: {0}")]
    Auth(String),
    #[error("unexpected response from the matching service: {0}")]
    UnexpectedResponse(String),
}

impl ServiceError {
    /// Only concurrent modification of the job is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, ServiceError::ConcurrentModification(_))
    }
}

/// Enumeration of errors that stop a data source from producing more rows.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("a database error occurred while fetching customers")]
    Database(#[from] sqlx::Error),
    #[error("failed to read customer file")]
    Csv(#[from] csv::Error),
    #[error("failed to open customer file")]
    Io(#[from] std::io::Error),
}

/// A single row the source could not decode. The run continues without it.
#[derive(Error, Debug, PartialEq, Eq)]
#[error("row {row} could not be decoded: {message}")]
pub struct RowDecodeError {
    pub row: u64,
    pub message: String,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid default region")]
    Region(#[from] UnknownRegion),
    #[error("failed to read brands file {path}")]
    BrandsFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse brands file")]
    BrandsYaml(#[from] serde_yaml::Error),
    #[error("no user list is configured for brand {0} and DEFAULT_USER_LIST_ID is not set")]
    NoUserList(String),
}

/// Enumeration of errors that abort an upload run.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("invalid configuration")]
    Config(#[from] ConfigError),
    #[error("failed to fetch customers")]
    Source(#[from] SourceError),
    #[error("failed to create upload job")]
    CreateJob(#[source] ServiceError),
    #[error("failed to run upload job {job}")]
    RunJob {
        job: String,
        #[source]
        source: ServiceError,
    },
}
