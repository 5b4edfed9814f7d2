use std::fmt;

use async_trait::async_trait;
use clap::ValueEnum;
use match_common::record::RawCustomerRow;

use crate::error::{RowDecodeError, SourceError};

pub mod file;
pub mod postgres;

/// A row, or the reason that one row could not be read. Row errors never stop a source.
pub type SourceRow = Result<RawCustomerRow, RowDecodeError>;

/// Which customers a source should produce.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum UploadMode {
    /// Only customers added or changed since the last upload.
    #[default]
    Delta,
    /// Every customer, replacing the list contents.
    Full,
}

impl UploadMode {
    pub fn is_full(&self) -> bool {
        matches!(self, UploadMode::Full)
    }

    pub fn description(&self) -> &'static str {
        match self {
            UploadMode::Delta => "Daily Customer Match upload",
            UploadMode::Full => "Initial full Customer Match upload",
        }
    }
}

impl fmt::Display for UploadMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            UploadMode::Delta => write!(f, "delta"),
            UploadMode::Full => write!(f, "full"),
        }
    }
}

/// A paged producer of raw customer rows. Mode and brand filter are fixed at construction.
#[async_trait]
pub trait CustomerSource: Send {
    /// The next page of rows, or `None` once the source is exhausted.
    async fn next_page(&mut self) -> Result<Option<Vec<SourceRow>>, SourceError>;
}

/// Serves pre-built pages. Used by tests and for replaying rows already in memory.
pub struct InMemorySource {
    pages: std::collections::VecDeque<Vec<SourceRow>>,
}

impl InMemorySource {
    pub fn new(rows: Vec<SourceRow>, page_size: usize) -> Self {
        let page_size = page_size.max(1);
        let mut pages = std::collections::VecDeque::new();
        let mut rows = rows.into_iter().peekable();

        while rows.peek().is_some() {
            pages.push_back(rows.by_ref().take(page_size).collect());
        }

        Self { pages }
    }
}

#[async_trait]
impl CustomerSource for InMemorySource {
    async fn next_page(&mut self) -> Result<Option<Vec<SourceRow>>, SourceError> {
        Ok(self.pages.pop_front())
    }
}
