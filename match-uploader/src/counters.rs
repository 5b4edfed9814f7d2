use match_common::identifier::IdentifierKind;
use match_common::metrics::{
    BATCHES, BATCH_RETRIES, IDENTIFIERS_EMITTED, ROWS_DROPPED, ROWS_SEEN,
};
use match_common::record::MatchRecord;
use tracing::info;

use crate::uploader::{BatchOutcome, BatchStatus};

/// Per-run accumulator. Created fresh for every run and returned in its report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunCounters {
    pub rows_seen: u64,
    pub rows_filtered: u64,
    pub rows_failed: u64,
    pub rows_without_identifiers: u64,
    pub records_with_identifiers: u64,
    pub email_identifiers: u64,
    pub phone_identifiers: u64,
    pub address_identifiers: u64,
    pub batches_attempted: u64,
    pub batches_succeeded: u64,
    pub batches_failed: u64,
    pub batches_partially_failed: u64,
    pub retries: u64,
}

impl RunCounters {
    pub fn row_seen(&mut self) {
        self.rows_seen += 1;
        metrics::counter!(ROWS_SEEN).increment(1);
    }

    pub fn row_filtered(&mut self) {
        self.rows_filtered += 1;
        metrics::counter!(ROWS_DROPPED, "reason" => "filtered").increment(1);
    }

    pub fn row_failed(&mut self) {
        self.rows_failed += 1;
        metrics::counter!(ROWS_DROPPED, "reason" => "undecodable").increment(1);
    }

    pub fn row_without_identifiers(&mut self) {
        self.rows_without_identifiers += 1;
        metrics::counter!(ROWS_DROPPED, "reason" => "no_identifiers").increment(1);
    }

    /// Count a record and each identifier it actually carries.
    pub fn record_identifiers(&mut self, record: &MatchRecord) {
        self.records_with_identifiers += 1;

        for identifier in record.identifiers() {
            let kind = identifier.kind();
            match kind {
                IdentifierKind::Email => self.email_identifiers += 1,
                IdentifierKind::Phone => self.phone_identifiers += 1,
                IdentifierKind::Address => self.address_identifiers += 1,
            }
            metrics::counter!(IDENTIFIERS_EMITTED, "kind" => kind.as_str()).increment(1);
        }
    }

    pub fn record_batch(&mut self, outcome: &BatchOutcome) {
        self.batches_attempted += 1;
        self.retries += u64::from(outcome.retries());

        let status = match &outcome.status {
            BatchStatus::Succeeded => {
                self.batches_succeeded += 1;
                "succeeded"
            }
            BatchStatus::PartiallyFailed { .. } => {
                self.batches_succeeded += 1;
                self.batches_partially_failed += 1;
                "partially_failed"
            }
            BatchStatus::Failed { .. } => {
                self.batches_failed += 1;
                "failed"
            }
        };

        metrics::counter!(BATCHES, "status" => status).increment(1);
        metrics::counter!(BATCH_RETRIES).increment(u64::from(outcome.retries()));
    }

    /// Records produced by the row loop, i.e. what was handed to the uploader.
    pub fn records_uploaded(&self) -> u64 {
        self.records_with_identifiers
    }

    pub fn log_summary(&self) {
        info!(
            rows_seen = self.rows_seen,
            rows_filtered = self.rows_filtered,
            rows_failed = self.rows_failed,
            rows_without_identifiers = self.rows_without_identifiers,
            records_with_identifiers = self.records_with_identifiers,
            email_identifiers = self.email_identifiers,
            phone_identifiers = self.phone_identifiers,
            address_identifiers = self.address_identifiers,
            "row summary"
        );
        info!(
            batches_attempted = self.batches_attempted,
            batches_succeeded = self.batches_succeeded,
            batches_failed = self.batches_failed,
            batches_partially_failed = self.batches_partially_failed,
            retries = self.retries,
            "batch summary"
        );
    }
}
