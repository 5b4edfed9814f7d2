use match_common::identifier::IdentifierBuilder;
use match_common::record::MatchRecord;
use tracing::{debug, info, warn};

use crate::counters::RunCounters;
use crate::error::SourceError;
use crate::source::{CustomerSource, SourceRow};

/// Turns a paged source into the ordered list of records to upload.
pub struct RecordProcessor {
    builder: IdentifierBuilder,
    brand_filter: Option<String>,
}

impl RecordProcessor {
    pub fn new(builder: IdentifierBuilder, brand_filter: Option<String>) -> Self {
        Self {
            builder,
            brand_filter: brand_filter.map(|brand| brand.trim().to_lowercase()),
        }
    }

    /// Drain `source`. Only a source level error stops the loop, bad rows are counted and skipped.
    pub async fn process<S>(
        &self,
        source: &mut S,
        counters: &mut RunCounters,
    ) -> Result<Vec<MatchRecord>, SourceError>
    where
        S: CustomerSource + ?Sized,
    {
        let mut records = Vec::new();

        while let Some(page) = source.next_page().await? {
            for row in page {
                if let Some(record) = self.process_row(row, counters) {
                    records.push(record);
                }
            }
            debug!(
                rows_seen = counters.rows_seen,
                records = records.len(),
                "processed page"
            );
        }

        info!(
            rows_seen = counters.rows_seen,
            records = records.len(),
            "finished processing customers"
        );

        Ok(records)
    }

    pub fn process_row(&self, row: SourceRow, counters: &mut RunCounters) -> Option<MatchRecord> {
        counters.row_seen();
        let row_number = counters.rows_seen;

        let row = match row {
            Ok(row) => row,
            Err(error) => {
                warn!(row = error.row, %error, "skipping undecodable row");
                counters.row_failed();
                return None;
            }
        };

        if let (Some(filter), Some(label)) = (&self.brand_filter, row.brand_label()) {
            if *filter != label {
                debug!(row = row_number, "skipping row for another brand");
                counters.row_filtered();
                return None;
            }
        }

        match self.builder.build(row) {
            Some(record) => {
                counters.record_identifiers(&record);
                Some(record)
            }
            None => {
                debug!(row = row_number, "skipping row without usable identifiers");
                counters.row_without_identifiers();
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use match_common::identifier::IdentifierKind;
    use match_common::record::RawCustomerRow;

    use super::*;
    use crate::error::RowDecodeError;
    use crate::source::InMemorySource;

    fn row(customer_number: &str, email: &str, brand: Option<&str>) -> SourceRow {
        Ok(RawCustomerRow {
            customer_number: Some(customer_number.to_owned()),
            email: Some(email.to_owned()),
            brand: brand.map(str::to_owned),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_rows_are_processed_in_order_across_pages() {
        let rows = (0..25)
            .map(|n| row(&format!("C{n}"), &format!("customer{n}@example.com"), None))
            .collect();
        let mut source = InMemorySource::new(rows, 10);
        let mut counters = RunCounters::default();

        let records = RecordProcessor::new(IdentifierBuilder::default(), None)
            .process(&mut source, &mut counters)
            .await
            .unwrap();

        assert_eq!(records.len(), 25);
        let numbers: Vec<&str> = records
            .iter()
            .filter_map(|record| record.customer_number())
            .collect();
        let expected: Vec<String> = (0..25).map(|n| format!("C{n}")).collect();
        assert_eq!(numbers, expected);
        assert_eq!(counters.rows_seen, 25);
        assert_eq!(counters.email_identifiers, 25);
    }

    #[tokio::test]
    async fn test_row_without_identifiers_only_bumps_rows_seen() {
        let rows = vec![Ok(RawCustomerRow {
            customer_number: Some("C2".to_owned()),
            email: Some("".to_owned()),
            phone: Some("123".to_owned()),
            ..Default::default()
        })];
        let mut source = InMemorySource::new(rows, 10);
        let mut counters = RunCounters::default();

        let records = RecordProcessor::new(IdentifierBuilder::default(), None)
            .process(&mut source, &mut counters)
            .await
            .unwrap();

        assert!(records.is_empty());
        assert_eq!(
            counters,
            RunCounters {
                rows_seen: 1,
                rows_without_identifiers: 1,
                ..Default::default()
            }
        );
    }

    #[tokio::test]
    async fn test_brand_filter_drops_other_brands_only() {
        let rows = vec![
            row("C1", "one@example.com", Some("Acme")),
            row("C2", "two@example.com", Some("globex")),
            row("C3", "three@example.com", None),
        ];
        let mut source = InMemorySource::new(rows, 10);
        let mut counters = RunCounters::default();

        let records = RecordProcessor::new(IdentifierBuilder::default(), Some("ACME".to_owned()))
            .process(&mut source, &mut counters)
            .await
            .unwrap();

        let numbers: Vec<&str> = records
            .iter()
            .filter_map(|record| record.customer_number())
            .collect();
        assert_eq!(numbers, vec!["C1", "C3"]);
        assert_eq!(counters.rows_filtered, 1);
        assert_eq!(counters.rows_seen, 3);
    }

    #[tokio::test]
    async fn test_undecodable_rows_do_not_stop_the_loop() {
        let rows = vec![
            row("C1", "one@example.com", None),
            Err(RowDecodeError {
                row: 2,
                message: "invalid utf-8".to_owned(),
            }),
            row("C3", "three@example.com", None),
        ];
        let mut source = InMemorySource::new(rows, 2);
        let mut counters = RunCounters::default();

        let records = RecordProcessor::new(IdentifierBuilder::default(), None)
            .process(&mut source, &mut counters)
            .await
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(counters.rows_failed, 1);
        assert_eq!(counters.rows_seen, 3);
        assert!(records.iter().all(|record| record.has(IdentifierKind::Email)));
    }
}
