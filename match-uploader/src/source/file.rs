use std::fs::File;
use std::io;
use std::path::Path;

use async_trait::async_trait;
use csv::{DeserializeRecordsIntoIter, ReaderBuilder, Trim};
use match_common::record::RawCustomerRow;
use tracing::info;

use super::{CustomerSource, SourceRow};
use crate::error::{RowDecodeError, SourceError};

/// Reads customers from a CSV export with a header row.
///
/// Mode does not apply to a file: it already holds exactly the customers to upload.
pub struct CsvSource<R> {
    rows: DeserializeRecordsIntoIter<R, RawCustomerRow>,
    page_size: usize,
    next_row: u64,
}

impl CsvSource<File> {
    pub fn open(path: impl AsRef<Path>, page_size: usize) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        info!(path = %path.display(), "reading customers from file");
        Ok(Self::from_reader(file, page_size))
    }
}

impl<R: io::Read> CsvSource<R> {
    pub fn from_reader(reader: R, page_size: usize) -> Self {
        let rows = ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .from_reader(reader)
            .into_deserialize();

        Self {
            rows,
            page_size: page_size.max(1),
            next_row: 1,
        }
    }
}

#[async_trait]
impl<R: io::Read + Send> CustomerSource for CsvSource<R> {
    async fn next_page(&mut self) -> Result<Option<Vec<SourceRow>>, SourceError> {
        let mut page = Vec::with_capacity(self.page_size);

        for result in self.rows.by_ref().take(self.page_size) {
            let row = self.next_row;
            self.next_row += 1;

            match result {
                Ok(customer) => page.push(Ok(customer)),
                Err(error) if error.is_io_error() => return Err(error.into()),
                Err(error) => page.push(Err(RowDecodeError {
                    row,
                    message: error.to_string(),
                })),
            }
        }

        if page.is_empty() {
            Ok(None)
        } else {
            Ok(Some(page))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const CUSTOMERS: &str = "\
cust_no,first_name,last_name,contact_guid,email,phone,zip,state,brand
C1, Jane ,Doe,guid-1,JANE.DOE@Example.com,(650) 253-0000,98101-1,WA,
C2,John,Roe,guid-2,,123,,,Acme
C3,Ann,Lee,guid-3,ann@example.com
";

    async fn drain<R: io::Read + Send>(source: &mut CsvSource<R>) -> Vec<Vec<SourceRow>> {
        let mut pages = vec![];
        while let Some(page) = source.next_page().await.unwrap() {
            pages.push(page);
        }
        pages
    }

    #[tokio::test]
    async fn test_reads_rows_with_aliased_headers() {
        let mut source = CsvSource::from_reader(CUSTOMERS.as_bytes(), 10);
        let pages = drain(&mut source).await;

        assert_eq!(pages.len(), 1);
        let rows: Vec<RawCustomerRow> = pages
            .into_iter()
            .flatten()
            .map(|row| row.expect("decodable row"))
            .collect();

        assert_eq!(rows.len(), 3);
        assert_eq!(
            rows[0],
            RawCustomerRow {
                customer_number: Some("C1".to_owned()),
                first_name: Some("Jane".to_owned()),
                last_name: Some("Doe".to_owned()),
                external_id: Some("guid-1".to_owned()),
                email: Some("JANE.DOE@Example.com".to_owned()),
                phone: Some("(650) 253-0000".to_owned()),
                postal_code: Some("98101-1".to_owned()),
                region_code: Some("WA".to_owned()),
                brand: None,
            }
        );
        assert_eq!(rows[1].email, None);
        assert_eq!(rows[1].brand.as_deref(), Some("Acme"));
        assert_eq!(rows[2].email.as_deref(), Some("ann@example.com"));
        assert_eq!(rows[2].phone, None);
    }

    #[tokio::test]
    async fn test_pages_respect_page_size() {
        let mut source = CsvSource::from_reader(CUSTOMERS.as_bytes(), 2);
        let sizes: Vec<usize> = drain(&mut source).await.iter().map(Vec::len).collect();

        assert_eq!(sizes, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_a_row_error() {
        let mut data = b"cust_no,email\nC1,a@example.com\nC2,".to_vec();
        data.extend_from_slice(&[0xff, 0xfe]);
        data.extend_from_slice(b"\nC3,c@example.com\n");

        let mut source = CsvSource::from_reader(data.as_slice(), 10);
        let rows: Vec<SourceRow> = drain(&mut source).await.into_iter().flatten().collect();

        assert_eq!(rows.len(), 3);
        assert!(rows[0].is_ok());
        assert_eq!(rows[1].as_ref().unwrap_err().row, 2);
        assert!(rows[2].is_ok());
    }

    #[tokio::test]
    async fn test_open_reads_from_disk() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("customers.csv");
        fs::write(&path, CUSTOMERS).unwrap();

        let mut source = CsvSource::open(&path, 10).unwrap();
        let rows: usize = drain(&mut source).await.iter().map(Vec::len).sum();

        assert_eq!(rows, 3);
    }

    #[test]
    fn test_missing_file_is_an_io_error() {
        let result = CsvSource::open("/nonexistent/customers.csv", 10);
        assert!(matches!(result, Err(SourceError::Io(_))));
    }
}
