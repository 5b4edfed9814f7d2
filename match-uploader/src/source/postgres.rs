use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use match_common::record::RawCustomerRow;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{CustomerSource, SourceRow, UploadMode};
use crate::error::{RowDecodeError, SourceError};

const CUSTOMERS_QUERY: &str = r#"
SELECT
    customer_number,
    first_name,
    last_name,
    external_id,
    email,
    phone,
    postal_code,
    region_code,
    brand
FROM
    customers_for_match($1, $2)
ORDER BY
    customer_number, external_id
"#;

type Page = Result<Vec<PgRow>, sqlx::Error>;

/// Streams `customers_for_match(full_upload, brand)` from a single query, one page at a time.
pub struct PostgresSource {
    pool: PgPool,
    mode: UploadMode,
    brand: Option<String>,
    page_size: usize,
    pages: Option<mpsc::Receiver<Page>>,
    next_row: u64,
}

impl PostgresSource {
    pub async fn connect(
        url: &str,
        max_connections: u32,
        mode: UploadMode,
        brand: Option<String>,
        page_size: usize,
    ) -> Result<Self, SourceError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        Ok(Self::new(pool, mode, brand, page_size))
    }

    pub fn new(pool: PgPool, mode: UploadMode, brand: Option<String>, page_size: usize) -> Self {
        Self {
            pool,
            mode,
            brand,
            page_size: page_size.max(1),
            pages: None,
            next_row: 1,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the query in a background task that hands over a page at a time. At most one page
    /// waits in the channel while the previous one is processed.
    fn start(&self) -> mpsc::Receiver<Page> {
        info!(mode = %self.mode, brand = ?self.brand, "fetching customers");

        let (sender, receiver) = mpsc::channel(1);
        let pool = self.pool.clone();
        let full_upload = self.mode.is_full();
        let brand = self.brand.clone();
        let page_size = self.page_size;

        tokio::spawn(async move {
            let rows = sqlx::query(CUSTOMERS_QUERY)
                .bind(full_upload)
                .bind(brand)
                .fetch(&pool);

            if forward_pages(rows, page_size, sender).await.is_err() {
                debug!("customer pages are no longer read, stopping the query");
            }
        });

        receiver
    }
}

/// Group `rows` into pages of `page_size` and send them in order. A stream error is sent in
/// place of the page it interrupted and ends the stream.
async fn forward_pages<T, E, S>(
    mut rows: S,
    page_size: usize,
    pages: mpsc::Sender<Result<Vec<T>, E>>,
) -> Result<(), mpsc::error::SendError<Result<Vec<T>, E>>>
where
    S: Stream<Item = Result<T, E>> + Unpin,
{
    let mut page = Vec::with_capacity(page_size);

    loop {
        match rows.try_next().await {
            Ok(Some(row)) => {
                page.push(row);
                if page.len() >= page_size {
                    let full = std::mem::replace(&mut page, Vec::with_capacity(page_size));
                    pages.send(Ok(full)).await?;
                }
            }
            Ok(None) => break,
            Err(error) => return pages.send(Err(error)).await,
        }
    }

    if !page.is_empty() {
        pages.send(Ok(page)).await?;
    }

    Ok(())
}

fn decode(row: &PgRow) -> Result<RawCustomerRow, sqlx::Error> {
    Ok(RawCustomerRow {
        customer_number: row.try_get("customer_number")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        external_id: row.try_get("external_id")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        postal_code: row.try_get("postal_code")?,
        region_code: row.try_get("region_code")?,
        brand: row.try_get("brand")?,
    })
}

#[async_trait]
impl CustomerSource for PostgresSource {
    async fn next_page(&mut self) -> Result<Option<Vec<SourceRow>>, SourceError> {
        if self.pages.is_none() {
            self.pages = Some(self.start());
        }
        let Some(pages) = self.pages.as_mut() else {
            return Ok(None);
        };

        let rows = match pages.recv().await {
            Some(page) => page?,
            None => return Ok(None),
        };

        // Row numbers are 1-based across the whole result set.
        let first_row = self.next_row;
        self.next_row += rows.len() as u64;
        debug!(first_row, rows = rows.len(), "fetched customer page");

        let page = rows
            .iter()
            .zip(first_row..)
            .map(|(row, number)| {
                decode(row).map_err(|error| RowDecodeError {
                    row: number,
                    message: error.to_string(),
                })
            })
            .collect();

        Ok(Some(page))
    }
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;

    async fn collect_pages(
        rows: Vec<Result<u32, String>>,
        page_size: usize,
    ) -> Vec<Result<Vec<u32>, String>> {
        let (sender, mut receiver) = mpsc::channel(1);
        let forward = tokio::spawn(forward_pages(stream::iter(rows), page_size, sender));

        let mut pages = Vec::new();
        while let Some(page) = receiver.recv().await {
            pages.push(page);
        }
        assert!(forward.await.unwrap().is_ok());
        pages
    }

    #[tokio::test]
    async fn test_rows_are_paged_in_order() {
        let rows = (1..=5).map(Ok).collect();

        let pages = collect_pages(rows, 2).await;

        assert_eq!(pages, vec![Ok(vec![1, 2]), Ok(vec![3, 4]), Ok(vec![5])]);
    }

    #[tokio::test]
    async fn test_exact_multiple_has_no_empty_page() {
        let rows = (1..=4).map(Ok).collect();

        let pages = collect_pages(rows, 2).await;

        assert_eq!(pages, vec![Ok(vec![1, 2]), Ok(vec![3, 4])]);
    }

    #[tokio::test]
    async fn test_stream_error_ends_paging() {
        let rows = vec![Ok(1), Ok(2), Ok(3), Err("connection reset".to_owned()), Ok(4)];

        let pages = collect_pages(rows, 2).await;

        assert_eq!(
            pages,
            vec![Ok(vec![1, 2]), Err("connection reset".to_owned())]
        );
    }

    #[tokio::test]
    async fn test_paging_stops_once_pages_are_no_longer_read() {
        let (sender, receiver) = mpsc::channel(1);
        drop(receiver);

        let rows = stream::iter((1..=3).map(Ok::<u32, String>));
        assert!(forward_pages(rows, 2, sender).await.is_err());
    }
}
