//! Paginated Retrieval
//!
//! Requests pages strictly in increasing offset order on the caller's task
//! and folds them into one ordered item list. The first failing page aborts
//! the retrieval; nothing is retried and no partial result is returned.

use serde_json::Value;

use crate::application::ports::PageSource;
use crate::domain::pagination::{PageError, PageLayout, PageQuery, Paged};

/// Fetch every page of `query`.
///
/// Returns the items in page order and the total reported by the last page.
///
/// # Errors
///
/// Returns the source's error for the first page request that fails, or a
/// [`PageError`] conversion if a page lacks the layout's fields.
pub async fn fetch_all<S>(source: &S, query: &PageQuery, layout: PageLayout) -> Result<Paged, S::Error>
where
    S: PageSource + ?Sized,
    S::Error: From<PageError>,
{
    fetch_while(source, query, layout, |_| true).await
}

/// Fetch pages until `keep` rejects an item.
///
/// The first rejected item ends the retrieval: it and the rest of its page
/// are dropped and no further page is requested. A non-zero `query.limit`
/// also caps the number of items returned.
///
/// # Errors
///
/// Same as [`fetch_all`].
pub async fn fetch_while<S, F>(
    source: &S,
    query: &PageQuery,
    layout: PageLayout,
    keep: F,
) -> Result<Paged, S::Error>
where
    S: PageSource + ?Sized,
    S::Error: From<PageError>,
    F: Fn(&Value) -> bool + Send + Sync,
{
    let item_limit = usize::try_from(query.limit).unwrap_or(usize::MAX);
    let mut cursor = query.cursor();
    let mut params = query.params.clone();
    let mut paged = Paged::default();

    while let Some(window) = cursor.next_window() {
        params.insert("limit".to_string(), window.limit.into());
        params.insert("offset".to_string(), window.offset.into());

        tracing::debug!(
            endpoint = %query.endpoint,
            offset = window.offset,
            limit = window.limit,
            "Fetching page"
        );

        let page = source.fetch_page(&query.endpoint, &params).await?;
        let (items, total) = layout.split(page)?;
        paged.total = total;
        cursor.advance(total);

        for item in items {
            if !keep(&item) {
                tracing::debug!(
                    endpoint = %query.endpoint,
                    fetched = paged.items.len(),
                    "Item rejected, stopping retrieval"
                );
                return Ok(paged);
            }
            paged.items.push(item);
            if query.limit > 0 && paged.items.len() >= item_limit {
                return Ok(paged);
            }
        }
    }

    tracing::debug!(
        endpoint = %query.endpoint,
        fetched = paged.items.len(),
        total = paged.total,
        "Retrieval complete"
    );

    Ok(paged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::params::{Params, params};
    use crate::domain::pagination::published_since;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};
    use parking_lot::Mutex;
    use serde_json::json;
    use test_case::test_case;

    #[derive(Debug, thiserror::Error)]
    enum FakeError {
        #[error("page: {0}")]
        Page(#[from] PageError),
        #[error("boom at offset {0}")]
        Boom(u64),
    }

    /// Serves `items` as `{"data": [...], "totalCount": N}` pages.
    struct FakeSource {
        items: Vec<Value>,
        fail_at: Option<u64>,
        requests: Mutex<Vec<(u64, u64)>>,
    }

    impl FakeSource {
        fn numbered(count: usize) -> Self {
            Self::with_items((0..count).map(|i| json!({"n": i})).collect())
        }

        fn with_items(items: Vec<Value>) -> Self {
            Self {
                items,
                fail_at: None,
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<(u64, u64)> {
            self.requests.lock().clone()
        }
    }

    #[async_trait]
    impl PageSource for FakeSource {
        type Error = FakeError;

        async fn fetch_page(&self, _endpoint: &str, params: &Params) -> Result<Value, FakeError> {
            let offset = params["offset"].as_u64().unwrap();
            let limit = params["limit"].as_u64().unwrap();
            self.requests.lock().push((offset, limit));
            if self.fail_at == Some(offset) {
                return Err(FakeError::Boom(offset));
            }
            let start = usize::try_from(offset).unwrap().min(self.items.len());
            let end = (start + usize::try_from(limit).unwrap()).min(self.items.len());
            Ok(json!({
                "data": self.items[start..end],
                "totalCount": self.items.len(),
            }))
        }
    }

    const CHUNK: u64 = 10;

    #[test_case(0 ; "empty")]
    #[test_case(1 ; "single item")]
    #[test_case(9 ; "one short of a chunk")]
    #[test_case(10 ; "exactly one chunk")]
    #[test_case(11 ; "one past a chunk")]
    #[test_case(37 ; "three chunks and change")]
    #[tokio::test]
    async fn fetches_everything_in_order(count: usize) {
        let source = FakeSource::numbered(count);
        let query = PageQuery::new("instrument_search", Params::new()).with_chunk_size(CHUNK);

        let paged = fetch_all(&source, &query, PageLayout::TOTAL_COUNT).await.unwrap();

        assert_eq!(paged.items.len(), count);
        assert_eq!(paged.total, count as u64);
        for (i, item) in paged.items.iter().enumerate() {
            assert_eq!(item["n"], json!(i));
        }
        let offsets: Vec<u64> = source.requests().iter().map(|(o, _)| *o).collect();
        assert!(offsets.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn limit_and_offset_bound_the_window() {
        let source = FakeSource::numbered(100);
        let query = PageQuery::new("price_history", Params::new())
            .with_chunk_size(CHUNK)
            .with_limit(25)
            .with_offset(7);

        let paged = fetch_all(&source, &query, PageLayout::TOTAL_COUNT).await.unwrap();

        assert_eq!(paged.items.len(), 25);
        assert_eq!(paged.items[0]["n"], json!(7));
        assert_eq!(source.requests(), vec![(7, 10), (17, 10), (27, 5)]);
        let last_offset = source.requests().last().unwrap().0;
        assert!((7..32).contains(&last_offset));
    }

    #[tokio::test]
    async fn limit_past_the_end_returns_what_exists() {
        let source = FakeSource::numbered(12);
        let query = PageQuery::new("e", Params::new())
            .with_chunk_size(CHUNK)
            .with_limit(50);

        let paged = fetch_all(&source, &query, PageLayout::TOTAL_COUNT).await.unwrap();

        assert_eq!(paged.items.len(), 12);
        assert!(paged.items.len() <= 50);
    }

    #[tokio::test]
    async fn base_params_are_sent_with_every_page() {
        struct Recording(Mutex<Vec<Params>>);

        #[async_trait]
        impl PageSource for Recording {
            type Error = FakeError;

            async fn fetch_page(&self, _: &str, params: &Params) -> Result<Value, FakeError> {
                self.0.lock().push(params.clone());
                Ok(json!({"data": [1, 2], "totalCount": 4}))
            }
        }

        let source = Recording(Mutex::new(Vec::new()));
        let query = PageQuery::new("e", params([("isin", "DE0007164600")])).with_chunk_size(2);
        fetch_all(&source, &query, PageLayout::TOTAL_COUNT).await.unwrap();

        let sent = source.0.lock();
        assert_eq!(sent.len(), 2);
        for p in sent.iter() {
            assert_eq!(p["isin"], json!("DE0007164600"));
            assert_eq!(p.keys().next().map(String::as_str), Some("isin"));
        }
    }

    #[tokio::test]
    async fn failure_aborts_without_partial_result() {
        let mut source = FakeSource::numbered(30);
        source.fail_at = Some(10);
        let query = PageQuery::new("e", Params::new()).with_chunk_size(CHUNK);

        let err = fetch_all(&source, &query, PageLayout::TOTAL_COUNT).await.unwrap_err();

        assert!(matches!(err, FakeError::Boom(10)));
        assert_eq!(source.requests().len(), 2);
    }

    #[tokio::test]
    async fn wrong_count_field_is_an_error() {
        let source = FakeSource::numbered(3);
        let query = PageQuery::new("e", Params::new());

        let err = fetch_all(&source, &query, PageLayout::RECORDS_TOTAL).await.unwrap_err();

        assert!(matches!(
            err,
            FakeError::Page(PageError::MissingField { field: "recordsTotal" })
        ));
    }

    #[tokio::test]
    async fn short_page_skips_positions() {
        // Server returns at most 5 items per page but the cursor steps by 10.
        struct Short;

        #[async_trait]
        impl PageSource for Short {
            type Error = FakeError;

            async fn fetch_page(&self, _: &str, params: &Params) -> Result<Value, FakeError> {
                let offset = params["offset"].as_u64().unwrap();
                let items: Vec<u64> = (offset..offset + 5).collect();
                Ok(json!({"data": items, "totalCount": 20}))
            }
        }

        let query = PageQuery::new("e", Params::new()).with_chunk_size(CHUNK);
        let paged = fetch_all(&Short, &query, PageLayout::TOTAL_COUNT).await.unwrap();

        let got: Vec<u64> = paged.items.iter().filter_map(Value::as_u64).collect();
        assert_eq!(got, vec![0, 1, 2, 3, 4, 10, 11, 12, 13, 14]);
    }

    #[tokio::test]
    async fn cutoff_stops_at_first_older_item() {
        let cutoff = Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();
        // Newest first, one item per hour, crossing the cutoff inside page two.
        let items: Vec<Value> = (0..30)
            .map(|i| {
                let time = cutoff + Duration::hours(12) - Duration::hours(i);
                json!({"id": i, "time": time.to_rfc3339()})
            })
            .collect();
        let source = FakeSource::with_items(items);
        let query = PageQuery::new("instrument_news", Params::new()).with_chunk_size(CHUNK);

        let paged = fetch_while(
            &source,
            &query,
            PageLayout::TOTAL_COUNT,
            published_since(cutoff, "time"),
        )
        .await
        .unwrap();

        assert_eq!(paged.items.len(), 13);
        assert_eq!(paged.items.last().unwrap()["id"], json!(12));
        assert_eq!(source.requests().len(), 2);
    }

    #[tokio::test]
    async fn item_limit_caps_predicate_retrieval() {
        let source = FakeSource::numbered(50);
        let query = PageQuery::new("e", Params::new())
            .with_chunk_size(CHUNK)
            .with_limit(15);

        let paged = fetch_while(&source, &query, PageLayout::TOTAL_COUNT, |_| true)
            .await
            .unwrap();

        assert_eq!(paged.items.len(), 15);
        assert_eq!(source.requests().len(), 2);
    }
}
