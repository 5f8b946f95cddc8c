//! Offset-paged record accumulation.
//!
//! [`RecordAccumulator`] requests pages at offsets `0, P, 2P, ...` and
//! concatenates them in arrival order. It stops on the first page that is
//! empty or shorter than the requested page size. Server-side hints
//! (`exceededTransferLimit`, CKAN `total`) never decide termination; they
//! are logged and kept for a post-hoc count check.

use std::sync::Arc;

use planning_etl_source_models::{CountCheck, Record};

use crate::progress::{PageEvent, ProgressCallback, null_progress};
use crate::{PageFetcher, SourceError};

/// Ordered concatenation of every page for one logical query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Accumulated {
    /// Label of the source the records came from.
    pub label: String,
    /// All records, in page order.
    pub records: Vec<Record>,
    /// Number of page requests issued.
    pub requests: u32,
    /// Total reported by the source on the first page, if any.
    pub reported_total: Option<u64>,
}

impl Accumulated {
    /// Number of accumulated records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no records were accumulated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Compares the accumulated length against `expected` and logs the
    /// outcome. A mismatch is reported, not raised.
    #[must_use]
    pub fn check_count(&self, expected: Option<u64>) -> CountCheck {
        let check = CountCheck::compare(expected, self.records.len() as u64);
        match check {
            CountCheck::Match => {
                log::info!("{}: count check OK ({} records)", self.label, self.len());
            }
            CountCheck::Mismatch { expected, actual } => {
                log::warn!(
                    "{}: remote reports {expected} records but {actual} were fetched",
                    self.label
                );
            }
            CountCheck::Unavailable => {
                log::info!(
                    "{}: remote count unavailable ({} records fetched)",
                    self.label,
                    self.len()
                );
            }
        }
        check
    }

    /// Like [`Self::check_count`], but fails on a mismatch when `strict`
    /// is set.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::CountMismatch`] if `strict` is `true` and the
    /// counts differ.
    pub fn ensure_count(&self, expected: Option<u64>, strict: bool) -> Result<CountCheck, SourceError> {
        match self.check_count(expected) {
            CountCheck::Mismatch { expected, actual } if strict => {
                Err(SourceError::CountMismatch {
                    label: self.label.clone(),
                    expected,
                    actual,
                })
            }
            check => Ok(check),
        }
    }
}

/// Drives a [`PageFetcher`] until the source is exhausted.
pub struct RecordAccumulator<'a> {
    fetcher: &'a dyn PageFetcher,
    page_size: u64,
    progress: Arc<dyn ProgressCallback>,
}

impl<'a> RecordAccumulator<'a> {
    /// Creates an accumulator requesting `page_size` records per page.
    #[must_use]
    pub fn new(fetcher: &'a dyn PageFetcher, page_size: u64) -> Self {
        Self {
            fetcher,
            page_size,
            progress: null_progress(),
        }
    }

    /// Reports the source's total and every page to `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Fetches every page, starting at offset 0.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::InvalidPageSize`] for a page size of zero, or
    /// the first error returned by the fetcher. Records from earlier pages
    /// are discarded on error.
    pub async fn fetch_all(&self) -> Result<Accumulated, SourceError> {
        let label = self.fetcher.label().to_string();
        if self.page_size == 0 {
            return Err(SourceError::InvalidPageSize { label });
        }

        let mut result = Accumulated {
            label,
            ..Accumulated::default()
        };
        let mut offset: u64 = 0;

        loop {
            log::debug!(
                "{}: offset={offset}, limit={}",
                result.label,
                self.page_size
            );
            let page = self.fetcher.fetch_page(offset, self.page_size).await?;
            result.requests += 1;

            if result.reported_total.is_none() {
                result.reported_total = page.total;
                if let Some(total) = page.total {
                    self.progress.expect(total);
                }
            }

            let count = page.len() as u64;
            let exhausted = page.is_exhausted(self.page_size);

            if exhausted && page.has_more == Some(true) {
                log::warn!(
                    "{}: short page of {count} at offset {offset} but the server reports more \
                     records; its maximum record count may be below the page size of {}",
                    result.label,
                    self.page_size
                );
            }

            result.records.extend(page.records);
            self.progress.page(PageEvent {
                page: u64::from(result.requests - 1),
                offset,
                records: count,
                accumulated: result.records.len() as u64,
            });

            if exhausted {
                break;
            }

            offset += self.page_size;
            log::info!(
                "{}: fetched {count} records (total so far: {}), fetching next page...",
                result.label,
                result.records.len()
            );
        }

        log::info!(
            "{}: download complete, {} records in {} request(s)",
            result.label,
            result.records.len(),
            result.requests
        );
        self.progress
            .finish(&format!("{}: {} records", result.label, result.records.len()));

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use planning_etl_source_models::Page;

    use super::*;

    /// Serves slices of a fixed record list and remembers requested offsets.
    struct FakeSource {
        records: Vec<Record>,
        total: Option<u64>,
        offsets: Mutex<Vec<u64>>,
        fail_at: Option<u64>,
    }

    impl FakeSource {
        fn with_ids(ids: &[&str]) -> Self {
            Self {
                records: ids
                    .iter()
                    .map(|id| Record::from(serde_json::json!({ "id": id })))
                    .collect(),
                total: None,
                offsets: Mutex::new(Vec::new()),
                fail_at: None,
            }
        }

        fn offsets(&self) -> Vec<u64> {
            self.offsets.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageFetcher for FakeSource {
        fn label(&self) -> &str {
            "fake"
        }

        async fn fetch_page(&self, offset: u64, page_size: u64) -> Result<Page, SourceError> {
            self.offsets.lock().unwrap().push(offset);
            if self.fail_at == Some(offset) {
                return Err(SourceError::Remote {
                    label: "fake".to_string(),
                    code: 500,
                    message: "boom".to_string(),
                });
            }
            let start = usize::try_from(offset).unwrap().min(self.records.len());
            let end = (start + usize::try_from(page_size).unwrap()).min(self.records.len());
            Ok(Page {
                records: self.records[start..end].to_vec(),
                has_more: None,
                total: self.total,
            })
        }
    }

    fn ids(acc: &Accumulated) -> Vec<String> {
        acc.records
            .iter()
            .map(|r| r.get("id").and_then(|v| v.as_str()).unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn terminates_on_short_final_page() {
        let source = FakeSource::with_ids(&["a", "b", "c", "d", "e"]);
        let acc = RecordAccumulator::new(&source, 2).fetch_all().await.unwrap();

        assert_eq!(ids(&acc), vec!["a", "b", "c", "d", "e"]);
        assert_eq!(acc.requests, 3);
        assert_eq!(source.offsets(), vec![0, 2, 4]);
    }

    #[tokio::test]
    async fn exact_multiple_terminates_on_empty_page() {
        let source = FakeSource::with_ids(&["a", "b", "c", "d"]);
        let acc = RecordAccumulator::new(&source, 2).fetch_all().await.unwrap();

        assert_eq!(ids(&acc), vec!["a", "b", "c", "d"]);
        assert_eq!(source.offsets(), vec![0, 2, 4]);
    }

    #[tokio::test]
    async fn empty_source_issues_one_request() {
        let source = FakeSource::with_ids(&[]);
        let acc = RecordAccumulator::new(&source, 1000).fetch_all().await.unwrap();

        assert!(acc.is_empty());
        assert_eq!(source.offsets(), vec![0]);
    }

    #[tokio::test]
    async fn yields_every_record_in_order_for_any_page_size() {
        let all: Vec<String> = (0..23).map(|i| format!("r{i}")).collect();
        let refs: Vec<&str> = all.iter().map(String::as_str).collect();

        for page_size in 1..=30 {
            let source = FakeSource::with_ids(&refs);
            let acc = RecordAccumulator::new(&source, page_size)
                .fetch_all()
                .await
                .unwrap();
            assert_eq!(ids(&acc), all, "page size {page_size}");

            let mut offsets = source.offsets();
            let len = offsets.len();
            offsets.dedup();
            assert_eq!(offsets.len(), len, "offset requested twice");
        }
    }

    #[derive(Default)]
    struct Recorded {
        expected: Mutex<Vec<u64>>,
        pages: Mutex<Vec<PageEvent>>,
        summary: Mutex<Option<String>>,
    }

    impl ProgressCallback for Recorded {
        fn expect(&self, total: u64) {
            self.expected.lock().unwrap().push(total);
        }

        fn page(&self, event: PageEvent) {
            self.pages.lock().unwrap().push(event);
        }

        fn step(&self, _label: &str) {}

        fn finish(&self, summary: &str) {
            *self.summary.lock().unwrap() = Some(summary.to_string());
        }
    }

    #[tokio::test]
    async fn every_page_is_reported() {
        let mut source = FakeSource::with_ids(&["a", "b", "c"]);
        source.total = Some(3);
        let progress = Arc::new(Recorded::default());

        RecordAccumulator::new(&source, 2)
            .with_progress(progress.clone())
            .fetch_all()
            .await
            .unwrap();

        assert_eq!(*progress.expected.lock().unwrap(), vec![3]);
        assert_eq!(
            *progress.pages.lock().unwrap(),
            vec![
                PageEvent {
                    page: 0,
                    offset: 0,
                    records: 2,
                    accumulated: 2
                },
                PageEvent {
                    page: 1,
                    offset: 2,
                    records: 1,
                    accumulated: 3
                },
            ]
        );
        assert_eq!(
            progress.summary.lock().unwrap().as_deref(),
            Some("fake: 3 records")
        );
    }

    #[tokio::test]
    async fn zero_page_size_is_rejected() {
        let source = FakeSource::with_ids(&["a"]);
        let err = RecordAccumulator::new(&source, 0).fetch_all().await.unwrap_err();

        assert!(matches!(err, SourceError::InvalidPageSize { .. }));
        assert!(source.offsets().is_empty());
    }

    #[tokio::test]
    async fn page_error_halts_accumulation() {
        let mut source = FakeSource::with_ids(&["a", "b", "c", "d", "e"]);
        source.fail_at = Some(2);
        let err = RecordAccumulator::new(&source, 2).fetch_all().await.unwrap_err();

        assert!(matches!(err, SourceError::Remote { .. }));
        assert_eq!(source.offsets(), vec![0, 2]);
    }

    #[tokio::test]
    async fn total_is_advisory() {
        let mut source = FakeSource::with_ids(&["a", "b", "c"]);
        // Under-reported total must not end the loop early.
        source.total = Some(1);
        let acc = RecordAccumulator::new(&source, 1).fetch_all().await.unwrap();

        assert_eq!(acc.len(), 3);
        assert_eq!(acc.reported_total, Some(1));
        assert!(acc.check_count(acc.reported_total).is_mismatch());
        assert!(acc.ensure_count(acc.reported_total, false).is_ok());
        assert!(matches!(
            acc.ensure_count(acc.reported_total, true),
            Err(SourceError::CountMismatch {
                expected: 1,
                actual: 3,
                ..
            })
        ));
    }
}
