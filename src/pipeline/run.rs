// src/pipeline/run.rs

//! Pipeline orchestration.
//!
//! Drives each enabled source through fetch → normalize → merge → commit
//! until it is exhausted, one task per source, pages strictly sequential
//! within a source. The merger and cache commit share one critical section
//! so interleaved commits from the two source tasks can never corrupt the
//! cursor/record tables. Only this module decides "skip and continue" vs
//! "stop this source" vs "stop everything".

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::{
    FetchCursor, MergeDecision, RunReport, SourceKind, SourcePhase, SourceReport,
};
use crate::sources::SourceAdapter;
use crate::storage::{CacheSnapshot, CacheStore};

use super::fetcher::RateLimitedFetcher;
use super::merge::DedupMerger;
use super::normalize::normalize;

/// Consecutive malformed pages tolerated before a source is aborted.
const MAX_MALFORMED_SKIPS: u32 = 3;

/// Cooperative cancellation signal, checked between pages.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.inner.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }
}

/// State shared between the source tasks: the accumulating record set, the
/// cursor table, and the merge counters.
struct SharedState {
    merger: DedupMerger,
    cursors: HashMap<SourceKind, FetchCursor>,
    inserted: usize,
    updated: usize,
    cross_source_duplicates: usize,
}

impl SharedState {
    /// Cursor table in source order, for deterministic commits.
    fn cursor_table(&self) -> Vec<FetchCursor> {
        SourceKind::ALL
            .iter()
            .filter_map(|source| self.cursors.get(source).cloned())
            .collect()
    }
}

/// End-to-end pipeline runner.
pub struct Pipeline {
    fetcher: RateLimitedFetcher,
    adapters: Vec<Arc<dyn SourceAdapter>>,
    store: Arc<dyn CacheStore>,
}

impl Pipeline {
    pub fn new(
        fetcher: RateLimitedFetcher,
        adapters: Vec<Arc<dyn SourceAdapter>>,
        store: Arc<dyn CacheStore>,
    ) -> Self {
        Self {
            fetcher,
            adapters,
            store,
        }
    }

    /// Run the pipeline to completion or cancellation.
    ///
    /// `fresh` discards cached cursors and records and re-fetches from the
    /// beginning. Partial failure of a source is reported, not raised; only
    /// a cache write failure aborts the whole run.
    pub async fn run(&self, fresh: bool, cancel: &CancelFlag) -> Result<RunReport> {
        let start_time = Utc::now();

        let snapshot = if fresh {
            log::info!("Fresh start requested, ignoring cached state");
            CacheSnapshot::default()
        } else {
            self.store.load().await?
        };
        log::info!(
            "Cache loaded: {} records, {} cursors",
            snapshot.records.len(),
            snapshot.cursors.len()
        );

        let cursors: HashMap<SourceKind, FetchCursor> = snapshot
            .cursors
            .into_iter()
            .map(|cursor| (cursor.source, cursor))
            .collect();
        let shared = Mutex::new(SharedState {
            merger: DedupMerger::from_records(snapshot.records),
            cursors,
            inserted: 0,
            updated: 0,
            cross_source_duplicates: 0,
        });

        let tasks = self
            .adapters
            .iter()
            .map(|adapter| self.drive_source(adapter, &shared, cancel));
        let results = join_all(tasks).await;

        let mut sources = Vec::new();
        for result in results {
            sources.push(result?);
        }

        let shared = shared.into_inner();
        let report = RunReport {
            start_time,
            end_time: Utc::now(),
            sources,
            inserted: shared.inserted,
            updated: shared.updated,
            cross_source_duplicates: shared.cross_source_duplicates,
            dataset_len: shared.merger.len(),
        };

        log_summary(&report);
        Ok(report)
    }

    /// Drive one source until a terminal phase.
    async fn drive_source(
        &self,
        adapter: &Arc<dyn SourceAdapter>,
        shared: &Mutex<SharedState>,
        cancel: &CancelFlag,
    ) -> Result<SourceReport> {
        let source = adapter.source();
        let mut report = SourceReport::new(source);

        let mut cursor = {
            let shared = shared.lock().await;
            shared.cursors.get(&source).cloned()
        }
        .unwrap_or_else(|| FetchCursor::new(source));

        if cursor.completed {
            log::info!("{source}: already complete in cache, nothing to fetch");
            report.phase = SourcePhase::Completed;
            return Ok(report);
        }

        report.phase = SourcePhase::Fetching;
        let mut malformed_streak: u32 = 0;

        loop {
            if cancel.is_set() {
                log::warn!("{source}: cancelled between pages");
                report.phase = SourcePhase::Paused;
                break;
            }

            let token = cursor.token.clone();
            let result = self
                .fetcher
                .call(source, || adapter.fetch_page(token.as_deref()))
                .await;

            match result {
                Ok(page) => {
                    malformed_streak = 0;
                    report.pages += 1;
                    report.fetched += page.records.len();

                    let mut batch = Vec::with_capacity(page.records.len());
                    for raw in &page.records {
                        match normalize(raw) {
                            Ok(record) => batch.push(record),
                            Err(error) => {
                                report.skipped += 1;
                                log::warn!("{source}: record skipped: {error}");
                            }
                        }
                    }
                    report.normalized += batch.len();
                    cursor.advance(page.next);

                    // Merge and commit under one lock so the sibling task
                    // never observes a half-applied page.
                    {
                        let mut shared = shared.lock().await;
                        for record in batch {
                            match shared.merger.absorb(record) {
                                MergeDecision::Inserted => shared.inserted += 1,
                                MergeDecision::Updated => shared.updated += 1,
                                MergeDecision::CrossSourceDuplicate { canonical_id } => {
                                    shared.cross_source_duplicates += 1;
                                    log::info!(
                                        "{source}: kept cross-source duplicate of {canonical_id}"
                                    );
                                }
                            }
                        }
                        shared.cursors.insert(source, cursor.clone());
                        let cursors = shared.cursor_table();
                        if let Err(error) =
                            self.store.commit(&cursors, shared.merger.records()).await
                        {
                            // A partial cache is worse than stopping; bring
                            // the other source down too.
                            cancel.set();
                            return Err(error);
                        }
                    }

                    if cursor.completed {
                        log::info!(
                            "{source}: completed after {} pages ({} records)",
                            report.pages,
                            report.fetched
                        );
                        report.phase = SourcePhase::Completed;
                        break;
                    }
                }
                Err(error @ AppError::MalformedResponse { .. }) => {
                    malformed_streak += 1;
                    match adapter.skip_token(token.as_deref()) {
                        Some(next) if malformed_streak <= MAX_MALFORMED_SKIPS => {
                            log::warn!("{source}: skipping malformed page: {error}");
                            cursor.token = Some(next);

                            let mut shared = shared.lock().await;
                            shared.cursors.insert(source, cursor.clone());
                            let cursors = shared.cursor_table();
                            if let Err(error) =
                                self.store.commit(&cursors, shared.merger.records()).await
                            {
                                cancel.set();
                                return Err(error);
                            }
                        }
                        _ => {
                            log::error!("{source}: aborting on malformed response: {error}");
                            report.error = Some(error.to_string());
                            report.phase = SourcePhase::Exhausted;
                            break;
                        }
                    }
                }
                Err(error) => {
                    // Auth failures and spent retry budgets end the source;
                    // the sibling keeps running.
                    log::error!("{source}: stopped: {error}");
                    report.error = Some(error.to_string());
                    report.phase = SourcePhase::Exhausted;
                    break;
                }
            }
        }

        Ok(report)
    }
}

/// Log the end-of-run summary. Always emitted, even on partial failure.
fn log_summary(report: &RunReport) {
    log::info!(
        "Run finished in {}s: {} records in dataset",
        (report.end_time - report.start_time).num_seconds(),
        report.dataset_len
    );
    log::info!(
        "Merge: {} inserted, {} updated, {} cross-source duplicates",
        report.inserted,
        report.updated,
        report.cross_source_duplicates
    );
    for source in &report.sources {
        log::info!(
            "  {}: {:?} - {} pages, {} fetched, {} normalized, {} skipped{}",
            source.source,
            source.phase,
            source.pages,
            source.fetched,
            source.normalized,
            source.skipped,
            source
                .error
                .as_ref()
                .map(|e| format!(" ({e})"))
                .unwrap_or_default()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use serde_json::{Value, json};
    use tempfile::TempDir;

    use crate::models::{CacheConfig, FetcherConfig, RawRecord};
    use crate::sources::FetchPage;
    use crate::storage::JsonCacheStore;

    /// Scripted adapter: serves fixed pages by numeric token, with optional
    /// up-front failures and a page index from which every call fails.
    struct MockAdapter {
        source: SourceKind,
        pages: Vec<Vec<Value>>,
        failures: StdMutex<Vec<AppError>>,
        fail_from_page: Option<usize>,
        malformed_pages: HashSet<usize>,
        blind_skip: bool,
    }

    impl MockAdapter {
        fn new(source: SourceKind, pages: Vec<Vec<Value>>) -> Self {
            Self {
                source,
                pages,
                failures: StdMutex::new(Vec::new()),
                fail_from_page: None,
                malformed_pages: HashSet::new(),
                blind_skip: true,
            }
        }

        fn with_failures(mut self, failures: Vec<AppError>) -> Self {
            self.failures = StdMutex::new(failures);
            self
        }

        fn failing_from_page(mut self, page: usize) -> Self {
            self.fail_from_page = Some(page);
            self
        }

        fn with_malformed_page(mut self, page: usize) -> Self {
            self.malformed_pages.insert(page);
            self
        }
    }

    #[async_trait]
    impl SourceAdapter for MockAdapter {
        fn source(&self) -> SourceKind {
            self.source
        }

        async fn fetch_page(&self, token: Option<&str>) -> Result<FetchPage> {
            {
                let mut failures = self.failures.lock().unwrap();
                if !failures.is_empty() {
                    return Err(failures.remove(0));
                }
            }

            let index: usize = token.map(|t| t.parse().unwrap()).unwrap_or(0);
            if self.fail_from_page.is_some_and(|fail| index >= fail) {
                return Err(AppError::transient(self.source, "scripted outage"));
            }
            if self.malformed_pages.contains(&index) {
                return Err(AppError::malformed(self.source, "scripted garbage"));
            }

            let records = self
                .pages
                .get(index)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .map(|payload| RawRecord::new(self.source, payload))
                .collect();
            let next = if index + 1 < self.pages.len() {
                Some((index + 1).to_string())
            } else {
                None
            };

            Ok(FetchPage { records, next })
        }

        fn skip_token(&self, token: Option<&str>) -> Option<String> {
            if !self.blind_skip {
                return None;
            }
            let index: usize = token.and_then(|t| t.parse().ok()).unwrap_or(0);
            Some((index + 1).to_string())
        }
    }

    fn flickr_payload(id: &str, title: &str) -> Value {
        json!({
            "id": id,
            "title": title,
            "ownername": "alice",
            "tags": "test",
            "url_m": format!("https://live.staticflickr.com/1/{id}.jpg")
        })
    }

    fn archive_payload(id: &str, title: &str) -> Value {
        json!({"identifier": id, "title": title, "creator": "bob"})
    }

    fn fast_fetcher() -> RateLimitedFetcher {
        RateLimitedFetcher::new(&FetcherConfig {
            min_interval_ms: 0,
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 4,
            ..FetcherConfig::default()
        })
    }

    fn store_in(tmp: &TempDir) -> Arc<JsonCacheStore> {
        Arc::new(JsonCacheStore::new(tmp.path(), &CacheConfig::default()))
    }

    fn pipeline(adapters: Vec<Arc<dyn SourceAdapter>>, store: Arc<JsonCacheStore>) -> Pipeline {
        Pipeline::new(fast_fetcher(), adapters, store)
    }

    fn two_source_adapters() -> Vec<Arc<dyn SourceAdapter>> {
        vec![
            Arc::new(MockAdapter::new(
                SourceKind::Flickr,
                vec![
                    vec![flickr_payload("1", "One"), flickr_payload("2", "Two")],
                    vec![flickr_payload("3", "Three")],
                ],
            )),
            Arc::new(MockAdapter::new(
                SourceKind::Archive,
                vec![vec![archive_payload("a", "Alpha")]],
            )),
        ]
    }

    #[tokio::test]
    async fn test_run_completes_both_sources() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let report = pipeline(two_source_adapters(), Arc::clone(&store))
            .run(false, &CancelFlag::new())
            .await
            .unwrap();

        assert!(!report.has_warnings());
        assert_eq!(report.dataset_len, 4);
        assert_eq!(report.inserted, 4);
        assert!(
            report
                .sources
                .iter()
                .all(|s| s.phase == SourcePhase::Completed)
        );

        let snapshot = store.load().await.unwrap();
        assert_eq!(snapshot.records.len(), 4);
        assert!(snapshot.cursors.iter().all(|c| c.completed));
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);

        pipeline(two_source_adapters(), Arc::clone(&store))
            .run(false, &CancelFlag::new())
            .await
            .unwrap();
        let first = store.load().await.unwrap().records;

        // Same mocked sources, same cache: nothing to fetch, nothing changes.
        let report = pipeline(two_source_adapters(), Arc::clone(&store))
            .run(false, &CancelFlag::new())
            .await
            .unwrap();
        let second = store.load().await.unwrap().records;

        assert_eq!(report.total_fetched(), 0);
        assert_eq!(first, second);

        // A fresh re-fetch of unchanged sources keeps ids unique and the
        // count stable.
        let report = pipeline(two_source_adapters(), Arc::clone(&store))
            .run(true, &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(report.dataset_len, 4);

        let records = store.load().await.unwrap().records;
        let ids: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids.len(), records.len());
        assert_eq!(records.len(), 4);
    }

    #[tokio::test]
    async fn test_auth_failure_is_isolated() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);

        let adapters: Vec<Arc<dyn SourceAdapter>> = vec![
            Arc::new(MockAdapter::new(
                SourceKind::Flickr,
                vec![vec![flickr_payload("1", "One")]],
            )),
            Arc::new(
                MockAdapter::new(SourceKind::Archive, vec![vec![archive_payload("a", "A")]])
                    .with_failures(vec![AppError::auth(SourceKind::Archive, "bad credentials")]),
            ),
        ];

        let report = pipeline(adapters, Arc::clone(&store))
            .run(false, &CancelFlag::new())
            .await
            .unwrap();

        assert!(report.has_warnings());
        let flickr = &report.sources[0];
        let archive = &report.sources[1];
        assert_eq!(flickr.phase, SourcePhase::Completed);
        assert_eq!(archive.phase, SourcePhase::Exhausted);
        assert!(archive.error.is_some());

        // Only Flickr records made it into the dataset.
        let records = store.load().await.unwrap().records;
        assert_eq!(records.len(), 1);
        assert!(records.iter().all(|r| r.source == SourceKind::Flickr));
    }

    #[tokio::test]
    async fn test_retry_budget_ends_source_with_partial_data() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);

        let adapters: Vec<Arc<dyn SourceAdapter>> = vec![Arc::new(
            MockAdapter::new(
                SourceKind::Flickr,
                vec![
                    vec![flickr_payload("1", "One")],
                    vec![flickr_payload("2", "Two")],
                ],
            )
            .failing_from_page(1),
        )];

        let report = pipeline(adapters, Arc::clone(&store))
            .run(false, &CancelFlag::new())
            .await
            .unwrap();

        let flickr = &report.sources[0];
        assert_eq!(flickr.phase, SourcePhase::Exhausted);
        assert_eq!(flickr.pages, 1);

        // Page 0 was committed before the outage.
        let snapshot = store.load().await.unwrap();
        assert_eq!(snapshot.records.len(), 1);
        assert!(!snapshot.cursors[0].completed);
    }

    #[tokio::test]
    async fn test_resume_matches_uninterrupted_run() {
        let interrupted = TempDir::new().unwrap();
        let store = store_in(&interrupted);
        let pages = vec![
            vec![flickr_payload("1", "One")],
            vec![flickr_payload("2", "Two")],
            vec![flickr_payload("3", "Three")],
        ];

        // First attempt dies on page 1.
        let adapters: Vec<Arc<dyn SourceAdapter>> = vec![Arc::new(
            MockAdapter::new(SourceKind::Flickr, pages.clone()).failing_from_page(1),
        )];
        pipeline(adapters, Arc::clone(&store))
            .run(false, &CancelFlag::new())
            .await
            .unwrap();

        // Restart with the source healthy again.
        let adapters: Vec<Arc<dyn SourceAdapter>> =
            vec![Arc::new(MockAdapter::new(SourceKind::Flickr, pages.clone()))];
        let report = pipeline(adapters, Arc::clone(&store))
            .run(false, &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(report.sources[0].phase, SourcePhase::Completed);
        // Only the remaining pages were fetched on resume.
        assert_eq!(report.sources[0].pages, 2);

        // Reference: the same source fetched without interruption.
        let uninterrupted = TempDir::new().unwrap();
        let reference_store = store_in(&uninterrupted);
        let adapters: Vec<Arc<dyn SourceAdapter>> =
            vec![Arc::new(MockAdapter::new(SourceKind::Flickr, pages))];
        pipeline(adapters, Arc::clone(&reference_store))
            .run(false, &CancelFlag::new())
            .await
            .unwrap();

        let resumed: Vec<String> = store
            .load()
            .await
            .unwrap()
            .records
            .into_iter()
            .map(|r| r.id)
            .collect();
        let reference: Vec<String> = reference_store
            .load()
            .await
            .unwrap()
            .records
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(resumed, reference);
    }

    #[tokio::test]
    async fn test_cancellation_pauses_before_fetching() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let cancel = CancelFlag::new();
        cancel.set();

        let report = pipeline(two_source_adapters(), Arc::clone(&store))
            .run(false, &cancel)
            .await
            .unwrap();

        assert!(report.has_warnings());
        assert!(
            report
                .sources
                .iter()
                .all(|s| s.phase == SourcePhase::Paused)
        );
        assert_eq!(report.dataset_len, 0);
    }

    #[tokio::test]
    async fn test_malformed_page_is_skipped_when_tokens_advance_blindly() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);

        let adapters: Vec<Arc<dyn SourceAdapter>> = vec![Arc::new(
            MockAdapter::new(
                SourceKind::Flickr,
                vec![
                    vec![flickr_payload("1", "One")],
                    vec![flickr_payload("2", "Two")],
                    vec![flickr_payload("3", "Three")],
                ],
            )
            .with_malformed_page(1),
        )];

        let report = pipeline(adapters, Arc::clone(&store))
            .run(false, &CancelFlag::new())
            .await
            .unwrap();

        assert_eq!(report.sources[0].phase, SourcePhase::Completed);
        let ids: Vec<String> = store
            .load()
            .await
            .unwrap()
            .records
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["flickr:1", "flickr:3"]);
    }

    #[tokio::test]
    async fn test_malformed_page_aborts_source_without_blind_skip() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);

        let mut adapter = MockAdapter::new(
            SourceKind::Archive,
            vec![
                vec![archive_payload("a", "A")],
                vec![archive_payload("b", "B")],
            ],
        )
        .with_malformed_page(1);
        adapter.blind_skip = false;

        let adapters: Vec<Arc<dyn SourceAdapter>> = vec![Arc::new(adapter)];
        let report = pipeline(adapters, Arc::clone(&store))
            .run(false, &CancelFlag::new())
            .await
            .unwrap();

        assert_eq!(report.sources[0].phase, SourcePhase::Exhausted);
        assert_eq!(store.load().await.unwrap().records.len(), 1);
    }

    #[tokio::test]
    async fn test_same_id_across_pages_is_updated_not_duplicated() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);

        let adapters: Vec<Arc<dyn SourceAdapter>> = vec![Arc::new(MockAdapter::new(
            SourceKind::Flickr,
            vec![
                vec![flickr_payload("1", "Original")],
                vec![flickr_payload("1", "Revised")],
            ],
        ))];

        let report = pipeline(adapters, Arc::clone(&store))
            .run(false, &CancelFlag::new())
            .await
            .unwrap();

        assert_eq!(report.inserted, 1);
        assert_eq!(report.updated, 1);

        let records = store.load().await.unwrap().records;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title.as_deref(), Some("Revised"));
    }
}
