//! End-to-end pipeline scenarios with fake fetching collaborators and
//! a real temp-file SQLite cache.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use carmetrics::config::tier_for_role;
use carmetrics::error::FetchError;
use carmetrics::models::CarListing;
use carmetrics::rate_limit::RateLimiter;
use carmetrics::repository::{CacheStore, ListingRepository};
use carmetrics::scrapers::{Extractor, FetchBackend, PageSession};
use carmetrics::services::{PrecacheStatus, ScrapeService};
use carmetrics::ScrapeError;

/// Fake session serving canned HTML; designated URLs fail or hang.
#[derive(Default)]
struct FakeSession {
    fetches: AtomicUsize,
    fail_urls: Vec<String>,
    hang_urls: Vec<String>,
}

#[async_trait]
impl PageSession for FakeSession {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.hang_urls.iter().any(|u| u == url) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.fail_urls.iter().any(|u| u == url) {
            return Err(FetchError::Navigation(format!("unreachable: {url}")));
        }
        Ok(format!("<html><body data-url='{url}'></body></html>"))
    }

    async fn close(&self) {}
}

struct FakeBackend {
    session: Arc<FakeSession>,
    sessions_opened: AtomicUsize,
}

impl FakeBackend {
    fn new(session: FakeSession) -> Self {
        Self {
            session: Arc::new(session),
            sessions_opened: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl FetchBackend for FakeBackend {
    async fn open_session(&self) -> anyhow::Result<Arc<dyn PageSession>> {
        self.sessions_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::clone(&self.session) as Arc<dyn PageSession>)
    }
}

/// Fake extractor keyed off the canned HTML produced by `FakeSession`.
/// URLs containing "no-identity" yield a record without a model name.
struct FakeExtractor;

impl Extractor for FakeExtractor {
    fn extract(&self, _html: &str, url: &str) -> CarListing {
        let model = if url.contains("no-identity") {
            String::new()
        } else {
            format!("Model for {url}")
        };
        CarListing {
            model,
            url: url.to_string(),
            ..CarListing::default()
        }
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    cache: Arc<ListingRepository>,
    limiter: Arc<RateLimiter>,
    backend: Arc<FakeBackend>,
    service: ScrapeService,
}

fn harness(session: FakeSession) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let cache = Arc::new(ListingRepository::new(&dir.path().join("cache.db")).expect("repo"));
    let limiter = Arc::new(RateLimiter::new());
    let backend = Arc::new(FakeBackend::new(session));
    let service = ScrapeService::new(
        Arc::clone(&cache) as Arc<dyn CacheStore>,
        Arc::clone(&limiter),
        Arc::clone(&backend) as Arc<dyn FetchBackend>,
        Arc::new(FakeExtractor),
    );
    Harness {
        _dir: dir,
        cache,
        limiter,
        backend,
        service,
    }
}

fn urls(n: usize) -> Vec<String> {
    (1..=n)
        .map(|i| format!("https://www.sgcarmart.com/used-cars/info/listing-{i}"))
        .collect()
}

fn cached_listing(url: &str) -> CarListing {
    CarListing {
        model: format!("Cached model for {url}"),
        url: url.to_string(),
        ..CarListing::default()
    }
}

#[tokio::test]
async fn cache_hit_spends_no_units_and_miss_spends_one() {
    let h = harness(FakeSession::default());
    let batch = urls(2);
    let standard = tier_for_role("standard");

    // URL 1 is a live cache entry, URL 2 is not
    h.cache.put(&batch[0], &cached_listing(&batch[0])).expect("seed");

    let result = h
        .service
        .scrape(&batch, "1.2.3.4", &standard)
        .await
        .expect("scrape");

    assert_eq!(result.results.len(), 2);
    assert_eq!(result.results[0].model, format!("Cached model for {}", batch[0]));
    assert_eq!(result.results[1].model, format!("Model for {}", batch[1]));
    assert!(result.failed_urls.is_empty());
    assert!(result.message.is_none());
    assert_eq!(h.backend.session.fetches.load(Ordering::SeqCst), 1);

    // Exactly one unit was spent: 9 more fit in the window, 10 do not
    assert!(h.limiter.check("1.2.3.4", 10, 120, 9).is_allowed());
    assert!(!h.limiter.check("1.2.3.4", 10, 120, 10).is_allowed());
}

#[tokio::test]
async fn oversubscribed_batch_is_rejected_before_any_fetch() {
    let h = harness(FakeSession::default());
    let standard = tier_for_role("standard");

    // 11 uncached URLs against a budget of 10
    let result = h.service.scrape(&urls(11), "1.2.3.4", &standard).await;

    match result {
        Err(ScrapeError::RateLimited { retry_after_secs }) => assert!(retry_after_secs > 0),
        other => panic!("expected RateLimited, got {other:?}"),
    }
    assert_eq!(h.backend.sessions_opened.load(Ordering::SeqCst), 0);
    assert_eq!(h.backend.session.fetches.load(Ordering::SeqCst), 0);
    assert_eq!(h.cache.stats().expect("stats").total, 0);
}

#[tokio::test]
async fn denial_withholds_even_the_cached_portion() {
    let h = harness(FakeSession::default());
    let premium = tier_for_role("premium");
    let standard = tier_for_role("standard");

    // Exhaust the standard budget, then submit a batch with a cached head
    let batch = urls(12);
    h.cache.put(&batch[0], &cached_listing(&batch[0])).expect("seed");
    assert!(h.limiter.check("9.9.9.9", standard.max_units, standard.window_secs, 10).is_allowed());

    let result = h.service.scrape(&batch, "9.9.9.9", &standard).await;
    assert!(matches!(result, Err(ScrapeError::RateLimited { .. })));

    // The same batch passes under the premium tier for a fresh client
    let ok = h
        .service
        .scrape(&batch, "8.8.8.8", &premium)
        .await
        .expect("scrape");
    assert_eq!(ok.results.len(), 12);
}

#[tokio::test(start_paused = true)]
async fn timed_out_item_fails_alone_and_is_not_cached() {
    let batch = urls(3);
    let session = FakeSession {
        hang_urls: vec![batch[1].clone()],
        ..FakeSession::default()
    };
    let h = harness(session);

    let result = h
        .service
        .scrape(&batch, "1.2.3.4", &tier_for_role("standard"))
        .await
        .expect("scrape");

    assert_eq!(result.failed_urls, vec![batch[1].clone()]);
    assert_eq!(result.results.len(), 2);
    assert_eq!(
        result.message.as_deref(),
        Some("1 link(s) could not be scraped")
    );

    // Cache holds entries only for the URLs that produced records
    assert!(h.cache.get(&batch[0]).expect("get").is_some());
    assert!(h.cache.get(&batch[1]).expect("get").is_none());
    assert!(h.cache.get(&batch[2]).expect("get").is_some());
}

#[tokio::test]
async fn fully_cached_batch_touches_neither_limiter_nor_backend() {
    let h = harness(FakeSession::default());
    let batch = urls(5);
    for url in &batch {
        h.cache.put(url, &cached_listing(url)).expect("seed");
    }

    let result = h
        .service
        .scrape(&batch, "1.2.3.4", &tier_for_role("standard"))
        .await
        .expect("scrape");

    assert_eq!(result.results.len(), batch.len());
    assert!(result.failed_urls.is_empty());
    assert_eq!(h.backend.sessions_opened.load(Ordering::SeqCst), 0);

    // No units were spent: the full budget is still available
    assert!(h.limiter.check("1.2.3.4", 10, 120, 10).is_allowed());
}

#[tokio::test]
async fn extraction_without_identity_counts_as_failure() {
    let h = harness(FakeSession::default());
    let batch = vec![
        "https://www.sgcarmart.com/used-cars/info/listing-1".to_string(),
        "https://www.sgcarmart.com/used-cars/info/no-identity".to_string(),
    ];

    let result = h
        .service
        .scrape(&batch, "1.2.3.4", &tier_for_role("standard"))
        .await
        .expect("scrape");

    assert_eq!(result.results.len(), 1);
    assert_eq!(result.failed_urls, vec![batch[1].clone()]);
    assert!(h.cache.get(&batch[1]).expect("get").is_none());
}

#[tokio::test]
async fn validation_failures_precede_all_side_effects() {
    let h = harness(FakeSession::default());
    let standard = tier_for_role("standard");

    let empty: Vec<String> = Vec::new();
    assert!(matches!(
        h.service.scrape(&empty, "1.2.3.4", &standard).await,
        Err(ScrapeError::Validation(_))
    ));
    assert!(matches!(
        h.service.scrape(&urls(21), "1.2.3.4", &standard).await,
        Err(ScrapeError::Validation(_))
    ));

    assert_eq!(h.backend.sessions_opened.load(Ordering::SeqCst), 0);
    // Nothing was charged against the client
    assert!(h.limiter.check("1.2.3.4", 10, 120, 10).is_allowed());
}

#[tokio::test]
async fn precache_fetches_once_and_spends_one_unit() {
    let h = harness(FakeSession::default());
    let url = "https://www.sgcarmart.com/used-cars/info/listing-1";
    let standard = tier_for_role("standard");

    let status = h
        .service
        .precache(url, "1.2.3.4", &standard)
        .await
        .expect("precache");

    assert_eq!(status, PrecacheStatus::Cached);
    assert!(status.is_cached());
    assert_eq!(h.backend.session.fetches.load(Ordering::SeqCst), 1);
    assert!(h.cache.get(url).expect("get").is_some());

    // Exactly one unit was spent: 9 more fit in the window, 10 do not
    assert!(h.limiter.check("1.2.3.4", 10, 120, 9).is_allowed());
    assert!(!h.limiter.check("1.2.3.4", 10, 120, 10).is_allowed());
}

#[tokio::test]
async fn precache_hit_spends_nothing_and_opens_no_session() {
    let h = harness(FakeSession::default());
    let url = "https://www.sgcarmart.com/used-cars/info/listing-1";
    h.cache.put(url, &cached_listing(url)).expect("seed");

    let status = h
        .service
        .precache(url, "1.2.3.4", &tier_for_role("standard"))
        .await
        .expect("precache");

    assert_eq!(status, PrecacheStatus::AlreadyCached);
    assert!(status.is_cached());
    assert_eq!(h.backend.sessions_opened.load(Ordering::SeqCst), 0);
    assert!(h.limiter.check("1.2.3.4", 10, 120, 10).is_allowed());
}

#[tokio::test]
async fn precache_reports_failures_without_caching() {
    let unreachable = "https://www.sgcarmart.com/used-cars/info/listing-1";
    let no_identity = "https://www.sgcarmart.com/used-cars/info/no-identity";
    let session = FakeSession {
        fail_urls: vec![unreachable.to_string()],
        ..FakeSession::default()
    };
    let h = harness(session);
    let standard = tier_for_role("standard");

    let status = h
        .service
        .precache(unreachable, "1.2.3.4", &standard)
        .await
        .expect("precache");
    assert_eq!(status, PrecacheStatus::FetchFailed);
    assert!(!status.is_cached());

    let status = h
        .service
        .precache(no_identity, "1.2.3.4", &standard)
        .await
        .expect("precache");
    assert_eq!(status, PrecacheStatus::EmptyData);
    assert!(!status.is_cached());

    assert_eq!(h.cache.stats().expect("stats").total, 0);
}

#[tokio::test]
async fn precache_is_gated_by_the_rate_limiter() {
    let h = harness(FakeSession::default());
    let standard = tier_for_role("standard");
    let url = "https://www.sgcarmart.com/used-cars/info/listing-1";

    // Exhaust the standard budget, then try to warm one more URL
    assert!(h
        .limiter
        .check("1.2.3.4", standard.max_units, standard.window_secs, 10)
        .is_allowed());

    let result = h.service.precache(url, "1.2.3.4", &standard).await;
    assert!(matches!(result, Err(ScrapeError::RateLimited { .. })));
    assert_eq!(h.backend.sessions_opened.load(Ordering::SeqCst), 0);
    assert!(h.cache.get(url).expect("get").is_none());
}

#[tokio::test]
async fn precache_rejects_malformed_urls() {
    let h = harness(FakeSession::default());
    let standard = tier_for_role("standard");

    for bad in ["", "not a url", "ftp://example.com/listing"] {
        assert!(matches!(
            h.service.precache(bad, "1.2.3.4", &standard).await,
            Err(ScrapeError::Validation(_))
        ));
    }
    assert_eq!(h.backend.sessions_opened.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn fresh_results_survive_restart_via_the_cache() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("cache.db");
    let batch = urls(2);

    {
        let cache = Arc::new(ListingRepository::new(&db_path).expect("repo"));
        let service = ScrapeService::new(
            cache,
            Arc::new(RateLimiter::new()),
            Arc::new(FakeBackend::new(FakeSession::default())) as Arc<dyn FetchBackend>,
            Arc::new(FakeExtractor),
        );
        service
            .scrape(&batch, "1.2.3.4", &tier_for_role("standard"))
            .await
            .expect("scrape");
    }

    // A new process: fresh repository over the same file, fresh limiter
    let backend = Arc::new(FakeBackend::new(FakeSession::default()));
    let cache = Arc::new(ListingRepository::new(&db_path).expect("repo"));
    let service = ScrapeService::new(
        cache,
        Arc::new(RateLimiter::new()),
        Arc::clone(&backend) as Arc<dyn FetchBackend>,
        Arc::new(FakeExtractor),
    );

    let result = service
        .scrape(&batch, "1.2.3.4", &tier_for_role("standard"))
        .await
        .expect("scrape");

    assert_eq!(result.results.len(), 2);
    assert_eq!(backend.sessions_opened.load(Ordering::SeqCst), 0);
}
