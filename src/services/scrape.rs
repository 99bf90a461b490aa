//! The scrape pipeline: cache-aside, rate-limited, batched fetching.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use url::Url;

use crate::config::{RateTier, FETCH_CONCURRENCY, FETCH_TIMEOUT_SECS, MAX_BATCH_URLS};
use crate::error::ScrapeError;
use crate::models::{BatchResult, CarListing};
use crate::rate_limit::{Admission, RateLimiter};
use crate::repository::CacheStore;
use crate::scrapers::{Extractor, FetchBackend, FetchOrchestrator};

/// Outcome of warming the cache for a single URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrecacheStatus {
    /// A live entry already existed; nothing was fetched.
    AlreadyCached,
    /// The listing was fetched, extracted, and written to the cache.
    Cached,
    /// The fetch failed; nothing was cached.
    FetchFailed,
    /// The page fetched but yielded no usable record.
    EmptyData,
}

impl PrecacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrecacheStatus::AlreadyCached => "already_cached",
            PrecacheStatus::Cached => "cached",
            PrecacheStatus::FetchFailed => "scrape_failed",
            PrecacheStatus::EmptyData => "empty_data",
        }
    }

    /// Whether a live cache entry exists after the call.
    pub fn is_cached(&self) -> bool {
        matches!(self, PrecacheStatus::AlreadyCached | PrecacheStatus::Cached)
    }
}

/// Composes the cache store, rate limiter, and fetch orchestrator into
/// the single externally visible scrape operation.
///
/// Construct once at startup; all collaborators are injected handles,
/// shared across calls via `Arc`.
pub struct ScrapeService {
    cache: Arc<dyn CacheStore>,
    limiter: Arc<RateLimiter>,
    orchestrator: FetchOrchestrator,
    extractor: Arc<dyn Extractor>,
}

impl ScrapeService {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        limiter: Arc<RateLimiter>,
        backend: Arc<dyn FetchBackend>,
        extractor: Arc<dyn Extractor>,
    ) -> Self {
        Self {
            cache,
            limiter,
            orchestrator: FetchOrchestrator::new(
                backend,
                FETCH_CONCURRENCY,
                Duration::from_secs(FETCH_TIMEOUT_SECS),
            ),
            extractor,
        }
    }

    /// Scrape a batch of listing URLs on behalf of `client_key`.
    ///
    /// Cached listings are returned without spending rate-limit units;
    /// only the uncached remainder is gated. A denied admission fails
    /// the whole call, cached portion included - the caller retries the
    /// full batch after `retry_after_secs`.
    pub async fn scrape(
        &self,
        urls: &[String],
        client_key: &str,
        tier: &RateTier,
    ) -> Result<BatchResult, ScrapeError> {
        validate_batch(urls)?;

        // Cache-aside: split into hits and URLs that need fetching
        let mut cached: Vec<CarListing> = Vec::new();
        let mut uncached: Vec<String> = Vec::new();
        for url in urls {
            match self.cache.get(url)? {
                Some(listing) => cached.push(listing),
                None => uncached.push(url.clone()),
            }
        }

        let mut fresh: Vec<CarListing> = Vec::new();
        let mut failed_urls: Vec<String> = Vec::new();

        if !uncached.is_empty() {
            match self.limiter.check(
                client_key,
                tier.max_units,
                tier.window_secs,
                uncached.len() as u32,
            ) {
                Admission::Denied { retry_after_secs } => {
                    return Err(ScrapeError::RateLimited { retry_after_secs });
                }
                Admission::Allowed => {}
            }

            let outcomes = self
                .orchestrator
                .fetch_batch(&uncached)
                .await
                .map_err(ScrapeError::Backend)?;

            for (url, outcome) in outcomes {
                match outcome {
                    Ok(html) => {
                        let listing = self.extractor.extract(&html, &url);
                        if listing.has_identity() {
                            self.cache.put(&url, &listing)?;
                            fresh.push(listing);
                        } else {
                            warn!(%url, "extraction produced no usable record");
                            failed_urls.push(url);
                        }
                    }
                    Err(_) => failed_urls.push(url),
                }
            }
        }

        info!(
            client = client_key,
            tier = tier.name,
            total = urls.len(),
            cached = cached.len(),
            fetched = fresh.len(),
            failed = failed_urls.len(),
            "scrape batch finished"
        );

        let message = if failed_urls.is_empty() {
            None
        } else {
            Some(format!(
                "{} link(s) could not be scraped",
                failed_urls.len()
            ))
        };

        // Cache hits first, then freshly extracted records
        let mut results = cached;
        results.extend(fresh);

        Ok(BatchResult {
            results,
            failed_urls,
            message,
        })
    }

    /// Warm the cache for a single URL on behalf of `client_key`.
    ///
    /// A live entry short-circuits without spending any rate-limit
    /// units; otherwise the fetch is gated as a one-unit request under
    /// `tier`. A failed fetch or an unusable record is reported in the
    /// status rather than as an error - only validation, rate limiting,
    /// and infrastructure failures abort the call.
    pub async fn precache(
        &self,
        url: &str,
        client_key: &str,
        tier: &RateTier,
    ) -> Result<PrecacheStatus, ScrapeError> {
        let batch = [url.to_string()];
        validate_batch(&batch)?;

        if self.cache.get(url)?.is_some() {
            info!(%url, "precache hit, already cached");
            return Ok(PrecacheStatus::AlreadyCached);
        }

        match self
            .limiter
            .check(client_key, tier.max_units, tier.window_secs, 1)
        {
            Admission::Denied { retry_after_secs } => {
                return Err(ScrapeError::RateLimited { retry_after_secs });
            }
            Admission::Allowed => {}
        }

        let outcomes = self
            .orchestrator
            .fetch_batch(&batch)
            .await
            .map_err(ScrapeError::Backend)?;

        let status = match outcomes.into_iter().next() {
            Some((_, Ok(html))) => {
                let listing = self.extractor.extract(&html, url);
                if listing.has_identity() {
                    self.cache.put(url, &listing)?;
                    PrecacheStatus::Cached
                } else {
                    warn!(%url, "precache extraction produced no usable record");
                    PrecacheStatus::EmptyData
                }
            }
            _ => PrecacheStatus::FetchFailed,
        };

        info!(%url, client = client_key, status = status.as_str(), "precache finished");
        Ok(status)
    }
}

fn validate_batch(urls: &[String]) -> Result<(), ScrapeError> {
    if urls.is_empty() {
        return Err(ScrapeError::Validation(
            "URL list cannot be empty".to_string(),
        ));
    }
    if urls.len() > MAX_BATCH_URLS {
        return Err(ScrapeError::Validation(format!(
            "URL batch exceeds limit of {MAX_BATCH_URLS}"
        )));
    }
    for url in urls {
        let parsed = Url::parse(url)
            .map_err(|e| ScrapeError::Validation(format!("invalid URL {url}: {e}")))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(ScrapeError::Validation(format!(
                "unsupported URL scheme in {url}"
            )));
        }
    }
    Ok(())
}
