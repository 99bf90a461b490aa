//! Error types for the scrape pipeline.

use thiserror::Error;

/// Whole-call failures for a scrape batch.
///
/// Per-URL problems (fetch timeouts, extraction misses) never surface
/// here; they are absorbed into `BatchResult::failed_urls`.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// Bad batch shape: empty, over the hard ceiling, or unusable URLs.
    #[error("{0}")]
    Validation(String),
    /// Admission denied by the rate limiter.
    #[error("rate limit exceeded, try again in {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },
    /// Cache database unavailable or misbehaving.
    #[error("cache store error: {0}")]
    Storage(#[from] rusqlite::Error),
    /// The fetching backend could not be brought up for the batch.
    #[error("fetch backend error: {0}")]
    Backend(#[source] anyhow::Error),
}

/// Per-URL fetch failures. Terminal for the URL within one batch call;
/// retrying is the caller's decision.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetch timed out after {0}s")]
    Timeout(u64),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("transport error: {0}")]
    Transport(String),
}
