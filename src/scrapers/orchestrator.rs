//! Bounded-concurrency batch fetching.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::{FetchBackend, PageSession};
use crate::error::FetchError;

/// Result of fetching one URL: rendered HTML or a terminal failure.
pub type FetchOutcome = Result<String, FetchError>;

/// Executes a batch of fetches against a fetching backend with a hard
/// concurrency cap and per-item failure isolation.
///
/// One backend session is opened per batch and released exactly once
/// when every item has completed. A single item's timeout or error is
/// recorded against that item only and never cancels its siblings.
pub struct FetchOrchestrator {
    backend: Arc<dyn FetchBackend>,
    concurrency: usize,
    fetch_timeout: Duration,
}

impl FetchOrchestrator {
    pub fn new(backend: Arc<dyn FetchBackend>, concurrency: usize, fetch_timeout: Duration) -> Self {
        Self {
            backend,
            concurrency,
            fetch_timeout,
        }
    }

    /// Fetch every URL in `urls`, returning one outcome per URL in
    /// input order regardless of completion order.
    ///
    /// Errors only when the backend session cannot be opened at all;
    /// individual fetch failures are folded into the outcomes.
    pub async fn fetch_batch(&self, urls: &[String]) -> anyhow::Result<Vec<(String, FetchOutcome)>> {
        if urls.is_empty() {
            return Ok(Vec::new());
        }

        let session = self.backend.open_session().await?;
        debug!(batch = urls.len(), concurrency = self.concurrency, "fetch batch started");

        // run_batch is infallible, so the session is always closed
        let outcomes = self.run_batch(Arc::clone(&session), urls).await;
        session.close().await;

        Ok(outcomes)
    }

    async fn run_batch(
        &self,
        session: Arc<dyn PageSession>,
        urls: &[String],
    ) -> Vec<(String, FetchOutcome)> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        let mut handles = Vec::with_capacity(urls.len());
        for url in urls {
            let url = url.clone();
            let session = Arc::clone(&session);
            let semaphore = Arc::clone(&semaphore);
            let timeout = self.fetch_timeout;

            handles.push(tokio::spawn(async move {
                // The permit is held across the whole fetch and dropped
                // on every exit path, so failures cannot leak a slot.
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return Err(FetchError::Transport("fetch pool shut down".to_string()))
                    }
                };

                match tokio::time::timeout(timeout, session.fetch(&url)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(FetchError::Timeout(timeout.as_secs())),
                }
            }));
        }

        // Join every task unconditionally; collect an outcome per URL
        let mut outcomes = Vec::with_capacity(urls.len());
        for (url, handle) in urls.iter().zip(handles) {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => Err(FetchError::Transport(format!("fetch task panicked: {e}"))),
            };
            if let Err(ref e) = outcome {
                warn!(%url, error = %e, "fetch failed");
            }
            outcomes.push((url.clone(), outcome));
        }
        outcomes
    }
}
