//! Page fetching and listing extraction.

pub mod browser;
mod extract;
mod orchestrator;

pub use extract::{Extractor, SgcarmartExtractor};
pub use orchestrator::{FetchOrchestrator, FetchOutcome};

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::FetchError;

/// An open fetching session: one browser context reused across a batch.
#[async_trait]
pub trait PageSession: Send + Sync {
    /// Fetch the rendered HTML of `url`.
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;

    /// Release the session's resources. Called exactly once per batch,
    /// on success and on partial failure alike.
    async fn close(&self);
}

/// Opens fetching sessions. One session is acquired per batch call and
/// never shared across concurrent batches.
#[async_trait]
pub trait FetchBackend: Send + Sync {
    async fn open_session(&self) -> anyhow::Result<Arc<dyn PageSession>>;
}
