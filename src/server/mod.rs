//! HTTP surface for the scrape pipeline.
//!
//! Thin JSON layer: batch scrape and single-URL cache-warming
//! endpoints plus a liveness probe. All orchestration lives in
//! [`crate::services::ScrapeService`].

mod handlers;
mod routes;

pub use routes::create_router;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::Settings;
use crate::rate_limit::RateLimiter;
use crate::repository::ListingRepository;
use crate::scrapers::browser::{BrowserBackend, BrowserOptions};
use crate::scrapers::SgcarmartExtractor;
use crate::services::ScrapeService;

/// Shared state for the web server.
#[derive(Clone)]
pub struct AppState {
    pub scrape_service: Arc<ScrapeService>,
}

impl AppState {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        let cache = Arc::new(ListingRepository::new(&settings.cache_db_path())?);
        let backend = Arc::new(BrowserBackend::new(BrowserOptions {
            headless: settings.headless,
            ..BrowserOptions::default()
        }));

        let scrape_service = Arc::new(ScrapeService::new(
            cache,
            Arc::new(RateLimiter::new()),
            backend,
            Arc::new(SgcarmartExtractor::new()),
        ));

        Ok(Self { scrape_service })
    }
}

/// Start the web server.
pub async fn serve(settings: &Settings, host: &str, port: u16) -> anyhow::Result<()> {
    let state = AppState::new(settings)?;
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
