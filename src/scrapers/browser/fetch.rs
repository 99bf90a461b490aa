//! Page fetch methods for an open browser session.

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::error::CdpError;
use chromiumoxide::{Browser, Page};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::BrowserOptions;
use crate::error::FetchError;
use crate::scrapers::PageSession;

/// User agent presented to listing pages.
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// An open Chromium session. Each fetch opens a fresh tab and closes
/// it before returning.
pub struct BrowserSession {
    browser: Mutex<Browser>,
    options: BrowserOptions,
}

impl BrowserSession {
    pub fn new(browser: Browser, options: BrowserOptions) -> Self {
        Self {
            browser: Mutex::new(browser),
            options,
        }
    }

    /// Inner fetch logic - page cleanup handled by the caller.
    async fn fetch_inner(&self, page: &Page, url: &str) -> Result<String, FetchError> {
        // Realistic user agent before any navigation
        page.execute(SetUserAgentOverrideParams::new(
            BROWSER_USER_AGENT.to_string(),
        ))
        .await
        .map_err(transport)?;

        self.navigate(page, url).await?;

        // Wait briefly for the detail blocks to render; a timeout here
        // is non-fatal and we take whatever content is present
        if let Some(ref selector) = self.options.ready_selector {
            let wait = Duration::from_secs(self.options.ready_wait_secs);
            match tokio::time::timeout(wait, page.find_element(selector.as_str())).await {
                Ok(Ok(_)) => debug!("Ready selector found"),
                Ok(Err(e)) => debug!("Ready selector not found: {}", e),
                Err(_) => debug!("Timeout waiting for ready selector"),
            }
        }

        page.content().await.map_err(transport)
    }

    async fn navigate(&self, page: &Page, url: &str) -> Result<(), FetchError> {
        debug!("Navigating to {}", url);
        let nav_params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(|e| FetchError::Navigation(format!("invalid URL {url}: {e}")))?;

        let nav_timeout = Duration::from_secs(self.options.timeout_secs);
        tokio::time::timeout(nav_timeout, page.execute(nav_params))
            .await
            .map_err(|_| FetchError::Timeout(self.options.timeout_secs))?
            .map_err(|e| FetchError::Navigation(format!("navigation failed for {url}: {e}")))?;

        Ok(())
    }
}

fn transport(e: CdpError) -> FetchError {
    FetchError::Transport(e.to_string())
}

#[async_trait]
impl PageSession for BrowserSession {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let page = {
            let browser = self.browser.lock().await;
            browser.new_page("about:blank").await.map_err(transport)?
        };

        // Inner function so the tab is closed on every path
        let result = self.fetch_inner(&page, url).await;
        if let Err(e) = page.close().await {
            warn!("Failed to close page: {}", e);
        }
        result
    }

    async fn close(&self) {
        let mut browser = self.browser.lock().await;
        if let Err(e) = browser.close().await {
            warn!("Failed to close browser: {}", e);
        }
    }
}
