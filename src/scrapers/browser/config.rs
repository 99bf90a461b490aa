//! Browser engine configuration.

use crate::config::{FETCH_TIMEOUT_SECS, READY_SELECTOR, READY_WAIT_SECS};

/// Options for the Chromium-backed fetch backend.
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    /// Run without a visible window.
    pub headless: bool,
    /// Per-navigation timeout in seconds.
    pub timeout_secs: u64,
    /// Selector to wait for after navigation; timing out on this wait
    /// is non-fatal and the page content is taken as-is.
    pub ready_selector: Option<String>,
    /// How long to wait for the ready selector.
    pub ready_wait_secs: u64,
    /// Extra Chrome command-line arguments.
    pub chrome_args: Vec<String>,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: true,
            timeout_secs: FETCH_TIMEOUT_SECS,
            ready_selector: Some(READY_SELECTOR.to_string()),
            ready_wait_secs: READY_WAIT_SECS,
            chrome_args: Vec::new(),
        }
    }
}
