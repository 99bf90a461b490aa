//! Configuration for the CarMetrics backend.

use std::path::{Path, PathBuf};

/// Cached listings older than this are treated as absent at read time.
pub const CACHE_TTL_HOURS: i64 = 72;

/// Hard ceiling on URLs per scrape batch.
pub const MAX_BATCH_URLS: usize = 20;

/// Concurrent in-flight browser fetches per batch.
pub const FETCH_CONCURRENCY: usize = 3;

/// Hard per-URL fetch timeout in seconds.
pub const FETCH_TIMEOUT_SECS: u64 = 30;

/// How long to wait for the listing detail container before giving up
/// and taking whatever content is present. Non-fatal on timeout.
pub const READY_WAIT_SECS: u64 = 2;

/// Selector that signals the listing detail blocks have rendered.
pub const READY_SELECTOR: &str = "div[class*='styles_titleContainer__']";

/// Rate-limit tier: a units budget over a sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateTier {
    pub name: &'static str,
    /// Maximum uncached URLs a client may submit within the window.
    pub max_units: u32,
    pub window_secs: u64,
}

const STANDARD_TIER: RateTier = RateTier {
    name: "standard",
    max_units: 10,
    window_secs: 120,
};

const PREMIUM_TIER: RateTier = RateTier {
    name: "premium",
    max_units: 20,
    window_secs: 120,
};

/// Map a caller role to its tier. Unknown roles get the standard tier.
pub fn tier_for_role(role: &str) -> RateTier {
    match role.to_ascii_lowercase().as_str() {
        "premium" => PREMIUM_TIER,
        _ => STANDARD_TIER,
    }
}

/// Runtime settings, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Directory holding the cache database.
    pub data_dir: PathBuf,
    /// Run the browser without a visible window.
    pub headless: bool,
}

impl Settings {
    /// Resolve settings, preferring an explicit data directory, then
    /// `CARMETRICS_DATA_DIR`, then the platform data dir.
    pub fn load(data_dir: Option<&Path>) -> Self {
        let data_dir = data_dir
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("CARMETRICS_DATA_DIR").map(PathBuf::from))
            .unwrap_or_else(default_data_dir);

        Self {
            data_dir,
            headless: true,
        }
    }

    /// Path of the listing cache database.
    pub fn cache_db_path(&self) -> PathBuf {
        self.data_dir.join("cache.db")
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("carmetrics"))
        .unwrap_or_else(|| PathBuf::from("data"))
}
