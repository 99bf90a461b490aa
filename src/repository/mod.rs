//! Repository layer for cache persistence.

mod listing;

pub use listing::{CacheStats, ListingRepository};

use crate::models::CarListing;

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, rusqlite::Error>;

/// Keyed, TTL-bounded store for previously extracted listings.
///
/// Keys are exact URL strings; no normalization is applied, so two
/// URLs differing only in query-parameter order are distinct entries.
/// Expiry is enforced at read time only; stale rows stay on disk until
/// a later `put` overwrites them.
pub trait CacheStore: Send + Sync {
    /// Return the stored listing if present and younger than the TTL.
    /// A stale or unreadable row reads as a miss and is not mutated.
    fn get(&self, url: &str) -> Result<Option<CarListing>>;

    /// Insert or overwrite the entry for `url`, stamping it with the
    /// current time. Last write wins.
    fn put(&self, url: &str, listing: &CarListing) -> Result<()>;
}
