//! SQLite-backed listing cache.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

use super::{CacheStore, Result};
use crate::config::CACHE_TTL_HOURS;
use crate::models::CarListing;

/// SQLite-backed cache of extracted listings, keyed by exact URL.
///
/// Each operation opens its own connection; the upsert is a single
/// `INSERT .. ON CONFLICT DO UPDATE` statement, so concurrent writers
/// on the same key resolve to whichever commit lands last.
pub struct ListingRepository {
    db_path: PathBuf,
}

/// Row counts for the cache database.
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    pub total: u64,
    /// Rows still younger than the TTL.
    pub live: u64,
}

impl ListingRepository {
    /// Open (and create if needed) the cache database at `db_path`.
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    rusqlite::Error::SqliteFailure(
                        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
                        Some(format!("creating {}: {}", parent.display(), e)),
                    )
                })?;
            }
        }

        let repo = Self {
            db_path: db_path.to_path_buf(),
        };
        repo.init_schema()?;
        Ok(repo)
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(conn)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS listings (
                url        TEXT PRIMARY KEY,
                data       TEXT NOT NULL,
                scraped_at TEXT NOT NULL
            )",
        )?;
        Ok(())
    }

    /// Count total and live rows.
    pub fn stats(&self) -> Result<CacheStats> {
        let conn = self.connect()?;
        let total: u64 =
            conn.query_row("SELECT COUNT(*) FROM listings", [], |row| row.get(0))?;
        let cutoff = (Utc::now() - Duration::hours(CACHE_TTL_HOURS)).to_rfc3339();
        let live: u64 = conn.query_row(
            "SELECT COUNT(*) FROM listings WHERE scraped_at > ?",
            params![cutoff],
            |row| row.get(0),
        )?;
        Ok(CacheStats { total, live })
    }
}

impl CacheStore for ListingRepository {
    fn get(&self, url: &str) -> Result<Option<CarListing>> {
        let conn = self.connect()?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT data, scraped_at FROM listings WHERE url = ?",
                params![url],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((data, scraped_at)) = row else {
            return Ok(None);
        };

        let scraped_at = match DateTime::parse_from_rfc3339(&scraped_at) {
            Ok(dt) => dt.with_timezone(&Utc),
            Err(e) => {
                warn!(url, error = %e, "unreadable scraped_at, treating as miss");
                return Ok(None);
            }
        };

        if Utc::now() - scraped_at > Duration::hours(CACHE_TTL_HOURS) {
            return Ok(None);
        }

        match serde_json::from_str(&data) {
            Ok(listing) => Ok(Some(listing)),
            Err(e) => {
                warn!(url, error = %e, "unreadable cached listing, treating as miss");
                Ok(None)
            }
        }
    }

    fn put(&self, url: &str, listing: &CarListing) -> Result<()> {
        let data = serde_json::to_string(listing)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO listings (url, data, scraped_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(url) DO UPDATE SET
                 data = excluded.data,
                 scraped_at = excluded.scraped_at",
            params![url, data, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_repo() -> (tempfile::TempDir, ListingRepository) {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = ListingRepository::new(&dir.path().join("cache.db")).expect("open repo");
        (dir, repo)
    }

    fn listing(url: &str) -> CarListing {
        CarListing {
            model: "Toyota Yaris Cross 1.5A".to_string(),
            url: url.to_string(),
            price: Some(123_800.0),
            ..CarListing::default()
        }
    }

    #[test]
    fn round_trip_within_ttl() {
        let (_dir, repo) = temp_repo();
        let url = "https://www.sgcarmart.com/used-cars/info/toyota-yaris-cross-15a-1411501";
        repo.put(url, &listing(url)).expect("put");
        let got = repo.get(url).expect("get").expect("hit");
        assert_eq!(got, listing(url));
    }

    #[test]
    fn miss_on_absent_key() {
        let (_dir, repo) = temp_repo();
        assert!(repo.get("https://example.com/none").expect("get").is_none());
    }

    #[test]
    fn expired_row_reads_as_miss_but_stays_present() {
        let (dir, repo) = temp_repo();
        let url = "https://example.com/expired";
        repo.put(url, &listing(url)).expect("put");

        // Backdate the row just past the TTL
        let stale = (Utc::now() - Duration::hours(CACHE_TTL_HOURS) - Duration::seconds(1))
            .to_rfc3339();
        let conn = Connection::open(dir.path().join("cache.db")).expect("open");
        conn.execute(
            "UPDATE listings SET scraped_at = ? WHERE url = ?",
            params![stale, url],
        )
        .expect("backdate");

        assert!(repo.get(url).expect("get").is_none());
        let stats = repo.stats().expect("stats");
        assert_eq!(stats.total, 1);
        assert_eq!(stats.live, 0);
    }

    #[test]
    fn put_overwrites_and_refreshes_timestamp() {
        let (_dir, repo) = temp_repo();
        let url = "https://example.com/overwrite";
        repo.put(url, &listing(url)).expect("put");

        let mut updated = listing(url);
        updated.price = Some(99_000.0);
        repo.put(url, &updated).expect("put again");

        let got = repo.get(url).expect("get").expect("hit");
        assert_eq!(got.price, Some(99_000.0));
        assert_eq!(repo.stats().expect("stats").total, 1);
    }

    #[test]
    fn keys_are_exact_strings() {
        let (_dir, repo) = temp_repo();
        repo.put("https://example.com/a?x=1&y=2", &listing("a"))
            .expect("put");
        // Same parameters, different order: distinct key by design
        assert!(repo
            .get("https://example.com/a?y=2&x=1")
            .expect("get")
            .is_none());
    }
}
