//! CarMetrics - used-car listing scrape backend.
//!
//! Fetches structured listing records from SGCarMart pages with a
//! cache-aside SQLite store, per-client sliding-window rate limiting,
//! and bounded-concurrency browser fetching.

pub mod cli;
pub mod config;
pub mod error;
pub mod models;
pub mod rate_limit;
pub mod repository;
pub mod scrapers;
pub mod server;
pub mod services;

pub use error::{FetchError, ScrapeError};
pub use models::{BatchResult, CarListing};
