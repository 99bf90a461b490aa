//! Application services.

pub mod scrape;

pub use scrape::{PrecacheStatus, ScrapeService};
