//! Domain models.

mod listing;

pub use listing::{BatchResult, CarListing};
