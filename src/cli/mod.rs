//! Command-line interface for CarMetrics.

mod commands;

pub use commands::{is_verbose, run};
