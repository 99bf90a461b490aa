//! CLI commands implementation.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use crate::config::{tier_for_role, Settings};
use crate::rate_limit::RateLimiter;
use crate::repository::{CacheStore, ListingRepository};
use crate::scrapers::browser::{BrowserBackend, BrowserOptions};
use crate::scrapers::SgcarmartExtractor;
use crate::server;
use crate::services::ScrapeService;

#[derive(Parser)]
#[command(name = "carmetrics")]
#[command(about = "Used-car listing scrape backend with caching and rate limiting")]
#[command(version)]
pub struct Cli {
    /// Data directory holding the cache database (overrides CARMETRICS_DATA_DIR)
    #[arg(long, short = 'd', global = true)]
    data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run the browser with a visible window (debugging)
    #[arg(long, global = true)]
    headed: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Port to bind
        #[arg(short, long, default_value = "8000")]
        port: u16,
    },

    /// Scrape a batch of listing URLs from the terminal
    Scrape {
        /// Listing URLs to fetch
        urls: Vec<String>,
        /// Rate-limit tier to scrape under
        #[arg(long, default_value = "standard")]
        role: String,
    },

    /// Inspect the listing cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Show row counts for the cache database
    Stats,
    /// Print the cached record for a URL, if live
    Get { url: String },
}

/// Parse arguments and run the selected command.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.data_dir.as_deref());
    if cli.headed {
        settings.headless = false;
    }

    match cli.command {
        Commands::Serve { host, port } => server::serve(&settings, &host, port).await,
        Commands::Scrape { urls, role } => scrape_once(&settings, &urls, &role).await,
        Commands::Cache { command } => match command {
            CacheCommands::Stats => cache_stats(&settings),
            CacheCommands::Get { url } => cache_get(&settings, &url),
        },
    }
}

/// One-off batch scrape, printed as JSON.
async fn scrape_once(settings: &Settings, urls: &[String], role: &str) -> anyhow::Result<()> {
    let cache = Arc::new(ListingRepository::new(&settings.cache_db_path())?);
    let backend = Arc::new(BrowserBackend::new(BrowserOptions {
        headless: settings.headless,
        ..BrowserOptions::default()
    }));
    let service = ScrapeService::new(
        cache,
        Arc::new(RateLimiter::new()),
        backend,
        Arc::new(SgcarmartExtractor::new()),
    );

    let batch = service
        .scrape(urls, "local", &tier_for_role(role))
        .await
        .context("scrape failed")?;

    println!("{}", serde_json::to_string_pretty(&batch)?);
    if !batch.failed_urls.is_empty() {
        anyhow::bail!("{} URL(s) failed", batch.failed_urls.len());
    }
    Ok(())
}

fn cache_stats(settings: &Settings) -> anyhow::Result<()> {
    let repo = ListingRepository::new(&settings.cache_db_path())?;
    let stats = repo.stats()?;
    println!(
        "{} cached listing(s), {} live ({})",
        stats.total,
        stats.live,
        settings.cache_db_path().display()
    );
    Ok(())
}

fn cache_get(settings: &Settings, url: &str) -> anyhow::Result<()> {
    let repo = ListingRepository::new(&settings.cache_db_path())?;
    match repo.get(url)? {
        Some(listing) => println!("{}", serde_json::to_string_pretty(&listing)?),
        None => anyhow::bail!("no live cache entry for {url}"),
    }
    Ok(())
}
