//! Harvester CLI
//!
//! Local execution entry point for the acquisition pipeline.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use harvester::{
    config,
    dataset::Dataset,
    error::Result,
    models::SourceKind,
    pipeline::{CancelFlag, Pipeline, RateLimitedFetcher},
    sources::{ArchiveAdapter, FlickrAdapter, SourceAdapter},
    storage::{CacheStore, JsonCacheStore},
};

/// Exit status for a run that finished with a partial dataset.
const EXIT_PARTIAL: i32 = 2;

/// harvester - Media record acquisition pipeline
#[derive(Parser, Debug)]
#[command(
    name = "harvester",
    version,
    about = "Harvests and reconciles media records from Flickr and the Internet Archive"
)]
struct Cli {
    /// Path to storage directory containing config and cache files
    #[arg(short, long, default_value = "storage")]
    storage_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the acquisition pipeline
    Run {
        /// Discard cached cursors and records, re-fetch from the beginning
        #[arg(long)]
        fresh: bool,

        /// Do not fetch from Flickr this run
        #[arg(long)]
        skip_flickr: bool,

        /// Do not fetch from the Internet Archive this run
        #[arg(long)]
        skip_archive: bool,
    },

    /// Export the committed dataset as a CSV table
    Export {
        /// Output file path
        #[arg(short, long, default_value = "dataset.csv")]
        output: PathBuf,
    },

    /// Validate configuration
    Validate,

    /// Show cache and cursor status
    Info,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    log::info!("Harvester starting...");

    let config = config::load_config(&cli.storage_dir);
    let store = Arc::new(JsonCacheStore::new(&cli.storage_dir, &config.cache));

    match cli.command {
        Command::Run {
            fresh,
            skip_flickr,
            skip_archive,
        } => {
            config.validate()?;

            let mut adapters: Vec<Arc<dyn SourceAdapter>> = Vec::new();
            if config.flickr.enabled && !skip_flickr {
                adapters.push(Arc::new(FlickrAdapter::new(&config.flickr, &config.fetcher)?));
            }
            if config.archive.enabled && !skip_archive {
                adapters.push(Arc::new(ArchiveAdapter::new(
                    &config.archive,
                    &config.fetcher,
                )?));
            }
            if adapters.is_empty() {
                return Err(harvester::error::AppError::config(
                    "All sources disabled; nothing to fetch",
                ));
            }

            let cancel = CancelFlag::new();
            {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        log::warn!("Interrupt received, finishing the current page...");
                        cancel.set();
                    }
                });
            }

            let fetcher = RateLimitedFetcher::new(&config.fetcher);
            let pipeline = Pipeline::new(fetcher, adapters, Arc::clone(&store) as Arc<dyn CacheStore>);
            let report = pipeline.run(fresh, &cancel).await?;

            if report.has_warnings() {
                log::warn!("Run finished with a partial dataset");
                std::process::exit(EXIT_PARTIAL);
            }
        }

        Command::Export { output } => {
            let snapshot = store.load().await?;
            if snapshot.records.is_empty() {
                log::warn!("Cache is empty. Run 'harvester run' first.");
            }

            let dataset = Dataset::from_records(snapshot.records);
            let rows = dataset.write_csv(&output)?;
            log::info!("Exported {} rows to {}", rows, output.display());
        }

        Command::Validate => {
            log::info!("Validating configuration...");
            config.validate()?;
            if config.flickr.enabled && config.flickr.api_key.is_none() {
                log::warn!(
                    "Flickr is enabled but no API key is configured (set [flickr] api_key or FLICKR_API_KEY)"
                );
            }
            log::info!("All validations passed!");
        }

        Command::Info => {
            log::info!("Storage directory: {}", cli.storage_dir.display());

            let snapshot = store.load().await?;
            log::info!("Records in cache: {}", snapshot.records.len());

            for source in SourceKind::ALL {
                match snapshot.cursors.iter().find(|c| c.source == source) {
                    Some(cursor) => log::info!(
                        "  {}: {} (last success: {})",
                        source,
                        if cursor.completed {
                            "completed".to_string()
                        } else {
                            format!("in progress at token {:?}", cursor.token)
                        },
                        cursor
                            .last_success_at
                            .map(|t| t.to_rfc3339())
                            .unwrap_or_else(|| "never".to_string())
                    ),
                    None => log::info!("  {}: not started", source),
                }
            }
        }
    }

    log::info!("Done!");

    Ok(())
}
