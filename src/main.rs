//! bibharvest - OpenAlex harvesting pipeline
//!
//! Scrapes open-access works from OpenAlex, skips journals already in the
//! database (by ISSN), and stores the batch in MongoDB and/or JSON/CSV files
//! for the dashboard.
//!
//! ## Usage
//!
//! ```bash
//! bibharvest scrape --target 100 --json ./data/scraped_papers.json
//! bibharvest scrape --mode paged --year 2024 --keyword machine-learning --csv papers.csv
//! bibharvest format --project Project/ --output ./processed
//! ```

use anyhow::{Context, Result};
use bibharvest::config::Settings;
use bibharvest::dedup::{DedupIndex, DedupMode};
use bibharvest::format;
use bibharvest::openalex::{OpenAlexClient, MAX_PER_PAGE};
use bibharvest::persist::{Destinations, PersistenceGateway};
use bibharvest::scraper::{
    RetrievalMode, ScrapeRequest, Scraper, DEFAULT_MAX_FAILURE_STREAK, DEFAULT_MAX_REQUESTS,
};
use bibharvest::store::{DocumentStore, MemoryStore, MongoStore};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// OpenAlex harvesting pipeline
#[derive(Parser)]
#[command(name = "bibharvest")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape works from OpenAlex and persist the new ones
    Scrape {
        /// Keyword id to filter by (repeatable, OR-ed)
        #[arg(long = "keyword")]
        keywords: Vec<String>,

        /// Number of papers to collect (required in sample mode)
        #[arg(long)]
        target: Option<usize>,

        /// Results per request (1-200); also the sample size
        #[arg(long, default_value_t = MAX_PER_PAGE)]
        per_page: usize,

        /// Retrieval mode: sample or paged
        #[arg(long, default_value = "sample")]
        mode: RetrievalMode,

        /// ISSN deduplication: strict, lenient or off
        #[arg(long, default_value = "strict")]
        dedup: DedupMode,

        /// Restrict to a publication year
        #[arg(long)]
        year: Option<i32>,

        /// Write the raw batch as indented JSON
        #[arg(long)]
        json: Option<PathBuf>,

        /// Write the flattened batch as CSV
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Write timestamped JSON and CSV files into this directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Do not insert the batch into MongoDB
        #[arg(long)]
        no_store: bool,

        /// Run without MongoDB (snapshot-only dedup, files only)
        #[arg(long)]
        offline: bool,

        /// ISSN snapshot file (overrides ISSN_SNAPSHOT)
        #[arg(long)]
        snapshot: Option<PathBuf>,

        /// Consecutive failed requests before giving up
        #[arg(long, default_value_t = DEFAULT_MAX_FAILURE_STREAK)]
        max_failures: u32,

        /// Upper bound on requests for the run
        #[arg(long, default_value_t = DEFAULT_MAX_REQUESTS)]
        max_requests: usize,
    },

    /// Flatten year folders of downloaded records into CSV files
    Format {
        /// Directory with one sub-directory per year
        #[arg(long, default_value = "Project")]
        project: PathBuf,

        /// Directory for processed_data_<year>.csv
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },

    /// Upload a JSON or CSV file into a collection
    Import {
        /// File to upload (.json or .csv)
        file: PathBuf,

        /// Target collection (defaults to the works collection)
        #[arg(long)]
        collection: Option<String>,
    },

    /// Show stored documents from both collections
    Preview {
        /// Documents per collection
        #[arg(long, default_value_t = 100)]
        limit: i64,
    },
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .init();

    let mut settings = Settings::from_env().context("Failed to load configuration")?;

    match cli.command {
        Commands::Scrape {
            keywords,
            target,
            per_page,
            mode,
            dedup,
            year,
            json,
            csv,
            output,
            no_store,
            offline,
            snapshot,
            max_failures,
            max_requests,
        } => {
            if let Some(snapshot) = snapshot {
                settings.snapshot_path = snapshot;
            }
            let request = ScrapeRequest {
                keyword_ids: keywords,
                publication_year: year,
                target_count: target,
                per_page,
                mode,
                dedup,
                max_failure_streak: max_failures,
                max_requests,
            };
            let mut destinations = Destinations {
                store: !no_store && !offline,
                json_path: json,
                csv_path: csv,
            };
            if let Some(dir) = output {
                let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
                destinations
                    .json_path
                    .get_or_insert_with(|| dir.join(format!("scraped_papers_{}.json", stamp)));
                destinations
                    .csv_path
                    .get_or_insert_with(|| dir.join(format!("scraped_papers_{}.csv", stamp)));
            }
            run_scrape(&settings, &request, &destinations, offline).await
        }
        Commands::Format { project, output } => run_format(project, output),
        Commands::Import { file, collection } => {
            let store = MongoStore::connect(&settings).await?;
            let gateway = PersistenceGateway::new(&store, &settings);
            let collection = collection.unwrap_or_else(|| settings.works_collection.clone());
            let inserted = gateway
                .import_file(&file, &collection)
                .await
                .with_context(|| format!("Error uploading {} to {}", file.display(), collection))?;
            println!("Successfully uploaded {} records to {}.", inserted, collection);
            Ok(())
        }
        Commands::Preview { limit } => {
            let store = MongoStore::connect(&settings).await?;
            let gateway = PersistenceGateway::new(&store, &settings);
            let (works, legacy) = gateway.preview(limit).await.context("Failed to read collections")?;
            let mut body = serde_json::Map::new();
            body.insert(settings.works_collection.clone(), works.into());
            body.insert(settings.legacy_collection.clone(), legacy.into());
            println!("{}", serde_json::to_string_pretty(&body)?);
            Ok(())
        }
    }
}

// ============================================================================
// Scrape Pipeline
// ============================================================================

async fn run_scrape(
    settings: &Settings,
    request: &ScrapeRequest,
    destinations: &Destinations,
    offline: bool,
) -> Result<()> {
    // Validate before touching the store or the network
    request.validate()?;

    let store: Box<dyn DocumentStore> = if offline {
        info!("Offline run: using an in-memory store");
        Box::new(MemoryStore::new())
    } else {
        Box::new(MongoStore::connect(settings).await?)
    };

    let index = if request.dedup == DedupMode::Off {
        DedupIndex::new()
    } else {
        DedupIndex::load(store.as_ref(), settings).await
    };
    println!("Loaded {} known ISSNs.", index.len());

    let client = OpenAlexClient::new(settings)?;
    let outcome = Scraper::new(&client, &index).run(request).await?;
    println!(
        "Found {} papers with new ISSNs ({} requests, {} duplicates dropped, {}).",
        outcome.records.len(),
        outcome.requests,
        outcome.dropped,
        outcome.stop_reason
    );

    let gateway = PersistenceGateway::new(store.as_ref(), settings);
    let report = gateway.save(&outcome.records, destinations).await;
    if let Some(count) = report.stored {
        println!("Stored {} records in {}.", count, settings.works_collection);
    }
    if let Some(path) = &report.json_path {
        println!("Saved: {}", path.display());
    }
    if let Some(path) = &report.csv_path {
        println!("Saved: {}", path.display());
    }
    for err in &report.errors {
        warn!(error = %err, "Persistence failed");
        println!("Persistence failed: {}", err);
    }

    if outcome.stop_reason.is_abnormal() {
        anyhow::bail!("Scrape stopped early: {}", outcome.stop_reason);
    }
    Ok(())
}

// ============================================================================
// Record Formatting
// ============================================================================

fn run_format(project: PathBuf, output: PathBuf) -> Result<()> {
    std::fs::create_dir_all(&output).context("Failed to create output directory")?;
    let summaries = format::process_project(&project, &output)
        .with_context(|| format!("Failed to process {}", project.display()))?;

    for summary in &summaries {
        match &summary.output {
            Some(path) => println!(
                "{}: {} records ({} skipped) -> {}",
                summary.year,
                summary.records,
                summary.skipped,
                path.display()
            ),
            None => println!("{}: no data to save ({} skipped)", summary.year, summary.skipped),
        }
    }
    Ok(())
}
