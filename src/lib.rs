//! # bibharvest
//!
//! OpenAlex harvesting pipeline for the bibliometrics dashboard.
//!
//! ## Modules
//!
//! - [`openalex`] - works API client (sampling and paged retrieval)
//! - [`scraper`] - fetch/filter/accumulate loop with bounded retries
//! - [`dedup`] - ISSN index seeded from storage and a snapshot file
//! - [`normalize`] - flattening of nested records into CSV rows
//! - [`persist`] - writes batches to MongoDB, JSON and CSV
//! - [`format`] - flattens folders of downloaded records per year
//! - [`store`] - document store seam (MongoDB, in-memory)
//! - [`config`] - settings from the environment
//! - [`error`] - error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use bibharvest::config::Settings;
//! use bibharvest::dedup::DedupIndex;
//! use bibharvest::openalex::OpenAlexClient;
//! use bibharvest::scraper::{ScrapeRequest, Scraper};
//! use bibharvest::store::MongoStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::from_env()?;
//!     let store = MongoStore::connect(&settings).await?;
//!     let index = DedupIndex::load(&store, &settings).await;
//!     let client = OpenAlexClient::new(&settings)?;
//!
//!     let request = ScrapeRequest { target_count: Some(100), ..Default::default() };
//!     let outcome = Scraper::new(&client, &index).run(&request).await?;
//!     println!("Collected {} papers", outcome.records.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dedup;
pub mod error;
pub mod format;
pub mod normalize;
pub mod openalex;
pub mod persist;
pub mod record;
pub mod scraper;
pub mod store;

pub use error::{HarvestError, Result};
