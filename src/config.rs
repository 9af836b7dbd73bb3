//! Process configuration.
//!
//! [`Settings`] is built once at startup (from `.env` and the environment) and
//! handed by reference to the store, index, client and gateway constructors.

use crate::error::{HarvestError, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Environment variable holding the MongoDB connection string
pub const MONGO_URL_VAR: &str = "MONGO_URL";

/// Default works endpoint
pub const DEFAULT_WORKS_URL: &str = "https://api.openalex.org/works";

const DEFAULT_DATABASE: &str = "dsde";
const DEFAULT_WORKS_COLLECTION: &str = "openAlex_data";
const DEFAULT_LEGACY_COLLECTION: &str = "data";
const DEFAULT_SNAPSHOT: &str = "issns.json";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Explicit configuration object for a harvesting run.
#[derive(Debug, Clone)]
pub struct Settings {
    /// MongoDB connection string; only required when the store is used
    pub mongo_url: Option<String>,
    /// Database holding both collections
    pub database: String,
    /// Collection of previously harvested works (also the write destination)
    pub works_collection: String,
    /// Older collection keyed by a flat `prism:isbn` field
    pub legacy_collection: String,
    /// Works endpoint
    pub works_url: Url,
    /// Contact address for the API's polite pool
    pub mailto: Option<String>,
    /// Per-request timeout for the works API
    pub request_timeout: Duration,
    /// Optional JSON array of ISSNs merged into the dedup index
    pub snapshot_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mongo_url: None,
            database: DEFAULT_DATABASE.to_string(),
            works_collection: DEFAULT_WORKS_COLLECTION.to_string(),
            legacy_collection: DEFAULT_LEGACY_COLLECTION.to_string(),
            works_url: default_works_url(),
            mailto: None,
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            snapshot_path: PathBuf::from(DEFAULT_SNAPSHOT),
        }
    }
}

#[allow(clippy::expect_used)]
fn default_works_url() -> Url {
    Url::parse(DEFAULT_WORKS_URL).expect("default works URL is valid")
}

impl Settings {
    /// Load `.env` (if present) and read settings from the process environment.
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!(path = %path.display(), "Loaded .env file");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut settings = Settings::default();

        settings.mongo_url = get(MONGO_URL_VAR);

        if let Some(database) = get("MONGO_DB") {
            settings.database = database;
        }
        if let Some(collection) = get("WORKS_COLLECTION") {
            settings.works_collection = collection;
        }
        if let Some(collection) = get("LEGACY_COLLECTION") {
            settings.legacy_collection = collection;
        }
        if let Some(raw) = get("OPENALEX_WORKS_URL") {
            settings.works_url = Url::parse(&raw)
                .map_err(|e| HarvestError::Config(format!("Invalid OPENALEX_WORKS_URL '{}': {}", raw, e)))?;
        }
        settings.mailto = get("OPENALEX_MAILTO");
        if let Some(raw) = get("OPENALEX_TIMEOUT_SECS") {
            let secs: u64 = raw
                .parse()
                .map_err(|_| HarvestError::Config(format!("Invalid OPENALEX_TIMEOUT_SECS '{}'", raw)))?;
            settings.request_timeout = Duration::from_secs(secs);
        }
        if let Some(path) = get("ISSN_SNAPSHOT") {
            settings.snapshot_path = PathBuf::from(path);
        }

        Ok(settings)
    }

    /// The MongoDB connection string, or a fatal config error when unset.
    pub fn require_mongo_url(&self) -> Result<&str> {
        self.mongo_url
            .as_deref()
            .ok_or_else(|| HarvestError::Config(format!("{} is not set (check the environment or .env file)", MONGO_URL_VAR)))
    }
}
