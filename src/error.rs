//! Error types for bibharvest.
//!
//! Everything below the scrape orchestrator reports through [`HarvestError`];
//! callers decide which variants are fatal. Only [`HarvestError::Config`] is
//! treated as fatal by the binary.

use thiserror::Error;

/// Main error type for harvesting operations.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// Transport failure talking to the works API
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Works API answered with a non-success status
    #[error("API error: {code} - {message}")]
    Api {
        /// HTTP status code
        code: u16,
        /// Response excerpt or status text
        message: String,
    },

    /// Response body did not have the expected shape
    #[error("Parse error: {0}")]
    Parse(String),

    /// Document store connectivity, query or insert failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV read/write error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Missing or malformed configuration
    #[error("Config error: {0}")]
    Config(String),

    /// Caller supplied an unusable request
    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<mongodb::error::Error> for HarvestError {
    fn from(err: mongodb::error::Error) -> Self {
        HarvestError::Storage(err.to_string())
    }
}

impl From<mongodb::bson::ser::Error> for HarvestError {
    fn from(err: mongodb::bson::ser::Error) -> Self {
        HarvestError::Storage(format!("BSON conversion failed: {}", err))
    }
}

/// Result type alias using `HarvestError`
pub type Result<T> = std::result::Result<T, HarvestError>;
