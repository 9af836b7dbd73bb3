//! ISSN deduplication index.
//!
//! The index is a set of serial numbers already present in storage, built
//! fresh at the start of every run and read-only for the duration of a scrape.

use crate::config::Settings;
use crate::error::{HarvestError, Result};
use crate::record::PaperRecord;
use crate::store::DocumentStore;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{info, warn};

/// Serial-number path in the works collection
pub const WORKS_ISSN_FIELD: &str = "primary_location.source.issn";

/// Serial-number field in the legacy collection
pub const LEGACY_ISSN_FIELD: &str = "prism:isbn";

/// How incoming records are checked against the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DedupMode {
    /// Drop matches and records whose serial numbers are unknown
    #[default]
    Strict,
    /// Drop matches, keep records whose serial numbers are unknown
    Lenient,
    /// Keep everything
    Off,
}

impl FromStr for DedupMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(DedupMode::Strict),
            "lenient" => Ok(DedupMode::Lenient),
            "off" | "none" => Ok(DedupMode::Off),
            other => Err(format!("unknown dedup mode '{}' (expected strict, lenient or off)", other)),
        }
    }
}

impl fmt::Display for DedupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DedupMode::Strict => "strict",
            DedupMode::Lenient => "lenient",
            DedupMode::Off => "off",
        };
        f.write_str(name)
    }
}

/// Set of previously seen ISSNs.
#[derive(Debug, Clone, Default)]
pub struct DedupIndex {
    issns: HashSet<String>,
}

impl DedupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the index from both collections and the snapshot file.
    ///
    /// Fails open: any storage or parse error is logged and an empty index is
    /// returned, so a broken store means over-fetching rather than no run.
    pub async fn load(store: &dyn DocumentStore, settings: &Settings) -> Self {
        match Self::try_load(store, settings).await {
            Ok(index) => {
                info!(total = index.len(), "Loaded ISSN index (store + snapshot)");
                index
            }
            Err(e) => {
                warn!(error = %e, "Error loading ISSNs, continuing with an empty index");
                Self::new()
            }
        }
    }

    async fn try_load(store: &dyn DocumentStore, settings: &Settings) -> Result<Self> {
        let mut index = Self::new();

        let works = store.distinct(&settings.works_collection, WORKS_ISSN_FIELD).await?;
        index.extend_from_values(&works);
        let legacy = store.distinct(&settings.legacy_collection, LEGACY_ISSN_FIELD).await?;
        index.extend_from_values(&legacy);

        if let Some(snapshot) = read_snapshot(&settings.snapshot_path)? {
            info!(
                count = snapshot.len(),
                path = %settings.snapshot_path.display(),
                "Loaded ISSNs from snapshot"
            );
            index.issns.extend(snapshot);
        }

        Ok(index)
    }

    /// Add serial numbers from raw store values.
    ///
    /// Accepts plain strings, (nested) lists and `{"$": "..."}` nodes.
    pub fn extend_from_values(&mut self, values: &[Value]) {
        for value in values {
            collect_serials(value, &mut self.issns);
        }
    }

    pub fn insert(&mut self, issn: impl Into<String>) {
        let issn = issn.into();
        let trimmed = issn.trim();
        if !trimmed.is_empty() {
            self.issns.insert(trimmed.to_string());
        }
    }

    pub fn contains(&self, issn: &str) -> bool {
        self.issns.contains(issn)
    }

    /// True if any of the given serial numbers is already indexed.
    pub fn contains_any<I, S>(&self, issns: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        issns.into_iter().any(|issn| self.contains(issn.as_ref()))
    }

    /// Whether `record` should be kept under `mode`.
    pub fn admits(&self, record: &PaperRecord, mode: DedupMode) -> bool {
        match mode {
            DedupMode::Off => true,
            DedupMode::Strict | DedupMode::Lenient => match record.serial_numbers() {
                Some(issns) if !issns.is_empty() => !self.contains_any(issns),
                _ => mode == DedupMode::Lenient,
            },
        }
    }

    pub fn len(&self) -> usize {
        self.issns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issns.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for DedupIndex {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        let mut index = DedupIndex::new();
        for issn in iter {
            index.insert(issn);
        }
        index
    }
}

fn collect_serials(value: &Value, out: &mut HashSet<String>) {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if !s.is_empty() {
                out.insert(s.to_string());
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_serials(item, out);
            }
        }
        Value::Object(map) => {
            if let Some(inner) = map.get("$") {
                collect_serials(inner, out);
            }
        }
        _ => {}
    }
}

/// Read the optional snapshot file (a JSON array of ISSN strings).
///
/// Returns `Ok(None)` when the file does not exist.
pub fn read_snapshot(path: &Path) -> Result<Option<Vec<String>>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&content)?;
    if !value.is_array() {
        return Err(HarvestError::Parse(format!(
            "ISSN snapshot {} is not a JSON array",
            path.display()
        )));
    }
    let mut issns = HashSet::new();
    collect_serials(&value, &mut issns);
    Ok(Some(issns.into_iter().collect()))
}
