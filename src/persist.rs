//! Persistence gateway.
//!
//! Writes a scraped batch to the document store, an indented JSON file and/or
//! a flattened CSV. Failures are logged and reported per destination; the
//! caller keeps the in-memory batch either way.

use crate::config::Settings;
use crate::error::{HarvestError, Result};
use crate::normalize::{flatten_work, FlatRecord};
use crate::record::PaperRecord;
use crate::store::DocumentStore;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Where a batch should go.
#[derive(Debug, Clone, Default)]
pub struct Destinations {
    pub store: bool,
    pub json_path: Option<PathBuf>,
    pub csv_path: Option<PathBuf>,
}

/// What a save call managed to write.
#[derive(Debug, Clone, Default)]
pub struct SaveReport {
    /// Documents inserted into the works collection
    pub stored: Option<usize>,
    pub json_path: Option<PathBuf>,
    pub csv_path: Option<PathBuf>,
    pub errors: Vec<String>,
}

impl SaveReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Writes batches to the configured destinations.
pub struct PersistenceGateway<'a> {
    store: &'a dyn DocumentStore,
    works_collection: String,
    legacy_collection: String,
}

impl<'a> PersistenceGateway<'a> {
    pub fn new(store: &'a dyn DocumentStore, settings: &Settings) -> Self {
        Self {
            store,
            works_collection: settings.works_collection.clone(),
            legacy_collection: settings.legacy_collection.clone(),
        }
    }

    /// Save `records` to every requested destination.
    pub async fn save(&self, records: &[PaperRecord], destinations: &Destinations) -> SaveReport {
        let mut report = SaveReport::default();

        if destinations.store {
            match self.store_records(records).await {
                Ok(count) => report.stored = Some(count),
                Err(e) => {
                    error!(error = %e, "Error saving data to the document store");
                    report.errors.push(format!("store: {}", e));
                }
            }
        }

        if let Some(path) = &destinations.json_path {
            match save_json(path, &records) {
                Ok(()) => {
                    info!(path = %path.display(), count = records.len(), "Scraped data saved");
                    report.json_path = Some(path.clone());
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Error saving JSON");
                    report.errors.push(format!("{}: {}", path.display(), e));
                }
            }
        }

        if let Some(path) = &destinations.csv_path {
            let rows: Vec<FlatRecord> = records.iter().map(flatten_work).collect();
            match save_csv(path, &rows) {
                Ok(count) => {
                    info!(path = %path.display(), count, "Flattened data saved");
                    report.csv_path = Some(path.clone());
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Error saving CSV");
                    report.errors.push(format!("{}: {}", path.display(), e));
                }
            }
        }

        report
    }

    /// Project and bulk-insert records into the works collection.
    ///
    /// An empty batch is skipped. A failed insert is not retried per record.
    pub async fn store_records(&self, records: &[PaperRecord]) -> Result<usize> {
        if records.is_empty() {
            warn!("Nothing to store, skipping insert");
            return Ok(0);
        }
        let documents = records
            .iter()
            .map(PaperRecord::to_document)
            .collect::<serde_json::Result<Vec<_>>>()?;
        let inserted = self.store.insert_many(&self.works_collection, documents).await?;
        info!(collection = %self.works_collection, inserted, "Uploaded records to the document store");
        Ok(inserted)
    }

    /// Bulk-insert a `.json` (array of objects) or `.csv` file into `collection`.
    pub async fn import_file(&self, path: &Path, collection: &str) -> Result<usize> {
        let documents = match extension(path).as_deref() {
            Some("json") => read_json_records(path)?,
            Some("csv") => read_csv_records(path)?,
            _ => {
                return Err(HarvestError::Validation(format!(
                    "Unsupported file format for {} (use JSON or CSV)",
                    path.display()
                )))
            }
        };
        if documents.is_empty() {
            warn!(path = %path.display(), "File has no records, nothing uploaded");
            return Ok(0);
        }
        let inserted = self.store.insert_many(collection, documents).await?;
        info!(path = %path.display(), collection, inserted, "Uploaded file to the document store");
        Ok(inserted)
    }

    /// Up to `limit` documents from the works and legacy collections.
    pub async fn preview(&self, limit: i64) -> Result<(Vec<Value>, Vec<Value>)> {
        let works = self.store.find(&self.works_collection, limit).await?;
        let legacy = self.store.find(&self.legacy_collection, limit).await?;
        Ok((works, legacy))
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Write `data` as JSON indented with four spaces.
pub fn save_json<T: Serialize + ?Sized>(path: &Path, data: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut writer, formatter);
    data.serialize(&mut serializer)?;
    writer.flush()?;
    Ok(())
}

/// Write flat rows as CSV.
///
/// Columns are the union of all keys in first-seen order; missing and `null`
/// cells are empty. Returns the number of rows written.
pub fn save_csv(path: &Path, rows: &[FlatRecord]) -> Result<usize> {
    if rows.is_empty() {
        warn!(path = %path.display(), "No data to save");
        return Ok(0);
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let mut seen = HashSet::new();
    let columns: Vec<&str> = rows
        .iter()
        .flat_map(|row| row.keys())
        .filter(|key| seen.insert(key.as_str()))
        .map(String::as_str)
        .collect();

    let mut wtr = csv::WriterBuilder::new().has_headers(false).from_path(path)?;
    wtr.write_record(&columns)?;
    for row in rows {
        wtr.write_record(columns.iter().map(|column| cell(row.get(*column))))?;
    }
    wtr.flush()?;
    Ok(rows.len())
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn read_json_records(path: &Path) -> Result<Vec<Map<String, Value>>> {
    let content = std::fs::read_to_string(path)?;
    match serde_json::from_str::<Value>(&content)? {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => Ok(map),
                other => Err(HarvestError::Validation(format!(
                    "Expected an array of objects in {}, found {}",
                    path.display(),
                    other
                ))),
            })
            .collect(),
        _ => Err(HarvestError::Validation(format!(
            "Expected a JSON array in {}",
            path.display()
        ))),
    }
}

/// Read a CSV file into documents, inferring integer/float/empty cells.
pub fn read_csv_records(path: &Path) -> Result<Vec<Map<String, Value>>> {
    let mut rdr = csv::Reader::from_path(path)?;
    let headers = rdr.headers()?.clone();

    let mut documents = Vec::new();
    for record in rdr.records() {
        let record = record?;
        let document = headers
            .iter()
            .zip(record.iter())
            .map(|(header, raw)| (header.to_string(), infer_cell(raw)))
            .collect();
        documents.push(document);
    }
    Ok(documents)
}

fn infer_cell(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::from(i);
    }
    if let Some(f) = raw.parse::<f64>().ok().filter(|f| f.is_finite()) {
        return Value::from(f);
    }
    Value::String(raw.to_string())
}
