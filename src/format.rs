//! Batch formatting of on-disk bibliographic records.
//!
//! A project directory holds one sub-directory per year, each full of JSON
//! documents in the `abstracts-retrieval-response` shape. Every year is
//! flattened into `processed_data_<year>.csv`.

use crate::error::Result;
use crate::normalize::{flatten, FlatRecord};
use crate::persist::save_csv;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Outcome for one year directory.
#[derive(Debug, Clone)]
pub struct YearSummary {
    pub year: String,
    pub records: usize,
    pub skipped: usize,
    /// CSV written for the year; `None` when the year had no usable records
    pub output: Option<PathBuf>,
}

/// Flatten a single record file.
///
/// Returns `None` (and logs) when the file cannot be read, is not JSON, or
/// has no `coredata` block.
pub fn process_record(path: &Path) -> Option<FlatRecord> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Error reading record");
            return None;
        }
    };
    let document: Value = match serde_json::from_str(&content) {
        Ok(document) => document,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Error parsing record");
            return None;
        }
    };
    let has_coredata = document
        .get("abstracts-retrieval-response")
        .and_then(|r| r.get("coredata"))
        .is_some_and(Value::is_object);
    if !has_coredata {
        warn!(path = %path.display(), "Record has no coredata, skipping");
        return None;
    }
    Some(flatten(&document))
}

/// Visible regular files in `dir`, sorted by name.
fn record_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if !hidden && entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Flatten every record of one year directory.
pub fn process_year(dir: &Path) -> Result<(Vec<FlatRecord>, usize)> {
    let files = record_files(dir)?;
    let mut rows = Vec::with_capacity(files.len());
    let mut skipped = 0;
    for file in &files {
        match process_record(file) {
            Some(row) => rows.push(row),
            None => skipped += 1,
        }
    }
    Ok((rows, skipped))
}

/// Process every year directory under `root`, writing CSVs into `out_dir`.
pub fn process_project(root: &Path, out_dir: &Path) -> Result<Vec<YearSummary>> {
    let mut years: Vec<(String, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.starts_with('.') && entry.file_type()?.is_dir() {
            years.push((name, entry.path()));
        }
    }
    years.sort();

    let mut summaries = Vec::with_capacity(years.len());
    for (year, dir) in years {
        let (rows, skipped) = process_year(&dir)?;
        info!(year = %year, records = rows.len(), skipped, "Processed records for year");

        let output = if rows.is_empty() {
            warn!(year = %year, "No data to save for year");
            None
        } else {
            let path = out_dir.join(format!("processed_data_{}.csv", year));
            save_csv(&path, &rows)?;
            info!(path = %path.display(), "Year saved");
            Some(path)
        };

        summaries.push(YearSummary {
            year,
            records: rows.len(),
            skipped,
            output,
        });
    }
    Ok(summaries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn write_record(dir: &Path, name: &str, value: &Value) -> Result<()> {
        std::fs::write(dir.join(name), serde_json::to_string(value)?)?;
        Ok(())
    }

    #[test]
    fn test_process_project_writes_one_csv_per_year() -> Result<()> {
        let root = tempdir()?;
        let out = tempdir()?;

        let y2018 = root.path().join("2018");
        std::fs::create_dir(&y2018)?;
        write_record(
            &y2018,
            "201800001",
            &json!({"abstracts-retrieval-response": {
                "coredata": {"dc:title": "First", "link": [{"@rel": "self", "@href": "S"}]},
                "authkeywords": {"author-keyword": {"$": "solo"}}
            }}),
        )?;
        write_record(&y2018, "201800002", &json!({"something": "else"}))?;
        std::fs::write(y2018.join("201800003"), "not json")?;
        std::fs::write(y2018.join(".DS_Store"), "junk")?;

        let y2019 = root.path().join("2019");
        std::fs::create_dir(&y2019)?;

        let summaries = process_project(root.path(), out.path())?;
        assert_eq!(summaries.len(), 2);

        let first = &summaries[0];
        assert_eq!(first.year, "2018");
        assert_eq!(first.records, 1);
        assert_eq!(first.skipped, 2);
        let csv_path = out.path().join("processed_data_2018.csv");
        assert_eq!(first.output.as_deref(), Some(csv_path.as_path()));

        let mut rdr = csv::Reader::from_path(&csv_path)?;
        let headers = rdr.headers()?.clone();
        let row = rdr.records().next().transpose()?.unwrap_or_default();
        let get = |name: &str| headers.iter().position(|h| h == name).and_then(|i| row.get(i));
        assert_eq!(get("dc:title"), Some("First"));
        assert_eq!(get("link_self"), Some("S"));
        assert_eq!(get("link_scopus"), Some("N/A"));
        assert_eq!(get("auth-keywords"), Some("solo"));

        assert_eq!(summaries[1].records, 0);
        assert!(summaries[1].output.is_none());
        assert!(!out.path().join("processed_data_2019.csv").exists());
        Ok(())
    }
}
