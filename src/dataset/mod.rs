//! Dataset input and run output files
//!
//! Infrastructure Layer: CSV and JSON file adapters around the domain types
//! - Inputs are read as text with surrounding whitespace trimmed; empty cells are null
//! - Clean rows are written in schema column order, unclean rows in input header order
//! - Anomalies and the run report are written as pretty-printed JSON

use crate::domain::anomalies::{AnomalyLedger, DomdError, DomdResult};
use crate::domain::records::{Dataset, Record};
use crate::schema::Schema;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

pub const ANOMALIES_FILE: &str = "anomalies.json";
pub const CLEAN_FILE: &str = "clean_data.csv";
pub const UNCLEAN_FILE: &str = "unclean_data.csv";
pub const NORMALIZED_FILE: &str = "normalized_data.csv";
pub const SCRIPT_FILE: &str = "cleaning_script.txt";
pub const REPORT_FILE: &str = "report.json";

/// Read a CSV file with a header row
pub fn read_csv<P: AsRef<Path>>(path: P) -> DomdResult<Dataset> {
    let path = path.as_ref();
    let file = fs::File::open(path).map_err(|e| {
        DomdError::dataset(format!("Failed to open dataset {}: {}", path.display(), e))
    })?;
    let dataset = read_csv_from(file)?;

    tracing::debug!(
        "Read {} rows with {} columns from {}",
        dataset.len(),
        dataset.headers().len(),
        path.display()
    );
    Ok(dataset)
}

/// Read CSV content from any reader
pub fn read_csv_from<R: Read>(reader: R) -> DomdResult<Dataset> {
    // ragged rows are accepted here and squared off by `Dataset::new`
    let mut reader =
        csv::ReaderBuilder::new().trim(csv::Trim::All).flexible(true).from_reader(reader);

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if headers.is_empty() || headers.iter().all(String::is_empty) {
        return Err(DomdError::dataset("dataset has no header row"));
    }
    let mut seen = BTreeSet::new();
    if let Some(duplicate) = headers.iter().find(|h| !seen.insert(h.as_str())) {
        return Err(DomdError::dataset(format!("duplicate header '{duplicate}'")));
    }

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        rows.push(
            record
                .iter()
                .map(|cell| if cell.is_empty() { None } else { Some(cell.to_string()) })
                .collect(),
        );
    }

    Ok(Dataset::new(headers, rows))
}

/// SHA-256 of a file's bytes, hex encoded
pub fn fingerprint_file<P: AsRef<Path>>(path: P) -> DomdResult<String> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Columns of the clean output: declared columns first, then extra columns present in
/// clean rows, in input header order
pub fn clean_columns(schema: &Schema, headers: &[String], clean: &[Record]) -> Vec<String> {
    let mut columns: Vec<String> = schema.column_names().map(str::to_string).collect();
    for header in headers {
        let declared = schema.column(header).is_ok();
        if !declared && clean.iter().any(|r| r.has_column(header)) {
            columns.push(header.clone());
        }
    }
    columns
}

/// Writes the artifacts of one run into a directory
#[derive(Debug, Clone)]
pub struct OutputWriter {
    dir: PathBuf,
}

impl OutputWriter {
    /// Create the writer, creating the directory if needed
    pub fn create<P: AsRef<Path>>(dir: P) -> DomdResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn write_anomalies(&self, ledger: &AnomalyLedger) -> DomdResult<PathBuf> {
        self.write_json(ANOMALIES_FILE, ledger)
    }

    pub fn write_clean(&self, records: &[Record], columns: &[String]) -> DomdResult<PathBuf> {
        self.write_csv(CLEAN_FILE, records, columns)
    }

    pub fn write_unclean(&self, records: &[Record], headers: &[String]) -> DomdResult<PathBuf> {
        self.write_csv(UNCLEAN_FILE, records, headers)
    }

    pub fn write_normalized(&self, records: &[Record], columns: &[String]) -> DomdResult<PathBuf> {
        self.write_csv(NORMALIZED_FILE, records, columns)
    }

    pub fn write_script(&self, script: &str) -> DomdResult<PathBuf> {
        let path = self.path(SCRIPT_FILE);
        fs::write(&path, script)?;
        Ok(path)
    }

    pub fn write_report<T: Serialize>(&self, report: &T) -> DomdResult<PathBuf> {
        self.write_json(REPORT_FILE, report)
    }

    fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> DomdResult<PathBuf> {
        let path = self.path(name);
        let content = serde_json::to_string_pretty(value)
            .map_err(|e| DomdError::report(format!("Failed to serialize {name}: {e}")))?;
        fs::write(&path, content)?;
        Ok(path)
    }

    fn write_csv(&self, name: &str, records: &[Record], columns: &[String]) -> DomdResult<PathBuf> {
        let path = self.path(name);
        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(columns)?;
        for record in records {
            writer.write_record(columns.iter().map(|c| record.get(c).unwrap_or("")))?;
        }
        writer.flush()?;

        tracing::debug!("Wrote {} rows to {}", records.len(), path.display());
        Ok(path)
    }
}
