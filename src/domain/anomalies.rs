//! Anomalies, the append-only anomaly ledger and the error taxonomy
//!
//! Architecture: Rich Domain Models - Anomalies are immutable facts about a row
//! - An Anomaly records one constraint violation of one cell (or of a key tuple)
//! - AnomalyLedger is the aggregate root: components only ever append to it
//! - Failures that stop processing are errors; failures of data are anomalies

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Column label used for anomalies that concern the whole primary key
pub const PRIMARY_KEY_COLUMN: &str = "primary_key";

/// A single constraint violation tied to a row and a column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    /// Row identifier (0-based position in the input dataset)
    pub row: usize,
    /// Column name, or `primary_key` for key-level findings
    pub column: String,
    /// Human-readable description of what is wrong
    pub issue: String,
    /// Human-readable summary of the violated constraint
    pub expected: String,
    /// Supporting values, such as the offending key tuple
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<String>>,
}

impl Anomaly {
    /// Create a new anomaly
    pub fn new(
        row: usize,
        column: impl Into<String>,
        issue: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self {
            row,
            column: column.into(),
            issue: issue.into(),
            expected: expected.into(),
            details: None,
        }
    }

    /// Attach supporting values
    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = Some(details);
        self
    }

    /// Whether this anomaly concerns the primary key rather than a single cell
    pub fn is_key_level(&self) -> bool {
        self.column == PRIMARY_KEY_COLUMN
    }

    /// Format anomaly for display
    pub fn format_display(&self) -> String {
        match &self.details {
            Some(details) if !details.is_empty() => format!(
                "row {} [{}] {} ({}) expected: {}",
                self.row,
                self.column,
                self.issue,
                details.join(", "),
                self.expected
            ),
            _ => format!(
                "row {} [{}] {} expected: {}",
                self.row, self.column, self.issue, self.expected
            ),
        }
    }
}

/// Append-only collection of anomalies
///
/// Entries are never deduplicated, reordered or removed. Components that run
/// in parallel build private ledgers and hand them over through [`AnomalyLedger::absorb`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnomalyLedger {
    entries: Vec<Anomaly>,
}

impl AnomalyLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one anomaly
    pub fn record(&mut self, anomaly: Anomaly) {
        self.entries.push(anomaly);
    }

    /// Append every anomaly of another ledger, preserving its order
    pub fn absorb(&mut self, other: AnomalyLedger) {
        self.entries.extend(other.entries);
    }

    /// Append anomalies from any source
    pub fn extend<I: IntoIterator<Item = Anomaly>>(&mut self, anomalies: I) {
        self.entries.extend(anomalies);
    }

    pub fn entries(&self) -> &[Anomaly] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Anomalies recorded against a specific row
    pub fn for_row(&self, row: usize) -> impl Iterator<Item = &Anomaly> {
        self.entries.iter().filter(move |a| a.row == row)
    }

    /// Number of anomalies per column label
    pub fn counts_by_column(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for anomaly in &self.entries {
            *counts.entry(anomaly.column.clone()).or_insert(0) += 1;
        }
        counts
    }
}

impl FromIterator<Anomaly> for AnomalyLedger {
    fn from_iter<T: IntoIterator<Item = Anomaly>>(iter: T) -> Self {
        Self { entries: iter.into_iter().collect() }
    }
}

/// Error types that can occur while loading inputs or running the engine
#[derive(Debug, thiserror::Error)]
pub enum DomdError {
    /// Engine configuration or schema document could not be loaded or is unusable
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// File could not be read or written
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Dataset could not be parsed or written as CSV
    #[error("Dataset error: {message}")]
    Dataset { message: String },

    /// A column declaration is malformed for the handler that consumes it
    #[error("Schema error in column '{column}': {message}")]
    Schema { column: String, message: String },

    /// A column name was looked up that the schema does not declare
    #[error("Unknown column '{name}'")]
    UnknownColumn { name: String },

    /// Suggestion service unreachable, timed out or returned non-conforming output
    #[error("External collaborator failure: {message}")]
    ExternalCollaborator { message: String },

    /// Dataset and schema disagree so badly that the schema-driven path cannot run
    #[error("Irrecoverable batch failure: {message}")]
    IrrecoverableBatch { message: String },

    /// Report could not be rendered
    #[error("Report error: {message}")]
    Report { message: String },
}

impl DomdError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Create a dataset error
    pub fn dataset(message: impl Into<String>) -> Self {
        Self::Dataset { message: message.into() }
    }

    /// Create a schema error for a column
    pub fn schema(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Schema { column: column.into(), message: message.into() }
    }

    /// Create an unknown column error
    pub fn unknown_column(name: impl Into<String>) -> Self {
        Self::UnknownColumn { name: name.into() }
    }

    /// Create an external collaborator error
    pub fn external(message: impl Into<String>) -> Self {
        Self::ExternalCollaborator { message: message.into() }
    }

    /// Create an irrecoverable batch error
    pub fn irrecoverable(message: impl Into<String>) -> Self {
        Self::IrrecoverableBatch { message: message.into() }
    }

    /// Create a report error
    pub fn report(message: impl Into<String>) -> Self {
        Self::Report { message: message.into() }
    }
}

impl From<csv::Error> for DomdError {
    fn from(error: csv::Error) -> Self {
        Self::dataset(error.to_string())
    }
}

/// Result type for DOMD Guardian operations
pub type DomdResult<T> = Result<T, DomdError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anomaly_creation() {
        let anomaly = Anomaly::new(3, "site", "value missing", "string, length 4");

        assert_eq!(anomaly.row, 3);
        assert_eq!(anomaly.column, "site");
        assert!(anomaly.details.is_none());
        assert!(!anomaly.is_key_level());
    }

    #[test]
    fn test_key_level_anomaly_serialization() {
        let anomaly = Anomaly::new(7, PRIMARY_KEY_COLUMN, "duplicate primary key", "unique key")
            .with_details(vec!["20240101".to_string(), "0012".to_string()]);

        assert!(anomaly.is_key_level());
        let json = serde_json::to_value(&anomaly).unwrap();
        assert_eq!(json["column"], "primary_key");
        assert_eq!(json["details"][1], "0012");

        let plain = serde_json::to_value(Anomaly::new(1, "a", "b", "c")).unwrap();
        assert!(plain.get("details").is_none());
    }

    #[test]
    fn test_ledger_is_append_only_and_ordered() {
        let mut ledger = AnomalyLedger::new();
        ledger.record(Anomaly::new(2, "a", "first", "x"));

        let private: AnomalyLedger =
            vec![Anomaly::new(0, "b", "second", "y"), Anomaly::new(0, "b", "second", "y")]
                .into_iter()
                .collect();
        ledger.absorb(private);

        assert_eq!(ledger.len(), 3);
        assert_eq!(ledger.entries()[0].issue, "first");
        // identical entries are kept
        assert_eq!(ledger.for_row(0).count(), 2);
        assert_eq!(ledger.counts_by_column()["b"], 2);
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            DomdError::external("timeout").to_string(),
            "External collaborator failure: timeout"
        );
        assert_eq!(
            DomdError::schema("site", "length must be positive").to_string(),
            "Schema error in column 'site': length must be positive"
        );
    }
}
