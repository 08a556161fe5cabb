//! Suggestion-service layer and response decoding
//!
//! Integration Principle: Untrusted Collaborator - Every response is text until proven otherwise
//! - JSON is extracted from bare text, fenced blocks or surrounding prose
//! - Anomaly lists and partitions are validated against the batch before adoption
//! - Each call is bounded by a timeout; timeouts and bad output both escalate

use super::{Batch, BatchOutcome, LayerKind, RemediationLayer};
use crate::domain::anomalies::{Anomaly, AnomalyLedger, DomdError, DomdResult};
use crate::domain::records::{Partition, Record, ROW_ID_KEY};
use crate::schema::Schema;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

lazy_static! {
    static ref FENCED_BLOCK: Regex =
        Regex::new(r"(?s)```[ \t]*([A-Za-z0-9_+-]*)[ \t]*\n?(.*?)```").expect("valid fence pattern");
}

/// Line prefixes that mark the start of a program in free text
const CODE_PREFIXES: &[&str] = &[
    "import ", "from ", "def ", "class ", "#", "df", "for ", "if ", "with ", "try:", "except ",
    "return ", "print(", "else:", "elif ", "while ", "pass", "raise ", "global ", "nonlocal ",
    "assert ", "yield ", "lambda ",
];

/// Text-in, text-out collaborator that proposes anomalies, partitions and cleaning programs
#[async_trait]
pub trait SuggestionService: Send + Sync {
    /// Expected to return a JSON list of anomaly objects
    async fn detect_anomalies(&self, records: &[Record], schema: &Schema) -> DomdResult<String>;

    /// Expected to return a JSON object with `clean` and `unclean` record lists
    async fn clean_batch(&self, records: &[Record], schema: &Schema) -> DomdResult<String>;

    /// Expected to return a cleaning program, possibly wrapped in prose
    async fn generate_script(&self, schema: &Schema) -> DomdResult<String>;
}

/// Run a collaborator call under a deadline
pub async fn bounded<F>(what: &str, timeout: Duration, call: F) -> DomdResult<String>
where
    F: Future<Output = DomdResult<String>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(DomdError::external(format!(
            "{what} timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}

/// Find the first JSON document in a response
pub fn extract_json(text: &str) -> Option<JsonValue> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    for caps in FENCED_BLOCK.captures_iter(text) {
        let body = caps.get(2).map_or("", |m| m.as_str()).trim();
        if let Ok(value) = serde_json::from_str(body) {
            return Some(value);
        }
    }

    // outermost bracket pair embedded in prose
    for (open, close) in [('[', ']'), ('{', '}')] {
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close)) {
            if start < end {
                if let Ok(value) = serde_json::from_str(&trimmed[start..=end]) {
                    return Some(value);
                }
            }
        }
    }

    None
}

/// Decode and check an anomaly list against the rows of a batch
pub fn parse_anomalies(text: &str, rows: &BTreeSet<usize>) -> DomdResult<Vec<Anomaly>> {
    let value = extract_json(text)
        .ok_or_else(|| DomdError::external("anomaly response contains no JSON"))?;
    if !value.is_array() {
        return Err(DomdError::external("anomaly response is not a JSON list"));
    }

    let anomalies: Vec<Anomaly> = serde_json::from_value(value)
        .map_err(|e| DomdError::external(format!("malformed anomaly entry: {e}")))?;

    if let Some(stray) = anomalies.iter().find(|a| !rows.contains(&a.row)) {
        return Err(DomdError::external(format!(
            "anomaly refers to row {} outside the batch",
            stray.row
        )));
    }

    Ok(anomalies)
}

/// Decode and check a partition against the batch
///
/// Unclean rows are replaced by the batch's original records.
pub fn parse_partition(text: &str, batch: &Batch<'_>) -> DomdResult<Partition> {
    let value = extract_json(text)
        .ok_or_else(|| DomdError::external("partition response contains no JSON"))?;
    let object = value
        .as_object()
        .ok_or_else(|| DomdError::external("partition response is not a JSON object"))?;

    let side = |name: &str| -> DomdResult<Vec<Record>> {
        let items = object
            .get(name)
            .and_then(JsonValue::as_array)
            .ok_or_else(|| DomdError::external(format!("partition has no '{name}' list")))?;
        items.iter().map(record_from_json).collect()
    };

    let mut partition = Partition::new();
    partition.clean = side("clean")?;
    let unclean = side("unclean")?;

    let expected: BTreeSet<usize> = batch.records.iter().map(Record::row).collect();
    partition.unclean = unclean.clone();
    if !partition.covers_exactly(&expected) {
        return Err(DomdError::external(
            "partition does not cover every batch row exactly once",
        ));
    }

    partition.unclean = unclean
        .iter()
        .filter_map(|record| batch.original(record.row()))
        .cloned()
        .collect();
    partition.sort_by_row();
    Ok(partition)
}

fn record_from_json(value: &JsonValue) -> DomdResult<Record> {
    let object = value
        .as_object()
        .ok_or_else(|| DomdError::external("partition entry is not a JSON object"))?;
    let row = object
        .get(ROW_ID_KEY)
        .and_then(JsonValue::as_u64)
        .and_then(|r| usize::try_from(r).ok())
        .ok_or_else(|| DomdError::external(format!("partition entry lacks '{ROW_ID_KEY}'")))?;

    let fields: BTreeMap<String, Option<String>> = object
        .iter()
        .filter(|(name, _)| name.as_str() != ROW_ID_KEY)
        .map(|(name, value)| {
            let text = match value {
                JsonValue::Null => None,
                JsonValue::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            };
            (name.clone(), text)
        })
        .collect();

    Ok(Record::from_fields(row, fields))
}

/// Pull the program out of a script response
///
/// A fenced block wins; otherwise everything from the first code-looking line on is kept.
pub fn extract_script(text: &str) -> Option<String> {
    if let Some(caps) = FENCED_BLOCK.captures(text) {
        let body = caps.get(2).map_or("", |m| m.as_str()).trim();
        return (!body.is_empty()).then(|| body.to_string());
    }

    let mut started = false;
    let mut lines = Vec::new();
    for line in text.lines() {
        let stripped = line.trim();
        if !started && CODE_PREFIXES.iter().any(|p| stripped.starts_with(p)) {
            started = true;
        }
        if started && !stripped.is_empty() && !stripped.starts_with("Prompts:") {
            lines.push(line);
        }
    }

    (!lines.is_empty()).then(|| lines.join("\n"))
}

/// Ask the service for a cleaning program; any failure means no program
pub async fn request_script(
    service: &dyn SuggestionService,
    schema: &Schema,
    timeout: Duration,
) -> Option<String> {
    match bounded("generate_script", timeout, service.generate_script(schema)).await {
        Ok(text) => {
            let script = extract_script(&text);
            if script.is_none() {
                tracing::warn!("Cleaning program response contained no code");
            }
            script
        }
        Err(error) => {
            tracing::warn!("No cleaning program generated: {}", error);
            None
        }
    }
}

/// First layer of the chain: adopt the service's proposal when it is well formed
pub struct ExternalCandidateLayer {
    service: Arc<dyn SuggestionService>,
    schema: Schema,
    timeout: Duration,
}

impl ExternalCandidateLayer {
    pub fn new(service: Arc<dyn SuggestionService>, schema: Schema, timeout: Duration) -> Self {
        Self { service, schema, timeout }
    }
}

#[async_trait]
impl RemediationLayer for ExternalCandidateLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::ExternalCandidate
    }

    async fn attempt(&self, batch: &Batch<'_>) -> DomdResult<BatchOutcome> {
        let rows: BTreeSet<usize> = batch.records.iter().map(Record::row).collect();

        let anomalies_text = bounded(
            "detect_anomalies",
            self.timeout,
            self.service.detect_anomalies(batch.records, &self.schema),
        )
        .await?;
        let anomalies = parse_anomalies(&anomalies_text, &rows)?;

        let partition_text = bounded(
            "clean_batch",
            self.timeout,
            self.service.clean_batch(batch.records, &self.schema),
        )
        .await?;
        let partition = parse_partition(&partition_text, batch)?;

        tracing::debug!(
            "Batch {}: adopted external proposal with {} anomalies",
            batch.index,
            anomalies.len()
        );

        Ok(BatchOutcome {
            partition,
            ledger: AnomalyLedger::from_iter(anomalies),
            layer: LayerKind::ExternalCandidate,
        })
    }
}

/// Serves pre-recorded responses from a directory
///
/// Reads `anomalies.txt`, `partition.txt` and `script.txt`; a missing file is a failed call.
#[derive(Debug, Clone)]
pub struct ReplaySuggestionService {
    dir: PathBuf,
}

impl ReplaySuggestionService {
    pub const ANOMALIES_FILE: &'static str = "anomalies.txt";
    pub const PARTITION_FILE: &'static str = "partition.txt";
    pub const SCRIPT_FILE: &'static str = "script.txt";

    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self { dir: dir.as_ref().to_path_buf() }
    }

    async fn read(&self, name: &str) -> DomdResult<String> {
        let path = self.dir.join(name);
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| DomdError::external(format!("cannot read {}: {e}", path.display())))
    }
}

#[async_trait]
impl SuggestionService for ReplaySuggestionService {
    async fn detect_anomalies(&self, _records: &[Record], _schema: &Schema) -> DomdResult<String> {
        self.read(Self::ANOMALIES_FILE).await
    }

    async fn clean_batch(&self, _records: &[Record], _schema: &Schema) -> DomdResult<String> {
        self.read(Self::PARTITION_FILE).await
    }

    async fn generate_script(&self, _schema: &Schema) -> DomdResult<String> {
        self.read(Self::SCRIPT_FILE).await
    }
}
