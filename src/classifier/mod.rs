//! Row classification against the schema
//!
//! CDD Principle: Domain Services - The classifier turns handler masks into accept/reject decisions
//! - Columns are normalized independently (optionally on the rayon pool)
//! - Row decisions and anomaly appends happen serially, in input order
//! - Rejected rows keep their original values for forensic review

pub mod duplicates;

use crate::domain::anomalies::{Anomaly, AnomalyLedger, DomdError, DomdResult, PRIMARY_KEY_COLUMN};
use crate::domain::records::Record;
use crate::handlers::{ColumnOutcome, ColumnPlan, HandlerContext, HandlerPipeline};
use crate::schema::Schema;
use rayon::prelude::*;
use std::time::Instant;

pub use duplicates::DuplicateResolver;

/// Options for customizing classification behavior
#[derive(Debug, Clone)]
pub struct ClassificationOptions {
    /// Whether to normalize columns in parallel
    pub parallel: bool,
}

impl Default for ClassificationOptions {
    fn default() -> Self {
        Self { parallel: true }
    }
}

/// Accepted and rejected rows of one classification pass
#[derive(Debug, Clone, Default)]
pub struct Classification {
    /// Normalized records restricted to declared columns
    pub accepted: Vec<Record>,
    /// Original records
    pub rejected: Vec<Record>,
    /// Best-effort normalized record for every input row, in input order
    ///
    /// Cells that could not be normalized keep their original value; undeclared
    /// columns are carried through unchanged.
    pub normalized: Vec<Record>,
    /// One entry per failing cell
    pub ledger: AnomalyLedger,
}

/// Applies the handler pipeline to rows and decides acceptance
#[derive(Debug, Clone)]
pub struct RowClassifier {
    schema: Schema,
    pipeline: HandlerPipeline,
}

impl RowClassifier {
    /// Create a classifier, resolving handlers for every declared column
    pub fn new(schema: Schema, context: HandlerContext) -> Self {
        let pipeline = HandlerPipeline::resolve(&schema, context);
        Self { schema, pipeline }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn pipeline(&self) -> &HandlerPipeline {
        &self.pipeline
    }

    /// Refuse datasets the schema-driven path cannot meaningfully process
    pub fn check_compatibility(&self, headers: &[String]) -> DomdResult<()> {
        let has = |name: &str| headers.iter().any(|h| h == name);

        if !self.schema.column_names().any(has) {
            return Err(DomdError::irrecoverable(format!(
                "none of the {} declared columns appear in the dataset headers",
                self.schema.columns().len()
            )));
        }

        let missing_keys: Vec<&str> = self
            .schema
            .primary_key()
            .iter()
            .map(String::as_str)
            .filter(|k| self.schema.column(*k).is_ok() && !has(*k))
            .collect();
        if !missing_keys.is_empty() {
            return Err(DomdError::irrecoverable(format!(
                "primary key column(s) missing from the dataset: {}",
                missing_keys.join(", ")
            )));
        }

        Ok(())
    }

    /// Normalize every declared column of the batch
    pub fn normalize_columns(
        &self,
        records: &[Record],
        options: &ClassificationOptions,
    ) -> Vec<ColumnOutcome> {
        let run = |plan: &ColumnPlan| {
            let raw: Vec<Option<String>> =
                records.iter().map(|r| r.get(&plan.column).map(str::to_string)).collect();
            self.pipeline.apply(plan, &raw)
        };

        if options.parallel && self.pipeline.plans().len() > 1 {
            // collect keeps column order, so merging below stays deterministic
            self.pipeline.plans().par_iter().map(run).collect()
        } else {
            self.pipeline.plans().iter().map(run).collect()
        }
    }

    /// Classify a batch of rows
    pub fn classify(&self, records: &[Record], options: &ClassificationOptions) -> Classification {
        let start_time = Instant::now();
        let outcomes = self.normalize_columns(records, options);

        let undeclared_keys: Vec<&str> = self
            .schema
            .primary_key()
            .iter()
            .map(String::as_str)
            .filter(|k| self.schema.column(*k).is_err())
            .collect();

        let mut classification = Classification::default();

        for (i, record) in records.iter().enumerate() {
            let row = record.row();
            let mut reject = false;
            let mut normalized = Vec::with_capacity(outcomes.len());
            let mut best_effort = record.fields().clone();

            for (spec, outcome) in self.schema.columns().iter().zip(&outcomes) {
                let raw = record.get(&spec.name);
                let is_key = self.schema.is_key_column(&spec.name);
                // a key cell is never allowed to be null, whatever the declaration says
                let (value, ok) = if outcome.faulted {
                    (None, false)
                } else if raw.is_none() && spec.nullable && !is_key {
                    let value = if outcome.mask[i] { outcome.values[i].clone() } else { None };
                    (value, true)
                } else {
                    (outcome.values[i].clone(), outcome.mask[i] && outcome.values[i].is_some())
                };

                if !ok {
                    let issue = outcome.issues[i].clone().unwrap_or_else(|| "missing value".to_string());
                    let issue = if outcome.faulted { format!("schema error: {issue}") } else { issue };
                    classification.ledger.record(Anomaly::new(row, &spec.name, issue, spec.describe()));

                    if outcome.faulted || spec.is_strict() || is_key {
                        reject = true;
                    }
                }

                best_effort
                    .insert(spec.name.clone(), value.clone().or_else(|| raw.map(str::to_string)));
                normalized.push((spec.name.clone(), if ok { value } else { None }));
            }

            for key in &undeclared_keys {
                classification.ledger.record(Anomaly::new(
                    row,
                    PRIMARY_KEY_COLUMN,
                    format!("schema error: {}", DomdError::unknown_column(*key)),
                    "primary key columns declared in the schema",
                ));
                reject = true;
            }

            classification.normalized.push(Record::from_fields(row, best_effort));
            if reject {
                classification.rejected.push(record.clone());
            } else {
                classification.accepted.push(Record::from_fields(row, normalized));
            }
        }

        tracing::debug!(
            "Classified {} rows: {} accepted, {} rejected, {} anomalies in {}ms",
            records.len(),
            classification.accepted.len(),
            classification.rejected.len(),
            classification.ledger.len(),
            start_time.elapsed().as_millis()
        );

        classification
    }
}
