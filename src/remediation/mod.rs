//! Remediation escalation across an ordered chain of cleaning layers
//!
//! Architecture: Chain of Responsibility - Each batch is offered to layers in a fixed order
//! - ExternalCandidate (when a suggestion service is configured), then SchemaGeneric
//! - A layer either returns a complete outcome or a recoverable error; the next layer is tried
//! - RuleFallback terminates the chain and cannot fail, so every batch gets a partition
//! - A final key check over all clean rows keeps the primary key unique across batches

pub mod external;
pub mod fallback;

use crate::classifier::{ClassificationOptions, DuplicateResolver, RowClassifier};
use crate::domain::anomalies::{AnomalyLedger, DomdResult};
use crate::domain::records::{Dataset, Partition, Record};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

pub use external::{ExternalCandidateLayer, ReplaySuggestionService, SuggestionService};
pub use fallback::RuleFallback;

/// Which layer produced a batch outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    ExternalCandidate,
    SchemaGeneric,
    RuleFallback,
}

impl LayerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ExternalCandidate => "external_candidate",
            Self::SchemaGeneric => "schema_generic",
            Self::RuleFallback => "rule_fallback",
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A contiguous slice of the dataset handed to the layers
#[derive(Debug, Clone, Copy)]
pub struct Batch<'a> {
    pub index: usize,
    pub headers: &'a [String],
    pub records: &'a [Record],
}

impl<'a> Batch<'a> {
    pub fn new(index: usize, headers: &'a [String], records: &'a [Record]) -> Self {
        Self { index, headers, records }
    }

    /// Original record for a row identifier of this batch
    pub fn original(&self, row: usize) -> Option<&'a Record> {
        self.records.iter().find(|r| r.row() == row)
    }
}

/// Partition and anomalies a layer produced for one batch
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub partition: Partition,
    pub ledger: AnomalyLedger,
    pub layer: LayerKind,
}

/// One cleaning strategy in the escalation chain
#[async_trait]
pub trait RemediationLayer: Send + Sync {
    fn kind(&self) -> LayerKind;

    /// Produce a complete partition of the batch or a recoverable error
    async fn attempt(&self, batch: &Batch<'_>) -> DomdResult<BatchOutcome>;
}

/// Schema-driven cleaning: handler pipeline, row classifier and duplicate resolver
#[derive(Debug, Clone)]
pub struct SchemaGenericLayer {
    classifier: RowClassifier,
    options: ClassificationOptions,
}

impl SchemaGenericLayer {
    pub fn new(classifier: RowClassifier, options: ClassificationOptions) -> Self {
        Self { classifier, options }
    }

    pub fn classifier(&self) -> &RowClassifier {
        &self.classifier
    }

    /// Run the schema-driven path synchronously
    pub fn process(&self, batch: &Batch<'_>) -> DomdResult<BatchOutcome> {
        self.classifier.check_compatibility(batch.headers)?;

        let classification = self.classifier.classify(batch.records, &self.options);
        let mut ledger = classification.ledger;

        let resolver = DuplicateResolver::new(self.classifier.schema().primary_key());
        let resolution = resolver.resolve(classification.accepted, &mut ledger);

        let mut partition = Partition::new();
        partition.clean = resolution.kept;
        partition.unclean = classification.rejected;
        partition.unclean.extend(
            resolution.demoted.iter().filter_map(|demoted| batch.original(demoted.row())).cloned(),
        );
        partition.sort_by_row();

        Ok(BatchOutcome { partition, ledger, layer: LayerKind::SchemaGeneric })
    }
}

#[async_trait]
impl RemediationLayer for SchemaGenericLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::SchemaGeneric
    }

    async fn attempt(&self, batch: &Batch<'_>) -> DomdResult<BatchOutcome> {
        self.process(batch)
    }
}

/// Which layer handled which batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub index: usize,
    pub rows: usize,
    pub layer: LayerKind,
    /// Layers that were tried first and failed, with the reason
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub escalations: Vec<String>,
}

/// Result of remediating a whole dataset
#[derive(Debug, Clone, Default)]
pub struct RemediationRun {
    pub partition: Partition,
    pub ledger: AnomalyLedger,
    pub batches: Vec<BatchSummary>,
}

/// Drives every batch through the layer chain
pub struct EscalationController {
    layers: Vec<Box<dyn RemediationLayer>>,
    terminal: RuleFallback,
    key: Vec<String>,
}

impl EscalationController {
    /// Create a controller from the fallible layers (in order) and the terminal fallback
    pub fn new(
        layers: Vec<Box<dyn RemediationLayer>>,
        terminal: RuleFallback,
        key: Vec<String>,
    ) -> Self {
        Self { layers, terminal, key }
    }

    /// Kinds of the layers in the order they are tried
    pub fn chain(&self) -> Vec<LayerKind> {
        self.layers
            .iter()
            .map(|layer| layer.kind())
            .chain(std::iter::once(LayerKind::RuleFallback))
            .collect()
    }

    /// Remediate one batch; always yields an outcome
    pub async fn remediate_batch(&self, batch: &Batch<'_>) -> (BatchOutcome, Vec<String>) {
        let mut escalations = Vec::new();

        for layer in &self.layers {
            match layer.attempt(batch).await {
                Ok(outcome) => return (outcome, escalations),
                Err(error) => {
                    tracing::warn!(
                        "Batch {} escalating past {}: {}",
                        batch.index,
                        layer.kind(),
                        error
                    );
                    escalations.push(format!("{}: {}", layer.kind(), error));
                }
            }
        }

        (self.terminal.apply(batch), escalations)
    }

    /// Remediate every batch sequentially, then enforce key uniqueness over the whole output
    pub async fn run(&self, dataset: &Dataset, batch_size: Option<usize>) -> RemediationRun {
        let start_time = Instant::now();
        let mut run = RemediationRun::default();

        for (index, records) in dataset.batches(batch_size).into_iter().enumerate() {
            let batch = Batch::new(index, dataset.headers(), records);
            let (outcome, escalations) = self.remediate_batch(&batch).await;

            tracing::debug!(
                "Batch {} ({} rows) handled by {}: {} clean, {} unclean",
                index,
                records.len(),
                outcome.layer,
                outcome.partition.clean.len(),
                outcome.partition.unclean.len()
            );

            run.batches.push(BatchSummary {
                index,
                rows: records.len(),
                layer: outcome.layer,
                escalations,
            });
            run.partition.merge(outcome.partition);
            run.ledger.absorb(outcome.ledger);
        }

        self.enforce_global_key(dataset, &mut run);
        run.partition.sort_by_row();

        tracing::info!(
            "Remediated {} rows in {} batches: {} clean, {} unclean, {} anomalies in {}ms",
            dataset.len(),
            run.batches.len(),
            run.partition.clean.len(),
            run.partition.unclean.len(),
            run.ledger.len(),
            start_time.elapsed().as_millis()
        );

        run
    }

    /// Demote clean rows whose complete key collides with another clean row of any batch
    fn enforce_global_key(&self, dataset: &Dataset, run: &mut RemediationRun) {
        let resolver = DuplicateResolver::new(&self.key);
        let clean = std::mem::take(&mut run.partition.clean);

        // rows without a complete key cannot collide
        let (keyed, unkeyed): (Vec<Record>, Vec<Record>) =
            clean.into_iter().partition(|r| resolver.key_of(r).iter().all(Option::is_some));

        let resolution = resolver.resolve(keyed, &mut run.ledger);

        let originals: HashMap<usize, &Record> =
            dataset.records().iter().map(|r| (r.row(), r)).collect();

        run.partition.clean = resolution.kept;
        run.partition.clean.extend(unkeyed);
        run.partition.unclean.extend(
            resolution
                .demoted
                .iter()
                .filter_map(|demoted| originals.get(&demoted.row()).map(|r| (*r).clone())),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::domain::anomalies::DomdError;
    use crate::handlers::HandlerContext;
    use crate::schema::{ColumnSpec, ColumnType, Schema};
    use chrono::NaiveDate;
    use std::collections::BTreeSet;

    fn schema() -> Schema {
        Schema::new(
            vec![
                ColumnSpec::new("date", ColumnType::Date),
                ColumnSpec::new("site", ColumnType::String).with_length(4),
                ColumnSpec::new("article", ColumnType::String).with_length(8),
                ColumnSpec::new("units", ColumnType::Integer).nullable(),
            ],
            vec!["date".to_string(), "site".to_string(), "article".to_string()],
        )
        .unwrap()
    }

    fn schema_layer() -> SchemaGenericLayer {
        let ctx = HandlerContext::new(NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(), "GBP");
        SchemaGenericLayer::new(RowClassifier::new(schema(), ctx), ClassificationOptions::default())
    }

    fn controller() -> EscalationController {
        EscalationController::new(
            vec![Box::new(schema_layer())],
            RuleFallback::from_config(&EngineConfig::default()),
            schema().primary_key().to_vec(),
        )
    }

    fn dataset(headers: &[&str], rows: &[&[Option<&str>]]) -> Dataset {
        Dataset::new(
            headers.iter().map(|h| h.to_string()).collect(),
            rows.iter().map(|r| r.iter().map(|v| v.map(str::to_string)).collect()).collect(),
        )
    }

    fn stock_rows() -> Dataset {
        dataset(
            &["date", "site", "article", "units"],
            &[
                &[Some("2024-01-01"), Some("12"), Some("1"), Some("5")],
                &[Some("2024-01-01"), Some("12"), Some("1"), Some("6")],
                &[Some("2024-01-02"), Some("12"), Some("1"), None],
                &[Some("not a date"), Some("13"), Some("1"), Some("1")],
            ],
        )
    }

    struct FailingLayer;

    #[async_trait]
    impl RemediationLayer for FailingLayer {
        fn kind(&self) -> LayerKind {
            LayerKind::ExternalCandidate
        }

        async fn attempt(&self, _batch: &Batch<'_>) -> DomdResult<BatchOutcome> {
            Err(DomdError::external("service unavailable"))
        }
    }

    #[tokio::test]
    async fn test_schema_generic_partition_is_exhaustive() {
        let data = stock_rows();
        let run = controller().run(&data, None).await;

        let all: BTreeSet<usize> = (0..data.len()).collect();
        assert!(run.partition.covers_exactly(&all));
        assert_eq!(run.partition.clean_rows(), BTreeSet::from([2]));
        assert_eq!(run.batches[0].layer, LayerKind::SchemaGeneric);

        // both duplicates demoted with their original values
        let demoted: Vec<_> =
            run.ledger.entries().iter().filter(|a| a.is_key_level()).map(|a| a.row).collect();
        assert_eq!(demoted, [0, 1]);
        assert!(run.partition.unclean.contains(&data.records()[0]));
    }

    #[tokio::test]
    async fn test_failed_layer_escalates() {
        let controller = EscalationController::new(
            vec![Box::new(FailingLayer), Box::new(schema_layer())],
            RuleFallback::from_config(&EngineConfig::default()),
            schema().primary_key().to_vec(),
        );
        let data = stock_rows();

        let run = controller.run(&data, None).await;

        assert_eq!(run.batches[0].layer, LayerKind::SchemaGeneric);
        assert_eq!(run.batches[0].escalations.len(), 1);
        assert!(run.batches[0].escalations[0].starts_with("external_candidate"));
        assert_eq!(
            controller.chain(),
            [LayerKind::ExternalCandidate, LayerKind::SchemaGeneric, LayerKind::RuleFallback]
        );
    }

    #[tokio::test]
    async fn test_incompatible_dataset_reaches_rule_fallback() {
        let data = dataset(
            &["business_date", "store", "sku"],
            &[&[Some("2024-01-01"), Some("7"), Some("42")]],
        );

        let run = controller().run(&data, None).await;

        assert_eq!(run.batches[0].layer, LayerKind::RuleFallback);
        assert_eq!(run.partition.total(), 1);
    }

    #[tokio::test]
    async fn test_duplicates_across_batches_are_demoted() {
        let data = dataset(
            &["date", "site", "article", "units"],
            &[
                &[Some("20240101"), Some("1"), Some("1"), None],
                &[Some("20240102"), Some("1"), Some("1"), None],
                &[Some("20240101"), Some("0001"), Some("00000001"), None],
            ],
        );

        let run = controller().run(&data, Some(2)).await;

        assert_eq!(run.batches.len(), 2);
        assert_eq!(run.partition.clean_rows(), BTreeSet::from([1]));
        assert_eq!(run.partition.unclean_rows(), BTreeSet::from([0, 2]));
        assert_eq!(run.ledger.len(), 2);
    }

    #[test]
    fn test_escalation_is_deterministic() {
        let data = stock_rows();
        let first = tokio_test::block_on(controller().run(&data, Some(3)));
        let second = tokio_test::block_on(controller().run(&data, Some(3)));

        assert_eq!(first.partition.clean, second.partition.clean);
        assert_eq!(first.partition.unclean, second.partition.unclean);
        assert_eq!(first.ledger.entries(), second.ledger.entries());
        assert_eq!(first.batches, second.batches);
    }
}
