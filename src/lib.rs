//! DOMD Guardian - Schema-driven validation and remediation of tabular datasets
//!
//! Architecture: Clean Architecture - Library interface serves as the application layer
//! - Pure domain logic (schema, handlers, classifier, ledger) separated from file I/O
//! - Remediation escalates through an ordered chain that always yields a partition
//! - An optional suggestion service plugs in behind a trait and is never trusted blindly

pub mod classifier;
pub mod config;
pub mod dataset;
pub mod domain;
pub mod handlers;
pub mod profiler;
pub mod remediation;
pub mod report;
pub mod schema;

// Re-export main types for convenient access
pub use domain::anomalies::{Anomaly, AnomalyLedger, DomdError, DomdResult};
pub use domain::records::{Dataset, Partition, Record};

pub use config::{ConfigBuilder, Correction, EngineConfig, FallbackRule};

pub use schema::{ColumnSpec, ColumnType, Schema};

pub use handlers::{HandlerContext, HandlerKind, HandlerPipeline};

pub use classifier::{ClassificationOptions, DuplicateResolver, RowClassifier};

pub use remediation::{
    EscalationController, LayerKind, ReplaySuggestionService, RuleFallback, SuggestionService,
};

pub use profiler::{ColumnProfile, OutlierScorer};

pub use report::{CleaningReport, OutputFormat, ReportFormatter, ReportOptions};

use remediation::external::{self, ExternalCandidateLayer};
use remediation::{RemediationLayer, SchemaGenericLayer};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Everything one cleaning run produced
#[derive(Debug, Clone)]
pub struct CleaningOutcome {
    /// Input headers, in input order
    pub headers: Vec<String>,
    pub partition: Partition,
    /// Best-effort normalized record for every input row, in input order
    pub normalized: Vec<Record>,
    pub ledger: AnomalyLedger,
    pub script: Option<String>,
    pub report: CleaningReport,
}

/// Main cleaner providing high-level cleaning operations
pub struct DomdCleaner {
    schema: Schema,
    config: EngineConfig,
    context: HandlerContext,
    suggestions: Option<Arc<dyn SuggestionService>>,
    report_formatter: ReportFormatter,
}

impl DomdCleaner {
    /// Create a new cleaner with the given schema and configuration
    pub fn new_with_config(schema: Schema, config: EngineConfig) -> DomdResult<Self> {
        config.validate()?;
        let context = HandlerContext::from_config(&config);

        Ok(Self {
            schema,
            config,
            context,
            suggestions: None,
            report_formatter: ReportFormatter::default(),
        })
    }

    /// Create a cleaner with default configuration
    pub fn new(schema: Schema) -> DomdResult<Self> {
        Self::new_with_config(schema, EngineConfig::default())
    }

    /// Create a cleaner loading the schema and (optionally) the configuration from files
    pub fn from_files<P: AsRef<Path>, Q: AsRef<Path>>(
        schema_path: P,
        config_path: Option<Q>,
    ) -> DomdResult<Self> {
        let schema = Schema::load_from_file(schema_path)?;
        let config = match config_path {
            Some(path) => EngineConfig::load_from_file(path)?,
            None => EngineConfig::default(),
        };
        Self::new_with_config(schema, config)
    }

    /// Attach a suggestion service as the first remediation layer
    pub fn with_suggestions(mut self, service: Arc<dyn SuggestionService>) -> Self {
        self.suggestions = Some(service);
        self
    }

    /// Override the processing-time context (reference day, currency literal)
    pub fn with_context(mut self, context: HandlerContext) -> Self {
        self.context = context;
        self
    }

    /// Set custom report formatter
    pub fn with_report_formatter(mut self, formatter: ReportFormatter) -> Self {
        self.report_formatter = formatter;
        self
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Handler plans resolved for the schema
    pub fn handler_pipeline(&self) -> HandlerPipeline {
        HandlerPipeline::resolve(&self.schema, self.context.clone())
    }

    /// Build the layer chain for the current settings
    pub fn controller(&self) -> EscalationController {
        let mut layers: Vec<Box<dyn RemediationLayer>> = Vec::new();

        if let Some(service) = self.external_service() {
            layers.push(Box::new(ExternalCandidateLayer::new(
                service,
                self.schema.clone(),
                self.external_timeout(),
            )));
        }

        let classifier = RowClassifier::new(self.schema.clone(), self.context.clone());
        let options = ClassificationOptions { parallel: self.config.engine.parallel };
        layers.push(Box::new(SchemaGenericLayer::new(classifier, options)));

        EscalationController::new(
            layers,
            RuleFallback::from_config(&self.config),
            self.schema.primary_key().to_vec(),
        )
    }

    /// Clean an in-memory dataset
    pub async fn clean_dataset(&self, dataset: &Dataset) -> CleaningOutcome {
        let start_time = Instant::now();
        let mut report = CleaningReport::new(self.config.fingerprint());

        let run = self.controller().run(dataset, self.config.engine.batch_size).await;
        let mut ledger = AnomalyLedger::new();
        ledger.extend(dataset.shape_anomalies());
        ledger.absorb(run.ledger);
        let normalized = self.best_effort_rows(dataset, &run.partition);

        if self.config.outliers.enabled {
            report.outlier_count = OutlierScorer::new(self.config.outliers.threshold).score(
                &run.partition.clean,
                &self.schema,
                &mut ledger,
            );
        }

        let script = match self.external_service() {
            Some(service) if self.config.external.generate_script => {
                external::request_script(service.as_ref(), &self.schema, self.external_timeout())
                    .await
            }
            _ => None,
        };

        report.total_rows = dataset.len();
        report.clean_rows = run.partition.clean.len();
        report.unclean_rows = run.partition.unclean.len();
        report.anomaly_count = ledger.len();
        report.anomalies_by_column = ledger.counts_by_column();
        report.batches = run.batches;
        report.script_generated = script.is_some();
        report.execution_time_ms = start_time.elapsed().as_millis() as u64;

        CleaningOutcome {
            headers: dataset.headers().to_vec(),
            partition: run.partition,
            normalized,
            ledger,
            script,
            report,
        }
    }

    /// Read a CSV file and clean it
    pub async fn clean_file<P: AsRef<Path>>(&self, input: P) -> DomdResult<CleaningOutcome> {
        let input = input.as_ref();
        let data = dataset::read_csv(input)?;
        let fingerprint = dataset::fingerprint_file(input)?;

        let mut outcome = self.clean_dataset(&data).await;
        outcome.report.input = Some(input.display().to_string());
        outcome.report.input_fingerprint = Some(fingerprint);
        Ok(outcome)
    }

    /// Write every artifact of a run into `dir`
    pub fn write_outputs<P: AsRef<Path>>(
        &self,
        outcome: &CleaningOutcome,
        dir: P,
    ) -> DomdResult<Vec<PathBuf>> {
        let writer = dataset::OutputWriter::create(dir)?;
        let columns =
            dataset::clean_columns(&self.schema, &outcome.headers, &outcome.partition.clean);

        let mut written = vec![
            writer.write_anomalies(&outcome.ledger)?,
            writer.write_clean(&outcome.partition.clean, &columns)?,
            writer.write_unclean(&outcome.partition.unclean, &outcome.headers)?,
            writer.write_normalized(
                &outcome.normalized,
                &dataset::clean_columns(&self.schema, &outcome.headers, &outcome.normalized),
            )?,
        ];
        if let Some(script) = &outcome.script {
            written.push(writer.write_script(script)?);
        }
        written.push(writer.write_report(&outcome.report)?);

        tracing::info!("Wrote {} output files to {}", written.len(), writer.dir().display());
        Ok(written)
    }

    /// Format a run report straight into a writer
    pub fn write_report<W: Write>(
        &self,
        outcome: &CleaningOutcome,
        format: OutputFormat,
        writer: W,
    ) -> DomdResult<()> {
        self.report_formatter.write_report(&outcome.report, &outcome.ledger, format, writer)
    }

    /// Statistical profile of a dataset
    pub fn profile(&self, dataset: &Dataset) -> BTreeMap<String, ColumnProfile> {
        profiler::profile(dataset.records(), &self.schema)
    }

    /// Clean rows as they ended up, every other row as the schema path would normalize it
    fn best_effort_rows(&self, dataset: &Dataset, partition: &Partition) -> Vec<Record> {
        let classifier = RowClassifier::new(self.schema.clone(), self.context.clone());
        let options = ClassificationOptions { parallel: self.config.engine.parallel };

        let mut rows: BTreeMap<usize, Record> = classifier
            .classify(dataset.records(), &options)
            .normalized
            .into_iter()
            .map(|record| (record.row(), record))
            .collect();
        for clean in &partition.clean {
            if let Some(best) = rows.get_mut(&clean.row()) {
                let merged = best.fields().clone().into_iter().chain(clean.fields().clone());
                *best = Record::from_fields(clean.row(), merged);
            }
        }
        rows.into_values().collect()
    }

    fn external_service(&self) -> Option<Arc<dyn SuggestionService>> {
        self.suggestions.clone().filter(|_| self.config.external.enabled)
    }

    fn external_timeout(&self) -> Duration {
        Duration::from_millis(self.config.external.timeout_ms)
    }
}

/// Convenience function: clean `input` against `schema_path` and write outputs to `output_dir`
pub async fn clean_files<P, Q, R>(
    schema_path: P,
    input: Q,
    output_dir: R,
) -> DomdResult<CleaningReport>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
    R: AsRef<Path>,
{
    let cleaner = DomdCleaner::from_files(schema_path, None::<&Path>)?;
    let outcome = cleaner.clean_file(input).await?;
    cleaner.write_outputs(&outcome, output_dir)?;
    Ok(outcome.report)
}
