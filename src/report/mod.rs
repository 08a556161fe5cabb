//! Run reports with multiple output formats
//!
//! CDD Principle: Anti-Corruption Layer - Formatters translate run results to external formats
//! - CleaningReport (domain summary) is converted to human or JSON representations
//! - Each formatter encapsulates the rules for its specific output format
//! - Domain logic remains pure while supporting multiple presentation needs

use crate::domain::anomalies::{Anomaly, AnomalyLedger, DomdError, DomdResult};
use crate::remediation::{BatchSummary, LayerKind};
use chrono::{DateTime, Utc};
use colored::{Color, Colorize};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use uuid::Uuid;

/// Supported output formats for run reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable format with colors
    Human,
    /// JSON format for programmatic consumption
    Json,
}

impl OutputFormat {
    /// Parse format from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "human" => Some(Self::Human),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    /// Get all available format names
    pub fn all_formats() -> &'static [&'static str] {
        &["human", "json"]
    }
}

/// Summary of one cleaning run, written as `report.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleaningReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Input dataset path, when the run read one from disk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    /// SHA-256 of the input file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_fingerprint: Option<String>,
    pub config_fingerprint: String,
    pub total_rows: usize,
    pub clean_rows: usize,
    pub unclean_rows: usize,
    pub anomaly_count: usize,
    /// Anomalies contributed by outlier scoring (included in `anomaly_count`)
    pub outlier_count: usize,
    pub anomalies_by_column: BTreeMap<String, usize>,
    pub batches: Vec<BatchSummary>,
    pub script_generated: bool,
    pub execution_time_ms: u64,
}

impl CleaningReport {
    /// Start a report for a new run
    pub fn new(config_fingerprint: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            input: None,
            input_fingerprint: None,
            config_fingerprint: config_fingerprint.into(),
            total_rows: 0,
            clean_rows: 0,
            unclean_rows: 0,
            anomaly_count: 0,
            outlier_count: 0,
            anomalies_by_column: BTreeMap::new(),
            batches: Vec::new(),
            script_generated: false,
            execution_time_ms: 0,
        }
    }

    /// Number of batches each layer handled
    pub fn batches_by_layer(&self) -> BTreeMap<LayerKind, usize> {
        let mut counts = BTreeMap::new();
        for batch in &self.batches {
            *counts.entry(batch.layer).or_insert(0) += 1;
        }
        counts
    }

    /// Whether any batch needed a layer other than the first one tried
    pub fn escalated(&self) -> bool {
        self.batches.iter().any(|b| !b.escalations.is_empty())
    }
}

/// Options for customizing report output
#[derive(Debug, Clone)]
pub struct ReportOptions {
    /// Whether to use colored output (for human format)
    pub use_colors: bool,
    /// Maximum number of anomalies to list
    pub max_anomalies: Option<usize>,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self { use_colors: true, max_anomalies: Some(20) }
    }
}

/// Main report formatter that dispatches to specific formatters
#[derive(Debug, Clone, Default)]
pub struct ReportFormatter {
    options: ReportOptions,
}

impl ReportFormatter {
    /// Create a new report formatter with options
    pub fn new(options: ReportOptions) -> Self {
        Self { options }
    }

    /// Format a run report in the specified format
    pub fn format_report(
        &self,
        report: &CleaningReport,
        ledger: &AnomalyLedger,
        format: OutputFormat,
    ) -> DomdResult<String> {
        let anomalies = self.limit(ledger.entries());
        match format {
            OutputFormat::Human => Ok(self.format_human(report, anomalies)),
            OutputFormat::Json => self.format_json(report, anomalies),
        }
    }

    /// Write a formatted report to a writer
    pub fn write_report<W: Write>(
        &self,
        report: &CleaningReport,
        ledger: &AnomalyLedger,
        format: OutputFormat,
        mut writer: W,
    ) -> DomdResult<()> {
        let formatted = self.format_report(report, ledger, format)?;
        writer.write_all(formatted.as_bytes())?;
        Ok(())
    }

    fn limit<'a>(&self, anomalies: &'a [Anomaly]) -> &'a [Anomaly] {
        match self.options.max_anomalies {
            Some(max) if max < anomalies.len() => &anomalies[..max],
            _ => anomalies,
        }
    }

    fn paint(&self, text: String, color: Color) -> String {
        if self.options.use_colors {
            text.color(color).to_string()
        } else {
            text
        }
    }

    fn format_human(&self, report: &CleaningReport, anomalies: &[Anomaly]) -> String {
        let mut output = String::new();

        if report.anomaly_count == 0 && report.unclean_rows == 0 {
            output.push_str(&self.paint("All rows are clean".to_string(), Color::Green));
            output.push('\n');
        } else {
            let color = if report.unclean_rows > 0 { Color::Red } else { Color::Yellow };
            output.push_str(&self.paint(
                format!("{} anomalies, {} unclean rows", report.anomaly_count, report.unclean_rows),
                color,
            ));
            output.push_str("\n\n");

            let mut by_column: BTreeMap<&str, Vec<&Anomaly>> = BTreeMap::new();
            for anomaly in anomalies {
                by_column.entry(anomaly.column.as_str()).or_default().push(anomaly);
            }
            for (column, entries) in by_column {
                output.push_str(&self.paint(format!("[{column}]"), Color::Cyan));
                output.push('\n');
                for anomaly in entries {
                    output.push_str(&format!("  row {}: {}", anomaly.row, anomaly.issue));
                    if let Some(details) = &anomaly.details {
                        output.push_str(&format!(" ({})", details.join(", ")));
                    }
                    output.push('\n');
                    output.push_str(
                        &self.paint(format!("    expected: {}", anomaly.expected), Color::BrightBlack),
                    );
                    output.push('\n');
                }
            }

            let hidden = report.anomaly_count.saturating_sub(anomalies.len());
            if hidden > 0 {
                output.push_str(&format!("  ... and {hidden} more (see anomalies.json)\n"));
            }
            output.push('\n');
        }

        for batch in &report.batches {
            if !batch.escalations.is_empty() {
                output.push_str(&self.paint(
                    format!("batch {} escalated to {}", batch.index, batch.layer),
                    Color::Yellow,
                ));
                output.push('\n');
                for reason in &batch.escalations {
                    output.push_str(&format!("  {reason}\n"));
                }
            }
        }

        output.push_str(&self.format_summary(report));
        output
    }

    fn format_json(&self, report: &CleaningReport, anomalies: &[Anomaly]) -> DomdResult<String> {
        let output = serde_json::json!({
            "report": report,
            "anomalies": anomalies,
        });
        serde_json::to_string_pretty(&output)
            .map_err(|e| DomdError::report(format!("Failed to serialize JSON: {e}")))
    }

    fn format_summary(&self, report: &CleaningReport) -> String {
        let layers: Vec<String> = report
            .batches_by_layer()
            .into_iter()
            .map(|(layer, count)| format!("{layer} x{count}"))
            .collect();
        let seconds = report.execution_time_ms as f64 / 1000.0;

        format!(
            "{} {} rows: {} clean, {} unclean; batches: {} ({:.1}s)\n",
            self.paint("Summary:".to_string(), Color::White),
            report.total_rows,
            self.paint(report.clean_rows.to_string(), Color::Green),
            self.paint(report.unclean_rows.to_string(), Color::Red),
            if layers.is_empty() { "none".to_string() } else { layers.join(", ") },
            seconds
        )
    }
}
