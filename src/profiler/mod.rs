//! Per-column statistical profiles of a set of records
//!
//! Pure functions over records: nothing here touches the partition or the ledger.

pub mod outliers;

use crate::domain::records::Record;
use crate::handlers::date;
use crate::schema::{ColumnType, Schema};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub use outliers::OutlierScorer;

/// Summary statistics for one column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnProfile {
    /// Declared type, or the inferred type for undeclared columns
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    pub missing_count: usize,
    pub distinct_count: usize,
    pub mean: Option<f64>,
    pub stddev: Option<f64>,
}

/// Profile every declared column and every column present in the records
pub fn profile(records: &[Record], schema: &Schema) -> BTreeMap<String, ColumnProfile> {
    let mut columns: BTreeSet<&str> = schema.column_names().collect();
    for record in records {
        columns.extend(record.fields().keys().map(String::as_str));
    }

    columns
        .into_iter()
        .map(|name| {
            let values: Vec<Option<&str>> = records.iter().map(|r| r.get(name)).collect();
            let column_type = match schema.column(name) {
                Ok(spec) => spec.column_type,
                Err(_) => infer_type(&values),
            };
            (name.to_string(), profile_column(&values, column_type))
        })
        .collect()
}

fn profile_column(values: &[Option<&str>], column_type: ColumnType) -> ColumnProfile {
    let present: Vec<&str> = values.iter().flatten().copied().collect();
    let distinct: BTreeSet<&str> = present.iter().copied().collect();

    let (mean, stddev) = if column_type.is_numeric() {
        let numbers: Vec<f64> = present.iter().filter_map(|v| v.parse::<f64>().ok()).collect();
        (mean(&numbers), sample_stddev(&numbers))
    } else {
        (None, None)
    };

    ColumnProfile {
        column_type,
        missing_count: values.len() - present.len(),
        distinct_count: distinct.len(),
        mean,
        stddev,
    }
}

/// Narrowest type every non-null value fits
pub fn infer_type(values: &[Option<&str>]) -> ColumnType {
    let present: Vec<&str> = values.iter().flatten().copied().collect();
    if present.is_empty() {
        ColumnType::String
    } else if present.iter().all(|v| v.parse::<i64>().is_ok()) {
        ColumnType::Integer
    } else if present.iter().all(|v| v.parse::<f64>().is_ok()) {
        ColumnType::Float
    } else if present.iter().all(|v| date::parse_known(v).is_some()) {
        ColumnType::Date
    } else {
        ColumnType::String
    }
}

pub(crate) fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

pub(crate) fn sample_stddev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let mean = mean(values)?;
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(variance.sqrt())
}
