//! Robust outlier scoring for numeric columns
//!
//! Values are scored with the modified z-score `(x - median) / (1.4826 * MAD)`; anything
//! beyond the threshold is reported. Columns with zero spread are skipped.

use crate::domain::anomalies::{Anomaly, AnomalyLedger};
use crate::domain::records::Record;
use crate::schema::Schema;

const NORMAL_CONSISTENCY: f64 = 1.4826;
const MAD_EPSILON: f64 = 1.0e-9;

/// Appends an anomaly for every numeric value far from its column's median
#[derive(Debug, Clone)]
pub struct OutlierScorer {
    threshold: f64,
}

impl OutlierScorer {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Score every declared numeric column of `records`
    pub fn score(&self, records: &[Record], schema: &Schema, ledger: &mut AnomalyLedger) -> usize {
        let before = ledger.len();

        for spec in schema.columns().iter().filter(|c| c.column_type.is_numeric()) {
            let values: Vec<(usize, f64)> = records
                .iter()
                .filter_map(|r| {
                    let value = r.get(&spec.name)?.parse::<f64>().ok()?;
                    value.is_finite().then_some((r.row(), value))
                })
                .collect();

            let numbers: Vec<f64> = values.iter().map(|(_, v)| *v).collect();
            let Some((center, scale)) = robust_scale(&numbers) else {
                continue;
            };

            for (row, value) in values {
                let z = (value - center) / scale;
                if z.abs() > self.threshold {
                    ledger.record(Anomaly::new(
                        row,
                        &spec.name,
                        format!("statistical outlier {value} (robust z-score {z:.2})"),
                        format!(
                            "within {} robust deviations of the median {center}",
                            self.threshold
                        ),
                    ));
                }
            }
        }

        let found = ledger.len() - before;
        if found > 0 {
            tracing::debug!("Outlier scoring flagged {} values", found);
        }
        found
    }
}

/// Median and normal-consistent MAD; `None` for fewer than three values or zero spread
fn robust_scale(values: &[f64]) -> Option<(f64, f64)> {
    if values.len() < 3 {
        return None;
    }
    let center = median(values)?;
    let deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
    let scale = median(&deviations)? * NORMAL_CONSISTENCY;
    (scale > MAD_EPSILON).then_some((center, scale))
}

fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some((sorted[mid - 1] + sorted[mid]) * 0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnSpec, ColumnType};

    fn schema() -> Schema {
        Schema::new(
            vec![
                ColumnSpec::new("id", ColumnType::String),
                ColumnSpec::new("units", ColumnType::Integer),
            ],
            vec!["id".to_string()],
        )
        .unwrap()
    }

    fn records(units: &[&str]) -> Vec<Record> {
        units
            .iter()
            .enumerate()
            .map(|(row, u)| {
                Record::from_fields(
                    row,
                    [("id", Some(row.to_string())), ("units", Some(u.to_string()))],
                )
            })
            .collect()
    }

    #[test]
    fn test_flags_extreme_value() {
        let mut ledger = AnomalyLedger::new();
        let found = OutlierScorer::new(3.5).score(
            &records(&["10", "11", "9", "10", "12", "500"]),
            &schema(),
            &mut ledger,
        );

        assert_eq!(found, 1);
        assert_eq!(ledger.entries()[0].row, 5);
        assert_eq!(ledger.entries()[0].column, "units");
        assert!(ledger.entries()[0].issue.starts_with("statistical outlier"));
    }

    #[test]
    fn test_constant_or_short_columns_are_skipped() {
        let mut ledger = AnomalyLedger::new();
        let scorer = OutlierScorer::new(3.5);

        assert_eq!(scorer.score(&records(&["5", "5", "5", "900"]), &schema(), &mut ledger), 0);
        assert_eq!(scorer.score(&records(&["1", "1000"]), &schema(), &mut ledger), 0);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), Some(2.5));
        assert_eq!(median(&[]), None);
    }
}
