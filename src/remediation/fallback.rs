//! Fixed business-rule corrections used when nothing else could clean a batch
//!
//! Rules are matched against dataset headers, not schema columns, so they still apply when
//! the dataset does not follow the schema at all.

use super::{Batch, BatchOutcome, LayerKind};
use crate::config::{Correction, EngineConfig, FallbackRule};
use crate::domain::anomalies::{Anomaly, AnomalyLedger, PRIMARY_KEY_COLUMN};
use crate::domain::records::{Partition, Record};
use crate::handlers::pad_to_width;

/// Terminal layer of the escalation chain
#[derive(Debug, Clone)]
pub struct RuleFallback {
    rules: Vec<FallbackRule>,
}

impl RuleFallback {
    pub fn new(rules: Vec<FallbackRule>) -> Self {
        Self { rules }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.fallback.rules.clone())
    }

    pub fn rules(&self) -> &[FallbackRule] {
        &self.rules
    }

    /// First rule applying to a header
    pub fn rule_for(&self, header: &str) -> Option<&FallbackRule> {
        self.rules.iter().find(|rule| rule.matches(header))
    }

    /// Correct every row of the batch; rows missing an identifier go to `unclean`
    pub fn apply(&self, batch: &Batch<'_>) -> BatchOutcome {
        let mut ledger = AnomalyLedger::new();
        let mut partition = Partition::new();

        let covered: Vec<(&String, &FallbackRule)> = batch
            .headers
            .iter()
            .filter_map(|header| self.rule_for(header).map(|rule| (header, rule)))
            .collect();

        if covered.is_empty() {
            tracing::warn!(
                "Batch {}: no fallback rule matches any of the headers {:?}",
                batch.index,
                batch.headers
            );
            for record in batch.records {
                ledger.record(Anomaly::new(
                    record.row(),
                    PRIMARY_KEY_COLUMN,
                    "no fallback rule applies to any column",
                    "at least one well-known business column",
                ));
            }
            partition.unclean = batch.records.to_vec();
            return BatchOutcome { partition, ledger, layer: LayerKind::RuleFallback };
        }

        for record in batch.records {
            let mut fields = record.fields().clone();
            let mut complete = true;

            for (header, rule) in &covered {
                let corrected = correct(&rule.correction, record.get(header));
                if corrected.is_none() {
                    complete = false;
                    ledger.record(Anomaly::new(
                        record.row(),
                        header.as_str(),
                        "value could not be corrected",
                        describe(&rule.correction),
                    ));
                }
                fields.insert((*header).clone(), corrected);
            }

            if complete {
                partition.clean.push(Record::from_fields(record.row(), fields));
            } else {
                partition.unclean.push(record.clone());
            }
        }

        BatchOutcome { partition, ledger, layer: LayerKind::RuleFallback }
    }
}

/// Apply one correction; `None` means the value is unusable as an identifier
pub fn correct(correction: &Correction, value: Option<&str>) -> Option<String> {
    match correction {
        Correction::DateDigits { width } => {
            let digits: String =
                value?.chars().filter(char::is_ascii_digit).take(*width).collect();
            if digits.is_empty() {
                None
            } else {
                Some(format!("{digits:0>width$}", width = *width))
            }
        }
        Correction::FixedWidth { width } => {
            let text = value.filter(|v| !v.is_empty())?;
            Some(pad_to_width(text, *width))
        }
        Correction::Integer => {
            let number = value.and_then(parse_number).unwrap_or(0.0);
            Some(format!("{}", number.trunc() as i64))
        }
        Correction::Decimal => {
            let number = value.and_then(parse_number).unwrap_or(0.0);
            Some(number.to_string())
        }
        Correction::Currency { default } => {
            let code = value
                .map(str::trim)
                .filter(|v| v.len() == 3 && v.chars().all(|c| c.is_ascii_alphabetic()))
                .unwrap_or(default.as_str());
            Some(code.to_ascii_uppercase())
        }
    }
}

/// Human-readable form of a correction, used as the `expected` text of anomalies
pub fn describe(correction: &Correction) -> String {
    match correction {
        Correction::DateDigits { width } => format!("{width} date digits"),
        Correction::FixedWidth { width } => format!("non-empty code of {width} characters"),
        Correction::Integer => "whole number (0 when unreadable)".to_string(),
        Correction::Decimal => "decimal number (0 when unreadable)".to_string(),
        Correction::Currency { default } => format!("3-letter currency code (default {default})"),
    }
}

fn parse_number(text: &str) -> Option<f64> {
    let cleaned: String = text.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();
    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::records::Dataset;
    use rstest::rstest;

    #[rstest]
    #[case(Correction::DateDigits { width: 8 }, Some("2024-01-15"), Some("20240115"))]
    #[case(Correction::DateDigits { width: 8 }, Some("2024-01-15 10:00"), Some("20240115"))]
    #[case(Correction::DateDigits { width: 8 }, Some("240115"), Some("00240115"))]
    #[case(Correction::DateDigits { width: 8 }, Some("n/a"), None)]
    #[case(Correction::FixedWidth { width: 4 }, Some("7"), Some("0007"))]
    #[case(Correction::FixedWidth { width: 4 }, Some("123456"), Some("3456"))]
    #[case(Correction::FixedWidth { width: 4 }, None, None)]
    #[case(Correction::Integer, Some("12.9"), Some("12"))]
    #[case(Correction::Integer, Some("lots"), Some("0"))]
    #[case(Correction::Decimal, Some("1,234.5"), Some("1234.5"))]
    #[case(Correction::Decimal, None, Some("0"))]
    #[case(Correction::Currency { default: "GBP".to_string() }, Some("eur"), Some("EUR"))]
    #[case(Correction::Currency { default: "GBP".to_string() }, Some("£"), Some("GBP"))]
    fn test_corrections(
        #[case] correction: Correction,
        #[case] input: Option<&str>,
        #[case] expected: Option<&str>,
    ) {
        assert_eq!(correct(&correction, input).as_deref(), expected);
    }

    #[test]
    fn test_incomplete_rows_go_unclean() {
        let fallback = RuleFallback::from_config(&EngineConfig::default());
        let data = Dataset::new(
            vec!["Date".to_string(), "store".to_string(), "amount".to_string()],
            vec![
                vec![Some("2024/01/05".to_string()), Some("9".to_string()), Some("x".to_string())],
                vec![Some("2024/01/06".to_string()), None, Some("3.5".to_string())],
            ],
        );
        let batch = Batch::new(0, data.headers(), data.records());

        let outcome = fallback.apply(&batch);

        assert_eq!(outcome.layer, LayerKind::RuleFallback);
        assert_eq!(outcome.partition.clean.len(), 1);
        let clean = &outcome.partition.clean[0];
        assert_eq!(clean.get("Date"), Some("20240105"));
        assert_eq!(clean.get("store"), Some("0009"));
        assert_eq!(clean.get("amount"), Some("0"));

        assert_eq!(outcome.partition.unclean, vec![data.records()[1].clone()]);
        assert_eq!(outcome.ledger.len(), 1);
        assert_eq!(outcome.ledger.entries()[0].column, "store");
    }

    #[test]
    fn test_no_matching_rule_leaves_everything_unclean() {
        let fallback = RuleFallback::from_config(&EngineConfig::default());
        let data = Dataset::new(vec!["colour".to_string()], vec![vec![Some("red".to_string())]]);
        let batch = Batch::new(0, data.headers(), data.records());

        let outcome = fallback.apply(&batch);

        assert!(outcome.partition.clean.is_empty());
        assert_eq!(outcome.partition.unclean.len(), 1);
        assert!(outcome.ledger.entries()[0].is_key_level());
    }
}
