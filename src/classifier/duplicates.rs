//! Primary-key collision detection over accepted rows
//!
//! Every member of a colliding group is demoted; no occurrence is trusted over another.

use crate::domain::anomalies::{Anomaly, AnomalyLedger, PRIMARY_KEY_COLUMN};
use crate::domain::records::Record;
use std::collections::HashMap;

/// Groups accepted rows by their normalized primary-key tuple
#[derive(Debug, Clone)]
pub struct DuplicateResolver {
    key: Vec<String>,
}

/// Rows that kept their place and rows that lost it
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub kept: Vec<Record>,
    /// Demoted rows as they were passed in (normalized)
    pub demoted: Vec<Record>,
}

impl DuplicateResolver {
    pub fn new(key: &[String]) -> Self {
        Self { key: key.to_vec() }
    }

    /// Key tuple of a record
    pub fn key_of(&self, record: &Record) -> Vec<Option<String>> {
        record.values_for(self.key.iter().map(String::as_str))
    }

    /// Demote every row whose key tuple occurs more than once
    ///
    /// One anomaly per demoted row is appended to `ledger`, in row order.
    pub fn resolve(&self, accepted: Vec<Record>, ledger: &mut AnomalyLedger) -> Resolution {
        let mut counts: HashMap<Vec<Option<String>>, usize> = HashMap::new();
        for record in &accepted {
            *counts.entry(self.key_of(record)).or_insert(0) += 1;
        }

        let expected = format!("unique primary key ({})", self.key.join(", "));
        let mut resolution = Resolution::default();

        for record in accepted {
            let key = self.key_of(&record);
            if counts.get(&key).copied().unwrap_or(0) > 1 {
                let details =
                    key.iter().map(|v| v.clone().unwrap_or_else(|| "null".to_string())).collect();
                ledger.record(
                    Anomaly::new(record.row(), PRIMARY_KEY_COLUMN, "duplicate primary key", &expected)
                        .with_details(details),
                );
                resolution.demoted.push(record);
            } else {
                resolution.kept.push(record);
            }
        }

        if !resolution.demoted.is_empty() {
            tracing::info!(
                "Demoted {} rows sharing a primary key with another row",
                resolution.demoted.len()
            );
        }

        resolution
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(row: usize, date: &str, site: &str, article: &str) -> Record {
        Record::from_fields(
            row,
            [
                ("date", Some(date.to_string())),
                ("site", Some(site.to_string())),
                ("article", Some(article.to_string())),
            ],
        )
    }

    fn key() -> Vec<String> {
        vec!["date".to_string(), "site".to_string(), "article".to_string()]
    }

    #[test]
    fn test_all_duplicates_are_demoted() {
        let resolver = DuplicateResolver::new(&key());
        let mut ledger = AnomalyLedger::new();

        let resolution = resolver.resolve(
            vec![
                record(0, "20240101", "0012", "00000001"),
                record(1, "20240101", "0012", "00000002"),
                record(2, "20240101", "0012", "00000001"),
            ],
            &mut ledger,
        );

        assert_eq!(resolution.kept.iter().map(Record::row).collect::<Vec<_>>(), [1]);
        assert_eq!(resolution.demoted.iter().map(Record::row).collect::<Vec<_>>(), [0, 2]);
        assert_eq!(ledger.len(), 2);

        let anomaly = &ledger.entries()[0];
        assert_eq!(anomaly.row, 0);
        assert_eq!(anomaly.column, PRIMARY_KEY_COLUMN);
        assert_eq!(anomaly.issue, "duplicate primary key");
        assert_eq!(
            anomaly.details.as_deref(),
            Some(&["20240101".to_string(), "0012".to_string(), "00000001".to_string()][..])
        );
    }

    #[test]
    fn test_unique_keys_untouched() {
        let resolver = DuplicateResolver::new(&key());
        let mut ledger = AnomalyLedger::new();

        let resolution = resolver.resolve(
            vec![record(0, "20240101", "0012", "1"), record(1, "20240102", "0012", "1")],
            &mut ledger,
        );

        assert_eq!(resolution.kept.len(), 2);
        assert!(resolution.demoted.is_empty());
        assert!(ledger.is_empty());
    }
}
