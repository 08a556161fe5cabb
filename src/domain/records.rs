//! Records, datasets and partitions
//!
//! Records are read once and never mutated: normalization builds a new record that
//! keeps the row identifier of its source.

use super::anomalies::Anomaly;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::{BTreeMap, BTreeSet};

/// Key under which a record's row identifier travels in JSON exchanges
pub const ROW_ID_KEY: &str = "_row";

/// Column label used for anomalies about the shape of a whole input row
pub const ROW_SHAPE_COLUMN: &str = "row_shape";

/// One row of the dataset: column name to raw text value (or null)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    row: usize,
    fields: BTreeMap<String, Option<String>>,
}

impl Record {
    /// Build a record from column/value pairs
    pub fn from_fields<I, K>(row: usize, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Option<String>)>,
        K: Into<String>,
    {
        Self {
            row,
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Row identifier (0-based position in the input dataset)
    pub fn row(&self) -> usize {
        self.row
    }

    /// Value of a column; missing columns and nulls both read as `None`
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields.get(column).and_then(|v| v.as_deref())
    }

    /// Whether the record has the column at all (even if null)
    pub fn has_column(&self, column: &str) -> bool {
        self.fields.contains_key(column)
    }

    pub fn fields(&self) -> &BTreeMap<String, Option<String>> {
        &self.fields
    }

    /// Values for the given columns, in order
    pub fn values_for<'a, I>(&self, columns: I) -> Vec<Option<String>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        columns.into_iter().map(|c| self.get(c).map(str::to_string)).collect()
    }

    /// JSON object of the record including its row identifier
    pub fn to_json(&self) -> JsonValue {
        let mut object = JsonMap::new();
        object.insert(ROW_ID_KEY.to_string(), JsonValue::from(self.row));
        for (name, value) in &self.fields {
            let value = match value {
                Some(text) => JsonValue::String(text.clone()),
                None => JsonValue::Null,
            };
            object.insert(name.clone(), value);
        }
        JsonValue::Object(object)
    }
}

/// A row-oriented table read from the input file
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    headers: Vec<String>,
    records: Vec<Record>,
    /// Cells beyond the header width, by row; they are not part of any record
    surplus: BTreeMap<usize, Vec<String>>,
}

impl Dataset {
    /// Build a dataset from headers and rows of raw cells
    ///
    /// Row identifiers are assigned from the row position. Short rows are padded with
    /// nulls; cells past the last header are set aside and reported by
    /// [`Dataset::shape_anomalies`].
    pub fn new(headers: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        let width = headers.len();
        let mut surplus = BTreeMap::new();
        let records = rows
            .into_iter()
            .enumerate()
            .map(|(row, mut cells)| {
                if cells.len() > width {
                    let extra = cells.drain(width..).map(Option::unwrap_or_default).collect();
                    surplus.insert(row, extra);
                }
                cells.resize(width, None);
                Record::from_fields(row, headers.iter().cloned().zip(cells))
            })
            .collect();
        Self { headers, records, surplus }
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// One anomaly per row that carried more cells than there are headers
    pub fn shape_anomalies(&self) -> Vec<Anomaly> {
        self.surplus
            .iter()
            .map(|(row, cells)| {
                Anomaly::new(
                    *row,
                    ROW_SHAPE_COLUMN,
                    format!("{} cell(s) beyond the header row were dropped", cells.len()),
                    format!("{} cells per row", self.headers.len()),
                )
                .with_details(cells.clone())
            })
            .collect()
    }

    /// Split the records into consecutive batches; `None` means one batch
    pub fn batches(&self, batch_size: Option<usize>) -> Vec<&[Record]> {
        match batch_size {
            Some(size) if size > 0 && size < self.records.len() => {
                self.records.chunks(size).collect()
            }
            _ if self.records.is_empty() => Vec::new(),
            _ => vec![self.records.as_slice()],
        }
    }
}

/// Clean/unclean split of a set of rows
///
/// `clean` holds normalized records, `unclean` holds records with their original values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Partition {
    pub clean: Vec<Record>,
    pub unclean: Vec<Record>,
}

impl Partition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total(&self) -> usize {
        self.clean.len() + self.unclean.len()
    }

    pub fn clean_rows(&self) -> BTreeSet<usize> {
        self.clean.iter().map(Record::row).collect()
    }

    pub fn unclean_rows(&self) -> BTreeSet<usize> {
        self.unclean.iter().map(Record::row).collect()
    }

    /// Whether every expected row appears exactly once across both sides
    pub fn covers_exactly(&self, expected: &BTreeSet<usize>) -> bool {
        let clean = self.clean_rows();
        let unclean = self.unclean_rows();
        clean.len() == self.clean.len()
            && unclean.len() == self.unclean.len()
            && clean.is_disjoint(&unclean)
            && clean.union(&unclean).copied().collect::<BTreeSet<_>>() == *expected
    }

    /// Append another partition
    pub fn merge(&mut self, other: Partition) {
        self.clean.extend(other.clean);
        self.unclean.extend(other.unclean);
    }

    /// Order both sides by row identifier for stable output
    pub fn sort_by_row(&mut self) {
        self.clean.sort_by_key(Record::row);
        self.unclean.sort_by_key(Record::row);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_dataset() -> Dataset {
        Dataset::new(
            vec!["site".to_string(), "units".to_string()],
            vec![
                vec![Some("12".to_string()), None],
                vec![Some("0034".to_string()), Some("5".to_string())],
                vec![None, Some("7".to_string())],
            ],
        )
    }

    #[test]
    fn test_dataset_assigns_row_ids() {
        let dataset = sample_dataset();

        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.records()[2].row(), 2);
        assert_eq!(dataset.records()[0].get("site"), Some("12"));
        assert_eq!(dataset.records()[0].get("units"), None);
        assert!(dataset.records()[0].has_column("units"));
        assert!(!dataset.records()[0].has_column("price"));
    }

    #[test]
    fn test_ragged_rows_are_padded_or_set_aside() {
        let dataset = Dataset::new(
            vec!["id".to_string(), "site".to_string()],
            vec![
                vec![Some("1".to_string())],
                vec![Some("2".to_string()), Some("14".to_string()), Some("x".to_string()), None],
                vec![Some("3".to_string()), Some("15".to_string())],
            ],
        );

        assert_eq!(dataset.len(), 3);
        assert!(dataset.records()[0].has_column("site"));
        assert_eq!(dataset.records()[0].get("site"), None);
        assert_eq!(dataset.records()[1].fields().len(), 2);

        let anomalies = dataset.shape_anomalies();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].row, 1);
        assert_eq!(anomalies[0].column, ROW_SHAPE_COLUMN);
        assert_eq!(anomalies[0].details, Some(vec!["x".to_string(), String::new()]));
        assert!(sample_dataset().shape_anomalies().is_empty());
    }

    #[test]
    fn test_batches() {
        let dataset = sample_dataset();

        assert_eq!(dataset.batches(None).len(), 1);
        assert_eq!(dataset.batches(Some(0)).len(), 1);
        let batches = dataset.batches(Some(2));
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1][0].row(), 2);
        assert!(Dataset::default().batches(None).is_empty());
    }

    #[test]
    fn test_record_json_carries_row_id() {
        let dataset = sample_dataset();
        let json = dataset.records()[1].to_json();

        assert_eq!(json[ROW_ID_KEY], 1);
        assert_eq!(json["site"], "0034");
        assert!(json.get("units").is_some());
    }

    #[test]
    fn test_partition_coverage() {
        let dataset = sample_dataset();
        let expected: BTreeSet<usize> = (0..3).collect();

        let mut partition = Partition::new();
        partition.clean.push(dataset.records()[0].clone());
        partition.unclean.push(dataset.records()[2].clone());
        assert!(!partition.covers_exactly(&expected));

        partition.unclean.push(dataset.records()[1].clone());
        assert!(partition.covers_exactly(&expected));

        partition.clean.push(dataset.records()[1].clone());
        assert!(!partition.covers_exactly(&expected));
    }
}
