//! DOMD schema model
//!
//! Architecture: Anti-Corruption Layer - The DOMD JSON document is translated into typed declarations
//! - Loose JSON (numbers as samples, constraint lists, type aliases) becomes one canonical shape
//! - Only the presence of required keys is checked here; malformed declarations surface
//!   later as handler-level schema faults for the affected column
//! - The model is read-only once loaded and answers queries about columns and the key

use crate::domain::anomalies::{DomdError, DomdResult};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Declared value type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ColumnType {
    String,
    Integer,
    Float,
    Date,
}

impl ColumnType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Date => "date",
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Float)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColumnType {
    type Err = DomdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "string" | "str" | "text" | "varchar" | "char" => Ok(Self::String),
            "integer" | "int" | "int64" | "long" => Ok(Self::Integer),
            "float" | "double" | "decimal" | "number" | "numeric" => Ok(Self::Float),
            "date" => Ok(Self::Date),
            other => Err(DomdError::config(format!(
                "Unsupported column type '{other}'. Supported types: string, integer, float, date"
            ))),
        }
    }
}

impl TryFrom<String> for ColumnType {
    type Error = DomdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ColumnType> for String {
    fn from(value: ColumnType) -> Self {
        value.as_str().to_string()
    }
}

/// Declaration of a single column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Unique column identifier
    pub name: String,
    /// Declared value type
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    /// Fixed width, if any
    #[serde(default)]
    pub length: Option<usize>,
    /// Whether the column must carry a value for the row to be accepted
    #[serde(default = "default_true")]
    pub required: bool,
    /// Whether null is an acceptable value
    #[serde(default)]
    pub nullable: bool,
    /// Finite set of permitted normalized values
    #[serde(default, deserialize_with = "deserialize_allowed")]
    pub allowed: Option<Vec<String>>,
    /// Free-text hints such as "YYYY-MM-DD" or "leading zero padding"
    #[serde(default, deserialize_with = "deserialize_constraints")]
    pub constraints: Option<String>,
    /// Example value, used as a hint when other metadata is absent
    #[serde(default, deserialize_with = "deserialize_scalar")]
    pub sample: Option<String>,
}

impl ColumnSpec {
    /// Create a required, non-nullable column of the given type
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            length: None,
            required: true,
            nullable: false,
            allowed: None,
            constraints: None,
            sample: None,
        }
    }

    pub fn with_length(mut self, length: usize) -> Self {
        self.length = Some(length);
        self
    }

    pub fn with_allowed<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_constraints(mut self, constraints: impl Into<String>) -> Self {
        self.constraints = Some(constraints.into());
        self
    }

    pub fn with_sample(mut self, sample: impl Into<String>) -> Self {
        self.sample = Some(sample.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Declared allowed values (empty when none are declared)
    pub fn allowed_values(&self) -> &[String] {
        self.allowed.as_deref().unwrap_or(&[])
    }

    pub fn constraint_text(&self) -> &str {
        self.constraints.as_deref().unwrap_or("")
    }

    /// Case-insensitive search in the constraint text
    pub fn constraints_mention(&self, needle: &str) -> bool {
        self.constraint_text().to_lowercase().contains(&needle.to_lowercase())
    }

    /// Whether a failure in this column rejects the row
    pub fn is_strict(&self) -> bool {
        self.required && !self.nullable
    }

    /// Human-readable summary of every constraint declared on the column
    pub fn describe(&self) -> String {
        let mut parts = vec![self.column_type.to_string()];
        if let Some(length) = self.length {
            parts.push(format!("length {length}"));
        }
        parts.push(if self.required { "required" } else { "optional" }.to_string());
        if !self.nullable {
            parts.push("not null".to_string());
        }
        if !self.allowed_values().is_empty() {
            parts.push(format!("one of [{}]", self.allowed_values().join(", ")));
        }
        if !self.constraint_text().is_empty() {
            parts.push(self.constraint_text().to_string());
        }
        parts.join(", ")
    }
}

/// The DOMD document: ordered column declarations and the primary key
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Schema {
    columns: Vec<ColumnSpec>,
    primary_key: Vec<String>,
}

/// Serialized shape of the schema file
#[derive(Debug, Deserialize)]
struct RawSchema {
    #[serde(default)]
    columns: Option<Vec<ColumnSpec>>,
    #[serde(default, alias = "primaryKey", alias = "primary_keys", deserialize_with = "deserialize_key")]
    primary_key: Option<Vec<String>>,
}

impl Schema {
    /// Build a schema, rejecting the fundamentally corrupt cases
    pub fn new(columns: Vec<ColumnSpec>, primary_key: Vec<String>) -> DomdResult<Self> {
        if columns.is_empty() {
            return Err(DomdError::config("Schema declares no columns"));
        }
        if primary_key.is_empty() {
            return Err(DomdError::config("Schema declares no primary key"));
        }

        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(DomdError::config(format!(
                    "Duplicate column name '{}' in schema",
                    column.name
                )));
            }
        }

        Ok(Self { columns, primary_key })
    }

    /// Load a schema from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> DomdResult<Self> {
        let contents = fs::read_to_string(&path).map_err(|e| {
            DomdError::config(format!(
                "Failed to read schema file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::load_from_str(&contents).map_err(|e| match e {
            DomdError::Configuration { message } => DomdError::config(format!(
                "{} (in '{}')",
                message,
                path.as_ref().display()
            )),
            other => other,
        })
    }

    /// Load a schema from JSON text
    pub fn load_from_str(content: &str) -> DomdResult<Self> {
        let raw: RawSchema = serde_json::from_str(content)
            .map_err(|e| DomdError::config(format!("Failed to parse schema: {e}")))?;

        let columns = raw
            .columns
            .ok_or_else(|| DomdError::config("Schema is missing the 'columns' array"))?;
        let primary_key = raw
            .primary_key
            .ok_or_else(|| DomdError::config("Schema is missing the 'primary_key' declaration"))?;

        Self::new(columns, primary_key)
    }

    /// Ordered column declarations
    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    /// Declared primary-key column names, in order
    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    /// Look up a column declaration by name
    pub fn column(&self, name: &str) -> DomdResult<&ColumnSpec> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| DomdError::unknown_column(name))
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn is_key_column(&self, name: &str) -> bool {
        self.primary_key.iter().any(|k| k == name)
    }

    /// Serialize to the JSON document shape
    pub fn to_json(&self) -> DomdResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| DomdError::config(format!("Failed to serialize schema: {e}")))
    }
}

fn default_true() -> bool {
    true
}

/// Render a JSON scalar as text; arrays and objects are rejected
fn scalar_text(value: JsonValue) -> Result<Option<String>, String> {
    match value {
        JsonValue::Null => Ok(None),
        JsonValue::String(s) => Ok(Some(s)),
        JsonValue::Number(n) => Ok(Some(n.to_string())),
        JsonValue::Bool(b) => Ok(Some(b.to_string())),
        other => Err(format!("expected a scalar value, found {other}")),
    }
}

fn deserialize_scalar<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = JsonValue::deserialize(deserializer)?;
    scalar_text(value).map_err(serde::de::Error::custom)
}

fn deserialize_allowed<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Vec<JsonValue>>::deserialize(deserializer)?;
    match value {
        None => Ok(None),
        Some(items) => items
            .into_iter()
            .filter_map(|item| scalar_text(item).transpose())
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

fn deserialize_constraints<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match JsonValue::deserialize(deserializer)? {
        JsonValue::Array(items) => {
            let parts = items
                .into_iter()
                .filter_map(|item| scalar_text(item).transpose())
                .collect::<Result<Vec<_>, _>>()
                .map_err(serde::de::Error::custom)?;
            Ok(if parts.is_empty() { None } else { Some(parts.join("; ")) })
        }
        other => scalar_text(other).map_err(serde::de::Error::custom),
    }
}

fn deserialize_key<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    match JsonValue::deserialize(deserializer)? {
        JsonValue::Null => Ok(None),
        JsonValue::String(s) => Ok(Some(
            s.split(',').map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect(),
        )),
        JsonValue::Array(items) => items
            .into_iter()
            .map(|item| match item {
                JsonValue::String(s) => Ok(s),
                other => Err(serde::de::Error::custom(format!(
                    "primary key entries must be column names, found {other}"
                ))),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        other => Err(serde::de::Error::custom(format!(
            "primary key must be a list of column names, found {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STOCK_SCHEMA: &str = r#"{
        "columns": [
            {"name": "date", "type": "date", "constraints": "YYYY-MM-DD"},
            {"name": "site", "type": "string", "length": 4, "constraints": ["leading zero padding"]},
            {"name": "article", "type": "integer", "length": 8, "sample": 12345678},
            {"name": "units", "type": "int", "nullable": true},
            {"name": "currency", "type": "string", "allowed": ["GBP"], "required": false}
        ],
        "primary_key": ["date", "site", "article"]
    }"#;

    #[test]
    fn test_load_schema() -> DomdResult<()> {
        let schema = Schema::load_from_str(STOCK_SCHEMA)?;

        assert_eq!(schema.columns().len(), 5);
        assert_eq!(schema.primary_key(), ["date", "site", "article"]);
        assert!(schema.is_key_column("site"));

        let article = schema.column("article")?;
        assert_eq!(article.column_type, ColumnType::Integer);
        assert_eq!(article.sample.as_deref(), Some("12345678"));
        assert!(article.is_strict());

        let units = schema.column("units")?;
        assert!(units.nullable);
        assert!(!units.is_strict());

        let site = schema.column("site")?;
        assert!(site.constraints_mention("ZERO PADDING"));
        Ok(())
    }

    #[test]
    fn test_unknown_column() {
        let schema = Schema::load_from_str(STOCK_SCHEMA).unwrap();
        let err = schema.column("price").unwrap_err();
        assert!(matches!(err, DomdError::UnknownColumn { ref name } if name == "price"));
    }

    #[test]
    fn test_corrupt_schemas_are_fatal() {
        assert!(Schema::load_from_str(r#"{"primary_key": ["a"]}"#).is_err());
        assert!(Schema::load_from_str(r#"{"columns": [], "primary_key": ["a"]}"#).is_err());
        assert!(Schema::load_from_str(
            r#"{"columns": [{"name": "a", "type": "string"}]}"#
        )
        .is_err());
        assert!(Schema::load_from_str(
            r#"{"columns": [{"name": "a", "type": "string"}], "primary_key": []}"#
        )
        .is_err());

        let duplicate = r#"{
            "columns": [{"name": "a", "type": "string"}, {"name": "a", "type": "integer"}],
            "primary_key": ["a"]
        }"#;
        let err = Schema::load_from_str(duplicate).unwrap_err();
        assert!(err.to_string().contains("Duplicate column name 'a'"));
    }

    #[test]
    fn test_key_referencing_undeclared_column_loads() {
        // surfaces later as a per-row schema fault rather than at load time
        let schema = Schema::load_from_str(
            r#"{"columns": [{"name": "a", "type": "string"}], "primaryKey": "a, b"}"#,
        )
        .unwrap();
        assert_eq!(schema.primary_key(), ["a", "b"]);
        assert!(schema.column("b").is_err());
    }

    #[test]
    fn test_describe() {
        let spec = ColumnSpec::new("currency", ColumnType::String)
            .with_length(3)
            .with_allowed(["GBP", "EUR"]);
        assert_eq!(spec.describe(), "string, length 3, required, not null, one of [GBP, EUR]");
    }

    #[test]
    fn test_type_aliases() {
        assert_eq!("Decimal".parse::<ColumnType>().unwrap(), ColumnType::Float);
        assert_eq!("TEXT".parse::<ColumnType>().unwrap(), ColumnType::String);
        assert!("blob".parse::<ColumnType>().is_err());
    }
}
