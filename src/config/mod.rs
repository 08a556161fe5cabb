//! Configuration loading and management for DOMD Guardian
//!
//! Architecture: Anti-Corruption Layer - Configuration translates external YAML formats
//! - Raw YAML structures are converted to clean engine settings
//! - The fixed fallback rule table is embedded as a default, not hardcoded in the engine
//! - Configuration is validated once, before any row is processed

use crate::domain::anomalies::{DomdError, DomdResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// File names probed in the working directory when no config path is given
pub const DEFAULT_CONFIG_FILES: [&str; 3] =
    ["domd_guardian.yaml", "domd_guardian.yml", ".domd_guardian.yaml"];

/// Main configuration structure for DOMD Guardian
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Configuration format version
    pub version: String,
    /// Batching and handler settings
    #[serde(default)]
    pub engine: EngineSettings,
    /// Suggestion service settings
    #[serde(default)]
    pub external: ExternalSettings,
    /// Fixed rule fallback used when the schema-driven path fails
    #[serde(default)]
    pub fallback: FallbackSettings,
    /// Auxiliary outlier scoring
    #[serde(default)]
    pub outliers: OutlierSettings,
}

/// Batching and handler settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Rows per batch; `None` processes the dataset as a single batch
    #[serde(default)]
    pub batch_size: Option<usize>,
    /// Apply column handlers on the rayon thread pool
    #[serde(default = "default_true")]
    pub parallel: bool,
    /// Literal currency code used when a currency column declares neither allowed values nor a sample
    #[serde(default = "default_currency")]
    pub currency_fallback: String,
}

/// Suggestion service settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalSettings {
    /// Whether a configured suggestion service is consulted at all
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Upper bound for each suggestion call
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Whether to request a cleaning program artifact
    #[serde(default = "default_true")]
    pub generate_script: bool,
}

/// Fixed rule fallback settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackSettings {
    pub rules: Vec<FallbackRule>,
}

/// One hard-coded correction applied to a well-known business column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackRule {
    /// Canonical column name
    pub column: String,
    /// Other header spellings the rule also applies to
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Correction to apply
    #[serde(flatten)]
    pub correction: Correction,
}

/// Kinds of fixed corrections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "correction", rename_all = "snake_case")]
pub enum Correction {
    /// Keep the leading `width` digits, left-pad shorter digit runs with zeros
    DateDigits { width: usize },
    /// Left-pad with zeros and truncate from the left to exactly `width` characters
    FixedWidth { width: usize },
    /// Whole number, zero when the value cannot be read as a number
    Integer,
    /// Decimal number, zero when the value cannot be read as a number
    Decimal,
    /// Three-letter uppercase code, `default` when the value is not one
    Currency { default: String },
}

/// Outlier scoring settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Modified z-score beyond which a value is reported
    #[serde(default = "default_outlier_threshold")]
    pub threshold: f64,
}

impl EngineConfig {
    /// Load configuration from a YAML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> DomdResult<Self> {
        let contents = fs::read_to_string(&path).map_err(|e| {
            DomdError::config(format!(
                "Failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let config: Self = serde_yaml::from_str(&contents).map_err(|e| {
            DomdError::config(format!(
                "Failed to parse config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from string content
    pub fn load_from_str(content: &str) -> DomdResult<Self> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| DomdError::config(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Load the first default config file found in `dir`, or the built-in defaults
    pub fn discover<P: AsRef<Path>>(dir: P) -> DomdResult<Self> {
        for name in DEFAULT_CONFIG_FILES {
            let candidate = dir.as_ref().join(name);
            if candidate.is_file() {
                tracing::debug!("Using configuration from {}", candidate.display());
                return Self::load_from_file(candidate);
            }
        }
        Ok(Self::default())
    }

    /// Get default configuration with the built-in fallback rules
    pub fn with_defaults() -> Self {
        Self {
            version: "1.0".to_string(),
            engine: EngineSettings::default(),
            external: ExternalSettings::default(),
            fallback: FallbackSettings::default(),
            outliers: OutlierSettings::default(),
        }
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> DomdResult<()> {
        if !["1.0"].contains(&self.version.as_str()) {
            return Err(DomdError::config(format!(
                "Unsupported configuration version: {}. Supported versions: 1.0",
                self.version
            )));
        }

        if self.engine.batch_size == Some(0) {
            return Err(DomdError::config("engine.batch_size must be positive"));
        }

        if self.engine.currency_fallback.trim().is_empty() {
            return Err(DomdError::config("engine.currency_fallback must not be empty"));
        }

        if self.external.timeout_ms == 0 {
            return Err(DomdError::config("external.timeout_ms must be positive"));
        }

        if !self.outliers.threshold.is_finite() || self.outliers.threshold <= 0.0 {
            return Err(DomdError::config(format!(
                "outliers.threshold must be a positive number, got {}",
                self.outliers.threshold
            )));
        }

        for rule in &self.fallback.rules {
            if rule.column.trim().is_empty() {
                return Err(DomdError::config("Fallback rule with empty column name"));
            }

            let duplicate_count =
                self.fallback.rules.iter().filter(|r| r.column == rule.column).count();
            if duplicate_count > 1 {
                return Err(DomdError::config(format!(
                    "Duplicate fallback rule for column '{}'",
                    rule.column
                )));
            }

            match &rule.correction {
                Correction::DateDigits { width } | Correction::FixedWidth { width }
                    if *width == 0 =>
                {
                    return Err(DomdError::config(format!(
                        "Fallback rule '{}' needs a positive width",
                        rule.column
                    )));
                }
                Correction::Currency { default } if default.trim().is_empty() => {
                    return Err(DomdError::config(format!(
                        "Fallback rule '{}' needs a default currency code",
                        rule.column
                    )));
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Convert to JSON for serialization
    pub fn to_json(&self) -> DomdResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| DomdError::config(format!("Failed to serialize config: {e}")))
    }

    /// Create a fingerprint of the configuration for report provenance
    pub fn fingerprint(&self) -> String {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();

        self.version.hash(&mut hasher);
        self.engine.batch_size.hash(&mut hasher);
        self.engine.parallel.hash(&mut hasher);
        self.engine.currency_fallback.hash(&mut hasher);
        self.external.enabled.hash(&mut hasher);
        self.external.timeout_ms.hash(&mut hasher);
        self.external.generate_script.hash(&mut hasher);
        self.outliers.enabled.hash(&mut hasher);
        self.outliers.threshold.to_bits().hash(&mut hasher);

        // Rules in column order so reordering the YAML does not change the fingerprint
        let mut sorted_rules: Vec<_> = self.fallback.rules.iter().collect();
        sorted_rules.sort_by_key(|rule| rule.column.as_str());
        for rule in sorted_rules {
            rule.column.hash(&mut hasher);
            rule.aliases.hash(&mut hasher);
            format!("{:?}", rule.correction).hash(&mut hasher);
        }

        format!("{:x}", hasher.finish())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            batch_size: None,
            parallel: true,
            currency_fallback: default_currency(),
        }
    }
}

impl Default for ExternalSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: default_timeout_ms(),
            generate_script: true,
        }
    }
}

impl Default for OutlierSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_outlier_threshold(),
        }
    }
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self { rules: default_fallback_rules() }
    }
}

impl FallbackRule {
    pub fn new(column: impl Into<String>, correction: Correction) -> Self {
        Self { column: column.into(), aliases: Vec::new(), correction }
    }

    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases = aliases.into_iter().map(Into::into).collect();
        self
    }

    /// Whether the rule applies to a header (case-insensitive)
    pub fn matches(&self, header: &str) -> bool {
        self.column.eq_ignore_ascii_case(header)
            || self.aliases.iter().any(|alias| alias.eq_ignore_ascii_case(header))
    }
}

fn default_true() -> bool {
    true
}

fn default_currency() -> String {
    "GBP".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_outlier_threshold() -> f64 {
    3.5
}

/// Built-in corrections for the well-known business columns
fn default_fallback_rules() -> Vec<FallbackRule> {
    vec![
        FallbackRule::new("date", Correction::DateDigits { width: 8 })
            .with_aliases(["business_date", "day"]),
        FallbackRule::new("site", Correction::FixedWidth { width: 4 })
            .with_aliases(["site_code", "store"]),
        FallbackRule::new("article", Correction::FixedWidth { width: 8 })
            .with_aliases(["article_code", "sku"]),
        FallbackRule::new("stock_units", Correction::Integer).with_aliases(["units", "stock"]),
        FallbackRule::new("value", Correction::Decimal)
            .with_aliases(["amount", "price", "sales_value", "stock_value"]),
        FallbackRule::new("currency", Correction::Currency { default: default_currency() })
            .with_aliases(["currency_code"]),
    ]
}

/// Configuration builder for programmatic construction
pub struct ConfigBuilder {
    config: EngineConfig,
}

impl ConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self { config: EngineConfig::default() }
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.engine.batch_size = Some(size);
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.config.engine.parallel = parallel;
        self
    }

    pub fn currency_fallback(mut self, code: impl Into<String>) -> Self {
        self.config.engine.currency_fallback = code.into();
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.external.timeout_ms = timeout_ms;
        self
    }

    pub fn external_enabled(mut self, enabled: bool) -> Self {
        self.config.external.enabled = enabled;
        self
    }

    pub fn outliers(mut self, enabled: bool) -> Self {
        self.config.outliers.enabled = enabled;
        self
    }

    /// Add or replace the fallback rule for a column
    pub fn fallback_rule(mut self, rule: FallbackRule) -> Self {
        self.config.fallback.rules.retain(|r| r.column != rule.column);
        self.config.fallback.rules.push(rule);
        self
    }

    /// Build the final configuration
    pub fn build(self) -> DomdResult<EngineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.fallback.rules.len(), 6);
        assert!(config.fallback.rules.iter().any(|r| r.matches("SKU")));
    }

    #[test]
    fn test_load_partial_yaml() -> DomdResult<()> {
        let yaml = r#"
version: "1.0"
engine:
  batch_size: 250
external:
  timeout_ms: 500
fallback:
  rules:
    - column: site
      correction: fixed_width
      width: 6
    - column: currency
      correction: currency
      default: EUR
"#;
        let config = EngineConfig::load_from_str(yaml)?;

        assert_eq!(config.engine.batch_size, Some(250));
        assert!(config.engine.parallel);
        assert_eq!(config.external.timeout_ms, 500);
        assert_eq!(config.fallback.rules.len(), 2);
        assert_eq!(config.fallback.rules[0].correction, Correction::FixedWidth { width: 6 });
        assert!(config.outliers.enabled);
        Ok(())
    }

    #[test]
    fn test_invalid_configs() {
        assert!(EngineConfig::load_from_str("version: \"2.0\"").is_err());
        assert!(EngineConfig::load_from_str("version: \"1.0\"\nengine:\n  batch_size: 0").is_err());
        assert!(EngineConfig::load_from_str("version: \"1.0\"\noutliers:\n  threshold: -1").is_err());
        assert!(ConfigBuilder::new()
            .fallback_rule(FallbackRule::new("site", Correction::FixedWidth { width: 0 }))
            .build()
            .is_err());
    }

    #[test]
    fn test_discover() -> DomdResult<()> {
        let temp_dir = TempDir::new().unwrap();
        assert_eq!(EngineConfig::discover(temp_dir.path())?, EngineConfig::default());

        fs::write(
            temp_dir.path().join("domd_guardian.yaml"),
            "version: \"1.0\"\nengine:\n  parallel: false\n",
        )?;
        assert!(!EngineConfig::discover(temp_dir.path())?.engine.parallel);
        Ok(())
    }

    #[test]
    fn test_fingerprint_ignores_rule_order() {
        let mut config = EngineConfig::default();
        let original = config.fingerprint();
        config.fallback.rules.reverse();
        assert_eq!(config.fingerprint(), original);

        let changed = ConfigBuilder::new().timeout_ms(10).build().unwrap();
        assert_ne!(changed.fingerprint(), original);
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = EngineConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let rehydrated = EngineConfig::load_from_str(&yaml).unwrap();
        assert_eq!(rehydrated, config);
    }
}
