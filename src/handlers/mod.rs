//! Field handler pipeline for normalizing and validating columns
//!
//! Architectural Principle: Strategy Table - Column handlers are a closed set of tagged variants
//! - Applicable handlers are resolved once per column when the schema is loaded
//! - Handlers run in a fixed priority order: date, currency, padding, numeric, allowed
//! - Each handler maps a column of values to a normalized column plus a validity mask,
//!   and masks of successive handlers combine with logical AND

pub mod date;

use crate::config::EngineConfig;
use crate::domain::anomalies::{DomdError, DomdResult};
use crate::schema::{ColumnSpec, ColumnType, Schema};
use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeSet;

pub use date::DateLayout;

lazy_static! {
    static ref DATE_HINT: Regex =
        Regex::new(r"(?i)(yyyy|dd[-/.]mm|mm[-/.]dd|\bdate\b)").expect("valid date hint pattern");
    static ref CURRENCY_CODE: Regex = Regex::new(r"^[A-Za-z]{3}$").expect("valid currency pattern");
    static ref INTEGER_TEXT: Regex = Regex::new(r"^[+-]?\d+$").expect("valid integer pattern");
    static ref DECIMAL_TEXT: Regex = Regex::new(r"^[+-]?(\d+(\.\d*)?|\.\d+)([eE][+-]?\d+)?$")
        .expect("valid decimal pattern");
}

/// Result of one handler for one value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    /// Normalized value (null when the handler could not produce one)
    pub value: Option<String>,
    /// Why the value is invalid; `None` means valid
    pub issue: Option<String>,
}

impl Cell {
    pub fn valid(value: Option<String>) -> Self {
        Self { value, issue: None }
    }

    pub fn invalid(value: Option<String>, issue: impl Into<String>) -> Self {
        Self { value, issue: Some(issue.into()) }
    }

    pub fn is_valid(&self) -> bool {
        self.issue.is_none()
    }
}

/// Processing-time inputs shared by every handler
#[derive(Debug, Clone)]
pub struct HandlerContext {
    /// Dates after this day are rejected
    pub today: NaiveDate,
    /// Literal currency code used when a column gives no other hint
    pub currency_fallback: String,
}

impl HandlerContext {
    pub fn new(today: NaiveDate, currency_fallback: impl Into<String>) -> Self {
        Self { today, currency_fallback: currency_fallback.into() }
    }

    /// Context for the current local day
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(chrono::Local::now().date_naive(), config.engine.currency_fallback.clone())
    }
}

/// Whole-number or decimal validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericKind {
    Integer,
    Float,
}

/// The closed set of column handlers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerKind {
    /// Recognize known date layouts and render them in the target layout
    Date { target: DateLayout },
    /// Rewrite every value to a single canonical currency code
    Currency { canonical: String },
    /// Left-pad with zeros and truncate from the left to an exact width
    Padding { width: usize },
    /// Accept only well-formed numbers
    Numeric { kind: NumericKind },
    /// Accept only members of the declared set
    Allowed { values: BTreeSet<String> },
}

impl HandlerKind {
    /// Short identifier of the handler
    pub fn name(&self) -> &'static str {
        match self {
            Self::Date { .. } => "date",
            Self::Currency { .. } => "currency",
            Self::Padding { .. } => "padding",
            Self::Numeric { .. } => "numeric",
            Self::Allowed { .. } => "allowed",
        }
    }

    /// What a value must look like after this handler
    pub fn describe(&self) -> String {
        match self {
            Self::Date { target } => {
                format!("calendar date in {} not in the future", target.pattern())
            }
            Self::Currency { canonical } => format!("currency code canonicalized to {canonical}"),
            Self::Padding { width } => format!("exactly {width} characters, zero-padded"),
            Self::Numeric { kind: NumericKind::Integer } => "integer".to_string(),
            Self::Numeric { kind: NumericKind::Float } => "signed decimal number".to_string(),
            Self::Allowed { values } => {
                format!("one of [{}]", values.iter().cloned().collect::<Vec<_>>().join(", "))
            }
        }
    }

    /// Apply the handler to a column of values
    pub fn apply(&self, values: &[Option<String>], ctx: &HandlerContext) -> Vec<Cell> {
        values.iter().map(|value| self.apply_value(value.as_deref(), ctx)).collect()
    }

    fn apply_value(&self, value: Option<&str>, ctx: &HandlerContext) -> Cell {
        match self {
            Self::Date { target } => date::normalize(value, *target, ctx.today),
            // Canonical code whatever the input, nulls included
            Self::Currency { canonical } => Cell::valid(Some(canonical.clone())),
            Self::Padding { width } => match value {
                Some(text) => Cell::valid(Some(pad_to_width(text, *width))),
                None => Cell::invalid(None, "missing value"),
            },
            Self::Numeric { kind } => match value {
                None => Cell::invalid(None, "missing value"),
                Some(text) if is_numeric(text, *kind) => Cell::valid(Some(text.to_string())),
                Some(text) => {
                    let what = match kind {
                        NumericKind::Integer => "an integer",
                        NumericKind::Float => "a decimal number",
                    };
                    Cell::invalid(None, format!("'{text}' is not {what}"))
                }
            },
            Self::Allowed { values } => match value {
                None => Cell::invalid(None, "missing value"),
                Some(text) if values.contains(text) => Cell::valid(Some(text.to_string())),
                Some(text) => Cell::invalid(None, format!("'{text}' is not an allowed value")),
            },
        }
    }
}

/// Left-pad with `0` and keep the rightmost `width` characters
pub fn pad_to_width(text: &str, width: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() >= width {
        chars[chars.len() - width..].iter().collect()
    } else {
        format!("{}{}", "0".repeat(width - chars.len()), text)
    }
}

fn is_numeric(text: &str, kind: NumericKind) -> bool {
    match kind {
        NumericKind::Integer => INTEGER_TEXT.is_match(text) && text.parse::<i64>().is_ok(),
        NumericKind::Float => DECIMAL_TEXT.is_match(text) && text.parse::<f64>().is_ok(),
    }
}

/// Resolve the ordered handler list for a column declaration
pub fn resolve_column(spec: &ColumnSpec, ctx: &HandlerContext) -> DomdResult<Vec<HandlerKind>> {
    let mut handlers = Vec::new();
    let allowed = spec.allowed_values();

    if spec.column_type == ColumnType::Date || DATE_HINT.is_match(spec.constraint_text()) {
        let target = if spec.constraints_mention("YYYY-MM-DD") {
            DateLayout::Hyphenated
        } else {
            DateLayout::Compact
        };
        handlers.push(HandlerKind::Date { target });
    }

    let currency_codes = !allowed.is_empty() && allowed.iter().all(|v| CURRENCY_CODE.is_match(v));
    if currency_codes || spec.constraints_mention("currency") {
        // a declared allowed value is used verbatim so the allowed handler accepts it
        let canonical = match allowed.first() {
            Some(first) => first.clone(),
            None => spec
                .sample
                .clone()
                .unwrap_or_else(|| ctx.currency_fallback.clone())
                .to_uppercase(),
        };
        handlers.push(HandlerKind::Currency { canonical });
    }

    if let Some(width) = spec.length {
        if matches!(spec.column_type, ColumnType::String | ColumnType::Integer) {
            if width == 0 {
                return Err(DomdError::schema(&spec.name, "declared length must be positive"));
            }
            handlers.push(HandlerKind::Padding { width });
        }
    }

    match spec.column_type {
        ColumnType::Integer => handlers.push(HandlerKind::Numeric { kind: NumericKind::Integer }),
        ColumnType::Float => handlers.push(HandlerKind::Numeric { kind: NumericKind::Float }),
        ColumnType::String | ColumnType::Date => {}
    }

    if !allowed.is_empty() {
        handlers.push(HandlerKind::Allowed { values: allowed.iter().cloned().collect() });
    }

    Ok(handlers)
}

/// Handlers resolved for one declared column
#[derive(Debug, Clone)]
pub struct ColumnPlan {
    pub column: String,
    pub handlers: Vec<HandlerKind>,
    /// Set when the declaration is unusable; every row then fails this column
    pub fault: Option<String>,
}

/// Normalized column and validity mask produced by a plan
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnOutcome {
    pub column: String,
    pub values: Vec<Option<String>>,
    pub mask: Vec<bool>,
    /// First failing handler's explanation per row
    pub issues: Vec<Option<String>>,
    pub faulted: bool,
}

impl ColumnOutcome {
    fn from_cells(column: &str, cells: Vec<Cell>) -> Self {
        let mut outcome = Self {
            column: column.to_string(),
            values: Vec::with_capacity(cells.len()),
            mask: Vec::with_capacity(cells.len()),
            issues: Vec::with_capacity(cells.len()),
            faulted: false,
        };
        for cell in cells {
            outcome.mask.push(cell.is_valid());
            outcome.values.push(cell.value);
            outcome.issues.push(cell.issue);
        }
        outcome
    }
}

/// Column handler pipeline resolved for a schema
#[derive(Debug, Clone)]
pub struct HandlerPipeline {
    plans: Vec<ColumnPlan>,
    context: HandlerContext,
}

impl HandlerPipeline {
    /// Resolve handlers for every declared column
    ///
    /// Unusable declarations do not fail resolution; they become faulted plans.
    pub fn resolve(schema: &Schema, context: HandlerContext) -> Self {
        let plans = schema
            .columns()
            .iter()
            .map(|spec| match resolve_column(spec, &context) {
                Ok(handlers) => {
                    tracing::debug!(
                        "Column '{}' resolved to handlers [{}]",
                        spec.name,
                        handlers.iter().map(HandlerKind::name).collect::<Vec<_>>().join(", ")
                    );
                    ColumnPlan { column: spec.name.clone(), handlers, fault: None }
                }
                Err(e) => {
                    tracing::warn!("Column '{}' cannot be handled: {}", spec.name, e);
                    ColumnPlan { column: spec.name.clone(), handlers: Vec::new(), fault: Some(e.to_string()) }
                }
            })
            .collect();

        Self { plans, context }
    }

    pub fn plans(&self) -> &[ColumnPlan] {
        &self.plans
    }

    pub fn plan(&self, column: &str) -> Option<&ColumnPlan> {
        self.plans.iter().find(|p| p.column == column)
    }

    pub fn context(&self) -> &HandlerContext {
        &self.context
    }

    /// Run a plan over a column of raw values
    pub fn apply(&self, plan: &ColumnPlan, raw: &[Option<String>]) -> ColumnOutcome {
        if let Some(fault) = &plan.fault {
            let mut outcome = ColumnOutcome::from_cells(
                &plan.column,
                raw.iter().map(|v| Cell::invalid(v.clone(), fault.clone())).collect(),
            );
            outcome.faulted = true;
            return outcome;
        }

        let mut values = raw.to_vec();
        let mut issues: Vec<Option<String>> = vec![None; raw.len()];

        for handler in &plan.handlers {
            let cells = handler.apply(&values, &self.context);
            for (i, cell) in cells.into_iter().enumerate() {
                if issues[i].is_none() {
                    issues[i] = cell.issue;
                }
                values[i] = cell.value;
            }
        }

        ColumnOutcome::from_cells(
            &plan.column,
            values.into_iter().zip(issues).map(|(value, issue)| Cell { value, issue }).collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> HandlerContext {
        HandlerContext::new(NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(), "GBP")
    }

    fn column(values: &[Option<&str>]) -> Vec<Option<String>> {
        values.iter().map(|v| v.map(str::to_string)).collect()
    }

    fn pipeline_for(spec: ColumnSpec) -> (HandlerPipeline, ColumnPlan) {
        let schema = Schema::new(vec![spec.clone()], vec![spec.name.clone()]).unwrap();
        let pipeline = HandlerPipeline::resolve(&schema, ctx());
        let plan = pipeline.plan(&spec.name).unwrap().clone();
        (pipeline, plan)
    }

    #[test]
    fn test_resolution_order() {
        let spec = ColumnSpec::new("article", ColumnType::Integer)
            .with_length(8)
            .with_allowed(["00000001", "00000002"]);
        let names: Vec<_> = resolve_column(&spec, &ctx()).unwrap().iter().map(HandlerKind::name).collect();
        assert_eq!(names, ["padding", "numeric", "allowed"]);

        let spec = ColumnSpec::new("currency", ColumnType::String).with_allowed(["gbp", "EUR"]);
        let names: Vec<_> = resolve_column(&spec, &ctx()).unwrap().iter().map(HandlerKind::name).collect();
        assert_eq!(names, ["currency", "allowed"]);

        let spec = ColumnSpec::new("posted", ColumnType::String).with_constraints("DD/MM/YYYY");
        let handlers = resolve_column(&spec, &ctx()).unwrap();
        assert_eq!(handlers, [HandlerKind::Date { target: DateLayout::Compact }]);

        let spec = ColumnSpec::new("posted", ColumnType::Date).with_constraints("format yyyy-mm-dd");
        let handlers = resolve_column(&spec, &ctx()).unwrap();
        assert_eq!(handlers, [HandlerKind::Date { target: DateLayout::Hyphenated }]);
    }

    #[test]
    fn test_padding_only_for_string_and_integer() {
        let spec = ColumnSpec::new("value", ColumnType::Float).with_length(6);
        let handlers = resolve_column(&spec, &ctx()).unwrap();
        assert_eq!(handlers, [HandlerKind::Numeric { kind: NumericKind::Float }]);

        let spec = ColumnSpec::new("site", ColumnType::String).with_length(0);
        assert!(matches!(resolve_column(&spec, &ctx()), Err(DomdError::Schema { .. })));
    }

    #[test]
    fn test_site_padding_scenario() {
        let (pipeline, plan) = pipeline_for(
            ColumnSpec::new("site", ColumnType::String)
                .with_length(4)
                .with_constraints("leading zero padding"),
        );
        let outcome = pipeline.apply(&plan, &column(&[Some("12"), Some("123456"), None]));

        assert_eq!(outcome.values[0].as_deref(), Some("0012"));
        assert_eq!(outcome.values[1].as_deref(), Some("3456"));
        assert_eq!(outcome.values[2], None);
        assert_eq!(outcome.mask, [true, true, false]);
        assert_eq!(outcome.issues[2].as_deref(), Some("missing value"));
    }

    #[test]
    fn test_padding_is_idempotent() {
        for value in ["7", "0012", "99999", "ab"] {
            let once = pad_to_width(value, 4);
            assert_eq!(pad_to_width(&once, 4), once);
            assert_eq!(once.chars().count(), 4);
        }
    }

    #[test]
    fn test_currency_ignores_input() {
        let (pipeline, plan) =
            pipeline_for(ColumnSpec::new("currency", ColumnType::String).with_allowed(["GBP"]));
        let outcome = pipeline.apply(&plan, &column(&[Some("usd"), Some("GBP"), None]));

        assert_eq!(outcome.values, column(&[Some("GBP"), Some("GBP"), Some("GBP")]));
        assert!(outcome.mask.iter().all(|v| *v));
    }

    #[test]
    fn test_lowercase_allowed_code_stays_valid() {
        let (pipeline, plan) =
            pipeline_for(ColumnSpec::new("currency", ColumnType::String).with_allowed(["gbp"]));
        assert_eq!(plan.handlers[0], HandlerKind::Currency { canonical: "gbp".to_string() });

        let outcome = pipeline.apply(&plan, &column(&[Some("usd"), Some("GBP")]));
        assert_eq!(outcome.values, column(&[Some("gbp"), Some("gbp")]));
        assert_eq!(outcome.mask, [true, true]);
    }

    #[test]
    fn test_currency_canonical_sources() {
        let spec = ColumnSpec::new("ccy", ColumnType::String)
            .with_constraints("currency code")
            .with_sample("eur");
        assert_eq!(
            resolve_column(&spec, &ctx()).unwrap()[0],
            HandlerKind::Currency { canonical: "EUR".to_string() }
        );

        let spec = ColumnSpec::new("ccy", ColumnType::String).with_constraints("Currency");
        assert_eq!(
            resolve_column(&spec, &ctx()).unwrap()[0],
            HandlerKind::Currency { canonical: "GBP".to_string() }
        );
    }

    #[test]
    fn test_numeric_handler_does_not_substitute_zero() {
        let (pipeline, plan) = pipeline_for(ColumnSpec::new("units", ColumnType::Integer));
        let outcome =
            pipeline.apply(&plan, &column(&[Some("42"), Some("-3"), Some("4.5"), Some("x"), None]));
        assert_eq!(outcome.mask, [true, true, false, false, false]);
        assert_eq!(outcome.values[2], None);

        let (pipeline, plan) = pipeline_for(ColumnSpec::new("value", ColumnType::Float));
        let outcome = pipeline.apply(
            &plan,
            &column(&[Some("-12.50"), Some(".5"), Some("1e3"), Some("1,000"), Some("NaN")]),
        );
        assert_eq!(outcome.mask, [true, true, true, false, false]);
        assert_eq!(outcome.values[0].as_deref(), Some("-12.50"));
    }

    #[test]
    fn test_integer_padding_keeps_leading_zeros() {
        let (pipeline, plan) =
            pipeline_for(ColumnSpec::new("article", ColumnType::Integer).with_length(8));
        let outcome = pipeline.apply(&plan, &column(&[Some("1234"), Some("12a")]));

        assert_eq!(outcome.values[0].as_deref(), Some("00001234"));
        assert_eq!(outcome.mask, [true, false]);
        assert!(outcome.issues[1].as_deref().unwrap().contains("not an integer"));
    }

    #[test]
    fn test_allowed_handler() {
        let (pipeline, plan) =
            pipeline_for(ColumnSpec::new("status", ColumnType::String).with_allowed(["open", "closed"]));
        let outcome = pipeline.apply(&plan, &column(&[Some("open"), Some("OPEN")]));
        assert_eq!(outcome.mask, [true, false]);
        assert_eq!(outcome.values[1], None);
    }

    #[test]
    fn test_faulted_plan_fails_every_row() {
        let (pipeline, plan) = pipeline_for(ColumnSpec::new("site", ColumnType::String).with_length(0));
        assert!(plan.fault.is_some());

        let outcome = pipeline.apply(&plan, &column(&[Some("1"), Some("2")]));
        assert!(outcome.faulted);
        assert_eq!(outcome.mask, [false, false]);
        assert_eq!(outcome.values[0].as_deref(), Some("1"));
    }
}
