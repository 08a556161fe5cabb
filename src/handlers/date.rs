//! Date recognition and normalization
//!
//! Handler Principle: Closed Layout Table - Dates are only ever read through known layouts
//! - Each layout is an anchored regex plus a field order, checked against the calendar
//! - Unrecognized values get one more chance as a left-padded compact digit string
//! - Output is rendered in the column's target layout and must not lie in the future

use super::Cell;
use chrono::{Datelike, NaiveDate};
use lazy_static::lazy_static;
use regex::Regex;

/// Layout a date column is normalized to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateLayout {
    /// `YYYYMMDD`
    Compact,
    /// `YYYY-MM-DD`
    Hyphenated,
}

impl DateLayout {
    pub fn pattern(self) -> &'static str {
        match self {
            Self::Compact => "YYYYMMDD",
            Self::Hyphenated => "YYYY-MM-DD",
        }
    }

    pub fn render(self, date: NaiveDate) -> String {
        match self {
            Self::Compact => format!("{:04}{:02}{:02}", date.year(), date.month(), date.day()),
            Self::Hyphenated => {
                format!("{:04}-{:02}-{:02}", date.year(), date.month(), date.day())
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum FieldOrder {
    YearMonthDay,
    DayMonthYear,
    MonthDayYear,
}

struct KnownLayout {
    name: &'static str,
    regex: Regex,
    order: FieldOrder,
}

impl KnownLayout {
    fn new(name: &'static str, pattern: &str, order: FieldOrder) -> Self {
        Self {
            name,
            regex: Regex::new(pattern).expect("date layout patterns are valid"),
            order,
        }
    }

    fn parse(&self, text: &str) -> Option<NaiveDate> {
        let caps = self.regex.captures(text)?;
        let field = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
        let (a, b, c) = (field(1)?, field(2)?, field(3)?);
        let (year, month, day) = match self.order {
            FieldOrder::YearMonthDay => (a, b, c),
            FieldOrder::DayMonthYear => (c, b, a),
            FieldOrder::MonthDayYear => (c, a, b),
        };
        NaiveDate::from_ymd_opt(i32::try_from(year).ok()?, month, day)
    }
}

lazy_static! {
    // Day-first is tried before month-first for ambiguous slash/hyphen dates
    static ref KNOWN_LAYOUTS: Vec<KnownLayout> = vec![
        KnownLayout::new("YYYYMMDD", r"^(\d{4})(\d{2})(\d{2})$", FieldOrder::YearMonthDay),
        KnownLayout::new("YYYY-MM-DD", r"^(\d{4})-(\d{1,2})-(\d{1,2})$", FieldOrder::YearMonthDay),
        KnownLayout::new("YYYY/MM/DD", r"^(\d{4})/(\d{1,2})/(\d{1,2})$", FieldOrder::YearMonthDay),
        KnownLayout::new("YYYY.MM.DD", r"^(\d{4})\.(\d{1,2})\.(\d{1,2})$", FieldOrder::YearMonthDay),
        KnownLayout::new("DD-MM-YYYY", r"^(\d{1,2})-(\d{1,2})-(\d{4})$", FieldOrder::DayMonthYear),
        KnownLayout::new("DD/MM/YYYY", r"^(\d{1,2})/(\d{1,2})/(\d{4})$", FieldOrder::DayMonthYear),
        KnownLayout::new("DD.MM.YYYY", r"^(\d{1,2})\.(\d{1,2})\.(\d{4})$", FieldOrder::DayMonthYear),
        KnownLayout::new("MM/DD/YYYY", r"^(\d{1,2})/(\d{1,2})/(\d{4})$", FieldOrder::MonthDayYear),
        KnownLayout::new("MM-DD-YYYY", r"^(\d{1,2})-(\d{1,2})-(\d{4})$", FieldOrder::MonthDayYear),
        KnownLayout::new(
            "YYYY-MM-DDThh:mm:ss",
            r"^(\d{4})-(\d{2})-(\d{2})[T ]\d{2}:\d{2}(?::\d{2}(?:\.\d+)?)?(?:Z|[+-]\d{2}:?\d{2})?$",
            FieldOrder::YearMonthDay,
        ),
    ];
}

/// Parse a value through the first known layout that yields a calendar date
pub fn parse_known(text: &str) -> Option<NaiveDate> {
    KNOWN_LAYOUTS.iter().find_map(|layout| layout.parse(text))
}

/// Normalize one value to the target layout
pub fn normalize(raw: Option<&str>, target: DateLayout, today: NaiveDate) -> Cell {
    let Some(text) = raw.map(str::trim).filter(|t| !t.is_empty()) else {
        return Cell::invalid(None, "missing value");
    };

    let date = match parse_known(text) {
        Some(date) => date,
        None => {
            let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
            if digits.len() > 8 {
                return Cell::invalid(None, format!("unrecognised date '{text}'"));
            }
            let padded = format!("{digits:0>8}");
            let compact = &KNOWN_LAYOUTS[0];
            match compact.parse(&padded) {
                Some(date) => date,
                None => {
                    let issue =
                        format!("'{text}' pads to '{padded}', not a valid {} date", compact.name);
                    return Cell::invalid(Some(padded), issue);
                }
            }
        }
    };

    let rendered = target.render(date);
    if date > today {
        Cell::invalid(Some(rendered.clone()), format!("date {rendered} is in the future"))
    } else {
        Cell::valid(Some(rendered))
    }
}
