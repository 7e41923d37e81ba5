//! Temporal extent inference over a [`Table`].
//!
//! Text columns whose values read as dates are reclassified as datetime
//! columns; the date range is the minimum and maximum over every cell of
//! every datetime column, pooled.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime};

use crate::models::NO_DATE_FOUND;
use crate::table::{Cell, Column, ColumnType, Table};

/// Timestamps outside these years are treated as unparsable.
const MIN_YEAR: i32 = 1677;
const MAX_YEAR: i32 = 2262;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%d.%m.%Y %H:%M:%S",
    "%d.%m.%Y %H:%M",
];

// Month-first before day-first: ambiguous values such as 01/06/2019 read as
// January 6th.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%Y.%m.%d",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%m-%d-%Y",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%d %B %Y",
    "%d %b %Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%B %d %Y",
    "%b %d %Y",
    "%a, %d %b %Y",
];

/// Parses a single value as a timestamp, trying a broad set of layouts.
///
/// Returns `None` for anything it cannot read; never fails.
///
/// ```
/// use dpx_core::dates::parse_datetime;
///
/// assert!(parse_datetime("2019-12-01").is_some());
/// assert!(parse_datetime("01/06/2019").is_some());
/// assert!(parse_datetime("0112/2019").is_none());
/// ```
pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let value = raw.trim();
    if value.len() < 6 || !value.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    parse_any(value).filter(|dt| (MIN_YEAR..=MAX_YEAR).contains(&dt.year()))
}

fn parse_any(value: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_local());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.naive_local());
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(value, format) {
            return Some(d.and_time(NaiveTime::MIN));
        }
    }
    if value.len() == 8 && value.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(d) = NaiveDate::parse_from_str(value, "%Y%m%d") {
            return Some(d.and_time(NaiveTime::MIN));
        }
    }
    None
}

/// Attempts to read a text column as dates.
///
/// Unparsable cells become `Empty`. The column only qualifies when more than
/// half of its non-empty cells parse; otherwise `None` is returned and the
/// column keeps its original type.
fn convert_column(column: &Column) -> Option<Column> {
    let mut non_empty = 0usize;
    let mut parsed = 0usize;

    let cells: Vec<Cell> = column
        .cells
        .iter()
        .map(|cell| match cell {
            Cell::Empty => Cell::Empty,
            Cell::Text(s) => {
                non_empty += 1;
                match parse_datetime(s) {
                    Some(dt) => {
                        parsed += 1;
                        Cell::DateTime(dt)
                    }
                    None => Cell::Empty,
                }
            }
            Cell::DateTime(dt) => {
                non_empty += 1;
                parsed += 1;
                Cell::DateTime(*dt)
            }
            Cell::Number(_) => {
                non_empty += 1;
                Cell::Empty
            }
        })
        .collect();

    if parsed == 0 || parsed * 2 <= non_empty {
        return None;
    }

    Some(Column {
        name: column.name.clone(),
        kind: ColumnType::DateTime,
        cells,
    })
}

/// Returns a copy of `table` where every text column that reads as dates is
/// converted to a datetime column. Other columns are left untouched.
pub fn convert_columns_to_datetime(table: &Table) -> Table {
    Table::from_columns(
        table
            .columns()
            .iter()
            .map(|column| match column.kind {
                ColumnType::Text => convert_column(column).unwrap_or_else(|| column.clone()),
                _ => column.clone(),
            })
            .collect(),
    )
}

/// Columns of `table` declared as datetime.
pub fn datetime_columns(table: &Table) -> Vec<&Column> {
    table
        .columns()
        .iter()
        .filter(|c| c.kind == ColumnType::DateTime)
        .collect()
}

fn pooled_dates(table: &Table) -> impl Iterator<Item = NaiveDateTime> + '_ {
    datetime_columns(table)
        .into_iter()
        .flat_map(|c| c.cells.iter())
        .filter_map(|cell| match cell {
            Cell::DateTime(dt) => Some(*dt),
            _ => None,
        })
}

/// Earliest date over all datetime columns, time of day discarded.
pub fn min_date(table: &Table) -> Option<NaiveDate> {
    pooled_dates(table).min().map(|dt| dt.date())
}

/// Latest date over all datetime columns, time of day discarded.
pub fn max_date(table: &Table) -> Option<NaiveDate> {
    pooled_dates(table).max().map(|dt| dt.date())
}

/// Temporal extent of a table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub min: Option<NaiveDate>,
    pub max: Option<NaiveDate>,
}

impl DateRange {
    /// `min` rendered for a resource record.
    pub fn min_label(&self) -> String {
        label(self.min)
    }

    /// `max` rendered for a resource record.
    pub fn max_label(&self) -> String {
        label(self.max)
    }
}

fn label(date: Option<NaiveDate>) -> String {
    date.map(|d| d.to_string())
        .unwrap_or_else(|| NO_DATE_FOUND.to_string())
}

/// Detects date columns and computes the pooled date range.
///
/// An empty table, or one without any date-like column, yields an empty
/// range. The input is not modified, so repeated calls agree.
pub fn infer_date_range(table: &Table) -> DateRange {
    if table.is_empty() {
        return DateRange::default();
    }
    let converted = convert_columns_to_datetime(table);
    DateRange {
        min: min_date(&converted),
        max: max_date(&converted),
    }
}
