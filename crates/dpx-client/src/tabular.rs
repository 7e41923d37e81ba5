//! Reading downloaded payloads as [`Table`]s.
//!
//! Text formats go through the `csv` crate after sniffing the delimiter.
//! Spreadsheets go through `calamine`, which reads both legacy `.xls` and
//! `.xlsx` from memory. Only the first sheet is used.

use std::borrow::Cow;
use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, DataType, Reader};
use dpx_core::error::AppError;
use dpx_core::models::FormatFamily;
use dpx_core::table::{Cell, Table};

const DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];

/// Lines inspected when sniffing the delimiter.
const SNIFF_LINES: usize = 20;

/// Parses a downloaded payload according to its format family.
pub fn parse_table(bytes: &[u8], family: FormatFamily) -> Result<Table, AppError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(AppError::Parse("empty payload".to_string()));
    }
    match family {
        FormatFamily::Text => parse_delimited(bytes),
        FormatFamily::Excel => parse_spreadsheet(bytes),
    }
}

/// Decodes UTF-8 (with or without BOM), falling back to Latin-1.
fn decode(bytes: &[u8]) -> Cow<'_, str> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => Cow::Owned(bytes.iter().map(|&b| b as char).collect()),
    }
}

fn looks_like_html(text: &str) -> bool {
    let head: String = text
        .trim_start()
        .chars()
        .take(64)
        .collect::<String>()
        .to_ascii_lowercase();
    head.starts_with("<!doctype html") || head.starts_with("<html")
}

/// Picks the delimiter that splits the sample into the most consistent,
/// widest rows. Defaults to a comma.
fn sniff_delimiter(text: &str) -> u8 {
    let sample: Vec<&str> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(SNIFF_LINES)
        .collect();
    if sample.is_empty() {
        return b',';
    }

    let mut best = (b',', 0usize);
    for &delim in &DELIMITERS {
        let counts: Vec<usize> = sample
            .iter()
            .map(|line| line.bytes().filter(|&b| b == delim).count())
            .collect();
        let first = counts[0];
        if first == 0 {
            continue;
        }
        let consistent = counts.iter().filter(|&&c| c == first).count();
        let score = consistent * (first + 1);
        if score > best.1 {
            best = (delim, score);
        }
    }
    best.0
}

/// Parses CSV-like text. The first record is the header row.
pub fn parse_delimited(bytes: &[u8]) -> Result<Table, AppError> {
    let text = decode(bytes);
    if text.trim().is_empty() {
        return Err(AppError::Parse("empty payload".to_string()));
    }
    if looks_like_html(&text) {
        return Err(AppError::Parse("payload is an HTML page, not a table".to_string()));
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(sniff_delimiter(&text))
        .flexible(true)
        .has_headers(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| AppError::Parse(format!("unreadable header row: {}", e)))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    if headers.iter().all(String::is_empty) {
        return Err(AppError::Parse("missing header row".to_string()));
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| AppError::Parse(e.to_string()))?;
        rows.push(record.iter().map(Cell::from_text).collect());
    }

    Ok(Table::from_rows(headers, rows))
}

fn spreadsheet_cell(data: &Data) -> Cell {
    match data {
        Data::Empty | Data::Error(_) => Cell::Empty,
        Data::String(s) => Cell::from_text(s),
        Data::Float(f) => Cell::Number(*f),
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Bool(b) => Cell::Text(b.to_string()),
        other => match other.as_datetime() {
            Some(dt) => Cell::DateTime(dt),
            None => Cell::from_text(&other.to_string()),
        },
    }
}

/// Parses the first sheet of an `.xls`/`.xlsx` workbook. The first row is
/// the header row.
pub fn parse_spreadsheet(bytes: &[u8]) -> Result<Table, AppError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| AppError::Parse(format!("unreadable workbook: {}", e)))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| AppError::Parse("workbook has no sheets".to_string()))?
        .map_err(|e| AppError::Parse(e.to_string()))?;

    let mut rows = range.rows();
    let headers: Vec<String> = match rows.next() {
        Some(row) => row.iter().map(|c| c.to_string().trim().to_string()).collect(),
        None => return Err(AppError::Parse("empty worksheet".to_string())),
    };

    let body = rows
        .map(|row| row.iter().map(spreadsheet_cell).collect())
        .collect();

    Ok(Table::from_rows(headers, body))
}
