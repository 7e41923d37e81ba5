//! In-memory columnar table produced while profiling one resource.

use chrono::NaiveDateTime;

/// One table cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    DateTime(NaiveDateTime),
}

impl Cell {
    /// Reads a raw text value: blank becomes `Empty`, finite numbers become
    /// `Number`, anything else stays `Text`.
    pub fn from_text(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Cell::Empty;
        }
        match trimmed.parse::<f64>() {
            Ok(n) if n.is_finite() => Cell::Number(n),
            _ => Cell::Text(trimmed.to_string()),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Cell::Empty)
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Number(value)
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::Number(value as f64)
    }
}

/// Declared type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Numeric,
    DateTime,
}

impl ColumnType {
    /// Infers the declared type from the column's non-empty cells.
    fn infer(cells: &[Cell]) -> Self {
        let mut values = cells.iter().filter(|c| !c.is_empty()).peekable();
        if values.peek().is_none() {
            return ColumnType::Text;
        }
        let mut all_numbers = true;
        let mut all_dates = true;
        for cell in values {
            all_numbers &= matches!(cell, Cell::Number(_));
            all_dates &= matches!(cell, Cell::DateTime(_));
        }
        if all_numbers {
            ColumnType::Numeric
        } else if all_dates {
            ColumnType::DateTime
        } else {
            ColumnType::Text
        }
    }
}

/// A named, typed column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub kind: ColumnType,
    pub cells: Vec<Cell>,
}

impl Column {
    /// Builds a column, inferring its declared type.
    pub fn new(name: impl Into<String>, cells: Vec<Cell>) -> Self {
        let kind = ColumnType::infer(&cells);
        Self {
            name: name.into(),
            kind,
            cells,
        }
    }
}

/// Named columns of equal length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from already-built columns.
    pub fn from_columns(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// Builds a table from a header row and data rows.
    ///
    /// Short rows are padded with `Empty`, long rows are truncated.
    pub fn from_rows(headers: Vec<String>, rows: Vec<Vec<Cell>>) -> Self {
        let width = headers.len();
        let mut columns: Vec<Vec<Cell>> = vec![Vec::with_capacity(rows.len()); width];

        for row in rows {
            let mut row = row.into_iter();
            for column in columns.iter_mut() {
                column.push(row.next().unwrap_or(Cell::Empty));
            }
        }

        Self {
            columns: headers
                .into_iter()
                .zip(columns)
                .map(|(name, cells)| Column::new(name, cells))
                .collect(),
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn height(&self) -> usize {
        self.columns.first().map_or(0, |c| c.cells.len())
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Column names joined with `", "`, empty for a table without columns.
    ///
    /// ```
    /// use dpx_core::table::{Column, Table};
    ///
    /// let table = Table::from_columns(vec![
    ///     Column::new("AAA", vec![]),
    ///     Column::new("BBB", vec![]),
    /// ]);
    /// assert_eq!(table.headers(), "AAA, BBB");
    /// assert_eq!(Table::new().headers(), "");
    /// ```
    pub fn headers(&self) -> String {
        self.columns
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_from_text() {
        assert_eq!(Cell::from_text("  "), Cell::Empty);
        assert_eq!(Cell::from_text("42"), Cell::Number(42.0));
        assert_eq!(Cell::from_text("-3.5"), Cell::Number(-3.5));
        assert_eq!(Cell::from_text("NaN"), Cell::Text("NaN".to_string()));
        assert_eq!(
            Cell::from_text(" 01/01/2019 "),
            Cell::Text("01/01/2019".to_string())
        );
    }

    #[test]
    fn test_column_type_inference() {
        let numbers = Column::new("n", vec![1i64.into(), Cell::Empty, 2.5.into()]);
        assert_eq!(numbers.kind, ColumnType::Numeric);

        let mixed = Column::new("m", vec![1i64.into(), "x".into()]);
        assert_eq!(mixed.kind, ColumnType::Text);

        let blank = Column::new("b", vec![Cell::Empty]);
        assert_eq!(blank.kind, ColumnType::Text);
    }

    #[test]
    fn test_from_rows_pads_and_truncates() {
        let table = Table::from_rows(
            vec!["a".into(), "b".into()],
            vec![
                vec![Cell::from_text("1")],
                vec![Cell::from_text("2"), Cell::from_text("x"), Cell::from_text("dropped")],
            ],
        );

        assert_eq!(table.width(), 2);
        assert_eq!(table.height(), 2);
        assert_eq!(table.column("a").unwrap().kind, ColumnType::Numeric);
        assert_eq!(table.column("b").unwrap().cells, vec![Cell::Empty, "x".into()]);
    }

    #[test]
    fn test_empty_tables() {
        assert!(Table::new().is_empty());
        let no_rows = Table::from_rows(vec!["a".into()], vec![]);
        assert!(no_rows.is_empty());
        assert_eq!(no_rows.headers(), "a");
    }
}
