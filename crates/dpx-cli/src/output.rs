//! Writing stage results to the destination directory.
//!
//! Every stage is dumped as `<dest>/<name>.json` (pretty, sorted keys). With
//! CSV output enabled, a flattened `<dest>/<name>.csv` is written next to it:
//! record lists become one row per record with nested objects expanded into
//! dotted column names, per-portal maps become one column per portal.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use dpx_core::{AppError, CheckpointSink};
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::ExportFormat;

/// [`CheckpointSink`] writing dumps to a directory.
#[derive(Debug, Clone)]
pub struct FileSink {
    dest: PathBuf,
    format: ExportFormat,
}

impl FileSink {
    /// Creates the sink, creating `dest` if it does not exist.
    pub fn new(dest: impl Into<PathBuf>, format: ExportFormat) -> Result<Self, AppError> {
        let dest = dest.into();
        fs::create_dir_all(&dest)?;
        Ok(Self { dest, format })
    }

    pub fn dest(&self) -> &Path {
        &self.dest
    }

    fn write_json(&self, name: &str, data: &Value) -> Result<(), AppError> {
        let path = self.dest.join(format!("{}.json", name));
        let mut json = serde_json::to_string_pretty(data)?;
        json.push('\n');
        fs::write(&path, json)?;
        debug!("Wrote {}", path.display());
        Ok(())
    }

    fn write_csv(&self, name: &str, data: &Value) -> Result<(), AppError> {
        let path = self.dest.join(format!("{}.csv", name));
        let (columns, rows) = flatten(data);

        let mut writer =
            csv::Writer::from_path(&path).map_err(|e| AppError::Generic(e.to_string()))?;

        let mut header = Vec::with_capacity(columns.len() + 1);
        header.push(name.to_string());
        header.extend(columns.iter().cloned());
        writer
            .write_record(&header)
            .map_err(|e| AppError::Generic(e.to_string()))?;

        for (index, row) in rows {
            let mut record = Vec::with_capacity(columns.len() + 1);
            record.push(index);
            record.extend(columns.iter().map(|c| {
                row.get(c).map(cell_text).unwrap_or_default()
            }));
            writer
                .write_record(&record)
                .map_err(|e| AppError::Generic(e.to_string()))?;
        }
        writer.flush()?;
        debug!("Wrote {}", path.display());
        Ok(())
    }
}

impl CheckpointSink for FileSink {
    fn checkpoint(&self, name: &str, data: &Value) -> Result<(), AppError> {
        self.write_json(name, data)?;
        if self.format == ExportFormat::Csv {
            self.write_csv(name, data)?;
        }
        Ok(())
    }
}

/// Flattened rows: the index label and the row's cells keyed by column.
type Rows = Vec<(String, Map<String, Value>)>;

/// Turns a dump into sorted column names plus indexed rows.
fn flatten(data: &Value) -> (Vec<String>, Rows) {
    let rows = match data {
        Value::Array(records) => records
            .iter()
            .enumerate()
            .map(|(i, record)| {
                let mut row = Map::new();
                match record {
                    Value::Object(fields) => flatten_into(&mut row, "", fields),
                    other => {
                        row.insert("value".to_string(), other.clone());
                    }
                }
                (i.to_string(), row)
            })
            .collect(),
        Value::Object(columns) => pivot(columns),
        Value::Null => Vec::new(),
        scalar => {
            let mut row = Map::new();
            row.insert("value".to_string(), scalar.clone());
            vec![("0".to_string(), row)]
        }
    };

    let columns: BTreeSet<String> = rows
        .iter()
        .flat_map(|(_, row)| row.keys().cloned())
        .collect();
    (columns.into_iter().collect(), rows)
}

/// Expands nested objects into dotted keys, e.g. `organization.title`.
fn flatten_into(row: &mut Map<String, Value>, prefix: &str, fields: &Map<String, Value>) {
    for (key, value) in fields {
        let column = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            Value::Object(inner) if !inner.is_empty() => flatten_into(row, &column, inner),
            other => {
                row.insert(column, other.clone());
            }
        }
    }
}

/// Per-portal maps (`{portal: {key: value}}` or `{portal: [values]}`) become
/// one column per portal and one row per inner key, in first-seen order.
fn pivot(columns: &Map<String, Value>) -> Rows {
    let mut rows: Rows = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for (column, inner) in columns {
        let entries: Vec<(String, &Value)> = match inner {
            Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), v))
                .collect(),
            other => vec![("value".to_string(), other)],
        };
        for (key, value) in entries {
            let position = *positions.entry(key.clone()).or_insert_with(|| {
                rows.push((key, Map::new()));
                rows.len() - 1
            });
            rows[position].1.insert(column.clone(), value.clone());
        }
    }
    rows
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) if items.is_empty() => String::new(),
        other => other.to_string(),
    }
}
