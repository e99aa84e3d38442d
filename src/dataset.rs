//! Tabular data moved between phases: a header plus rows of nullable text cells.
//!
//! Datasets are persisted as CSV. An empty cell reads back as NULL.

use serde_json::{Map, Value};

use crate::error::Result;

/// A header plus rows of nullable text cells.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dataset {
  columns: Vec<String>,
  rows: Vec<Vec<Option<String>>>,
}

impl Dataset {
  /// Builds a dataset; every row is padded or truncated to the header width.
  pub fn new(columns: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
    let width = columns.len();
    let rows = rows
      .into_iter()
      .map(|mut row| {
        row.resize(width, None);
        row
      })
      .collect();
    Self { columns, rows }
  }

  pub fn columns(&self) -> &[String] {
    &self.columns
  }

  pub fn rows(&self) -> &[Vec<Option<String>>] {
    &self.rows
  }

  pub fn row_count(&self) -> usize {
    self.rows.len()
  }

  pub fn is_empty(&self) -> bool {
    self.rows.is_empty()
  }

  pub fn column_index(&self, name: &str) -> Option<usize> {
    self.columns.iter().position(|c| c == name)
  }

  /// Cells of column `idx`, top to bottom.
  pub fn column_values(&self, idx: usize) -> impl Iterator<Item = Option<&str>> {
    self
      .rows
      .iter()
      .map(move |row| row.get(idx).and_then(|c| c.as_deref()))
  }

  pub fn from_csv(bytes: &[u8]) -> Result<Self> {
    let mut reader = csv::ReaderBuilder::new()
      .has_headers(true)
      .from_reader(bytes);
    let columns: Vec<String> = reader.headers()?.iter().map(String::from).collect();
    let mut rows = Vec::new();
    for record in reader.records() {
      let record = record?;
      rows.push(
        record
          .iter()
          .map(|cell| (!cell.is_empty()).then(|| cell.to_string()))
          .collect(),
      );
    }
    Ok(Self::new(columns, rows))
  }

  pub fn to_csv(&self) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    if !self.columns.is_empty() {
      writer.write_record(&self.columns)?;
    }
    for row in &self.rows {
      writer.write_record(row.iter().map(|c| c.as_deref().unwrap_or("")))?;
    }
    writer
      .into_inner()
      .map_err(|e| crate::Error::Io(e.into_error()))
  }

  /// Builds a dataset from JSON objects. Columns appear in first-seen order.
  ///
  /// Strings are taken verbatim, `null` becomes NULL, other values keep their JSON text.
  pub fn from_json_rows(records: &[Value]) -> Self {
    let mut columns: Vec<String> = Vec::new();
    for record in records {
      if let Value::Object(map) = record {
        for key in map.keys() {
          if !columns.contains(key) {
            columns.push(key.clone());
          }
        }
      }
    }
    let rows = records
      .iter()
      .map(|record| {
        columns
          .iter()
          .map(|col| match record.get(col) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
          })
          .collect()
      })
      .collect();
    Self::new(columns, rows)
  }

  /// First `limit` rows as JSON objects keyed by column name.
  pub fn preview(&self, limit: usize) -> Vec<Value> {
    self
      .rows
      .iter()
      .take(limit)
      .map(|row| {
        let mut obj = Map::new();
        for (col, cell) in self.columns.iter().zip(row) {
          obj.insert(
            col.clone(),
            cell.as_ref().map_or(Value::Null, |v| Value::String(v.clone())),
          );
        }
        Value::Object(obj)
      })
      .collect()
  }
}
