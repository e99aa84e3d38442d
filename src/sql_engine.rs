//! Runs a SQL statement over in-memory datasets.
//!
//! Each engine owns a private in-memory SQLite connection. Tables are created
//! without declared column types and every cell is bound as INTEGER, REAL or
//! TEXT depending on how it parses, so `amount > 10` compares numerically.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{Column, ConnectOptions, Connection, Executor, Row, Statement};
use tracing::{debug, instrument};

use crate::dataset::Dataset;
use crate::error::Result;

/// Table name a phase's primary input is registered under.
pub const DEFAULT_TABLE: &str = "input";

fn quote_ident(name: &str) -> String {
  format!("\"{}\"", name.replace('"', "\"\""))
}

/// Typed binding for one text cell.
#[derive(Debug, Clone, PartialEq)]
enum Cell<'a> {
  Null,
  Int(i64),
  Real(f64),
  Text(&'a str),
}

fn classify(cell: Option<&str>) -> Cell<'_> {
  let Some(text) = cell else {
    return Cell::Null;
  };
  if let Ok(i) = text.parse::<i64>() {
    // "007" stays text so identifiers keep their leading zeros.
    if i.to_string() == text {
      return Cell::Int(i);
    }
  }
  let numeric_shape = text
    .chars()
    .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
    && text.chars().any(|c| c.is_ascii_digit());
  if numeric_shape {
    if let Ok(f) = text.parse::<f64>() {
      if f.is_finite() {
        return Cell::Real(f);
      }
    }
  }
  Cell::Text(text)
}

/// A private SQL database holding the registered datasets.
pub struct SqlEngine {
  conn: SqliteConnection,
}

impl SqlEngine {
  pub async fn new() -> Result<Self> {
    let conn = SqliteConnectOptions::from_str("sqlite::memory:")?
      .connect()
      .await?;
    Ok(Self { conn })
  }

  /// Loads `dataset` as table `table`, replacing an existing table of that name.
  #[instrument(level = "trace", skip(self, dataset), fields(rows = dataset.row_count()))]
  pub async fn register(&mut self, table: &str, dataset: &Dataset) -> Result<()> {
    let table_ident = quote_ident(table);
    let columns: Vec<String> = dataset.columns().iter().map(|c| quote_ident(c)).collect();
    let mut tx = self.conn.begin().await?;
    sqlx::query(&format!("DROP TABLE IF EXISTS {}", table_ident))
      .execute(&mut *tx)
      .await?;
    sqlx::query(&format!("CREATE TABLE {} ({})", table_ident, columns.join(", ")))
      .execute(&mut *tx)
      .await?;
    let placeholders = vec!["?"; columns.len()].join(", ");
    let insert = format!("INSERT INTO {} VALUES ({})", table_ident, placeholders);
    for row in dataset.rows() {
      let mut query = sqlx::query(&insert);
      for cell in row {
        query = match classify(cell.as_deref()) {
          Cell::Null => query.bind(None::<String>),
          Cell::Int(i) => query.bind(i),
          Cell::Real(f) => query.bind(f),
          Cell::Text(s) => query.bind(s.to_string()),
        };
      }
      query.execute(&mut *tx).await?;
    }
    tx.commit().await?;
    debug!(table, rows = dataset.row_count(), "table registered");
    Ok(())
  }

  /// Runs one statement and returns its result set. Row counts are exact.
  #[instrument(level = "trace", skip(self))]
  pub async fn query(&mut self, sql: &str) -> Result<Dataset> {
    let statement = (&mut self.conn).prepare(sql).await?;
    let columns: Vec<String> = statement
      .columns()
      .iter()
      .map(|c| c.name().to_string())
      .collect();
    let rows = statement.query().fetch_all(&mut self.conn).await?;
    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
      let mut cells = Vec::with_capacity(columns.len());
      for idx in 0..columns.len() {
        cells.push(row.try_get_unchecked::<Option<String>, _>(idx)?);
      }
      out.push(cells);
    }
    Ok(Dataset::new(columns, out))
  }
}

/// Runs `sql` against `input` registered as [DEFAULT_TABLE].
pub async fn run_sql(input: &Dataset, sql: &str) -> Result<Dataset> {
  let mut engine = SqlEngine::new().await?;
  engine.register(DEFAULT_TABLE, input).await?;
  engine.query(sql).await
}
