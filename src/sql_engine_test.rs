//! Tests for `sql_engine`.

use crate::dataset::Dataset;
use crate::sql_engine::{SqlEngine, run_sql};

fn numbers(n: usize) -> Dataset {
  let rows = (1..=n)
    .map(|i| vec![Some(i.to_string()), Some(format!("name-{}", i))])
    .collect();
  Dataset::new(vec!["id".into(), "name".into()], rows)
}

#[tokio::test]
async fn numeric_filter_counts_exactly() {
  let out = run_sql(&numbers(1000), "SELECT * FROM input WHERE id > 50")
    .await
    .unwrap();
  assert_eq!(out.row_count(), 950);
  assert_eq!(out.columns(), &["id".to_string(), "name".to_string()]);
  assert_eq!(out.rows()[0][0].as_deref(), Some("51"));
}

#[tokio::test]
async fn empty_result_keeps_columns() {
  let out = run_sql(&numbers(3), "SELECT id AS key FROM input WHERE id > 99")
    .await
    .unwrap();
  assert!(out.is_empty());
  assert_eq!(out.columns(), &["key".to_string()]);
}

#[tokio::test]
async fn nulls_and_aggregates() {
  let ds = Dataset::from_csv(b"k,v\na,1.5\na,\nb,2\n").unwrap();
  let out = run_sql(
    &ds,
    "SELECT k, COUNT(v) AS n, SUM(v) AS total FROM input GROUP BY k ORDER BY k",
  )
  .await
  .unwrap();
  assert_eq!(out.row_count(), 2);
  assert_eq!(out.rows()[0][1].as_deref(), Some("1"));
  assert_eq!(out.rows()[0][2].as_deref(), Some("1.5"));
  assert_eq!(out.rows()[1][0].as_deref(), Some("b"));
}

#[tokio::test]
async fn several_tables_can_be_joined() {
  let mut engine = SqlEngine::new().await.unwrap();
  engine.register("input", &numbers(3)).await.unwrap();
  let labels = Dataset::from_csv(b"id,label\n2,two\n").unwrap();
  engine.register("labels", &labels).await.unwrap();
  let out = engine
    .query("SELECT i.name, l.label FROM input i JOIN labels l ON l.id = i.id")
    .await
    .unwrap();
  assert_eq!(out.row_count(), 1);
  assert_eq!(out.rows()[0][1].as_deref(), Some("two"));
}

#[tokio::test]
async fn bad_sql_is_an_error() {
  assert!(run_sql(&numbers(1), "SELEC nonsense").await.is_err());
  assert!(run_sql(&numbers(1), "SELECT missing FROM input").await.is_err());
}
