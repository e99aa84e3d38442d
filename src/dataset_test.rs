//! Tests for `dataset`.

use serde_json::json;

use crate::dataset::Dataset;

#[test]
fn csv_empty_cells_are_null() {
  let ds = Dataset::from_csv(b"id,name\n1,alice\n2,\n").unwrap();
  assert_eq!(ds.columns(), &["id".to_string(), "name".to_string()]);
  assert_eq!(ds.row_count(), 2);
  assert_eq!(ds.rows()[1][1], None);
  let names: Vec<_> = ds.column_values(1).collect();
  assert_eq!(names, vec![Some("alice"), None]);
}

#[test]
fn csv_write_keeps_header_and_quoting() {
  let ds = Dataset::new(
    vec!["a".into(), "b".into()],
    vec![vec![Some("x,y".into()), None]],
  );
  let bytes = ds.to_csv().unwrap();
  assert_eq!(String::from_utf8(bytes.clone()).unwrap(), "a,b\n\"x,y\",\n");
  assert_eq!(Dataset::from_csv(&bytes).unwrap(), ds);
}

#[test]
fn header_only_csv_has_zero_rows() {
  let ds = Dataset::from_csv(b"a,b\n").unwrap();
  assert!(ds.is_empty());
  assert_eq!(ds.columns().len(), 2);
}

#[test]
fn ragged_rows_are_rejected() {
  assert!(Dataset::from_csv(b"a,b\n1,2,3\n").is_err());
}

#[test]
fn json_rows_union_columns() {
  let ds = Dataset::from_json_rows(&[
    json!({"id": 1, "name": "a"}),
    json!({"id": 2, "flag": true, "name": null}),
  ]);
  assert_eq!(ds.columns(), &["id".to_string(), "name".to_string(), "flag".to_string()]);
  assert_eq!(ds.rows()[0], vec![Some("1".into()), Some("a".into()), None]);
  assert_eq!(ds.rows()[1], vec![Some("2".into()), None, Some("true".into())]);
}

#[test]
fn preview_limits_rows() {
  let ds = Dataset::from_csv(b"v\n1\n2\n3\n").unwrap();
  let preview = ds.preview(2);
  assert_eq!(preview, vec![json!({"v": "1"}), json!({"v": "2"})]);
  assert_eq!(ds.column_index("v"), Some(0));
  assert_eq!(ds.column_index("w"), None);
}
