//! Tests for the transform handler.

use std::sync::Arc;

use proptest::prelude::*;

use super::PhaseHandler;
use super::test_support::{RecordingCallbacks, ctx_at, numbered_csv, write_file};
use super::transform::{
  Layer, SQL_SNIPPET_CHARS, SqlSource, TransformConfig, TransformHandler, default_output_uri,
  sql_snippet,
};
use crate::artifact_store::{LocalArtifactStore, sha256_hex};
use crate::types::{ArtifactKind, ErrorCode, PhaseDescriptor};

fn handler() -> TransformHandler {
  TransformHandler::new(Arc::new(LocalArtifactStore::new()))
}

#[test]
fn config_defaults_and_precedence() {
  let cfg = TransformConfig::from_phase(
    &PhaseDescriptor::new("transform")
      .with("input_uri", "bronze/raw.csv")
      .with("sql", "SELECT 1")
      .with("sql_file", "q.sql"),
  )
  .unwrap();
  assert_eq!(cfg.sql, SqlSource::Inline("SELECT 1".to_string()));
  assert_eq!(cfg.layer, Layer::Silver);

  let cfg = TransformConfig::from_phase(
    &PhaseDescriptor::new("transform")
      .with("input_uri", "bronze/raw.csv")
      .with("sql_file", "q.sql")
      .with("layer", "gold"),
  )
  .unwrap();
  assert_eq!(cfg.sql, SqlSource::File("q.sql".to_string()));
  assert_eq!(cfg.layer, Layer::Gold);
}

#[test]
fn config_errors() {
  let no_sql = PhaseDescriptor::new("transform").with("input_uri", "bronze/raw.csv");
  assert_eq!(
    TransformConfig::from_phase(&no_sql).unwrap_err().code,
    ErrorCode::MissingSql
  );
  let nothing = PhaseDescriptor::new("transform");
  assert_eq!(
    TransformConfig::from_phase(&nothing).unwrap_err().code,
    ErrorCode::MissingSql
  );
  let no_input = PhaseDescriptor::new("transform").with("sql", "SELECT 1");
  assert_eq!(
    TransformConfig::from_phase(&no_input).unwrap_err().code,
    ErrorCode::MissingInput
  );
  let bad_layer = PhaseDescriptor::new("transform")
    .with("sql", "SELECT 1")
    .with("input_uri", "x.csv")
    .with("layer", "platinum");
  assert_eq!(
    TransformConfig::from_phase(&bad_layer).unwrap_err().code,
    ErrorCode::InvalidConfig
  );
}

#[tokio::test]
async fn filters_1000_rows_to_950() {
  let dir = tempfile::tempdir().unwrap();
  write_file(dir.path(), "bronze/raw.csv", &numbered_csv(1000));
  let ctx = ctx_at(dir.path());
  let cb = RecordingCallbacks::new();
  let sql = "SELECT * FROM input WHERE amount > 50";
  let phase = PhaseDescriptor::new("transform")
    .with("input_uri", "bronze/raw.csv")
    .with("sql", sql);

  let result = handler().execute(&ctx, &phase, &cb).await.unwrap();
  assert!(result.is_success());
  assert_eq!(result.error_code(), None);
  let artifacts = cb.artifacts();
  assert_eq!(artifacts.len(), 1);
  let a = &artifacts[0];
  assert_eq!(a.kind, ArtifactKind::Dataset);
  assert_eq!(a.meta["input_rows"], 1000);
  assert_eq!(a.meta["output_rows"], 950);
  assert_eq!(a.meta["layer"], "silver");
  assert_eq!(a.meta["sql"], sql);
  assert_eq!(
    a.uri,
    default_output_uri(&ctx, Layer::Silver, &ctx.output_uri("bronze/raw.csv"), sql)
  );
  assert!(a.uri.contains("/silver/transform_20240501T123000_"));
  let written = std::fs::read_to_string(&a.uri).unwrap();
  assert_eq!(written.lines().count(), 951);
}

#[tokio::test]
async fn missing_sql_registers_nothing() {
  let dir = tempfile::tempdir().unwrap();
  write_file(dir.path(), "bronze/raw.csv", &numbered_csv(3));
  let ctx = ctx_at(dir.path());
  let cb = RecordingCallbacks::new();
  let phase = PhaseDescriptor::new("transform").with("input_uri", "bronze/raw.csv");
  let result = handler().execute(&ctx, &phase, &cb).await.unwrap();
  assert!(!result.is_success());
  assert_eq!(result.error_code(), Some(ErrorCode::MissingSql));
  assert!(result.artifacts().is_empty());
  assert!(cb.artifacts().is_empty());
  assert_eq!(cb.heartbeat_count(), 1);
}

#[tokio::test]
async fn sql_file_and_explicit_output() {
  let dir = tempfile::tempdir().unwrap();
  write_file(dir.path(), "bronze/raw.csv", &numbered_csv(10));
  write_file(dir.path(), "sql/top.sql", "SELECT id FROM input ORDER BY id DESC LIMIT 3");
  let ctx = ctx_at(dir.path());
  let cb = RecordingCallbacks::new();
  let phase = PhaseDescriptor::new("transform")
    .with("input_uri", "bronze/raw.csv")
    .with("sql_file", "sql/top.sql")
    .with("output_uri", "gold/top.csv")
    .with("layer", "gold");
  let result = handler().execute(&ctx, &phase, &cb).await.unwrap();
  assert!(result.is_success());
  let a = &result.artifacts()[0];
  assert_eq!(a.uri, format!("{}/gold/top.csv", dir.path().display()));
  assert_eq!(a.meta["output_rows"], 3);
  assert_eq!(
    std::fs::read_to_string(dir.path().join("gold/top.csv")).unwrap(),
    "id\n10\n9\n8\n"
  );
}

#[tokio::test]
async fn output_outside_root_is_invalid() {
  let dir = tempfile::tempdir().unwrap();
  write_file(dir.path(), "bronze/raw.csv", &numbered_csv(1));
  let ctx = ctx_at(&dir.path().join("run"));
  let cb = RecordingCallbacks::new();
  let phase = PhaseDescriptor::new("transform")
    .with("input_uri", format!("{}/bronze/raw.csv", dir.path().display()))
    .with("sql", "SELECT * FROM input")
    .with("output_uri", "../escape.csv");
  let result = handler().execute(&ctx, &phase, &cb).await.unwrap();
  assert_eq!(result.error_code(), Some(ErrorCode::InvalidConfig));
}

#[tokio::test]
async fn bad_sql_is_transform_error() {
  let dir = tempfile::tempdir().unwrap();
  write_file(dir.path(), "bronze/raw.csv", &numbered_csv(2));
  let ctx = ctx_at(dir.path());
  let cb = RecordingCallbacks::new();
  let phase = PhaseDescriptor::new("transform")
    .with("input_uri", "bronze/raw.csv")
    .with("sql", "SELECT nope FROM input");
  let result = handler().execute(&ctx, &phase, &cb).await.unwrap();
  assert_eq!(result.error_code(), Some(ErrorCode::TransformError));
  assert!(cb.artifacts().is_empty());
}

#[tokio::test]
async fn rerun_writes_identical_content() {
  let dir = tempfile::tempdir().unwrap();
  write_file(dir.path(), "bronze/raw.csv", &numbered_csv(20));
  let ctx = ctx_at(dir.path());
  let phase = PhaseDescriptor::new("transform")
    .with("input_uri", "bronze/raw.csv")
    .with("sql", "SELECT id FROM input WHERE id % 2 = 0");
  let first = handler()
    .execute(&ctx, &phase, &RecordingCallbacks::new())
    .await
    .unwrap();
  let second = handler()
    .execute(&ctx, &phase, &RecordingCallbacks::new())
    .await
    .unwrap();
  assert_eq!(first.artifacts()[0].uri, second.artifacts()[0].uri);
  assert_eq!(first.artifacts()[0].sha256, second.artifacts()[0].sha256);
}

#[test]
fn snippet_of_short_sql_is_whole() {
  assert_eq!(sql_snippet("SELECT 1", SQL_SNIPPET_CHARS), "SELECT 1");
  assert_eq!(sql_snippet("héllo", 2), "hé");
}

proptest! {
  #[test]
  fn snippet_is_bounded_prefix(sql in "\\PC{0,700}") {
    let snippet = sql_snippet(&sql, SQL_SNIPPET_CHARS);
    prop_assert!(sql.starts_with(snippet));
    prop_assert!(snippet.chars().count() <= SQL_SNIPPET_CHARS);
    if sql.chars().count() <= SQL_SNIPPET_CHARS {
      prop_assert_eq!(snippet, sql.as_str());
    }
  }
}

#[tokio::test]
async fn same_sql_over_different_inputs_writes_separate_objects() {
  let dir = tempfile::tempdir().unwrap();
  write_file(dir.path(), "bronze/a.csv", &numbered_csv(10));
  write_file(dir.path(), "bronze/b.csv", &numbered_csv(3));
  let ctx = ctx_at(dir.path());
  let cb = RecordingCallbacks::new();
  let sql = "SELECT * FROM input WHERE amount > 1";
  for input in ["bronze/a.csv", "bronze/b.csv"] {
    let phase = PhaseDescriptor::new("transform")
      .with("input_uri", input)
      .with("sql", sql);
    assert!(handler().execute(&ctx, &phase, &cb).await.unwrap().is_success());
  }

  let artifacts = cb.artifacts();
  assert_eq!(artifacts.len(), 2);
  assert_ne!(artifacts[0].uri, artifacts[1].uri);
  // The first artifact still describes the bytes at its location.
  let first = std::fs::read(&artifacts[0].uri).unwrap();
  assert_eq!(artifacts[0].sha256.as_deref(), Some(sha256_hex(&first).as_str()));
  assert_eq!(artifacts[0].meta["output_rows"], 9);
  assert_eq!(String::from_utf8(first).unwrap().lines().count(), 10);
}

#[tokio::test]
async fn unaddressable_input_is_invalid_config() {
  let dir = tempfile::tempdir().unwrap();
  let ctx = ctx_at(dir.path());
  let cb = RecordingCallbacks::new();
  let phase = PhaseDescriptor::new("transform")
    .with("input_uri", "http://example.com/x.csv")
    .with("sql", "SELECT * FROM input");
  let result = handler().execute(&ctx, &phase, &cb).await.unwrap();
  assert_eq!(result.error_code(), Some(ErrorCode::InvalidConfig));
  assert!(result.error_message().unwrap().contains("unsupported scheme http"));
  assert!(cb.artifacts().is_empty());
}
