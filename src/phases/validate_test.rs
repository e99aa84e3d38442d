//! Tests for the validate handler.

use std::sync::Arc;

use serde_json::json;

use super::PhaseHandler;
use super::test_support::{RecordingCallbacks, ctx_at, numbered_csv, write_file};
use super::validate::{ValidateConfig, ValidateHandler, ValidationReport, check_dataset};
use crate::artifact_store::LocalArtifactStore;
use crate::dataset::Dataset;
use crate::types::{ArtifactKind, ErrorCode, EventLevel, PhaseDescriptor};

fn handler() -> ValidateHandler {
  ValidateHandler::new(Arc::new(LocalArtifactStore::new()))
}

fn config(extra: serde_json::Value) -> ValidateConfig {
  let mut cfg = json!({"input_uri": "x.csv"});
  cfg
    .as_object_mut()
    .unwrap()
    .extend(extra.as_object().unwrap().clone());
  ValidateConfig::from_phase(&PhaseDescriptor::new("validate").with_config(cfg)).unwrap()
}

#[test]
fn config_errors() {
  let err = ValidateConfig::from_phase(&PhaseDescriptor::new("validate")).unwrap_err();
  assert_eq!(err.code, ErrorCode::MissingInput);
  let bad_regex = PhaseDescriptor::new("validate")
    .with("input_uri", "x.csv")
    .with("patterns", json!({"id": "("}));
  assert_eq!(
    ValidateConfig::from_phase(&bad_regex).unwrap_err().code,
    ErrorCode::InvalidConfig
  );
  let bad_bounds = PhaseDescriptor::new("validate")
    .with("input_uri", "x.csv")
    .with("min_rows", 10)
    .with("max_rows", 1);
  assert_eq!(
    ValidateConfig::from_phase(&bad_bounds).unwrap_err().code,
    ErrorCode::InvalidConfig
  );
}

#[test]
fn checks_find_each_problem_once() {
  let data = Dataset::from_csv(b"id,email\n1,a@x.io\n1,\n3,nope\n").unwrap();
  let cfg = config(json!({
    "required_columns": ["id", "country"],
    "not_null": ["email"],
    "unique": ["id"],
    "min_rows": 5,
    "patterns": {"email": "^[^@]+@[^@]+$", "missing": ".*"}
  }));
  let findings = check_dataset(&cfg, &data);
  let checks: Vec<(&str, Option<&str>)> = findings
    .iter()
    .map(|f| (f.check.as_str(), f.column.as_deref()))
    .collect();
  assert_eq!(
    checks,
    vec![
      ("required_column", Some("country")),
      ("min_rows", None),
      ("not_null", Some("email")),
      ("unique", Some("id")),
      ("pattern", Some("email")),
      ("pattern", Some("missing")),
    ]
  );
}

#[test]
fn clean_data_has_no_findings() {
  let data = Dataset::from_csv(numbered_csv(10).as_bytes()).unwrap();
  let cfg = config(json!({
    "required_columns": ["id"],
    "not_null": ["id", "amount"],
    "unique": ["id"],
    "min_rows": 1,
    "max_rows": 10,
    "patterns": {"id": "^[0-9]+$"}
  }));
  assert!(check_dataset(&cfg, &data).is_empty());
}

#[tokio::test]
async fn passing_validation_registers_report() {
  let dir = tempfile::tempdir().unwrap();
  write_file(dir.path(), "bronze/raw.csv", &numbered_csv(3));
  let ctx = ctx_at(dir.path());
  let cb = RecordingCallbacks::new();
  let phase = PhaseDescriptor::new("validate")
    .with("input_uri", "bronze/raw.csv")
    .with("unique", json!(["id"]));
  let result = handler().execute(&ctx, &phase, &cb).await.unwrap();
  assert!(result.is_success());
  let report = &result.artifacts()[0];
  assert_eq!(report.kind, ArtifactKind::Report);
  assert_eq!(report.meta["passed"], true);
  assert_eq!(report.meta["rows_checked"], 3);
  assert_eq!(report.meta["findings_count"], 0);
  assert_eq!(cb.events_at(EventLevel::Info).len(), 1);
}

#[tokio::test]
async fn findings_fail_phase_but_keep_report() {
  let dir = tempfile::tempdir().unwrap();
  write_file(dir.path(), "bronze/raw.csv", "id\n1\n1\n");
  let ctx = ctx_at(dir.path());
  let cb = RecordingCallbacks::new();
  let phase = PhaseDescriptor::new("validate")
    .with("input_uri", "bronze/raw.csv")
    .with("unique", json!(["id"]));
  let result = handler().execute(&ctx, &phase, &cb).await.unwrap();
  assert!(!result.is_success());
  assert_eq!(result.error_code(), Some(ErrorCode::ValidationFailed));
  assert_eq!(result.artifacts().len(), 1);
  let report_path = result.artifacts()[0].uri.clone();
  let report: ValidationReport =
    serde_json::from_slice(&std::fs::read(report_path).unwrap()).unwrap();
  assert!(!report.passed);
  assert_eq!(report.findings.len(), 1);
  assert_eq!(cb.events_at(EventLevel::Warn).len(), 1);
}

#[tokio::test]
async fn absent_input_is_missing_input() {
  let dir = tempfile::tempdir().unwrap();
  let ctx = ctx_at(dir.path());
  let cb = RecordingCallbacks::new();
  let phase = PhaseDescriptor::new("validate").with("input_uri", "bronze/none.csv");
  let result = handler().execute(&ctx, &phase, &cb).await.unwrap();
  assert_eq!(result.error_code(), Some(ErrorCode::MissingInput));
  assert!(cb.artifacts().is_empty());
}

#[tokio::test]
async fn different_checks_on_one_input_keep_separate_reports() {
  let dir = tempfile::tempdir().unwrap();
  write_file(dir.path(), "bronze/raw.csv", "id,amount\n1,\n2,5\n");
  let ctx = ctx_at(dir.path());
  let cb = RecordingCallbacks::new();
  let strict = PhaseDescriptor::new("validate")
    .with("input_uri", "bronze/raw.csv")
    .with("not_null", json!(["amount"]));
  let loose = PhaseDescriptor::new("validate")
    .with("input_uri", "bronze/raw.csv")
    .with("required_columns", json!(["id"]));
  let failed = handler().execute(&ctx, &strict, &cb).await.unwrap();
  let passed = handler().execute(&ctx, &loose, &cb).await.unwrap();
  assert_eq!(failed.error_code(), Some(ErrorCode::ValidationFailed));
  assert!(passed.is_success());

  let (first, second) = (&failed.artifacts()[0], &passed.artifacts()[0]);
  assert_ne!(first.uri, second.uri);
  let report: ValidationReport =
    serde_json::from_slice(&std::fs::read(&first.uri).unwrap()).unwrap();
  assert!(!report.passed);
  assert_eq!(report.findings.len(), 1);

  // Re-running the same checks lands on the same report.
  let again = handler().execute(&ctx, &strict, &cb).await.unwrap();
  assert_eq!(again.artifacts()[0].uri, first.uri);
}

#[tokio::test]
async fn unaddressable_input_is_invalid_config() {
  let dir = tempfile::tempdir().unwrap();
  let ctx = ctx_at(dir.path());
  let cb = RecordingCallbacks::new();
  let phase = PhaseDescriptor::new("validate").with("input_uri", "s3://bucket/raw.csv");
  let result = handler().execute(&ctx, &phase, &cb).await.unwrap();
  assert_eq!(result.error_code(), Some(ErrorCode::InvalidConfig));
  assert!(cb.artifacts().is_empty());
}
