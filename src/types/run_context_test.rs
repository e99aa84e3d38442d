//! Tests for `RunContext`.

use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};

use super::run_context::join_uri;
use super::RunContext;

fn ctx(base: &str) -> RunContext {
  RunContext {
    run_id: "run-1".to_string(),
    artifact_base_uri: base.to_string(),
    params: BTreeMap::new(),
    created_at: Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap(),
    attempt: 1,
  }
}

#[test]
fn join_uri_normalises_slashes() {
  assert_eq!(join_uri("file:///lake/", "/silver/x.csv"), "file:///lake/silver/x.csv");
  assert_eq!(join_uri("/lake", "silver"), "/lake/silver");
  assert_eq!(join_uri("/lake/", ""), "/lake");
}

#[test]
fn output_uri_is_under_base() {
  assert_eq!(ctx("/lake/run-1").output_uri("bronze/raw.csv"), "/lake/run-1/bronze/raw.csv");
}

#[test]
fn run_stamp_uses_creation_time() {
  assert_eq!(ctx("/lake").run_stamp(), "20260304T050607");
}

#[test]
fn resolve_output_joins_relative() {
  assert_eq!(
    ctx("file:///lake").resolve_output("gold/out.csv"),
    Ok("file:///lake/gold/out.csv".to_string())
  );
}

#[test]
fn resolve_output_accepts_absolute_under_root() {
  let c = ctx("file:///lake/run-1");
  assert_eq!(
    c.resolve_output("/lake/run-1/gold/out.csv"),
    Ok("/lake/run-1/gold/out.csv".to_string())
  );
  assert!(c.resolve_output("file:///lake/run-1/a.csv").is_ok());
}

#[test]
fn resolve_output_rejects_escape() {
  let c = ctx("/lake/run-1");
  assert!(c.resolve_output("/lake/run-2/out.csv").is_err());
  assert!(c.resolve_output("/lake/run-10/out.csv").is_err());
  assert!(c.resolve_output("../run-2/out.csv").is_err());
  assert!(c.resolve_output("  ").is_err());
}
