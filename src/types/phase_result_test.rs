//! Tests for `PhaseResult`.

use super::{Artifact, ArtifactKind, ErrorCode, NewArtifact, PhaseResult};

fn artifact(uri: &str) -> Artifact {
  Artifact::from_new(
    "run-1",
    Some("transform"),
    NewArtifact::new(ArtifactKind::Dataset, uri),
  )
}

#[test]
fn success_has_no_error_code() {
  let r = PhaseResult::success();
  assert!(r.is_success());
  assert!(r.error_code().is_none());
  assert!(r.error_message().is_none());
  assert!(r.artifacts().is_empty());
}

#[test]
fn failure_always_carries_code_and_message() {
  let r = PhaseResult::failure(ErrorCode::MissingSql, "sql or sql_file is required");
  assert!(!r.is_success());
  assert_eq!(r.error_code(), Some(ErrorCode::MissingSql));
  assert_eq!(r.error_message(), Some("sql or sql_file is required"));
}

#[test]
fn artifacts_accumulate_in_order() {
  let r = PhaseResult::success()
    .with_artifact(artifact("file:///a"))
    .with_artifacts(vec![artifact("file:///b"), artifact("file:///c")]);
  let uris: Vec<&str> = r.artifacts().iter().map(|a| a.uri.as_str()).collect();
  assert_eq!(uris, vec!["file:///a", "file:///b", "file:///c"]);
}

#[test]
fn failure_may_still_carry_artifacts() {
  let r = PhaseResult::failure(ErrorCode::ValidationFailed, "2 findings")
    .with_artifact(artifact("file:///report.json"));
  assert!(!r.is_success());
  assert_eq!(r.into_artifacts().len(), 1);
}

#[test]
fn serializes_error_code_name() {
  let r = PhaseResult::failure(ErrorCode::PublishFailed, "1 of 3 targets failed");
  let v = serde_json::to_value(&r).unwrap();
  assert_eq!(v["success"], false);
  assert_eq!(v["error_code"], "PUBLISH_FAILED");
}
