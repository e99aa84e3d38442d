//! Tests for `ErrorCode`.

use super::ErrorCode;

#[test]
fn display_is_screaming_snake_case() {
  assert_eq!(ErrorCode::MissingSql.to_string(), "MISSING_SQL");
  assert_eq!(ErrorCode::HandlerException.to_string(), "HANDLER_EXCEPTION");
  assert_eq!(ErrorCode::PublishFailed.to_string(), "PUBLISH_FAILED");
}

#[test]
fn serde_name_matches_display() {
  for code in [
    ErrorCode::MissingInput,
    ErrorCode::UnknownPhase,
    ErrorCode::TransformError,
    ErrorCode::TimedOut,
  ] {
    let json = serde_json::to_value(code).unwrap();
    assert_eq!(json, serde_json::Value::String(code.to_string()));
    assert_eq!(code.as_str().parse::<ErrorCode>(), Ok(code));
  }
}

#[test]
fn config_errors_are_flagged() {
  assert!(ErrorCode::MissingInput.is_config_error());
  assert!(ErrorCode::MissingSql.is_config_error());
  assert!(!ErrorCode::HandlerException.is_config_error());
  assert!(!ErrorCode::PublishFailed.is_config_error());
}

#[test]
fn parse_rejects_unknown() {
  assert!("NOPE".parse::<ErrorCode>().is_err());
}
