//! Machine-readable failure codes carried by a failed phase or run.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Failure code of a [PhaseResult](super::PhaseResult) or a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
  /// A required input reference (e.g. `input_uri`) is missing.
  MissingInput,
  /// Neither `sql` nor `sql_file` was given.
  MissingSql,
  /// Ingest has no source reference.
  MissingSource,
  /// A config value has the wrong shape or an unsupported value.
  InvalidConfig,
  /// No handler is registered for the phase name.
  UnknownPhase,
  /// The handler raised an unexpected fault or panicked.
  HandlerException,
  /// The ingest source could not be fetched.
  IngestFailed,
  /// The ingest source produced no rows and empty results are not allowed.
  NoData,
  /// Validation found schema or quality violations.
  ValidationFailed,
  TransformError,
  PublishFailed,
  QueryError,
  /// Assigned only by the reaper.
  TimedOut,
}

impl ErrorCode {
  /// Config validation failures are deterministic; retrying cannot help.
  pub fn is_config_error(&self) -> bool {
    matches!(
      self,
      ErrorCode::MissingInput
        | ErrorCode::MissingSql
        | ErrorCode::MissingSource
        | ErrorCode::InvalidConfig
        | ErrorCode::UnknownPhase
    )
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      ErrorCode::MissingInput => "MISSING_INPUT",
      ErrorCode::MissingSql => "MISSING_SQL",
      ErrorCode::MissingSource => "MISSING_SOURCE",
      ErrorCode::InvalidConfig => "INVALID_CONFIG",
      ErrorCode::UnknownPhase => "UNKNOWN_PHASE",
      ErrorCode::HandlerException => "HANDLER_EXCEPTION",
      ErrorCode::IngestFailed => "INGEST_FAILED",
      ErrorCode::NoData => "NO_DATA",
      ErrorCode::ValidationFailed => "VALIDATION_FAILED",
      ErrorCode::TransformError => "TRANSFORM_ERROR",
      ErrorCode::PublishFailed => "PUBLISH_FAILED",
      ErrorCode::QueryError => "QUERY_ERROR",
      ErrorCode::TimedOut => "TIMED_OUT",
    }
  }
}

impl fmt::Display for ErrorCode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ErrorCode {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
      .map_err(|_| format!("unknown error code: {}", s))
  }
}
