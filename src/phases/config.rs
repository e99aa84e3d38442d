//! Typed phase configuration.
//!
//! Each handler declares its own config struct and parses the descriptor's
//! opaque map into it on entry. Parse and validation problems come back as a
//! [ConfigError], which converts straight into a failed [PhaseResult].

use serde::de::DeserializeOwned;

use crate::artifact_store::{ArtifactStore, short_hash};
use crate::error::Error;
use crate::types::{ErrorCode, PhaseDescriptor, PhaseResult, RunContext};

/// A config problem found at handler entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
  pub code: ErrorCode,
  pub message: String,
}

impl ConfigError {
  pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
    Self {
      code,
      message: message.into(),
    }
  }

  pub fn missing(code: ErrorCode, key: &str) -> Self {
    Self::new(code, format!("missing required config key '{}'", key))
  }

  pub fn invalid(message: impl Into<String>) -> Self {
    Self::new(ErrorCode::InvalidConfig, message)
  }
}

impl From<ConfigError> for PhaseResult {
  fn from(err: ConfigError) -> Self {
    PhaseResult::failure(err.code, err.message)
  }
}

/// Deserializes the descriptor's config into `T`; type mismatches are `INVALID_CONFIG`.
pub fn parse_config<T: DeserializeOwned>(phase: &PhaseDescriptor) -> Result<T, ConfigError> {
  serde_json::from_value(serde_json::Value::Object(phase.phase_config.clone())).map_err(|e| {
    ConfigError::invalid(format!("invalid {} config: {}", phase.phase_name, e))
  })
}

/// Returns the trimmed value, treating absent and blank strings alike as missing.
pub fn required(value: Option<&str>, key: &str, code: ErrorCode) -> Result<String, ConfigError> {
  match value.map(str::trim) {
    Some(v) if !v.is_empty() => Ok(v.to_string()),
    _ => Err(ConfigError::missing(code, key)),
  }
}

/// Input locations may be relative to the artifact root or absolute.
pub fn resolve_input(ctx: &RunContext, uri: &str) -> String {
  if uri.contains("://") || uri.starts_with('/') {
    uri.to_string()
  } else {
    ctx.output_uri(uri)
  }
}

/// Checks that the input object exists before a handler reads it.
///
/// `Ok(Some(_))` is the failed result to return: `MISSING_INPUT` when the object
/// is absent, `INVALID_CONFIG` when the artifact store cannot address the URI.
/// Storage faults stay errors.
pub async fn check_input(
  artifacts: &dyn ArtifactStore,
  uri: &str,
) -> crate::Result<Option<PhaseResult>> {
  match artifacts.exists(uri).await {
    Ok(true) => Ok(None),
    Ok(false) => Ok(Some(
      ConfigError::new(ErrorCode::MissingInput, format!("input {} does not exist", uri)).into(),
    )),
    Err(Error::InvalidUri { uri, reason }) => Ok(Some(
      ConfigError::invalid(format!("input {} cannot be read: {}", uri, reason)).into(),
    )),
    Err(e) => Err(e),
  }
}

/// Short hash of the resolved input plus the phase's whole config.
///
/// Used in default output names: two phases of one run that differ in any
/// setting get different objects, and a re-claimed run gets the same ones.
pub fn config_digest(input_uri: &str, phase: &PhaseDescriptor) -> String {
  let config = serde_json::Value::Object(phase.phase_config.clone());
  short_hash(&format!("{}\n{}", input_uri, config))
}

/// Resolves an optional output override under the artifact root, or uses `default`.
pub fn resolve_output(
  ctx: &RunContext,
  output_uri: Option<&str>,
  default: impl FnOnce() -> String,
) -> Result<String, ConfigError> {
  match output_uri.map(str::trim).filter(|u| !u.is_empty()) {
    Some(uri) => ctx.resolve_output(uri).map_err(ConfigError::invalid),
    None => Ok(default()),
  }
}

/// Names that become file names: letters, digits, `_`, `-` and `.`, not starting with `.`.
pub fn check_name(key: &str, value: &str) -> Result<(), ConfigError> {
  let ok = !value.is_empty()
    && !value.starts_with('.')
    && value
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
  if ok {
    Ok(())
  } else {
    Err(ConfigError::invalid(format!(
      "{} '{}' must be a simple name (letters, digits, '_', '-', '.')",
      key, value
    )))
  }
}

/// File stem of the last path segment of `uri`, for default table names.
pub fn stem_of(uri: &str) -> String {
  let last = uri.rsplit('/').next().unwrap_or(uri);
  let stem = last.split('.').next().unwrap_or(last);
  if stem.is_empty() {
    "dataset".to_string()
  } else {
    stem.to_string()
  }
}
