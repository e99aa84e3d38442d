//! Outcome of one phase handler invocation.

use serde::{Deserialize, Serialize};

use super::{Artifact, ErrorCode};

/// Outcome of one phase handler invocation.
///
/// `error_code` is set exactly when `success` is false; the constructors are the
/// only way to build one, so the pairing cannot drift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
  success: bool,
  error_code: Option<ErrorCode>,
  error_message: Option<String>,
  artifacts: Vec<Artifact>,
}

impl PhaseResult {
  /// Successful result with no artifacts.
  pub fn success() -> Self {
    Self {
      success: true,
      error_code: None,
      error_message: None,
      artifacts: vec![],
    }
  }

  /// Failed result with a code and a human-readable message.
  pub fn failure(code: ErrorCode, message: impl Into<String>) -> Self {
    Self {
      success: false,
      error_code: Some(code),
      error_message: Some(message.into()),
      artifacts: vec![],
    }
  }

  pub fn with_artifact(mut self, artifact: Artifact) -> Self {
    self.artifacts.push(artifact);
    self
  }

  pub fn with_artifacts(mut self, artifacts: impl IntoIterator<Item = Artifact>) -> Self {
    self.artifacts.extend(artifacts);
    self
  }

  pub fn is_success(&self) -> bool {
    self.success
  }

  pub fn error_code(&self) -> Option<ErrorCode> {
    self.error_code
  }

  pub fn error_message(&self) -> Option<&str> {
    self.error_message.as_deref()
  }

  pub fn artifacts(&self) -> &[Artifact] {
    &self.artifacts
  }

  pub fn into_artifacts(self) -> Vec<Artifact> {
    self.artifacts
  }
}
