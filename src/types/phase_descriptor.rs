//! One step of a run's plan.

use serde::{Deserialize, Serialize};

/// Opaque per-phase configuration, interpreted only by the phase's handler.
pub type PhaseConfig = serde_json::Map<String, serde_json::Value>;

fn default_fail_on_error() -> bool {
  true
}

/// One step of a run's plan: which handler to run and with what config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseDescriptor {
  /// Registered handler name (`ingest`, `validate`, `transform`, `publish`, `query`, or an extension).
  pub phase_name: String,
  /// Handler-specific configuration.
  #[serde(default)]
  pub phase_config: PhaseConfig,
  /// When true (the default), a failure of this phase halts the run.
  #[serde(default = "default_fail_on_error")]
  pub fail_on_error: bool,
}

impl PhaseDescriptor {
  /// Creates a descriptor with an empty config and `fail_on_error = true`.
  pub fn new(phase_name: impl Into<String>) -> Self {
    Self {
      phase_name: phase_name.into(),
      phase_config: PhaseConfig::new(),
      fail_on_error: true,
    }
  }

  /// Sets one config key.
  pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
    self.phase_config.insert(key.into(), value.into());
    self
  }

  /// Replaces the whole config. Non-object values leave the config empty.
  pub fn with_config(mut self, config: serde_json::Value) -> Self {
    self.phase_config = match config {
      serde_json::Value::Object(map) => map,
      _ => PhaseConfig::new(),
    };
    self
  }

  pub fn tolerate_failure(mut self) -> Self {
    self.fail_on_error = false;
    self
  }
}
