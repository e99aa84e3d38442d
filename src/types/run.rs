//! A unit of pipeline work and the requests that create and finish it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ErrorCode, PhaseDescriptor, RunContext, RunStatus};

/// A unit of pipeline work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
  pub run_id: String,
  pub status: RunStatus,
  /// Ordered phase plan; fixed once the run is claimed.
  pub phase_spec: Vec<PhaseDescriptor>,
  /// Worker currently holding the claim.
  pub claimed_by: Option<String>,
  pub claimed_at: Option<DateTime<Utc>>,
  pub last_heartbeat_at: Option<DateTime<Utc>>,
  /// Write root for every output of this run.
  pub artifact_base_uri: String,
  /// Run-scoped parameters handed to every phase through the [RunContext].
  #[serde(default)]
  pub params: BTreeMap<String, String>,
  /// Number of times the run has been claimed.
  pub attempts: u32,
  pub created_at: DateTime<Utc>,
  pub finished_at: Option<DateTime<Utc>>,
  /// Set on a failed run: the phase that halted it.
  pub failed_phase: Option<String>,
  pub error_code: Option<ErrorCode>,
  pub error_message: Option<String>,
}

impl Run {
  /// Builds a queued run from an enqueue request.
  pub fn queued(new: NewRun, now: DateTime<Utc>) -> Self {
    Self {
      run_id: new
        .run_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
      status: RunStatus::Queued,
      phase_spec: new.phase_spec,
      claimed_by: None,
      claimed_at: None,
      last_heartbeat_at: None,
      artifact_base_uri: new.artifact_base_uri,
      params: new.params,
      attempts: 0,
      created_at: now,
      finished_at: None,
      failed_phase: None,
      error_code: None,
      error_message: None,
    }
  }

  /// Immutable per-run data threaded through every phase call.
  pub fn context(&self) -> RunContext {
    RunContext {
      run_id: self.run_id.clone(),
      artifact_base_uri: self.artifact_base_uri.clone(),
      params: self.params.clone(),
      created_at: self.created_at,
      attempt: self.attempts,
    }
  }

  /// True if `worker_id` holds a live claim on this run.
  pub fn is_owned_by(&self, worker_id: &str) -> bool {
    self.status.is_claimed() && self.claimed_by.as_deref() == Some(worker_id)
  }
}

/// Enqueue request: the thin trigger surface that creates a queued run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRun {
  /// Explicit id; a UUID is generated when absent.
  #[serde(default)]
  pub run_id: Option<String>,
  pub phase_spec: Vec<PhaseDescriptor>,
  pub artifact_base_uri: String,
  #[serde(default)]
  pub params: BTreeMap<String, String>,
}

impl NewRun {
  pub fn new(artifact_base_uri: impl Into<String>, phase_spec: Vec<PhaseDescriptor>) -> Self {
    Self {
      run_id: None,
      phase_spec,
      artifact_base_uri: artifact_base_uri.into(),
      params: BTreeMap::new(),
    }
  }

  pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
    self.run_id = Some(run_id.into());
    self
  }

  pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.params.insert(key.into(), value.into());
    self
  }
}

/// Terminal outcome written by the worker that owns the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCompletion {
  pub status: RunStatus,
  pub failed_phase: Option<String>,
  pub error_code: Option<ErrorCode>,
  pub error_message: Option<String>,
}

impl RunCompletion {
  pub fn succeeded() -> Self {
    Self {
      status: RunStatus::Succeeded,
      failed_phase: None,
      error_code: None,
      error_message: None,
    }
  }

  pub fn failed(
    phase_name: impl Into<String>,
    code: ErrorCode,
    message: impl Into<String>,
  ) -> Self {
    Self {
      status: RunStatus::Failed,
      failed_phase: Some(phase_name.into()),
      error_code: Some(code),
      error_message: Some(message.into()),
    }
  }
}
