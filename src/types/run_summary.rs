//! DTOs for `_run_summary.json`: the summary artifact written when a run succeeds.
//!
//! Maps from the [PhaseResult](super::PhaseResult)s and [Artifact](super::Artifact)s
//! produced during the run. No wall-clock values are included, so re-executing
//! the same run renders identical bytes.

use serde::{Deserialize, Serialize};

use super::{Artifact, ArtifactKind, ArtifactMeta, ErrorCode, PhaseResult, RunStatus};

/// Current summary format version.
pub const RUN_SUMMARY_VERSION: u32 = 1;

/// One executed phase in the summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSummaryEntry {
  /// 1-based position in the phase plan.
  pub step: u32,
  pub phase_name: String,
  pub fail_on_error: bool,
  pub success: bool,
  pub error_code: Option<ErrorCode>,
  pub error_message: Option<String>,
  /// URIs of the artifacts this phase returned.
  pub artifact_uris: Vec<String>,
}

impl PhaseSummaryEntry {
  /// Build an entry from a phase's result.
  pub fn new(
    step: u32,
    phase_name: impl Into<String>,
    fail_on_error: bool,
    result: &PhaseResult,
  ) -> Self {
    Self {
      step,
      phase_name: phase_name.into(),
      fail_on_error,
      success: result.is_success(),
      error_code: result.error_code(),
      error_message: result.error_message().map(String::from),
      artifact_uris: result.artifacts().iter().map(|a| a.uri.clone()).collect(),
    }
  }
}

/// Reference to a registered artifact, without its id or registration time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryArtifact {
  pub phase_name: Option<String>,
  pub kind: ArtifactKind,
  pub uri: String,
  pub sha256: Option<String>,
  pub size_bytes: Option<u64>,
  pub meta: ArtifactMeta,
}

impl From<&Artifact> for SummaryArtifact {
  fn from(a: &Artifact) -> Self {
    Self {
      phase_name: a.phase_name.clone(),
      kind: a.kind,
      uri: a.uri.clone(),
      sha256: a.sha256.clone(),
      size_bytes: a.size_bytes,
      meta: a.meta.clone(),
    }
  }
}

/// Root structure for `_run_summary.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
  /// Summary format version.
  pub version: u32,
  pub run_id: String,
  pub final_status: RunStatus,
  /// Executed phases in order.
  pub phases: Vec<PhaseSummaryEntry>,
  /// Every artifact registered during the run.
  pub artifacts: Vec<SummaryArtifact>,
}

impl RunSummary {
  /// Pretty JSON bytes, as written to the artifact store.
  pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec_pretty(self)
  }
}
