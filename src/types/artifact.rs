//! Data objects registered against a run.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Free-form, phase-specific artifact metadata (e.g. `{layer: "silver", output_rows: 950}`).
pub type ArtifactMeta = serde_json::Map<String, serde_json::Value>;

/// What an artifact holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
  Dataset,
  Manifest,
  Report,
  QueryResult,
  Summary,
}

impl ArtifactKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      ArtifactKind::Dataset => "dataset",
      ArtifactKind::Manifest => "manifest",
      ArtifactKind::Report => "report",
      ArtifactKind::QueryResult => "query_result",
      ArtifactKind::Summary => "summary",
    }
  }
}

impl fmt::Display for ArtifactKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Registration request for an artifact, as passed to
/// [PhaseCallbacks::register_artifact](crate::callbacks::PhaseCallbacks::register_artifact).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewArtifact {
  pub kind: ArtifactKind,
  pub uri: String,
  /// Hex-encoded sha256 of the content, when the producer could hash it.
  pub sha256: Option<String>,
  pub size_bytes: Option<u64>,
  pub meta: ArtifactMeta,
}

impl NewArtifact {
  pub fn new(kind: ArtifactKind, uri: impl Into<String>) -> Self {
    Self {
      kind,
      uri: uri.into(),
      sha256: None,
      size_bytes: None,
      meta: ArtifactMeta::new(),
    }
  }

  pub fn with_content(mut self, sha256: impl Into<String>, size_bytes: u64) -> Self {
    self.sha256 = Some(sha256.into());
    self.size_bytes = Some(size_bytes);
    self
  }

  pub fn with_meta(mut self, meta: ArtifactMeta) -> Self {
    self.meta = meta;
    self
  }
}

/// An immutable, registered artifact owned by the run that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
  pub artifact_id: String,
  pub run_id: String,
  /// Phase that registered it; `None` for executor-written artifacts (the run summary).
  pub phase_name: Option<String>,
  pub kind: ArtifactKind,
  pub uri: String,
  pub sha256: Option<String>,
  pub size_bytes: Option<u64>,
  pub meta: ArtifactMeta,
  pub created_at: DateTime<Utc>,
}

impl Artifact {
  /// Materialises a registration request with a fresh id.
  pub fn from_new(run_id: &str, phase_name: Option<&str>, new: NewArtifact) -> Self {
    Self {
      artifact_id: uuid::Uuid::new_v4().to_string(),
      run_id: run_id.to_string(),
      phase_name: phase_name.map(String::from),
      kind: new.kind,
      uri: new.uri,
      sha256: new.sha256,
      size_bytes: new.size_bytes,
      meta: new.meta,
      created_at: Utc::now(),
    }
  }
}
