//! Immutable per-run data threaded through every phase call.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable per-run data threaded through every phase call.
///
/// Handlers derive every output location from `artifact_base_uri` via
/// [RunContext::output_uri] / [RunContext::resolve_output].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
  pub run_id: String,
  pub artifact_base_uri: String,
  pub params: BTreeMap<String, String>,
  /// Creation time of the run; stable across re-claims, so paths derived from it are deterministic.
  pub created_at: DateTime<Utc>,
  /// Claim attempt number (1 on first claim).
  pub attempt: u32,
}

/// Joins a relative path onto a base URI with exactly one `/` between them.
pub fn join_uri(base: &str, relative: &str) -> String {
  let base = base.trim_end_matches('/');
  let relative = relative.trim_start_matches('/');
  if relative.is_empty() {
    return base.to_string();
  }
  format!("{}/{}", base, relative)
}

fn strip_file_scheme(uri: &str) -> &str {
  uri.strip_prefix("file://").unwrap_or(uri)
}

fn is_absolute_uri(uri: &str) -> bool {
  uri.contains("://") || uri.starts_with('/')
}

impl RunContext {
  pub fn param(&self, key: &str) -> Option<&str> {
    self.params.get(key).map(String::as_str)
  }

  /// Output location for `relative` under this run's artifact root.
  pub fn output_uri(&self, relative: &str) -> String {
    join_uri(&self.artifact_base_uri, relative)
  }

  /// Compact `YYYYMMDDTHHMMSS` stamp of the run's creation time.
  pub fn run_stamp(&self) -> String {
    self.created_at.format("%Y%m%dT%H%M%S").to_string()
  }

  /// Resolves a caller-supplied output location.
  ///
  /// Relative URIs are joined under the artifact root; absolute URIs must already
  /// live under it. `..` segments are rejected either way.
  pub fn resolve_output(&self, uri: &str) -> Result<String, String> {
    let trimmed = uri.trim();
    if trimmed.is_empty() {
      return Err("output uri is empty".to_string());
    }
    if strip_file_scheme(trimmed).split('/').any(|segment| segment == "..") {
      return Err(format!("output uri {} must not contain '..'", trimmed));
    }
    if !is_absolute_uri(trimmed) {
      return Ok(self.output_uri(trimmed));
    }
    let root = strip_file_scheme(self.artifact_base_uri.trim_end_matches('/'));
    let candidate = strip_file_scheme(trimmed);
    if candidate.starts_with(&format!("{}/", root)) {
      Ok(trimmed.to_string())
    } else {
      Err(format!(
        "output uri {} is outside the artifact root {}",
        trimmed, self.artifact_base_uri
      ))
    }
  }
}
