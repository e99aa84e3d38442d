//! Lifecycle status of a run.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a run.
///
/// Forward path: `queued → claimed → running → {succeeded | failed | timed_out}`.
/// The reaper may move a stale `claimed`/`running` run back to `queued`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
  Queued,
  Claimed,
  Running,
  Succeeded,
  Failed,
  TimedOut,
}

impl RunStatus {
  /// Stable lowercase name, as persisted by the stores.
  pub fn as_str(&self) -> &'static str {
    match self {
      RunStatus::Queued => "queued",
      RunStatus::Claimed => "claimed",
      RunStatus::Running => "running",
      RunStatus::Succeeded => "succeeded",
      RunStatus::Failed => "failed",
      RunStatus::TimedOut => "timed_out",
    }
  }

  /// Terminal states are immutable.
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      RunStatus::Succeeded | RunStatus::Failed | RunStatus::TimedOut
    )
  }

  /// True while a worker holds the claim.
  pub fn is_claimed(&self) -> bool {
    matches!(self, RunStatus::Claimed | RunStatus::Running)
  }

  /// Returns true if moving from `self` to `target` is allowed.
  ///
  /// `claimed`/`running` → `queued` is the reaper's requeue path.
  pub fn can_transition_to(&self, target: RunStatus) -> bool {
    match self {
      RunStatus::Queued => matches!(target, RunStatus::Claimed),
      RunStatus::Claimed => matches!(
        target,
        RunStatus::Running | RunStatus::Failed | RunStatus::TimedOut | RunStatus::Queued
      ),
      RunStatus::Running => matches!(
        target,
        RunStatus::Succeeded | RunStatus::Failed | RunStatus::TimedOut | RunStatus::Queued
      ),
      RunStatus::Succeeded | RunStatus::Failed | RunStatus::TimedOut => false,
    }
  }
}

impl fmt::Display for RunStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for RunStatus {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "queued" => Ok(RunStatus::Queued),
      "claimed" => Ok(RunStatus::Claimed),
      "running" => Ok(RunStatus::Running),
      "succeeded" => Ok(RunStatus::Succeeded),
      "failed" => Ok(RunStatus::Failed),
      "timed_out" => Ok(RunStatus::TimedOut),
      other => Err(format!("unknown run status: {}", other)),
    }
  }
}
