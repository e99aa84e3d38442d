//! Pluggable persistence for runs, their events and their artifacts.
//!
//! The [RunStore] trait is the only way runs change state. It is shared by every
//! worker process, so correctness lives here rather than in in-process locks:
//!
//! - **Atomic claim**: [RunStore::claim_next_run] is a compare-and-set on
//!   `status = queued AND claimed_by IS NULL`; two racing workers never both win.
//! - **Owner guard**: heartbeats and status writes succeed only for the worker
//!   holding the claim, and never touch a terminal run.
//! - **Append-only sinks**: events and artifacts are inserted, never updated.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{Artifact, Event, NewEvent, NewRun, Run, RunCompletion, RunStatus};

pub use memory::InMemoryRunStore;
pub use sqlite::SqliteRunStore;

/// Outcome of one reaper pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReapReport {
  /// Stale runs returned to the queue.
  pub requeued: Vec<String>,
  /// Stale runs that exhausted their attempts.
  pub timed_out: Vec<String>,
}

impl ReapReport {
  pub fn is_empty(&self) -> bool {
    self.requeued.is_empty() && self.timed_out.is_empty()
  }
}

/// Run queue, event sink and artifact registry persistence.
#[async_trait]
pub trait RunStore: Send + Sync {
  // --- Run lifecycle ---

  /// Creates a queued run.
  async fn enqueue(&self, new: NewRun) -> Result<Run>;

  /// Atomically claims the oldest queued, unclaimed run for `worker_id`.
  ///
  /// Sets `status = claimed`, `claimed_by`, `claimed_at` and `last_heartbeat_at`,
  /// and increments `attempts`. Returns `None` when nothing is eligible.
  async fn claim_next_run(&self, worker_id: &str) -> Result<Option<Run>>;

  /// Moves an owned run from `claimed` to `running` (no-op if already running).
  async fn mark_running(&self, run_id: &str, worker_id: &str) -> Result<()>;

  /// Refreshes `last_heartbeat_at` on an owned run.
  ///
  /// Fails with [Error::NotOwner](crate::Error::NotOwner) once the claim is lost.
  async fn heartbeat(&self, run_id: &str, worker_id: &str) -> Result<()>;

  /// Writes the terminal status of an owned run and releases the claim.
  ///
  /// Only `succeeded` and `failed` may be written by a worker.
  async fn complete_run(
    &self,
    run_id: &str,
    worker_id: &str,
    completion: RunCompletion,
  ) -> Result<Run>;

  async fn get_run(&self, run_id: &str) -> Result<Option<Run>>;

  /// Lists runs, optionally filtered by status, oldest first.
  async fn list_runs(&self, status: Option<RunStatus>) -> Result<Vec<Run>>;

  // --- Event sink ---

  /// Appends an event; the store assigns the next per-run `seq` and the timestamp.
  async fn append_event(&self, run_id: &str, event: NewEvent) -> Result<Event>;

  /// Events of a run ordered by `seq`.
  async fn list_events(&self, run_id: &str) -> Result<Vec<Event>>;

  // --- Artifact registry ---

  async fn insert_artifact(&self, artifact: &Artifact) -> Result<()>;

  /// Artifacts of a run in registration order.
  async fn list_artifacts(&self, run_id: &str) -> Result<Vec<Artifact>>;

  // --- Reaper contract ---

  /// Recovers runs whose last heartbeat is older than `stale_before`.
  ///
  /// Stale `claimed`/`running` runs with `attempts < max_attempts` are requeued
  /// (claim cleared); the rest become `timed_out` with `error_code = TIMED_OUT`.
  async fn reap_stale_runs(
    &self,
    stale_before: DateTime<Utc>,
    max_attempts: u32,
  ) -> Result<ReapReport>;
}
