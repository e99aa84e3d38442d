//! In-memory run store.
//!
//! [InMemoryRunStore] implements [RunStore] with `RwLock`-guarded maps. The claim
//! is atomic within one process only; use [super::SqliteRunStore] when workers
//! run as separate processes.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{ReapReport, RunStore};
use crate::error::{Error, Result};
use crate::types::{
  Artifact, ErrorCode, Event, NewEvent, NewRun, Run, RunCompletion, RunStatus,
};

fn poison_err<T>(_: PoisonError<T>) -> Error {
  Error::store("lock poisoned")
}

#[derive(Debug, Default)]
struct State {
  runs: HashMap<String, Run>,
  events: HashMap<String, Vec<Event>>,
  artifacts: HashMap<String, Vec<Artifact>>,
}

impl State {
  fn owned_run_mut(&mut self, run_id: &str, worker_id: &str) -> Result<&mut Run> {
    let run = self.runs.get_mut(run_id).ok_or_else(|| Error::RunNotFound {
      run_id: run_id.to_string(),
    })?;
    if !run.is_owned_by(worker_id) {
      return Err(Error::not_owner(run_id, worker_id));
    }
    Ok(run)
  }
}

/// In-memory store for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryRunStore {
  state: RwLock<State>,
}

impl InMemoryRunStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
  async fn enqueue(&self, new: NewRun) -> Result<Run> {
    let run = Run::queued(new, Utc::now());
    let mut state = self.state.write().map_err(poison_err)?;
    if state.runs.contains_key(&run.run_id) {
      return Err(Error::store(format!("run already exists: {}", run.run_id)));
    }
    state.runs.insert(run.run_id.clone(), run.clone());
    Ok(run)
  }

  async fn claim_next_run(&self, worker_id: &str) -> Result<Option<Run>> {
    let now = Utc::now();
    let mut state = self.state.write().map_err(poison_err)?;
    let next_id = state
      .runs
      .values()
      .filter(|r| r.status == RunStatus::Queued && r.claimed_by.is_none())
      .min_by(|a, b| {
        a.created_at
          .cmp(&b.created_at)
          .then_with(|| a.run_id.cmp(&b.run_id))
      })
      .map(|r| r.run_id.clone());
    let Some(run_id) = next_id else {
      return Ok(None);
    };
    let Some(run) = state.runs.get_mut(&run_id) else {
      return Ok(None);
    };
    run.status = RunStatus::Claimed;
    run.claimed_by = Some(worker_id.to_string());
    run.claimed_at = Some(now);
    run.last_heartbeat_at = Some(now);
    run.attempts += 1;
    Ok(Some(run.clone()))
  }

  async fn mark_running(&self, run_id: &str, worker_id: &str) -> Result<()> {
    let mut state = self.state.write().map_err(poison_err)?;
    let run = state.owned_run_mut(run_id, worker_id)?;
    run.status = RunStatus::Running;
    run.last_heartbeat_at = Some(Utc::now());
    Ok(())
  }

  async fn heartbeat(&self, run_id: &str, worker_id: &str) -> Result<()> {
    let mut state = self.state.write().map_err(poison_err)?;
    let run = state.owned_run_mut(run_id, worker_id)?;
    run.last_heartbeat_at = Some(Utc::now());
    Ok(())
  }

  async fn complete_run(
    &self,
    run_id: &str,
    worker_id: &str,
    completion: RunCompletion,
  ) -> Result<Run> {
    let mut state = self.state.write().map_err(poison_err)?;
    let run = state.owned_run_mut(run_id, worker_id)?;
    if !matches!(completion.status, RunStatus::Succeeded | RunStatus::Failed)
      || !run.status.can_transition_to(completion.status)
    {
      return Err(Error::InvalidTransition {
        from: run.status,
        to: completion.status,
      });
    }
    run.status = completion.status;
    run.failed_phase = completion.failed_phase;
    run.error_code = completion.error_code;
    run.error_message = completion.error_message;
    run.finished_at = Some(Utc::now());
    Ok(run.clone())
  }

  async fn get_run(&self, run_id: &str) -> Result<Option<Run>> {
    let state = self.state.read().map_err(poison_err)?;
    Ok(state.runs.get(run_id).cloned())
  }

  async fn list_runs(&self, status: Option<RunStatus>) -> Result<Vec<Run>> {
    let state = self.state.read().map_err(poison_err)?;
    let mut runs: Vec<Run> = state
      .runs
      .values()
      .filter(|r| status.is_none_or(|s| r.status == s))
      .cloned()
      .collect();
    runs.sort_by(|a, b| {
      a.created_at
        .cmp(&b.created_at)
        .then_with(|| a.run_id.cmp(&b.run_id))
    });
    Ok(runs)
  }

  async fn append_event(&self, run_id: &str, event: NewEvent) -> Result<Event> {
    let mut state = self.state.write().map_err(poison_err)?;
    if !state.runs.contains_key(run_id) {
      return Err(Error::RunNotFound {
        run_id: run_id.to_string(),
      });
    }
    let log = state.events.entry(run_id.to_string()).or_default();
    let stored = Event::from_new(run_id, log.len() as u64 + 1, event, Utc::now());
    log.push(stored.clone());
    Ok(stored)
  }

  async fn list_events(&self, run_id: &str) -> Result<Vec<Event>> {
    let state = self.state.read().map_err(poison_err)?;
    Ok(state.events.get(run_id).cloned().unwrap_or_default())
  }

  async fn insert_artifact(&self, artifact: &Artifact) -> Result<()> {
    let mut state = self.state.write().map_err(poison_err)?;
    if !state.runs.contains_key(&artifact.run_id) {
      return Err(Error::RunNotFound {
        run_id: artifact.run_id.clone(),
      });
    }
    state
      .artifacts
      .entry(artifact.run_id.clone())
      .or_default()
      .push(artifact.clone());
    Ok(())
  }

  async fn list_artifacts(&self, run_id: &str) -> Result<Vec<Artifact>> {
    let state = self.state.read().map_err(poison_err)?;
    Ok(state.artifacts.get(run_id).cloned().unwrap_or_default())
  }

  async fn reap_stale_runs(
    &self,
    stale_before: DateTime<Utc>,
    max_attempts: u32,
  ) -> Result<ReapReport> {
    let now = Utc::now();
    let mut report = ReapReport::default();
    let mut state = self.state.write().map_err(poison_err)?;
    for run in state.runs.values_mut() {
      let stale = run.status.is_claimed()
        && run
          .last_heartbeat_at
          .is_none_or(|heartbeat| heartbeat < stale_before);
      if !stale {
        continue;
      }
      if run.attempts < max_attempts {
        run.status = RunStatus::Queued;
        run.claimed_by = None;
        run.claimed_at = None;
        report.requeued.push(run.run_id.clone());
      } else {
        run.status = RunStatus::TimedOut;
        run.error_code = Some(ErrorCode::TimedOut);
        run.error_message = Some(format!(
          "no heartbeat since {} after {} attempts",
          run
            .last_heartbeat_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "claim".to_string()),
          run.attempts
        ));
        run.finished_at = Some(now);
        report.timed_out.push(run.run_id.clone());
      }
    }
    report.requeued.sort();
    report.timed_out.sort();
    Ok(report)
  }
}
