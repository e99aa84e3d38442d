//! Executor core: claims runs and drives their phase plans to a terminal status.
//!
//! One [Executor] is one worker. Workers share nothing but the [RunStore]; the
//! atomic claim is what keeps two of them off the same run. Within a run,
//! phases execute strictly in plan order and a failing phase halts the plan
//! unless its descriptor sets `fail_on_error = false`.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::FutureExt;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::artifact_registry::ArtifactRegistry;
use crate::artifact_store::ArtifactStore;
use crate::callbacks::RunCallbacks;
use crate::config::ExecutorConfig;
use crate::error::{Error, Result};
use crate::event_log::EventLog;
use crate::phases::{PhaseHandler, PhaseRegistry};
use crate::store::RunStore;
use crate::types::{
  Artifact, ArtifactKind, ErrorCode, EventLevel, NewArtifact, NewEvent, PhaseDescriptor,
  PhaseResult, PhaseSummaryEntry, RUN_SUMMARY_VERSION, Run, RunCompletion, RunContext, RunStatus,
  RunSummary, SummaryArtifact, event_data,
};

/// File name of the summary artifact under the run's artifact root.
pub const RUN_SUMMARY_FILE: &str = "_run_summary.json";

/// Outcome of one phase invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseReport {
  /// 1-based position in the plan.
  pub step: u32,
  pub phase_name: String,
  pub fail_on_error: bool,
  pub result: PhaseResult,
  /// Heartbeats the handler itself sent.
  pub heartbeats: u64,
}

/// Outcome of one run execution by this worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
  pub run_id: String,
  pub status: RunStatus,
  /// Invoked phases in order; phases after a fatal failure are absent.
  pub phases: Vec<PhaseReport>,
  /// Every artifact registered during this execution, including the summary.
  pub artifacts: Vec<Artifact>,
}

impl RunReport {
  pub fn succeeded(&self) -> bool {
    self.status == RunStatus::Succeeded
  }
}

/// Result of the phase loop before the run is finalised.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseOutcome {
  pub phases: Vec<PhaseReport>,
  /// The phase that halted the run, if any.
  pub halted_at: Option<PhaseReport>,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "non-string panic payload".to_string()
  }
}

/// A stateless worker over a shared run store.
pub struct Executor {
  store: Arc<dyn RunStore>,
  registry: PhaseRegistry,
  artifacts: Arc<dyn ArtifactStore>,
  config: ExecutorConfig,
}

impl Executor {
  pub fn new(
    store: Arc<dyn RunStore>,
    registry: PhaseRegistry,
    artifacts: Arc<dyn ArtifactStore>,
    config: ExecutorConfig,
  ) -> Self {
    Self {
      store,
      registry,
      artifacts,
      config,
    }
  }

  pub fn worker_id(&self) -> &str {
    &self.config.worker_id
  }

  pub fn config(&self) -> &ExecutorConfig {
    &self.config
  }

  /// Claims the next queued run, warning once about phases with no handler.
  #[instrument(level = "trace", skip(self), fields(worker_id = %self.config.worker_id))]
  pub async fn claim_next_run(&self) -> Result<Option<Run>> {
    let Some(run) = self.store.claim_next_run(&self.config.worker_id).await? else {
      return Ok(None);
    };
    info!(run_id = %run.run_id, attempt = run.attempts, phases = run.phase_spec.len(), "run claimed");
    let unknown = self.registry.unknown_phases(&run.phase_spec);
    if !unknown.is_empty() {
      warn!(run_id = %run.run_id, unknown = ?unknown, "plan references unregistered phases");
      self
        .store
        .append_event(
          &run.run_id,
          NewEvent::new(
            EventLevel::Warn,
            format!("plan references unregistered phases: {}", unknown.join(", ")),
          )
          .with_data(event_data(json!({"unknown_phases": unknown}))),
        )
        .await?;
    }
    Ok(Some(run))
  }

  /// Claims and executes one run. `None` when the queue is empty.
  pub async fn process_next(&self) -> Result<Option<RunReport>> {
    match self.claim_next_run().await? {
      Some(run) => self.run_phases(&run).await.map(Some),
      None => Ok(None),
    }
  }

  /// Executes a claimed run and writes its terminal status.
  ///
  /// Returns [Error::NotOwner] without finalising if the claim is lost midway
  /// (the reaper requeued or timed out the run).
  #[instrument(level = "trace", skip(self, run), fields(run_id = %run.run_id))]
  pub async fn run_phases(&self, run: &Run) -> Result<RunReport> {
    let worker_id = self.config.worker_id.as_str();
    self.store.mark_running(&run.run_id, worker_id).await?;
    let events = EventLog::new(self.store.clone(), run.run_id.clone());
    let artifacts = ArtifactRegistry::new(self.store.clone(), run.run_id.clone());
    events
      .emit(
        NewEvent::new(
          EventLevel::Info,
          format!("run started on {} (attempt {})", worker_id, run.attempts),
        )
        .with_data(event_data(json!({
          "worker_id": worker_id,
          "attempt": run.attempts,
          "phases": run.phase_spec.iter().map(|p| p.phase_name.as_str()).collect::<Vec<_>>(),
        }))),
      )
      .await?;

    let outcome = self.execute_phases(run, &events, &artifacts).await?;
    self.finalize(run, outcome, &events, &artifacts).await
  }

  /// Runs the plan in order, stopping at the first failure whose descriptor
  /// keeps `fail_on_error`. Does not touch the run's status.
  pub async fn execute_phases(
    &self,
    run: &Run,
    events: &EventLog,
    artifacts: &ArtifactRegistry,
  ) -> Result<PhaseOutcome> {
    let ctx = run.context();
    let worker_id = self.config.worker_id.as_str();
    let mut phases = Vec::with_capacity(run.phase_spec.len());

    for (idx, phase) in run.phase_spec.iter().enumerate() {
      let step = idx as u32 + 1;
      let name = phase.phase_name.as_str();
      self.store.heartbeat(&run.run_id, worker_id).await?;
      info!(run_id = %run.run_id, step, phase = name, "phase started");
      events
        .emit(NewEvent::new(EventLevel::Info, format!("phase {} started", name)).for_phase(name))
        .await?;

      let callbacks = RunCallbacks::new(self.store.clone(), worker_id, name, events, artifacts);
      let result = match self.registry.resolve(name) {
        Some(handler) => {
          let result = self
            .invoke(handler, &ctx, phase, &callbacks)
            .await?;
          if callbacks.heartbeat_count() == 0 {
            warn!(run_id = %run.run_id, phase = name, "handler sent no heartbeat");
          }
          result
        }
        None => PhaseResult::failure(
          ErrorCode::UnknownPhase,
          format!("no handler registered for phase '{}'", name),
        ),
      };
      for artifact in result.artifacts() {
        if artifacts.adopt(artifact).await? {
          debug!(uri = %artifact.uri, "adopted unregistered artifact");
        }
      }

      let report = PhaseReport {
        step,
        phase_name: name.to_string(),
        fail_on_error: phase.fail_on_error,
        heartbeats: callbacks.heartbeat_count(),
        result,
      };
      self.record_phase_end(events, &report).await?;
      let fatal = !report.result.is_success() && phase.fail_on_error;
      phases.push(report.clone());
      if fatal {
        return Ok(PhaseOutcome {
          phases,
          halted_at: Some(report),
        });
      }
    }
    Ok(PhaseOutcome {
      phases,
      halted_at: None,
    })
  }

  async fn record_phase_end(&self, events: &EventLog, report: &PhaseReport) -> Result<()> {
    let name = report.phase_name.as_str();
    let result = &report.result;
    let event = if result.is_success() {
      info!(phase = name, artifacts = result.artifacts().len(), "phase succeeded");
      NewEvent::new(EventLevel::Success, format!("phase {} succeeded", name))
        .with_data(event_data(json!({"artifacts": result.artifacts().len()})))
    } else {
      let data = event_data(json!({
        "error_code": result.error_code(),
        "error_message": result.error_message(),
      }));
      if report.fail_on_error {
        error!(phase = name, code = ?result.error_code(), "phase failed");
        NewEvent::new(EventLevel::Error, format!("phase {} failed", name)).with_data(data)
      } else {
        warn!(phase = name, code = ?result.error_code(), "phase failed; continuing");
        NewEvent::new(
          EventLevel::Warn,
          format!("phase {} failed; continuing because fail_on_error is false", name),
        )
        .with_data(data)
      }
    };
    events.emit(event.for_phase(name)).await?;
    Ok(())
  }

  /// Runs one handler while a ticker keeps the claim alive. Handler errors and
  /// panics become `HANDLER_EXCEPTION`; a lost claim is returned as an error.
  async fn invoke(
    &self,
    handler: Arc<dyn PhaseHandler>,
    ctx: &RunContext,
    phase: &PhaseDescriptor,
    callbacks: &RunCallbacks<'_>,
  ) -> Result<PhaseResult> {
    let period = self.config.heartbeat_interval.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let execution = AssertUnwindSafe(handler.execute(ctx, phase, callbacks)).catch_unwind();
    tokio::pin!(execution);

    let mut claim_lost = false;
    let outcome = loop {
      tokio::select! {
        outcome = &mut execution => break outcome,
        _ = ticker.tick(), if !claim_lost => {
          match self.store.heartbeat(&ctx.run_id, &self.config.worker_id).await {
            Ok(()) => debug!(phase = %phase.phase_name, "background heartbeat"),
            Err(e) if e.is_not_owner() => {
              warn!(run_id = %ctx.run_id, "claim lost while handler running");
              claim_lost = true;
            }
            Err(e) => warn!(error = %e, "background heartbeat failed"),
          }
        }
      }
    };

    if claim_lost {
      return Err(Error::not_owner(&ctx.run_id, &self.config.worker_id));
    }
    Ok(match outcome {
      Ok(Ok(result)) => result,
      Ok(Err(e)) if e.is_not_owner() => return Err(e),
      Ok(Err(e)) => {
        error!(phase = %phase.phase_name, error = %e, "handler returned an error");
        PhaseResult::failure(ErrorCode::HandlerException, e.to_string())
      }
      Err(panic) => {
        let message = panic_message(panic.as_ref());
        error!(phase = %phase.phase_name, panic = %message, "handler panicked");
        PhaseResult::failure(
          ErrorCode::HandlerException,
          format!("handler panicked: {}", message),
        )
      }
    })
  }

  async fn finalize(
    &self,
    run: &Run,
    outcome: PhaseOutcome,
    events: &EventLog,
    artifacts: &ArtifactRegistry,
  ) -> Result<RunReport> {
    let worker_id = self.config.worker_id.as_str();
    let warnings = events.count(EventLevel::Warn);
    let errors = events.count(EventLevel::Error);
    let (status, completion) = match &outcome.halted_at {
      Some(failed) => {
        let code = failed.result.error_code().unwrap_or(ErrorCode::HandlerException);
        let message = failed.result.error_message().unwrap_or_default().to_string();
        events
          .emit(
            NewEvent::new(
              EventLevel::Error,
              format!("run failed at phase {}: {}", failed.phase_name, code),
            )
            .with_data(event_data(json!({
              "failed_phase": failed.phase_name,
              "error_code": code,
              "error_message": message,
              "warnings": warnings,
              "errors": errors,
            }))),
          )
          .await?;
        (
          RunStatus::Failed,
          RunCompletion::failed(failed.phase_name.clone(), code, message),
        )
      }
      None => {
        let summary = self.write_summary(run, &outcome, artifacts).await?;
        events
          .emit(
            NewEvent::new(
              EventLevel::Success,
              format!("run succeeded after {} phases", outcome.phases.len()),
            )
            .with_data(event_data(json!({
              "phases": outcome.phases.len(),
              "artifacts": artifacts.len(),
              "summary_uri": summary.uri,
              "warnings": warnings,
              "errors": errors,
            }))),
          )
          .await?;
        (RunStatus::Succeeded, RunCompletion::succeeded())
      }
    };

    self
      .store
      .complete_run(&run.run_id, worker_id, completion)
      .await?;
    info!(run_id = %run.run_id, status = %status, "run finalised");
    Ok(RunReport {
      run_id: run.run_id.clone(),
      status,
      phases: outcome.phases,
      artifacts: artifacts.artifacts(),
    })
  }

  async fn write_summary(
    &self,
    run: &Run,
    outcome: &PhaseOutcome,
    artifacts: &ArtifactRegistry,
  ) -> Result<Artifact> {
    let summary = RunSummary {
      version: RUN_SUMMARY_VERSION,
      run_id: run.run_id.clone(),
      final_status: RunStatus::Succeeded,
      phases: outcome
        .phases
        .iter()
        .map(|p| PhaseSummaryEntry::new(p.step, p.phase_name.clone(), p.fail_on_error, &p.result))
        .collect(),
      artifacts: artifacts.artifacts().iter().map(SummaryArtifact::from).collect(),
    };
    let uri = run.context().output_uri(RUN_SUMMARY_FILE);
    let stored = self
      .artifacts
      .write(&uri, Bytes::from(summary.to_json_bytes()?))
      .await?;
    let mut meta = crate::types::ArtifactMeta::new();
    meta.insert("phases".to_string(), json!(summary.phases.len()));
    meta.insert("artifacts".to_string(), json!(summary.artifacts.len()));
    artifacts
      .register(
        None,
        NewArtifact::new(ArtifactKind::Summary, stored.uri)
          .with_content(stored.sha256, stored.size_bytes)
          .with_meta(meta),
      )
      .await
  }

  /// Processes runs until `shutdown` resolves, backing off while the queue is empty.
  ///
  /// Shutdown is only observed between runs; a run in progress always finishes.
  /// Returns the number of runs processed.
  pub async fn run_worker_loop<F>(&self, shutdown: F) -> Result<u64>
  where
    F: Future<Output = ()>,
  {
    tokio::pin!(shutdown);
    let mut processed = 0u64;
    let mut idle = self.config.poll_interval;
    info!(worker_id = %self.config.worker_id, "worker loop started");
    loop {
      if (&mut shutdown).now_or_never().is_some() {
        break;
      }
      let wait = match self.process_next().await {
        Ok(Some(report)) => {
          processed += 1;
          idle = self.config.poll_interval;
          debug!(run_id = %report.run_id, status = %report.status, "run processed");
          continue;
        }
        Ok(None) => {
          let wait = idle;
          idle = (idle * 2).min(self.config.max_poll_interval);
          wait
        }
        Err(e) if e.is_not_owner() => {
          warn!(error = %e, "abandoned run after losing claim");
          continue;
        }
        Err(e) => {
          error!(error = %e, "worker iteration failed");
          let wait = idle;
          idle = (idle * 2).min(self.config.max_poll_interval);
          wait
        }
      };
      let jitter_cap = (wait.as_millis() as u64 / 4).max(1);
      let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_cap));
      tokio::select! {
        _ = &mut shutdown => break,
        _ = tokio::time::sleep(wait + jitter) => {}
      }
    }
    info!(worker_id = %self.config.worker_id, processed, "worker loop stopped");
    Ok(processed)
  }
}
