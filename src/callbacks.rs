//! The interface phase handlers use to talk to the executor.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::artifact_registry::ArtifactRegistry;
use crate::error::Result;
use crate::event_log::EventLog;
use crate::store::RunStore;
use crate::types::{Artifact, EventData, EventLevel, NewArtifact, NewEvent};

/// Side channel from a handler back to the executor.
///
/// Handlers report progress through events, prove liveness with heartbeats and
/// register what they produce. They never touch the run record directly.
#[async_trait]
pub trait PhaseCallbacks: Send + Sync {
  async fn emit_event(&self, level: EventLevel, message: &str, data: EventData) -> Result<()>;

  /// Refreshes the run's liveness. Call at least once per invocation and inside long loops.
  async fn heartbeat(&self) -> Result<()>;

  async fn register_artifact(&self, artifact: NewArtifact) -> Result<Artifact>;
}

/// Callbacks bound to one phase of one claimed run.
pub struct RunCallbacks<'a> {
  store: Arc<dyn RunStore>,
  worker_id: &'a str,
  phase_name: &'a str,
  events: &'a EventLog,
  artifacts: &'a ArtifactRegistry,
  heartbeats: AtomicU64,
}

impl<'a> RunCallbacks<'a> {
  pub fn new(
    store: Arc<dyn RunStore>,
    worker_id: &'a str,
    phase_name: &'a str,
    events: &'a EventLog,
    artifacts: &'a ArtifactRegistry,
  ) -> Self {
    Self {
      store,
      worker_id,
      phase_name,
      events,
      artifacts,
      heartbeats: AtomicU64::new(0),
    }
  }

  /// Number of heartbeats the handler sent.
  pub fn heartbeat_count(&self) -> u64 {
    self.heartbeats.load(Ordering::Relaxed)
  }
}

#[async_trait]
impl PhaseCallbacks for RunCallbacks<'_> {
  async fn emit_event(&self, level: EventLevel, message: &str, data: EventData) -> Result<()> {
    self
      .events
      .emit(
        NewEvent::new(level, message)
          .with_data(data)
          .for_phase(self.phase_name),
      )
      .await?;
    Ok(())
  }

  async fn heartbeat(&self) -> Result<()> {
    self
      .store
      .heartbeat(self.events.run_id(), self.worker_id)
      .await?;
    self.heartbeats.fetch_add(1, Ordering::Relaxed);
    Ok(())
  }

  async fn register_artifact(&self, artifact: NewArtifact) -> Result<Artifact> {
    self.artifacts.register(Some(self.phase_name), artifact).await
  }
}
