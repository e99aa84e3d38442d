//! Per-run artifact accumulator backed by the shared artifact registry.

use std::sync::{Arc, Mutex};

use tracing::{info, instrument};

use crate::error::{Error, Result};
use crate::store::RunStore;
use crate::types::{Artifact, NewArtifact};

/// Artifacts registered during one run execution, in registration order.
pub struct ArtifactRegistry {
  store: Arc<dyn RunStore>,
  run_id: String,
  artifacts: Mutex<Vec<Artifact>>,
}

impl ArtifactRegistry {
  pub fn new(store: Arc<dyn RunStore>, run_id: impl Into<String>) -> Self {
    Self {
      store,
      run_id: run_id.into(),
      artifacts: Mutex::new(Vec::new()),
    }
  }

  /// Persists a new artifact owned by this run.
  #[instrument(level = "trace", skip(self, new), fields(run_id = %self.run_id, uri = %new.uri))]
  pub async fn register(&self, phase_name: Option<&str>, new: NewArtifact) -> Result<Artifact> {
    let artifact = Artifact::from_new(&self.run_id, phase_name, new);
    self.store.insert_artifact(&artifact).await?;
    info!(kind = %artifact.kind, uri = %artifact.uri, phase = ?phase_name, "artifact registered");
    self
      .artifacts
      .lock()
      .map_err(|_| Error::store("artifact registry lock poisoned"))?
      .push(artifact.clone());
    Ok(artifact)
  }

  /// Records an artifact a handler returned without registering it. Known ids are skipped.
  pub async fn adopt(&self, artifact: &Artifact) -> Result<bool> {
    let known = self
      .artifacts
      .lock()
      .map_err(|_| Error::store("artifact registry lock poisoned"))?
      .iter()
      .any(|a| a.artifact_id == artifact.artifact_id);
    if known {
      return Ok(false);
    }
    let mut owned = artifact.clone();
    owned.run_id = self.run_id.clone();
    self.store.insert_artifact(&owned).await?;
    self
      .artifacts
      .lock()
      .map_err(|_| Error::store("artifact registry lock poisoned"))?
      .push(owned);
    Ok(true)
  }

  pub fn artifacts(&self) -> Vec<Artifact> {
    self
      .artifacts
      .lock()
      .map(|a| a.clone())
      .unwrap_or_default()
  }

  pub fn len(&self) -> usize {
    self.artifacts.lock().map(|a| a.len()).unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}
