//! Shared fixtures for handler tests.

use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use crate::callbacks::PhaseCallbacks;
use crate::error::Result;
use crate::types::{Artifact, EventData, EventLevel, NewArtifact, RunContext};

/// Callbacks that remember everything a handler reported.
#[derive(Default)]
pub(crate) struct RecordingCallbacks {
  pub events: Mutex<Vec<(EventLevel, String, EventData)>>,
  pub artifacts: Mutex<Vec<Artifact>>,
  pub heartbeats: AtomicU64,
}

impl RecordingCallbacks {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn events_at(&self, level: EventLevel) -> Vec<(String, EventData)> {
    self
      .events
      .lock()
      .unwrap()
      .iter()
      .filter(|(l, _, _)| *l == level)
      .map(|(_, m, d)| (m.clone(), d.clone()))
      .collect()
  }

  pub fn event_count(&self) -> usize {
    self.events.lock().unwrap().len()
  }

  pub fn artifacts(&self) -> Vec<Artifact> {
    self.artifacts.lock().unwrap().clone()
  }

  pub fn heartbeat_count(&self) -> u64 {
    self.heartbeats.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl PhaseCallbacks for RecordingCallbacks {
  async fn emit_event(&self, level: EventLevel, message: &str, data: EventData) -> Result<()> {
    self
      .events
      .lock()
      .unwrap()
      .push((level, message.to_string(), data));
    Ok(())
  }

  async fn heartbeat(&self) -> Result<()> {
    self.heartbeats.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }

  async fn register_artifact(&self, artifact: NewArtifact) -> Result<Artifact> {
    let artifact = Artifact::from_new("test-run", Some("test-phase"), artifact);
    self.artifacts.lock().unwrap().push(artifact.clone());
    Ok(artifact)
  }
}

/// Run context rooted at `base`, created at a fixed instant.
pub(crate) fn ctx_at(base: &Path) -> RunContext {
  RunContext {
    run_id: "test-run".to_string(),
    artifact_base_uri: base.display().to_string(),
    params: Default::default(),
    created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap(),
    attempt: 1,
  }
}

/// Writes `content` to `base/relative`, creating parents, and returns the path as a string.
pub(crate) fn write_file(base: &Path, relative: &str, content: &str) -> String {
  let path = base.join(relative);
  std::fs::create_dir_all(path.parent().unwrap()).unwrap();
  std::fs::write(&path, content).unwrap();
  path.display().to_string()
}

/// CSV with `n` rows of `id,amount` where `amount = id`.
pub(crate) fn numbered_csv(n: usize) -> String {
  let mut out = String::from("id,amount\n");
  for i in 1..=n {
    out.push_str(&format!("{},{}\n", i, i));
  }
  out
}

/// Serves `app` on an ephemeral local port and returns its base URL.
pub(crate) async fn serve(app: axum::Router) -> String {
  let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  tokio::spawn(async move {
    axum::serve(listener, app).await.unwrap();
  });
  format!("http://{}", addr)
}
