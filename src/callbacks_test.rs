//! Tests for `callbacks`, `event_log` and `artifact_registry`.

use std::sync::Arc;

use serde_json::json;

use crate::artifact_registry::ArtifactRegistry;
use crate::callbacks::{PhaseCallbacks, RunCallbacks};
use crate::event_log::EventLog;
use crate::store::{InMemoryRunStore, RunStore};
use crate::types::{ArtifactKind, EventLevel, NewArtifact, NewRun, PhaseDescriptor, event_data};

async fn claimed_store() -> Arc<dyn RunStore> {
  let store: Arc<dyn RunStore> = Arc::new(InMemoryRunStore::new());
  store
    .enqueue(NewRun::new("/lake", vec![PhaseDescriptor::new("ingest")]).with_run_id("r1"))
    .await
    .unwrap();
  store.claim_next_run("w1").await.unwrap().unwrap();
  store
}

#[tokio::test]
async fn events_are_tagged_with_phase_and_persisted() {
  let store = claimed_store().await;
  let events = EventLog::new(store.clone(), "r1");
  let artifacts = ArtifactRegistry::new(store.clone(), "r1");
  let cb = RunCallbacks::new(store.clone(), "w1", "ingest", &events, &artifacts);
  cb.emit_event(EventLevel::Info, "fetched", event_data(json!({"rows": 3})))
    .await
    .unwrap();
  cb.emit_event(EventLevel::Warn, "slow source", Default::default())
    .await
    .unwrap();

  let stored = store.list_events("r1").await.unwrap();
  assert_eq!(stored.len(), 2);
  assert_eq!(stored[0].phase_name.as_deref(), Some("ingest"));
  assert_eq!(stored[0].data["rows"], 3);
  assert_eq!(events.count(EventLevel::Info), 1);
  assert_eq!(events.count(EventLevel::Warn), 1);
  assert_eq!(events.count(EventLevel::Error), 0);
}

#[tokio::test]
async fn artifacts_are_registered_in_order() {
  let store = claimed_store().await;
  let events = EventLog::new(store.clone(), "r1");
  let artifacts = ArtifactRegistry::new(store.clone(), "r1");
  let cb = RunCallbacks::new(store.clone(), "w1", "transform", &events, &artifacts);
  let a = cb
    .register_artifact(NewArtifact::new(ArtifactKind::Dataset, "/lake/a.csv"))
    .await
    .unwrap();
  cb.register_artifact(NewArtifact::new(ArtifactKind::Report, "/lake/b.json"))
    .await
    .unwrap();
  assert_eq!(a.run_id, "r1");
  assert_eq!(a.phase_name.as_deref(), Some("transform"));
  let uris: Vec<_> = artifacts.artifacts().into_iter().map(|a| a.uri).collect();
  assert_eq!(uris, vec!["/lake/a.csv", "/lake/b.json"]);
  assert_eq!(store.list_artifacts("r1").await.unwrap().len(), 2);
}

#[tokio::test]
async fn heartbeat_counts_and_detects_lost_claim() {
  let store = claimed_store().await;
  let events = EventLog::new(store.clone(), "r1");
  let artifacts = ArtifactRegistry::new(store.clone(), "r1");
  let cb = RunCallbacks::new(store.clone(), "w1", "ingest", &events, &artifacts);
  cb.heartbeat().await.unwrap();
  cb.heartbeat().await.unwrap();
  assert_eq!(cb.heartbeat_count(), 2);

  let stranger = RunCallbacks::new(store.clone(), "w2", "ingest", &events, &artifacts);
  assert!(stranger.heartbeat().await.unwrap_err().is_not_owner());
  assert_eq!(stranger.heartbeat_count(), 0);
}
