//! Tests for `PhaseRegistry` and `PhaseName`.

use std::sync::Arc;

use async_trait::async_trait;

use super::{PhaseHandler, PhaseName, PhaseRegistry};
use crate::artifact_store::LocalArtifactStore;
use crate::callbacks::PhaseCallbacks;
use crate::config::HttpConfig;
use crate::types::{PhaseDescriptor, PhaseResult, RunContext};

struct Custom;

#[async_trait]
impl PhaseHandler for Custom {
  fn name(&self) -> &str {
    "notify"
  }

  async fn execute(
    &self,
    _ctx: &RunContext,
    _phase: &PhaseDescriptor,
    _callbacks: &dyn PhaseCallbacks,
  ) -> crate::Result<PhaseResult> {
    Ok(PhaseResult::success())
  }
}

#[test]
fn defaults_cover_builtin_phases() {
  let registry =
    PhaseRegistry::with_defaults(Arc::new(LocalArtifactStore::new()), HttpConfig::default())
      .unwrap();
  for name in PhaseName::ALL {
    let handler = registry.resolve(name.as_str()).expect("registered");
    assert_eq!(handler.name(), name.as_str());
  }
  assert_eq!(
    registry.names(),
    vec!["ingest", "publish", "query", "transform", "validate"]
  );
  assert!(registry.resolve("notify").is_none());
}

#[test]
fn extensions_and_unknown_phases() {
  let mut registry = PhaseRegistry::new();
  registry.register(Arc::new(Custom));
  assert!(registry.contains("notify"));
  let plan = vec![
    PhaseDescriptor::new("notify"),
    PhaseDescriptor::new("ingest"),
    PhaseDescriptor::new("archive"),
    PhaseDescriptor::new("ingest"),
  ];
  assert_eq!(registry.unknown_phases(&plan), vec!["ingest", "archive"]);
}

#[test]
fn phase_names_parse() {
  assert_eq!("publish".parse::<PhaseName>().unwrap(), PhaseName::Publish);
  assert!("archive".parse::<PhaseName>().is_err());
  assert_eq!(PhaseName::Query.to_string(), "query");
}
