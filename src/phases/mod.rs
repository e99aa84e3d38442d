//! Pluggable phase handlers and the registry that resolves them by name.
//!
//! A handler is stateless across invocations: everything it needs comes from
//! the [RunContext] and its own [PhaseDescriptor]. It reports through
//! [PhaseCallbacks] and returns a [PhaseResult]; it never changes the run's status.

pub mod config;
pub mod ingest;
pub mod publish;
pub mod publish_targets;
pub mod query;
#[cfg(test)]
mod registry_test;
#[cfg(test)]
pub(crate) mod test_support;
pub mod transform;
#[cfg(test)]
mod transform_test;
pub mod validate;
#[cfg(test)]
mod validate_test;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::artifact_store::ArtifactStore;
use crate::callbacks::PhaseCallbacks;
use crate::config::HttpConfig;
use crate::error::Result;
use crate::types::{PhaseDescriptor, PhaseResult, RunContext};

pub use ingest::IngestHandler;
pub use publish::PublishHandler;
pub use query::QueryHandler;
pub use transform::TransformHandler;
pub use validate::ValidateHandler;

/// One named phase implementation.
///
/// `Ok` carries the semantic outcome, including config and data failures with
/// their [ErrorCode](crate::types::ErrorCode). `Err` is reserved for faults the
/// handler did not anticipate; the executor records those as `HANDLER_EXCEPTION`.
#[async_trait]
pub trait PhaseHandler: Send + Sync {
  /// Name this handler is registered under.
  fn name(&self) -> &str;

  async fn execute(
    &self,
    ctx: &RunContext,
    phase: &PhaseDescriptor,
    callbacks: &dyn PhaseCallbacks,
  ) -> Result<PhaseResult>;
}

/// The built-in phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhaseName {
  Ingest,
  Validate,
  Transform,
  Publish,
  Query,
}

impl PhaseName {
  pub const ALL: [PhaseName; 5] = [
    PhaseName::Ingest,
    PhaseName::Validate,
    PhaseName::Transform,
    PhaseName::Publish,
    PhaseName::Query,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      PhaseName::Ingest => "ingest",
      PhaseName::Validate => "validate",
      PhaseName::Transform => "transform",
      PhaseName::Publish => "publish",
      PhaseName::Query => "query",
    }
  }
}

impl fmt::Display for PhaseName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for PhaseName {
  type Err = String;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    PhaseName::ALL
      .into_iter()
      .find(|p| p.as_str() == s)
      .ok_or_else(|| format!("unknown phase: {}", s))
  }
}

/// Maps phase names to handlers. Open for extension names beyond [PhaseName].
#[derive(Clone, Default)]
pub struct PhaseRegistry {
  handlers: HashMap<String, Arc<dyn PhaseHandler>>,
}

impl PhaseRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registry with the five built-in handlers.
  pub fn with_defaults(artifacts: Arc<dyn ArtifactStore>, http: HttpConfig) -> Result<Self> {
    let client = http.client()?;
    let mut registry = Self::new();
    registry.register(Arc::new(IngestHandler::new(artifacts.clone(), client.clone())));
    registry.register(Arc::new(ValidateHandler::new(artifacts.clone())));
    registry.register(Arc::new(TransformHandler::new(artifacts.clone())));
    registry.register(Arc::new(PublishHandler::new(artifacts.clone(), client)));
    registry.register(Arc::new(QueryHandler::new(artifacts)));
    Ok(registry)
  }

  /// Registers `handler` under its own name, replacing any previous one.
  pub fn register(&mut self, handler: Arc<dyn PhaseHandler>) -> &mut Self {
    debug!(phase = handler.name(), "phase handler registered");
    self.handlers.insert(handler.name().to_string(), handler);
    self
  }

  pub fn resolve(&self, phase_name: &str) -> Option<Arc<dyn PhaseHandler>> {
    self.handlers.get(phase_name).cloned()
  }

  pub fn contains(&self, phase_name: &str) -> bool {
    self.handlers.contains_key(phase_name)
  }

  /// Registered names, sorted.
  pub fn names(&self) -> Vec<String> {
    let mut names: Vec<String> = self.handlers.keys().cloned().collect();
    names.sort();
    names
  }

  /// Phase names in `plan` with no registered handler, first-seen order, no duplicates.
  pub fn unknown_phases(&self, plan: &[PhaseDescriptor]) -> Vec<String> {
    let mut unknown: Vec<String> = Vec::new();
    for phase in plan {
      if !self.contains(&phase.phase_name) && !unknown.contains(&phase.phase_name) {
        unknown.push(phase.phase_name.clone());
      }
    }
    unknown
  }
}

impl fmt::Debug for PhaseRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PhaseRegistry")
      .field("handlers", &self.names())
      .finish()
  }
}
