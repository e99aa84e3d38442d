//! # lakehouse-executor
//!
//! A stateless worker for lakehouse pipeline runs. Runs wait in a shared
//! [RunStore]; any number of workers claim them atomically and drive each
//! run's phase plan (ingest → validate → transform → publish → query) to a
//! terminal status, recording events and artifacts as they go.
//!
//! ## Architecture
//!
//! - [store]: the durable run queue and its atomic claim (in-memory and SQLite).
//! - [executor]: the per-worker loop that invokes phase handlers in order.
//! - [phases]: the [PhaseHandler] protocol, the built-in handlers and the registry.
//! - [artifact_store]: where handlers write their outputs.
//! - [reaper]: liveness recovery for runs whose worker stopped heartbeating.

pub mod artifact_registry;
pub mod artifact_store;
#[cfg(test)]
mod artifact_store_test;
pub mod callbacks;
#[cfg(test)]
mod callbacks_test;
pub mod config;
pub mod dataset;
#[cfg(test)]
mod dataset_test;
pub mod error;
pub mod event_log;
pub mod executor;
pub mod phases;
pub mod reaper;
pub mod sql_engine;
#[cfg(test)]
mod sql_engine_test;
pub mod store;
pub mod types;

pub use artifact_store::{ArtifactStore, LocalArtifactStore, StoredObject};
pub use callbacks::PhaseCallbacks;
pub use config::{ExecutorConfig, HttpConfig, ReaperConfig, default_worker_id};
pub use error::{Error, Result};
pub use executor::{Executor, PhaseReport, RunReport};
pub use phases::{PhaseHandler, PhaseName, PhaseRegistry};
pub use reaper::Reaper;
pub use store::{InMemoryRunStore, ReapReport, RunStore, SqliteRunStore};
pub use types::{
  Artifact, ArtifactKind, ErrorCode, Event, EventLevel, NewRun, PhaseDescriptor, PhaseResult,
  Run, RunContext, RunStatus, RunSummary,
};
