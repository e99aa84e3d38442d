//! Error types for the pipeline executor.
//!
//! Handler-level problems that a run should record (missing config, a failed
//! publish target, bad SQL) are not errors: they travel as a failed
//! [`PhaseResult`](crate::types::PhaseResult) with an
//! [`ErrorCode`](crate::types::ErrorCode). [`Error`] is reserved for faults the
//! caller did not expect, such as storage failures or a lost claim.

use crate::types::RunStatus;

/// The result type used throughout the executor.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by stores, sinks and the executor itself.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// A storage operation failed.
  #[error("storage error: {message}")]
  Store {
    /// Description of the storage failure.
    message: String,
    /// The underlying cause, if any.
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
  },

  /// The run does not exist.
  #[error("run not found: {run_id}")]
  RunNotFound {
    /// The run ID that was not found.
    run_id: String,
  },

  /// The caller no longer owns the run (claimed by someone else, requeued or finished).
  #[error("worker {worker_id} does not own run {run_id}")]
  NotOwner {
    /// The run being mutated.
    run_id: String,
    /// The worker attempting the mutation.
    worker_id: String,
  },

  /// A run status transition that the state machine forbids.
  #[error("invalid state transition: {from} -> {to}")]
  InvalidTransition {
    /// The current status.
    from: RunStatus,
    /// The attempted target status.
    to: RunStatus,
  },

  /// A URI could not be mapped to a location the artifact store can address.
  #[error("invalid uri {uri}: {reason}")]
  InvalidUri {
    /// The offending URI.
    uri: String,
    /// Why it was rejected.
    reason: String,
  },

  /// Filesystem I/O failed.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// JSON encoding or decoding failed.
  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  /// CSV encoding or decoding failed.
  #[error("csv error: {0}")]
  Csv(#[from] csv::Error),

  /// A SQL statement failed.
  #[error("sql error: {0}")]
  Sql(#[from] sqlx::Error),

  /// An HTTP request failed.
  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),

  /// Arrow record batch construction failed.
  #[error("arrow error: {0}")]
  Arrow(#[from] arrow::error::ArrowError),

  /// Parquet encoding failed.
  #[error("parquet error: {0}")]
  Parquet(#[from] parquet::errors::ParquetError),
}

impl Error {
  /// Creates a new storage error.
  #[must_use]
  pub fn store(message: impl Into<String>) -> Self {
    Self::Store {
      message: message.into(),
      source: None,
    }
  }

  /// Creates a new storage error with a source.
  #[must_use]
  pub fn store_with_source(
    message: impl Into<String>,
    source: impl std::error::Error + Send + Sync + 'static,
  ) -> Self {
    Self::Store {
      message: message.into(),
      source: Some(Box::new(source)),
    }
  }

  /// Creates a not-the-owner error for `run_id`.
  #[must_use]
  pub fn not_owner(run_id: impl Into<String>, worker_id: impl Into<String>) -> Self {
    Self::NotOwner {
      run_id: run_id.into(),
      worker_id: worker_id.into(),
    }
  }

  /// Returns true if this error means the worker lost its claim.
  #[must_use]
  pub fn is_not_owner(&self) -> bool {
    matches!(self, Self::NotOwner { .. })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::error::Error as StdError;

  #[test]
  fn store_error_display() {
    let err = Error::store("disk full");
    assert_eq!(err.to_string(), "storage error: disk full");
    assert!(err.source().is_none());
  }

  #[test]
  fn store_error_keeps_source() {
    let io = std::io::Error::other("boom");
    let err = Error::store_with_source("write run", io);
    assert!(err.source().is_some());
  }

  #[test]
  fn not_owner_is_detected() {
    let err = Error::not_owner("run-1", "worker-a");
    assert!(err.is_not_owner());
    assert_eq!(err.to_string(), "worker worker-a does not own run run-1");
    assert!(!Error::store("x").is_not_owner());
  }

  #[test]
  fn invalid_transition_display() {
    let err = Error::InvalidTransition {
      from: RunStatus::Succeeded,
      to: RunStatus::Running,
    };
    assert_eq!(err.to_string(), "invalid state transition: succeeded -> running");
  }
}
