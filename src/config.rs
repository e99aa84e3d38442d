//! Worker, reaper and HTTP client settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for one worker process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
  /// Identity written to `claimed_by`.
  pub worker_id: String,
  /// Period of the background heartbeat while a handler runs.
  pub heartbeat_interval: Duration,
  /// Initial sleep when the queue is empty.
  pub poll_interval: Duration,
  /// Cap for the empty-queue backoff.
  pub max_poll_interval: Duration,
}

impl ExecutorConfig {
  pub fn new(worker_id: impl Into<String>) -> Self {
    Self {
      worker_id: worker_id.into(),
      ..Self::default()
    }
  }

  pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
    self.heartbeat_interval = interval;
    self
  }

  pub fn with_poll_interval(mut self, initial: Duration, max: Duration) -> Self {
    self.poll_interval = initial;
    self.max_poll_interval = max.max(initial);
    self
  }
}

impl Default for ExecutorConfig {
  fn default() -> Self {
    Self {
      worker_id: default_worker_id(),
      heartbeat_interval: Duration::from_secs(10),
      poll_interval: Duration::from_secs(1),
      max_poll_interval: Duration::from_secs(30),
    }
  }
}

/// `worker-<pid>-<random suffix>`, unique enough across hosts sharing a store.
pub fn default_worker_id() -> String {
  let suffix = uuid::Uuid::new_v4().simple().to_string();
  format!("worker-{}-{}", std::process::id(), &suffix[..8])
}

/// Stale-run recovery policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaperConfig {
  /// A claimed or running run whose last heartbeat is older than this is stale.
  pub stale_after: Duration,
  /// Claims allowed per run before it is marked `timed_out`.
  pub max_attempts: u32,
}

impl Default for ReaperConfig {
  fn default() -> Self {
    Self {
      stale_after: Duration::from_secs(60),
      max_attempts: 3,
    }
  }
}

/// Outbound HTTP settings shared by ingest sources and publish targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
  pub timeout: Duration,
}

impl Default for HttpConfig {
  fn default() -> Self {
    Self {
      timeout: Duration::from_secs(30),
    }
  }
}

impl HttpConfig {
  pub fn client(&self) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder().timeout(self.timeout).build()
  }
}
