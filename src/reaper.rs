//! Stale-run recovery.
//!
//! Runs whose worker stopped heartbeating are returned to the queue while they
//! have attempts left, and marked `timed_out` once they do not. The executor
//! never calls this; it runs as its own process (`lakehouse_worker reap`).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use crate::config::ReaperConfig;
use crate::error::{Error, Result};
use crate::store::{ReapReport, RunStore};

pub struct Reaper {
  store: Arc<dyn RunStore>,
  config: ReaperConfig,
}

impl Reaper {
  pub fn new(store: Arc<dyn RunStore>, config: ReaperConfig) -> Self {
    Self { store, config }
  }

  pub fn config(&self) -> &ReaperConfig {
    &self.config
  }

  /// One pass: everything whose last heartbeat predates `now - stale_after`.
  #[instrument(level = "trace", skip(self))]
  pub async fn tick(&self, now: DateTime<Utc>) -> Result<ReapReport> {
    let stale_after = chrono::Duration::from_std(self.config.stale_after)
      .map_err(|e| Error::store_with_source("stale_after out of range", e))?;
    let report = self
      .store
      .reap_stale_runs(now - stale_after, self.config.max_attempts)
      .await?;
    info!(
      requeued = report.requeued.len(),
      timed_out = report.timed_out.len(),
      "reaper pass"
    );
    Ok(report)
  }
}
