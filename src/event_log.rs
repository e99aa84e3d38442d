//! Per-run event accumulator backed by the shared event sink.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::store::RunStore;
use crate::types::{Event, EventLevel, NewEvent};

/// Append-only event log of one run execution.
///
/// Every event goes to the [RunStore] first. The local copy feeds the warning
/// and error counts the executor attaches to the run's final event.
pub struct EventLog {
  store: Arc<dyn RunStore>,
  run_id: String,
  events: Mutex<Vec<Event>>,
}

fn poisoned<T>(_: PoisonError<T>) -> Error {
  Error::store("event log lock poisoned")
}

impl EventLog {
  pub fn new(store: Arc<dyn RunStore>, run_id: impl Into<String>) -> Self {
    Self {
      store,
      run_id: run_id.into(),
      events: Mutex::new(Vec::new()),
    }
  }

  pub fn run_id(&self) -> &str {
    &self.run_id
  }

  #[instrument(level = "trace", skip(self, event), fields(run_id = %self.run_id, level = %event.level))]
  pub async fn emit(&self, event: NewEvent) -> Result<Event> {
    let stored = self.store.append_event(&self.run_id, event).await?;
    debug!(seq = stored.seq, message = %stored.message, "event appended");
    self.events.lock().map_err(poisoned)?.push(stored.clone());
    Ok(stored)
  }

  /// Number of events emitted at `level` so far.
  pub fn count(&self, level: EventLevel) -> usize {
    self
      .events
      .lock()
      .map(|events| events.iter().filter(|e| e.level == level).count())
      .unwrap_or(0)
  }
}
