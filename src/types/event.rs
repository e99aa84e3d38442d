//! Append-only run events: the audit trail of a run.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Structured payload attached to an event.
pub type EventData = serde_json::Map<String, serde_json::Value>;

/// Severity of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
  Info,
  Warn,
  Error,
  Success,
}

impl EventLevel {
  pub fn as_str(&self) -> &'static str {
    match self {
      EventLevel::Info => "info",
      EventLevel::Warn => "warn",
      EventLevel::Error => "error",
      EventLevel::Success => "success",
    }
  }
}

impl fmt::Display for EventLevel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl std::str::FromStr for EventLevel {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "info" => Ok(EventLevel::Info),
      "warn" => Ok(EventLevel::Warn),
      "error" => Ok(EventLevel::Error),
      "success" => Ok(EventLevel::Success),
      other => Err(format!("unknown event level: {}", other)),
    }
  }
}

/// Event to append; the sink assigns `seq` and `timestamp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
  pub level: EventLevel,
  pub message: String,
  pub data: EventData,
  pub phase_name: Option<String>,
}

impl NewEvent {
  pub fn new(level: EventLevel, message: impl Into<String>) -> Self {
    Self {
      level,
      message: message.into(),
      data: EventData::new(),
      phase_name: None,
    }
  }

  pub fn with_data(mut self, data: EventData) -> Self {
    self.data = data;
    self
  }

  pub fn for_phase(mut self, phase_name: impl Into<String>) -> Self {
    self.phase_name = Some(phase_name.into());
    self
  }
}

/// One stored entry of a run's event log. Never edited or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
  pub run_id: String,
  /// 1-based position within the run's log.
  pub seq: u64,
  pub level: EventLevel,
  pub message: String,
  pub data: EventData,
  pub phase_name: Option<String>,
  pub timestamp: DateTime<Utc>,
}

impl Event {
  pub fn from_new(run_id: &str, seq: u64, new: NewEvent, timestamp: DateTime<Utc>) -> Self {
    Self {
      run_id: run_id.to_string(),
      seq,
      level: new.level,
      message: new.message,
      data: new.data,
      phase_name: new.phase_name,
      timestamp,
    }
  }
}

/// Converts a `serde_json::json!({...})` object into [EventData]; other values yield an empty map.
pub fn event_data(value: serde_json::Value) -> EventData {
  match value {
    serde_json::Value::Object(map) => map,
    _ => EventData::new(),
  }
}
