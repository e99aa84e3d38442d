//! Validate: schema and quality checks over an input dataset.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument};

use super::PhaseHandler;
use super::config::{
  ConfigError, check_input, config_digest, parse_config, required, resolve_input,
};
use crate::artifact_store::ArtifactStore;
use crate::callbacks::PhaseCallbacks;
use crate::dataset::Dataset;
use crate::error::Result;
use crate::types::{
  ArtifactKind, ArtifactMeta, ErrorCode, EventLevel, NewArtifact, PhaseDescriptor, PhaseResult,
  RunContext, event_data,
};

#[derive(Debug, Default, Deserialize)]
struct RawValidateConfig {
  input_uri: Option<String>,
  #[serde(default)]
  required_columns: Vec<String>,
  #[serde(default)]
  not_null: Vec<String>,
  #[serde(default)]
  unique: Vec<String>,
  min_rows: Option<u64>,
  max_rows: Option<u64>,
  #[serde(default)]
  patterns: BTreeMap<String, String>,
}

/// Validated checks to run.
#[derive(Debug, Clone)]
pub struct ValidateConfig {
  pub input_uri: String,
  pub required_columns: Vec<String>,
  pub not_null: Vec<String>,
  pub unique: Vec<String>,
  pub min_rows: Option<u64>,
  pub max_rows: Option<u64>,
  pub patterns: Vec<(String, Regex)>,
}

impl ValidateConfig {
  pub fn from_phase(phase: &PhaseDescriptor) -> std::result::Result<Self, ConfigError> {
    let raw: RawValidateConfig = parse_config(phase)?;
    let input_uri = required(raw.input_uri.as_deref(), "input_uri", ErrorCode::MissingInput)?;
    if let (Some(min), Some(max)) = (raw.min_rows, raw.max_rows) {
      if min > max {
        return Err(ConfigError::invalid(format!(
          "min_rows ({}) exceeds max_rows ({})",
          min, max
        )));
      }
    }
    let mut patterns = Vec::with_capacity(raw.patterns.len());
    for (column, pattern) in raw.patterns {
      let re = Regex::new(&pattern).map_err(|e| {
        ConfigError::invalid(format!("invalid pattern for column {}: {}", column, e))
      })?;
      patterns.push((column, re));
    }
    Ok(Self {
      input_uri,
      required_columns: raw.required_columns,
      not_null: raw.not_null,
      unique: raw.unique,
      min_rows: raw.min_rows,
      max_rows: raw.max_rows,
      patterns,
    })
  }
}

/// One failed check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
  pub check: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub column: Option<String>,
  pub message: String,
}

impl Finding {
  fn new(check: &str, column: Option<&str>, message: String) -> Self {
    Self {
      check: check.to_string(),
      column: column.map(String::from),
      message,
    }
  }
}

/// Report written next to the run's other outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
  pub input_uri: String,
  pub rows_checked: u64,
  pub passed: bool,
  pub findings: Vec<Finding>,
}

/// Runs every configured check and collects findings. Checks on a column that
/// does not exist report the missing column once instead of failing per row.
pub fn check_dataset(config: &ValidateConfig, data: &Dataset) -> Vec<Finding> {
  let mut findings = Vec::new();
  let rows = data.row_count() as u64;

  for column in &config.required_columns {
    if data.column_index(column).is_none() {
      findings.push(Finding::new(
        "required_column",
        Some(column),
        format!("column {} is missing", column),
      ));
    }
  }
  if let Some(min) = config.min_rows.filter(|min| rows < *min) {
    findings.push(Finding::new(
      "min_rows",
      None,
      format!("{} rows, expected at least {}", rows, min),
    ));
  }
  if let Some(max) = config.max_rows.filter(|max| rows > *max) {
    findings.push(Finding::new(
      "max_rows",
      None,
      format!("{} rows, expected at most {}", rows, max),
    ));
  }

  let lookup = |check: &str, column: &str, findings: &mut Vec<Finding>| {
    let idx = data.column_index(column);
    if idx.is_none() {
      findings.push(Finding::new(
        check,
        Some(column),
        format!("column {} is missing", column),
      ));
    }
    idx
  };

  for column in &config.not_null {
    if let Some(idx) = lookup("not_null", column, &mut findings) {
      let nulls = data.column_values(idx).filter(Option::is_none).count();
      if nulls > 0 {
        findings.push(Finding::new(
          "not_null",
          Some(column),
          format!("{} null values in {}", nulls, column),
        ));
      }
    }
  }

  for column in &config.unique {
    if let Some(idx) = lookup("unique", column, &mut findings) {
      let mut seen = HashSet::new();
      let duplicates = data
        .column_values(idx)
        .flatten()
        .filter(|value| !seen.insert(*value))
        .count();
      if duplicates > 0 {
        findings.push(Finding::new(
          "unique",
          Some(column),
          format!("{} duplicate values in {}", duplicates, column),
        ));
      }
    }
  }

  for (column, re) in &config.patterns {
    if let Some(idx) = lookup("pattern", column, &mut findings) {
      let mismatches = data
        .column_values(idx)
        .flatten()
        .filter(|value| !re.is_match(value))
        .count();
      if mismatches > 0 {
        findings.push(Finding::new(
          "pattern",
          Some(column),
          format!("{} values in {} do not match {}", mismatches, column, re.as_str()),
        ));
      }
    }
  }

  findings
}

/// Checks a dataset and writes a report artifact; findings fail the phase.
pub struct ValidateHandler {
  artifacts: Arc<dyn ArtifactStore>,
}

impl ValidateHandler {
  pub fn new(artifacts: Arc<dyn ArtifactStore>) -> Self {
    Self { artifacts }
  }
}

#[async_trait]
impl PhaseHandler for ValidateHandler {
  fn name(&self) -> &str {
    "validate"
  }

  #[instrument(level = "trace", skip(self, ctx, phase, callbacks), fields(run_id = %ctx.run_id))]
  async fn execute(
    &self,
    ctx: &RunContext,
    phase: &PhaseDescriptor,
    callbacks: &dyn PhaseCallbacks,
  ) -> Result<PhaseResult> {
    callbacks.heartbeat().await?;
    let config = match ValidateConfig::from_phase(phase) {
      Ok(c) => c,
      Err(e) => return Ok(e.into()),
    };
    let input_uri = resolve_input(ctx, &config.input_uri);
    if let Some(failed) = check_input(self.artifacts.as_ref(), &input_uri).await? {
      return Ok(failed);
    }
    let data = match Dataset::from_csv(&self.artifacts.read(&input_uri).await?) {
      Ok(d) => d,
      Err(e) => {
        return Ok(PhaseResult::failure(
          ErrorCode::ValidationFailed,
          format!("input {} is not a readable dataset: {}", input_uri, e),
        ));
      }
    };

    let findings = check_dataset(&config, &data);
    let report = ValidationReport {
      input_uri: input_uri.clone(),
      rows_checked: data.row_count() as u64,
      passed: findings.is_empty(),
      findings,
    };
    let report_uri = ctx.output_uri(&format!(
      "reports/validate_{}.json",
      config_digest(&input_uri, phase)
    ));
    let stored = self
      .artifacts
      .write(&report_uri, Bytes::from(serde_json::to_vec_pretty(&report)?))
      .await?;

    let mut meta = ArtifactMeta::new();
    meta.insert("input_uri".to_string(), json!(input_uri));
    meta.insert("rows_checked".to_string(), json!(report.rows_checked));
    meta.insert("findings_count".to_string(), json!(report.findings.len()));
    meta.insert("passed".to_string(), json!(report.passed));
    let artifact = callbacks
      .register_artifact(
        NewArtifact::new(ArtifactKind::Report, stored.uri)
          .with_content(stored.sha256, stored.size_bytes)
          .with_meta(meta),
      )
      .await?;

    info!(rows = report.rows_checked, findings = report.findings.len(), "validation checked");
    if report.passed {
      callbacks
        .emit_event(
          EventLevel::Info,
          &format!("validation passed on {} rows", report.rows_checked),
          event_data(json!({"rows_checked": report.rows_checked})),
        )
        .await?;
      return Ok(PhaseResult::success().with_artifact(artifact));
    }
    callbacks
      .emit_event(
        EventLevel::Warn,
        &format!("validation found {} problems", report.findings.len()),
        event_data(json!({"findings": report.findings})),
      )
      .await?;
    let summary: Vec<&str> = report.findings.iter().map(|f| f.message.as_str()).collect();
    Ok(
      PhaseResult::failure(ErrorCode::ValidationFailed, summary.join("; ")).with_artifact(artifact),
    )
  }
}
