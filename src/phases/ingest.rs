//! Ingest: lands raw data in the bronze layer.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use super::PhaseHandler;
use super::config::{ConfigError, check_name, parse_config};
use crate::artifact_store::ArtifactStore;
use crate::callbacks::PhaseCallbacks;
use crate::dataset::Dataset;
use crate::error::Result;
use crate::types::{
  ArtifactKind, ArtifactMeta, ErrorCode, EventLevel, NewArtifact, PhaseDescriptor, PhaseResult,
  RunContext, event_data,
};

const DEFAULT_DATASET: &str = "raw";

#[derive(Debug, Default, Deserialize)]
struct RawIngestConfig {
  source_uri: Option<String>,
  rows: Option<Vec<Value>>,
  dataset: Option<String>,
  allow_empty: Option<bool>,
}

/// Where ingested rows come from.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestSource {
  /// Local path, `file://` or `http(s)://` location.
  Uri(String),
  /// Rows given directly in the phase config.
  Inline(Vec<Value>),
}

/// Validated ingest settings.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestConfig {
  pub source: IngestSource,
  pub dataset: String,
  pub allow_empty: bool,
}

impl IngestConfig {
  pub fn from_phase(phase: &PhaseDescriptor) -> std::result::Result<Self, ConfigError> {
    let raw: RawIngestConfig = parse_config(phase)?;
    let source = match (raw.source_uri.as_deref().map(str::trim), raw.rows) {
      (Some(uri), _) if !uri.is_empty() => IngestSource::Uri(uri.to_string()),
      (_, Some(rows)) => IngestSource::Inline(rows),
      _ => return Err(ConfigError::missing(ErrorCode::MissingSource, "source_uri")),
    };
    let dataset = raw.dataset.unwrap_or_else(|| DEFAULT_DATASET.to_string());
    check_name("dataset", &dataset)?;
    Ok(Self {
      source,
      dataset,
      allow_empty: raw.allow_empty.unwrap_or(true),
    })
  }
}

fn is_http(uri: &str) -> bool {
  uri.starts_with("http://") || uri.starts_with("https://")
}

/// Parses fetched bytes: a JSON array of objects for `.json` sources, CSV otherwise.
fn decode(uri: &str, bytes: &[u8]) -> std::result::Result<Dataset, String> {
  let path = uri.split(['?', '#']).next().unwrap_or(uri);
  if path.ends_with(".json") {
    let records: Vec<Value> =
      serde_json::from_slice(bytes).map_err(|e| format!("invalid json rows: {}", e))?;
    Ok(Dataset::from_json_rows(&records))
  } else {
    Dataset::from_csv(bytes).map_err(|e| format!("invalid csv: {}", e))
  }
}

/// Fetches a source into `<base>/bronze/<dataset>.csv`.
pub struct IngestHandler {
  artifacts: Arc<dyn ArtifactStore>,
  http: reqwest::Client,
}

impl IngestHandler {
  pub fn new(artifacts: Arc<dyn ArtifactStore>, http: reqwest::Client) -> Self {
    Self { artifacts, http }
  }

  async fn fetch(&self, uri: &str) -> std::result::Result<Bytes, String> {
    if is_http(uri) {
      let response = self
        .http
        .get(uri)
        .send()
        .await
        .map_err(|e| format!("request failed: {}", e))?;
      let status = response.status();
      if !status.is_success() {
        return Err(format!("source returned HTTP {}", status.as_u16()));
      }
      response
        .bytes()
        .await
        .map_err(|e| format!("reading body failed: {}", e))
    } else {
      self
        .artifacts
        .read(uri)
        .await
        .map_err(|e| format!("source unreachable: {}", e))
    }
  }
}

#[async_trait]
impl PhaseHandler for IngestHandler {
  fn name(&self) -> &str {
    "ingest"
  }

  #[instrument(level = "trace", skip(self, ctx, phase, callbacks), fields(run_id = %ctx.run_id))]
  async fn execute(
    &self,
    ctx: &RunContext,
    phase: &PhaseDescriptor,
    callbacks: &dyn PhaseCallbacks,
  ) -> Result<PhaseResult> {
    callbacks.heartbeat().await?;
    let config = match IngestConfig::from_phase(phase) {
      Ok(c) => c,
      Err(e) => return Ok(e.into()),
    };

    let (dataset, source_label) = match &config.source {
      IngestSource::Inline(rows) => (Dataset::from_json_rows(rows), "inline".to_string()),
      IngestSource::Uri(uri) => {
        let fetched = match self.fetch(uri).await {
          Ok(bytes) => bytes,
          Err(msg) => {
            warn!(source = %uri, error = %msg, "ingest source failed");
            return Ok(PhaseResult::failure(
              ErrorCode::IngestFailed,
              format!("{}: {}", uri, msg),
            ));
          }
        };
        callbacks.heartbeat().await?;
        match decode(uri, &fetched) {
          Ok(ds) => (ds, uri.clone()),
          Err(msg) => {
            return Ok(PhaseResult::failure(
              ErrorCode::IngestFailed,
              format!("{}: {}", uri, msg),
            ));
          }
        }
      }
    };

    let rows = dataset.row_count();
    if rows == 0 && !config.allow_empty {
      return Ok(PhaseResult::failure(
        ErrorCode::NoData,
        format!("source {} produced no rows", source_label),
      ));
    }

    let output_uri = ctx.output_uri(&format!("bronze/{}.csv", config.dataset));
    let stored = self
      .artifacts
      .write(&output_uri, Bytes::from(dataset.to_csv()?))
      .await?;

    let mut meta = ArtifactMeta::new();
    meta.insert("layer".to_string(), json!("bronze"));
    meta.insert("rows".to_string(), json!(rows));
    meta.insert("columns".to_string(), json!(dataset.columns()));
    meta.insert("source".to_string(), json!(source_label));
    let artifact = callbacks
      .register_artifact(
        NewArtifact::new(ArtifactKind::Dataset, stored.uri.clone())
          .with_content(stored.sha256, stored.size_bytes)
          .with_meta(meta),
      )
      .await?;

    let level = if rows == 0 { EventLevel::Warn } else { EventLevel::Info };
    callbacks
      .emit_event(
        level,
        &format!("ingested {} rows into {}", rows, config.dataset),
        event_data(json!({"rows": rows, "source": source_label, "uri": stored.uri})),
      )
      .await?;
    info!(rows, uri = %artifact.uri, "ingest complete");
    Ok(PhaseResult::success().with_artifact(artifact))
  }
}
