//! Transform: runs SQL over an input dataset and writes a layered output.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument};

use super::PhaseHandler;
use super::config::{
  ConfigError, check_input, parse_config, required, resolve_input, resolve_output,
};
use crate::artifact_store::{ArtifactStore, short_hash};
use crate::callbacks::PhaseCallbacks;
use crate::dataset::Dataset;
use crate::error::Result;
use crate::sql_engine::run_sql;
use crate::types::{
  ArtifactKind, ArtifactMeta, ErrorCode, EventLevel, NewArtifact, PhaseDescriptor, PhaseResult,
  RunContext, event_data,
};

/// Longest SQL text copied into artifact metadata, in characters.
pub const SQL_SNIPPET_CHARS: usize = 500;

/// Medallion layer of a transform output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
  Bronze,
  Silver,
  Gold,
}

impl Layer {
  pub fn as_str(&self) -> &'static str {
    match self {
      Layer::Bronze => "bronze",
      Layer::Silver => "silver",
      Layer::Gold => "gold",
    }
  }

  fn parse(value: &str) -> std::result::Result<Self, ConfigError> {
    match value {
      "bronze" => Ok(Layer::Bronze),
      "silver" => Ok(Layer::Silver),
      "gold" => Ok(Layer::Gold),
      other => Err(ConfigError::invalid(format!(
        "layer must be bronze, silver or gold, got '{}'",
        other
      ))),
    }
  }
}

/// Where the statement comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlSource {
  Inline(String),
  File(String),
}

#[derive(Debug, Default, Deserialize)]
struct RawTransformConfig {
  input_uri: Option<String>,
  sql: Option<String>,
  sql_file: Option<String>,
  output_uri: Option<String>,
  layer: Option<String>,
}

/// Validated transform settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformConfig {
  pub input_uri: String,
  pub sql: SqlSource,
  pub output_uri: Option<String>,
  pub layer: Layer,
}

impl TransformConfig {
  /// SQL is checked before the input so a plan with neither reports `MISSING_SQL`.
  pub fn from_phase(phase: &PhaseDescriptor) -> std::result::Result<Self, ConfigError> {
    let raw: RawTransformConfig = parse_config(phase)?;
    let sql = match (
      required(raw.sql.as_deref(), "sql", ErrorCode::MissingSql),
      required(raw.sql_file.as_deref(), "sql_file", ErrorCode::MissingSql),
    ) {
      (Ok(sql), _) => SqlSource::Inline(sql),
      (Err(_), Ok(file)) => SqlSource::File(file),
      (Err(_), Err(_)) => {
        return Err(ConfigError::new(
          ErrorCode::MissingSql,
          "transform requires 'sql' or 'sql_file'",
        ));
      }
    };
    let input_uri = required(raw.input_uri.as_deref(), "input_uri", ErrorCode::MissingInput)?;
    let layer = match raw.layer.as_deref() {
      Some(l) => Layer::parse(l.trim())?,
      None => Layer::Silver,
    };
    Ok(Self {
      input_uri,
      sql,
      output_uri: raw.output_uri,
      layer,
    })
  }
}

/// Prefix of `sql` holding at most `max_chars` characters, cut on a char boundary.
pub fn sql_snippet(sql: &str, max_chars: usize) -> &str {
  match sql.char_indices().nth(max_chars) {
    Some((byte_idx, _)) => &sql[..byte_idx],
    None => sql,
  }
}

/// Deterministic output location for a run, keyed by the resolved input and the
/// statement. Re-running the same transform in the same run overwrites the same object.
pub fn default_output_uri(ctx: &RunContext, layer: Layer, input_uri: &str, sql: &str) -> String {
  ctx.output_uri(&format!(
    "{}/transform_{}_{}.csv",
    layer.as_str(),
    ctx.run_stamp(),
    short_hash(&format!("{}\n{}", input_uri, sql))
  ))
}

/// Runs a SQL statement over the input (table `input`) and registers the result.
pub struct TransformHandler {
  artifacts: Arc<dyn ArtifactStore>,
}

impl TransformHandler {
  pub fn new(artifacts: Arc<dyn ArtifactStore>) -> Self {
    Self { artifacts }
  }

  async fn load_sql(
    &self,
    ctx: &RunContext,
    source: &SqlSource,
  ) -> std::result::Result<String, PhaseResult> {
    match source {
      SqlSource::Inline(sql) => Ok(sql.clone()),
      SqlSource::File(file) => {
        let uri = resolve_input(ctx, file);
        let bytes = self.artifacts.read(&uri).await.map_err(|e| {
          PhaseResult::failure(
            ErrorCode::TransformError,
            format!("cannot read sql_file {}: {}", uri, e),
          )
        })?;
        let sql = String::from_utf8(bytes.to_vec()).map_err(|_| {
          PhaseResult::failure(ErrorCode::TransformError, format!("sql_file {} is not utf-8", uri))
        })?;
        if sql.trim().is_empty() {
          return Err(PhaseResult::failure(
            ErrorCode::MissingSql,
            format!("sql_file {} is empty", uri),
          ));
        }
        Ok(sql)
      }
    }
  }
}

#[async_trait]
impl PhaseHandler for TransformHandler {
  fn name(&self) -> &str {
    "transform"
  }

  #[instrument(level = "trace", skip(self, ctx, phase, callbacks), fields(run_id = %ctx.run_id))]
  async fn execute(
    &self,
    ctx: &RunContext,
    phase: &PhaseDescriptor,
    callbacks: &dyn PhaseCallbacks,
  ) -> Result<PhaseResult> {
    callbacks.heartbeat().await?;
    let config = match TransformConfig::from_phase(phase) {
      Ok(c) => c,
      Err(e) => return Ok(e.into()),
    };
    let sql = match self.load_sql(ctx, &config.sql).await {
      Ok(sql) => sql,
      Err(failed) => return Ok(failed),
    };
    let input_uri = resolve_input(ctx, &config.input_uri);
    let output_uri = match resolve_output(ctx, config.output_uri.as_deref(), || {
      default_output_uri(ctx, config.layer, &input_uri, &sql)
    }) {
      Ok(uri) => uri,
      Err(e) => return Ok(e.into()),
    };

    if let Some(failed) = check_input(self.artifacts.as_ref(), &input_uri).await? {
      return Ok(failed);
    }
    let input = match Dataset::from_csv(&self.artifacts.read(&input_uri).await?) {
      Ok(d) => d,
      Err(e) => {
        return Ok(PhaseResult::failure(
          ErrorCode::TransformError,
          format!("cannot parse input {}: {}", input_uri, e),
        ));
      }
    };
    callbacks.heartbeat().await?;

    let output = match run_sql(&input, &sql).await {
      Ok(d) => d,
      Err(e) => {
        return Ok(PhaseResult::failure(
          ErrorCode::TransformError,
          format!("sql failed: {}", e),
        ));
      }
    };
    let stored = self
      .artifacts
      .write(&output_uri, Bytes::from(output.to_csv()?))
      .await?;

    let (input_rows, output_rows) = (input.row_count(), output.row_count());
    let mut meta = ArtifactMeta::new();
    meta.insert("layer".to_string(), json!(config.layer.as_str()));
    meta.insert("input_uri".to_string(), json!(input_uri));
    meta.insert("input_rows".to_string(), json!(input_rows));
    meta.insert("output_rows".to_string(), json!(output_rows));
    meta.insert("sql".to_string(), json!(sql_snippet(&sql, SQL_SNIPPET_CHARS)));
    let artifact = callbacks
      .register_artifact(
        NewArtifact::new(ArtifactKind::Dataset, stored.uri.clone())
          .with_content(stored.sha256, stored.size_bytes)
          .with_meta(meta),
      )
      .await?;
    callbacks
      .emit_event(
        EventLevel::Info,
        &format!("transformed {} rows into {}", input_rows, output_rows),
        event_data(json!({
          "layer": config.layer.as_str(),
          "input_rows": input_rows,
          "output_rows": output_rows,
          "uri": stored.uri,
        })),
      )
      .await?;
    info!(input_rows, output_rows, uri = %artifact.uri, "transform complete");
    Ok(PhaseResult::success().with_artifact(artifact))
  }
}
