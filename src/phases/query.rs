//! Query: an ad-hoc read over a prior artifact.

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
use super::transform::{SQL_SNIPPET_CHARS, sql_snippet};
use crate::artifact_store::{ArtifactStore, short_hash};
use crate::callbacks::PhaseCallbacks;
use crate::dataset::Dataset;
use crate::error::Result;
use crate::sql_engine::run_sql;
use crate::types::{
  ArtifactKind, ArtifactMeta, ErrorCode, EventLevel, NewArtifact, PhaseDescriptor, PhaseResult,
  RunContext, event_data,
};

const DEFAULT_PREVIEW_ROWS: usize = 10;

#[derive(Debug, Default, Deserialize)]
struct RawQueryConfig {
  input_uri: Option<String>,
  sql: Option<String>,
  persist: Option<bool>,
  output_uri: Option<String>,
  preview_rows: Option<usize>,
}

/// Validated query settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryConfig {
  pub input_uri: String,
  pub sql: String,
  pub persist: bool,
  pub output_uri: Option<String>,
  pub preview_rows: usize,
}

impl QueryConfig {
  pub fn from_phase(phase: &PhaseDescriptor) -> std::result::Result<Self, ConfigError> {
    let raw: RawQueryConfig = parse_config(phase)?;
    let input_uri = required(raw.input_uri.as_deref(), "input_uri", ErrorCode::MissingInput)?;
    let sql = required(raw.sql.as_deref(), "sql", ErrorCode::MissingSql)?;
    Ok(Self {
      input_uri,
      sql,
      persist: raw.persist.unwrap_or(true),
      output_uri: raw.output_uri,
      preview_rows: raw.preview_rows.unwrap_or(DEFAULT_PREVIEW_ROWS),
    })
  }
}

/// Runs SQL over a prior dataset, reports a preview and optionally persists the result.
pub struct QueryHandler {
  artifacts: Arc<dyn ArtifactStore>,
}

impl QueryHandler {
  pub fn new(artifacts: Arc<dyn ArtifactStore>) -> Self {
    Self { artifacts }
  }
}

#[async_trait]
impl PhaseHandler for QueryHandler {
  fn name(&self) -> &str {
    "query"
  }

  #[instrument(level = "trace", skip(self, ctx, phase, callbacks), fields(run_id = %ctx.run_id))]
  async fn execute(
    &self,
    ctx: &RunContext,
    phase: &PhaseDescriptor,
    callbacks: &dyn PhaseCallbacks,
  ) -> Result<PhaseResult> {
    callbacks.heartbeat().await?;
    let config = match QueryConfig::from_phase(phase) {
      Ok(c) => c,
      Err(e) => return Ok(e.into()),
    };
    let input_uri = resolve_input(ctx, &config.input_uri);
    let output_uri = match resolve_output(ctx, config.output_uri.as_deref(), || {
      ctx.output_uri(&format!(
        "query/query_{}.csv",
        short_hash(&format!("{}\n{}", input_uri, config.sql))
      ))
    }) {
      Ok(uri) => uri,
      Err(e) => return Ok(e.into()),
    };
    if let Some(failed) = check_input(self.artifacts.as_ref(), &input_uri).await? {
      return Ok(failed);
    }
    let result = match Dataset::from_csv(&self.artifacts.read(&input_uri).await?) {
      Ok(input) => run_sql(&input, &config.sql).await,
      Err(e) => Err(e),
    };
    let result = match result {
      Ok(d) => d,
      Err(e) => {
        return Ok(PhaseResult::failure(
          ErrorCode::QueryError,
          format!("query failed: {}", e),
        ));
      }
    };
    callbacks.heartbeat().await?;

    let rows = result.row_count();
    callbacks
      .emit_event(
        EventLevel::Info,
        &format!("query returned {} rows", rows),
        event_data(json!({
          "rows": rows,
          "columns": result.columns(),
          "preview": result.preview(config.preview_rows),
        })),
      )
      .await?;
    if !config.persist {
      info!(rows, "query complete (not persisted)");
      return Ok(PhaseResult::success());
    }

    let stored = self
      .artifacts
      .write(&output_uri, Bytes::from(result.to_csv()?))
      .await?;
    let mut meta = ArtifactMeta::new();
    meta.insert("input_uri".to_string(), json!(input_uri));
    meta.insert("rows".to_string(), json!(rows));
    meta.insert("sql".to_string(), json!(sql_snippet(&config.sql, SQL_SNIPPET_CHARS)));
    let artifact = callbacks
      .register_artifact(
        NewArtifact::new(ArtifactKind::QueryResult, stored.uri)
          .with_content(stored.sha256, stored.size_bytes)
          .with_meta(meta),
      )
      .await?;
    info!(rows, uri = %artifact.uri, "query complete");
    Ok(PhaseResult::success().with_artifact(artifact))
  }
}
