//! Publish target sub-routines: catalog, BI (Superset), Delta table, webhook.
//!
//! Every routine reports `Ok(output_ref)` or `Err(reason)`; none of them aborts
//! the remaining targets.

use std::sync::Arc;

use arrow::array::{ArrayRef, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, instrument};

use super::config::{check_name, stem_of};
use crate::artifact_store::{ArtifactStore, sha256_hex};
use crate::dataset::Dataset;
use crate::types::RunContext;

/// A target entry as written in the plan: `"catalog"` or `{"type": "webhook", ...}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawTarget {
  Name(String),
  Detailed(Map<String, Value>),
}

/// One publish destination.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetSpec {
  pub kind: String,
  pub options: Map<String, Value>,
}

impl From<RawTarget> for TargetSpec {
  fn from(raw: RawTarget) -> Self {
    match raw {
      RawTarget::Name(kind) => Self {
        kind: kind.trim().to_string(),
        options: Map::new(),
      },
      RawTarget::Detailed(mut options) => {
        let kind = options
          .remove("type")
          .and_then(|v| v.as_str().map(|s| s.trim().to_string()))
          .unwrap_or_default();
        Self { kind, options }
      }
    }
  }
}

impl TargetSpec {
  fn option(&self, key: &str) -> Option<&str> {
    self
      .options
      .get(key)
      .and_then(Value::as_str)
      .map(str::trim)
      .filter(|s| !s.is_empty())
  }

  fn table(&self, input_uri: &str) -> Result<String, String> {
    let table = self
      .option("table")
      .map(String::from)
      .unwrap_or_else(|| stem_of(input_uri));
    check_name("table", &table).map_err(|e| e.message)?;
    Ok(table)
  }
}

/// Result of one target, as listed in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetOutcome {
  pub target: String,
  pub success: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub output_ref: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl TargetOutcome {
  fn from_result(target: &str, result: Result<String, String>) -> Self {
    match result {
      Ok(output_ref) => Self {
        target: target.to_string(),
        success: true,
        output_ref: Some(output_ref),
        error: None,
      },
      Err(error) => Self {
        target: target.to_string(),
        success: false,
        output_ref: None,
        error: Some(error),
      },
    }
  }
}

/// What every target routine may use.
pub struct PublishContext<'a> {
  pub run: &'a RunContext,
  pub input_uri: &'a str,
  pub artifacts: &'a Arc<dyn ArtifactStore>,
  pub http: &'a reqwest::Client,
}

/// Dispatches one target by type. Unknown types fail only that target.
#[instrument(level = "trace", skip(target, pc), fields(target = %target.kind))]
pub async fn publish_to(target: &TargetSpec, pc: &PublishContext<'_>) -> TargetOutcome {
  let result = match target.kind.as_str() {
    "catalog" => publish_catalog(target, pc).await,
    "superset" | "bi" => publish_superset(target, pc).await,
    "delta" => publish_delta(target, pc).await,
    "webhook" => publish_webhook(target, pc).await,
    "" => Err("target has no type".to_string()),
    other => Err(format!("unknown target type '{}'", other)),
  };
  debug!(ok = result.is_ok(), "target finished");
  TargetOutcome::from_result(&target.kind, result)
}

/// POSTs `body` and returns the decoded JSON response, if any. Non-2xx is an error.
async fn post_json(
  http: &reqwest::Client,
  url: &str,
  token: Option<&str>,
  body: &Value,
) -> Result<Option<Value>, String> {
  let mut request = http.post(url).json(body);
  if let Some(token) = token {
    request = request.bearer_auth(token);
  }
  let response = request
    .send()
    .await
    .map_err(|e| format!("request to {} failed: {}", url, e))?;
  let status = response.status();
  if !status.is_success() {
    return Err(format!("{} returned HTTP {}", url, status.as_u16()));
  }
  Ok(response.json::<Value>().await.ok())
}

async fn publish_catalog(target: &TargetSpec, pc: &PublishContext<'_>) -> Result<String, String> {
  let table = target.table(pc.input_uri)?;
  let entry = json!({
    "table": table,
    "uri": pc.input_uri,
    "format": "csv",
    "run_id": pc.run.run_id,
    "layer": target.option("layer"),
  });
  match target.option("endpoint") {
    Some(endpoint) => {
      post_json(pc.http, endpoint, target.option("token"), &entry).await?;
      Ok(endpoint.to_string())
    }
    None => {
      let uri = pc.run.output_uri(&format!("catalog/{}.json", table));
      let bytes = serde_json::to_vec_pretty(&entry).map_err(|e| e.to_string())?;
      pc.artifacts
        .write(&uri, Bytes::from(bytes))
        .await
        .map_err(|e| format!("writing catalog entry failed: {}", e))?;
      Ok(uri)
    }
  }
}

async fn publish_superset(target: &TargetSpec, pc: &PublishContext<'_>) -> Result<String, String> {
  let endpoint = target
    .option("endpoint")
    .ok_or_else(|| format!("{} target requires 'endpoint'", target.kind))?;
  let table = target.table(pc.input_uri)?;
  let url = format!("{}/api/v1/dataset/", endpoint.trim_end_matches('/'));
  let body = json!({
    "table_name": table,
    "database": target.options.get("database").cloned().unwrap_or(json!(1)),
    "schema": target.option("schema"),
    "external_url": pc.input_uri,
  });
  let response = post_json(pc.http, &url, target.option("token"), &body).await?;
  let id = response.as_ref().and_then(|r| r.get("id")).map(|id| match id {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  });
  Ok(match id {
    Some(id) => format!("{}{}", url, id),
    None => url,
  })
}

/// Formats the first 16 bytes of a sha256 as a UUID-shaped table id.
fn table_id(seed: &str) -> String {
  let h = sha256_hex(seed.as_bytes());
  format!(
    "{}-{}-{}-{}-{}",
    &h[0..8],
    &h[8..12],
    &h[12..16],
    &h[16..20],
    &h[20..32]
  )
}

/// Encodes every column as nullable UTF-8 Parquet with snappy compression.
pub fn dataset_to_parquet(data: &Dataset) -> crate::Result<Vec<u8>> {
  let fields: Vec<Field> = data
    .columns()
    .iter()
    .map(|c| Field::new(c, DataType::Utf8, true))
    .collect();
  let schema = Arc::new(Schema::new(fields));
  let arrays: Vec<ArrayRef> = (0..data.columns().len())
    .map(|idx| Arc::new(StringArray::from(data.column_values(idx).collect::<Vec<_>>())) as ArrayRef)
    .collect();
  let batch = RecordBatch::try_new(schema.clone(), arrays)?;
  let props = WriterProperties::builder()
    .set_compression(Compression::SNAPPY)
    .build();
  let mut writer = ArrowWriter::try_new(Vec::new(), schema, Some(props))?;
  writer.write(&batch)?;
  Ok(writer.into_inner()?)
}

fn delta_schema_string(data: &Dataset) -> String {
  let fields: Vec<Value> = data
    .columns()
    .iter()
    .map(|c| json!({"name": c, "type": "string", "nullable": true, "metadata": {}}))
    .collect();
  json!({"type": "struct", "fields": fields}).to_string()
}

async fn publish_delta(target: &TargetSpec, pc: &PublishContext<'_>) -> Result<String, String> {
  let table = target.table(pc.input_uri)?;
  let input = pc
    .artifacts
    .read(pc.input_uri)
    .await
    .map_err(|e| format!("cannot read input: {}", e))?;
  let data = Dataset::from_csv(&input).map_err(|e| format!("cannot parse input: {}", e))?;
  if data.columns().is_empty() {
    return Err("input has no columns".to_string());
  }
  let parquet = dataset_to_parquet(&data).map_err(|e| format!("parquet encoding failed: {}", e))?;

  let table_uri = pc.run.output_uri(&format!("delta/{}", table));
  let file_name = format!("part-00000-{}.snappy.parquet", &sha256_hex(&input)[..8]);
  let size = parquet.len();
  pc.artifacts
    .write(&format!("{}/{}", table_uri, file_name), Bytes::from(parquet))
    .await
    .map_err(|e| format!("writing data file failed: {}", e))?;

  let millis = pc.run.created_at.timestamp_millis();
  let actions = [
    json!({"protocol": {"minReaderVersion": 1, "minWriterVersion": 2}}),
    json!({"metaData": {
      "id": table_id(&format!("{}/{}", pc.run.run_id, table)),
      "name": table,
      "format": {"provider": "parquet", "options": {}},
      "schemaString": delta_schema_string(&data),
      "partitionColumns": [],
      "configuration": {},
      "createdTime": millis,
    }}),
    json!({"add": {
      "path": file_name,
      "partitionValues": {},
      "size": size,
      "modificationTime": millis,
      "dataChange": true,
    }}),
  ];
  let mut log = String::new();
  for action in &actions {
    log.push_str(&action.to_string());
    log.push('\n');
  }
  pc.artifacts
    .write(
      &format!("{}/_delta_log/{:020}.json", table_uri, 0),
      Bytes::from(log),
    )
    .await
    .map_err(|e| format!("writing delta log failed: {}", e))?;
  Ok(table_uri)
}

async fn publish_webhook(target: &TargetSpec, pc: &PublishContext<'_>) -> Result<String, String> {
  let url = target
    .option("url")
    .ok_or_else(|| "webhook target requires 'url'".to_string())?;
  let body = json!({
    "event": "lakehouse.publish",
    "run_id": pc.run.run_id,
    "input_uri": pc.input_uri,
    "payload": target.options.get("payload").cloned().unwrap_or(Value::Null),
  });
  post_json(pc.http, url, target.option("token"), &body).await?;
  Ok(url.to_string())
}
