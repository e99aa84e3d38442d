//! Publish: fans an input dataset out to catalog, BI, table-format and webhook targets.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument, warn};

use super::PhaseHandler;
use super::config::{
  ConfigError, check_input, config_digest, parse_config, required, resolve_input,
};
use super::publish_targets::{PublishContext, RawTarget, TargetOutcome, TargetSpec, publish_to};
use crate::artifact_store::ArtifactStore;
use crate::callbacks::PhaseCallbacks;
use crate::error::Result;
use crate::types::{
  ArtifactKind, ArtifactMeta, ErrorCode, EventLevel, NewArtifact, PhaseDescriptor, PhaseResult,
  RunContext, event_data,
};

#[derive(Debug, Default, Deserialize)]
struct RawPublishConfig {
  input_uri: Option<String>,
  #[serde(default)]
  targets: Vec<RawTarget>,
}

/// What a publish phase was asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum PublishPlan {
  /// No targets: publishing is optional, so this is a warning rather than a failure.
  NoTargets,
  Targets {
    input_uri: String,
    targets: Vec<TargetSpec>,
  },
}

impl PublishPlan {
  pub fn from_phase(phase: &PhaseDescriptor) -> std::result::Result<Self, ConfigError> {
    let raw: RawPublishConfig = parse_config(phase)?;
    if raw.targets.is_empty() {
      return Ok(PublishPlan::NoTargets);
    }
    let input_uri = required(raw.input_uri.as_deref(), "input_uri", ErrorCode::MissingInput)?;
    Ok(PublishPlan::Targets {
      input_uri,
      targets: raw.targets.into_iter().map(TargetSpec::from).collect(),
    })
  }
}

/// Outcome of every target of one publish phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishManifest {
  pub input_uri: String,
  pub succeeded: usize,
  pub failed: usize,
  pub targets: Vec<TargetOutcome>,
}

/// Publishes to every configured target, then writes a manifest of the outcomes.
pub struct PublishHandler {
  artifacts: Arc<dyn ArtifactStore>,
  http: reqwest::Client,
}

impl PublishHandler {
  pub fn new(artifacts: Arc<dyn ArtifactStore>, http: reqwest::Client) -> Self {
    Self { artifacts, http }
  }
}

#[async_trait]
impl PhaseHandler for PublishHandler {
  fn name(&self) -> &str {
    "publish"
  }

  #[instrument(level = "trace", skip(self, ctx, phase, callbacks), fields(run_id = %ctx.run_id))]
  async fn execute(
    &self,
    ctx: &RunContext,
    phase: &PhaseDescriptor,
    callbacks: &dyn PhaseCallbacks,
  ) -> Result<PhaseResult> {
    callbacks.heartbeat().await?;
    let (input_uri, targets) = match PublishPlan::from_phase(phase) {
      Ok(PublishPlan::Targets { input_uri, targets }) => (resolve_input(ctx, &input_uri), targets),
      Ok(PublishPlan::NoTargets) => {
        callbacks
          .emit_event(
            EventLevel::Warn,
            "no publish targets configured; skipping publish",
            Default::default(),
          )
          .await?;
        return Ok(PhaseResult::success());
      }
      Err(e) => return Ok(e.into()),
    };
    if let Some(failed) = check_input(self.artifacts.as_ref(), &input_uri).await? {
      return Ok(failed);
    }

    let pc = PublishContext {
      run: ctx,
      input_uri: &input_uri,
      artifacts: &self.artifacts,
      http: &self.http,
    };
    let mut outcomes = Vec::with_capacity(targets.len());
    for target in &targets {
      callbacks.heartbeat().await?;
      let outcome = publish_to(target, &pc).await;
      if outcome.success {
        callbacks
          .emit_event(
            EventLevel::Info,
            &format!("published to {}", outcome.target),
            event_data(json!({"target": outcome.target, "output_ref": outcome.output_ref})),
          )
          .await?;
      } else {
        warn!(target = %outcome.target, error = ?outcome.error, "publish target failed");
        callbacks
          .emit_event(
            EventLevel::Warn,
            &format!("publish target {} failed", outcome.target),
            event_data(json!({"target": outcome.target, "error": outcome.error})),
          )
          .await?;
      }
      outcomes.push(outcome);
    }

    let failed = outcomes.iter().filter(|o| !o.success).count();
    let manifest = PublishManifest {
      input_uri: input_uri.clone(),
      succeeded: outcomes.len() - failed,
      failed,
      targets: outcomes,
    };
    let manifest_uri = ctx.output_uri(&format!(
      "manifests/publish_{}.json",
      config_digest(&input_uri, phase)
    ));
    let stored = self
      .artifacts
      .write(&manifest_uri, Bytes::from(serde_json::to_vec_pretty(&manifest)?))
      .await?;
    let mut meta = ArtifactMeta::new();
    meta.insert("input_uri".to_string(), json!(input_uri));
    meta.insert("targets".to_string(), json!(manifest.targets.len()));
    meta.insert("failed".to_string(), json!(failed));
    let artifact = callbacks
      .register_artifact(
        NewArtifact::new(ArtifactKind::Manifest, stored.uri)
          .with_content(stored.sha256, stored.size_bytes)
          .with_meta(meta),
      )
      .await?;

    info!(targets = manifest.targets.len(), failed, "publish complete");
    if failed > 0 && phase.fail_on_error {
      return Ok(
        PhaseResult::failure(
          ErrorCode::PublishFailed,
          format!("{} of {} publish targets failed", failed, manifest.targets.len()),
        )
        .with_artifact(artifact),
      );
    }
    Ok(PhaseResult::success().with_artifact(artifact))
  }
}
