//! Artifact sink: write bytes at a URI, read them back later.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use crate::error::{Error, Result};

/// What a successful write produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
  pub uri: String,
  /// Hex-encoded sha256 of the written bytes.
  pub sha256: String,
  pub size_bytes: u64,
}

/// Hex-encoded sha256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
  hex::encode(Sha256::digest(bytes))
}

/// First 8 hex chars of the sha256 of `text`, used for deterministic file names.
pub fn short_hash(text: &str) -> String {
  let mut digest = sha256_hex(text.as_bytes());
  digest.truncate(8);
  digest
}

/// Object store addressable by URI under a run's `artifact_base_uri`.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
  /// Writes `bytes` at `uri`, replacing any previous object.
  async fn write(&self, uri: &str, bytes: Bytes) -> Result<StoredObject>;

  async fn read(&self, uri: &str) -> Result<Bytes>;

  async fn exists(&self, uri: &str) -> Result<bool>;
}

/// Filesystem-backed store for `file://` URIs and plain paths.
#[derive(Debug, Clone, Default)]
pub struct LocalArtifactStore;

impl LocalArtifactStore {
  pub fn new() -> Self {
    Self
  }

  /// Maps a URI to a local path. Other schemes are rejected.
  pub fn path_for(uri: &str) -> Result<PathBuf> {
    let trimmed = uri.trim();
    if trimmed.is_empty() {
      return Err(Error::InvalidUri {
        uri: uri.to_string(),
        reason: "empty".to_string(),
      });
    }
    if let Some(rest) = trimmed.strip_prefix("file://") {
      return Ok(PathBuf::from(rest));
    }
    if let Some((scheme, _)) = trimmed.split_once("://") {
      return Err(Error::InvalidUri {
        uri: uri.to_string(),
        reason: format!("unsupported scheme {}", scheme),
      });
    }
    Ok(PathBuf::from(trimmed))
  }
}

fn temp_path(path: &Path) -> PathBuf {
  let name = path
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_default();
  path.with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple()))
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
  #[instrument(level = "trace", skip(self, bytes), fields(size = bytes.len()))]
  async fn write(&self, uri: &str, bytes: Bytes) -> Result<StoredObject> {
    let path = Self::path_for(uri)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
      tokio::fs::create_dir_all(parent).await?;
    }
    // Rename over the target so readers never observe a partial object.
    let tmp = temp_path(&path);
    tokio::fs::write(&tmp, &bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, &path).await {
      if let Err(cleanup) = tokio::fs::remove_file(&tmp).await {
        debug!(path = %tmp.display(), error = %cleanup, "temp file cleanup failed");
      }
      return Err(e.into());
    }
    let stored = StoredObject {
      uri: uri.to_string(),
      sha256: sha256_hex(&bytes),
      size_bytes: bytes.len() as u64,
    };
    debug!(uri = %stored.uri, sha256 = %stored.sha256, "artifact written");
    Ok(stored)
  }

  #[instrument(level = "trace", skip(self))]
  async fn read(&self, uri: &str) -> Result<Bytes> {
    let path = Self::path_for(uri)?;
    Ok(Bytes::from(tokio::fs::read(&path).await?))
  }

  async fn exists(&self, uri: &str) -> Result<bool> {
    let path = Self::path_for(uri)?;
    Ok(tokio::fs::try_exists(&path).await?)
  }
}
