//! Tests for `artifact_store`.

use bytes::Bytes;

use crate::artifact_store::{ArtifactStore, LocalArtifactStore, sha256_hex, short_hash};

#[tokio::test]
async fn write_then_read_with_hash() {
  let dir = tempfile::tempdir().unwrap();
  let uri = format!("file://{}/silver/out.csv", dir.path().display());
  let store = LocalArtifactStore::new();
  let stored = store.write(&uri, Bytes::from_static(b"a,b\n1,2\n")).await.unwrap();
  assert_eq!(stored.uri, uri);
  assert_eq!(stored.size_bytes, 8);
  assert_eq!(stored.sha256, sha256_hex(b"a,b\n1,2\n"));
  assert!(store.exists(&uri).await.unwrap());
  assert_eq!(store.read(&uri).await.unwrap(), Bytes::from_static(b"a,b\n1,2\n"));
}

#[tokio::test]
async fn overwrite_is_idempotent_and_leaves_no_temp_files() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("x.json");
  let uri = path.display().to_string();
  let store = LocalArtifactStore::new();
  let first = store.write(&uri, Bytes::from_static(b"{}")).await.unwrap();
  let second = store.write(&uri, Bytes::from_static(b"{}")).await.unwrap();
  assert_eq!(first, second);
  let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
  assert_eq!(entries.len(), 1);
}

#[tokio::test]
async fn missing_object_and_bad_scheme() {
  let dir = tempfile::tempdir().unwrap();
  let store = LocalArtifactStore::new();
  let missing = dir.path().join("nope.csv").display().to_string();
  assert!(!store.exists(&missing).await.unwrap());
  assert!(store.read(&missing).await.is_err());
  let err = store
    .write("s3://bucket/key", Bytes::from_static(b"x"))
    .await
    .unwrap_err();
  assert!(matches!(err, crate::Error::InvalidUri { .. }));
}

#[tokio::test]
async fn failed_rename_removes_the_temp_file() {
  let dir = tempfile::tempdir().unwrap();
  let target = dir.path().join("gold");
  std::fs::create_dir_all(target.join("occupied")).unwrap();
  let store = LocalArtifactStore::new();
  let uri = target.display().to_string();
  assert!(store.write(&uri, Bytes::from_static(b"x\n")).await.is_err());
  let leftovers: Vec<_> = std::fs::read_dir(dir.path())
    .unwrap()
    .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
    .collect();
  assert_eq!(leftovers, vec!["gold".to_string()]);
}

#[test]
fn known_hashes() {
  assert_eq!(
    sha256_hex(b""),
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
  );
  assert_eq!(short_hash(""), "e3b0c442");
  assert_eq!(short_hash("select 1").len(), 8);
}
