//! Filesystem-backed, content-addressed payload store.
//!
//! Large request/response bodies are not inlined into `calls.request_ref`
//! columns; they are written once under a SHA-256 digest of their
//! canonical bytes and referenced by that digest everywhere else. Writing
//! the same bytes twice is a no-op: the path already exists.

use crate::error::{Error, Result};
use elspeth_core::ids::PayloadRef;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tokio::fs;

/// A directory tree of content-addressed blobs, split into two-character
/// fanout directories so no single directory holds every blob.
#[derive(Debug, Clone)]
pub struct FilesystemPayloadStore {
    root: PathBuf,
}

impl FilesystemPayloadStore {
    /// Open (creating if absent) a payload store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn path_for(&self, digest_hex: &str) -> PathBuf {
        let (prefix, rest) = digest_hex.split_at(2.min(digest_hex.len()));
        self.root.join(prefix).join(rest)
    }

    /// Store `bytes`, returning its content-addressed reference.
    pub async fn put(&self, bytes: &[u8]) -> Result<PayloadRef> {
        let digest = Sha256::digest(bytes);
        let digest_hex = hex::encode(digest);
        let path = self.path_for(&digest_hex);

        if !fs::try_exists(&path).await? {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }
            let tmp_path = path.with_extension("tmp");
            fs::write(&tmp_path, bytes).await?;
            fs::rename(&tmp_path, &path).await?;
        }

        Ok(PayloadRef::from_known(format!("sha256:{digest_hex}")))
    }

    /// Fetch the bytes behind a reference, if present.
    pub async fn get(&self, payload_ref: &PayloadRef) -> Result<Option<Vec<u8>>> {
        let path = self.path_from_ref(payload_ref)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Whether a reference's blob is present.
    pub async fn exists(&self, payload_ref: &PayloadRef) -> Result<bool> {
        let path = self.path_from_ref(payload_ref)?;
        Ok(fs::try_exists(&path).await?)
    }

    fn path_from_ref(&self, payload_ref: &PayloadRef) -> Result<PathBuf> {
        let digest_hex = payload_ref
            .as_str()
            .strip_prefix("sha256:")
            .ok_or_else(|| Error::NotFound {
                kind: "payload_ref",
                id: payload_ref.to_string(),
            })?;
        Ok(self.path_for(digest_hex))
    }
}

#[async_trait::async_trait]
impl elspeth_core::plugin::PayloadStore for FilesystemPayloadStore {
    async fn put(&self, value: &serde_json::Value) -> elspeth_core::Result<String> {
        let bytes = elspeth_hash::canonical_json(value)?;
        let payload_ref = FilesystemPayloadStore::put(self, bytes.as_bytes())
            .await
            .map_err(|e| elspeth_core::Error::Other(e.to_string()))?;
        Ok(payload_ref.to_string())
    }

    async fn get(&self, reference: &str) -> elspeth_core::Result<Option<serde_json::Value>> {
        let payload_ref = PayloadRef::from_known(reference.to_string());
        let bytes = FilesystemPayloadStore::get(self, &payload_ref)
            .await
            .map_err(|e| elspeth_core::Error::Other(e.to_string()))?;
        bytes
            .map(|bytes| serde_json::from_slice(&bytes))
            .transpose()
            .map_err(elspeth_core::Error::from)
    }

    async fn exists(&self, reference: &str) -> elspeth_core::Result<bool> {
        let payload_ref = PayloadRef::from_known(reference.to_string());
        FilesystemPayloadStore::exists(self, &payload_ref)
            .await
            .map_err(|e| elspeth_core::Error::Other(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemPayloadStore::open(dir.path()).await.unwrap();
        let payload_ref = store.put(b"hello world").await.unwrap();
        assert!(payload_ref.as_str().starts_with("sha256:"));

        let fetched = store.get(&payload_ref).await.unwrap().unwrap();
        assert_eq!(fetched, b"hello world");
    }

    #[tokio::test]
    async fn identical_bytes_produce_the_same_reference() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemPayloadStore::open(dir.path()).await.unwrap();
        let a = store.put(b"same bytes").await.unwrap();
        let b = store.put(b"same bytes").await.unwrap();
        assert_eq!(a.as_str(), b.as_str());
    }

    #[tokio::test]
    async fn missing_reference_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemPayloadStore::open(dir.path()).await.unwrap();
        let fake = PayloadRef::from_known("sha256:0000000000000000000000000000000000000000000000000000000000000000".to_string());
        assert!(store.get(&fake).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn exists_reflects_store_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemPayloadStore::open(dir.path()).await.unwrap();
        let payload_ref = store.put(b"tracked").await.unwrap();
        assert!(store.exists(&payload_ref).await.unwrap());
    }
}
