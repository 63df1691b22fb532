//! Digest store backed by a JSON file.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use sync_client::{DigestStore, StoreError};
use sync_types::Digest;
use tokio::sync::RwLock;

use crate::config::set_file_permissions_0600;

/// Digest file inside the data directory.
pub const DIGESTS_FILE: &str = "digests.json";

/// All digests in one pretty-printed JSON array.
///
/// The file is rewritten on every write; the in-memory map only changes once
/// the new file is in place.
#[derive(Debug)]
pub struct JsonDigestStore {
    path: PathBuf,
    digests: RwLock<BTreeMap<String, Digest>>,
}

impl JsonDigestStore {
    /// Open the store in `data_dir`. A missing file is an empty store.
    pub async fn open(data_dir: &Path) -> Result<Self, StoreError> {
        let path = data_dir.join(DIGESTS_FILE);
        let digests = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let list: Vec<Digest> = serde_json::from_str(&contents).map_err(|e| {
                    StoreError::new(format!("invalid {}: {}", path.display(), e))
                })?;
                list.into_iter().map(|d| (d.url.clone(), d)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(StoreError::new(format!(
                    "read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        Ok(Self {
            path,
            digests: RwLock::new(digests),
        })
    }

    /// Number of stored digests.
    pub async fn len(&self) -> usize {
        self.digests.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.digests.read().await.is_empty()
    }

    async fn persist(&self, digests: &BTreeMap<String, Digest>) -> Result<(), StoreError> {
        let list: Vec<&Digest> = digests.values().collect();
        let contents = serde_json::to_string_pretty(&list)
            .map_err(|e| StoreError::new(format!("encode digests: {}", e)))?;

        // Write then rename so a crash never leaves a truncated file.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, contents)
            .await
            .map_err(|e| StoreError::new(format!("write {}: {}", tmp.display(), e)))?;
        set_file_permissions_0600(&tmp)
            .await
            .map_err(|e| StoreError::new(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StoreError::new(format!("replace {}: {}", self.path.display(), e)))
    }
}

#[async_trait]
impl DigestStore for JsonDigestStore {
    async fn list_all(&self) -> Result<Vec<Digest>, StoreError> {
        Ok(self.digests.read().await.values().cloned().collect())
    }

    async fn get_by_url(&self, url: &str) -> Result<Option<Digest>, StoreError> {
        Ok(self.digests.read().await.get(url).cloned())
    }

    async fn save(&self, digest: Digest) -> Result<(), StoreError> {
        self.save_all(vec![digest]).await
    }

    async fn save_all(&self, digests: Vec<Digest>) -> Result<(), StoreError> {
        let mut stored = self.digests.write().await;
        let mut updated = stored.clone();
        updated.extend(digests.into_iter().map(|d| (d.url.clone(), d)));
        self.persist(&updated).await?;
        *stored = updated;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = JsonDigestStore::open(dir.path()).await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn saved_digests_survive_reopen() {
        let dir = tempdir().unwrap();
        let store = JsonDigestStore::open(dir.path()).await.unwrap();
        let mut digest = Digest::new("https://example.com/a", "example.com", 1_000);
        digest.vector = Some(vec![0, 0, 128, 63]);
        store.save(digest.clone()).await.unwrap();

        let reopened = JsonDigestStore::open(dir.path()).await.unwrap();
        let loaded = reopened
            .get_by_url("https://example.com/a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded, digest);
        assert!(!dir.path().join("digests.json.tmp").exists());
    }

    #[tokio::test]
    async fn save_is_an_upsert() {
        let dir = tempdir().unwrap();
        let store = JsonDigestStore::open(dir.path()).await.unwrap();
        let mut digest = Digest::new("https://example.com/a", "example.com", 1_000);
        store.save(digest.clone()).await.unwrap();
        digest.relevance_score = 0.9;
        store.save(digest).await.unwrap();

        assert_eq!(store.len().await, 1);
        let all = store.list_all().await.unwrap();
        assert_eq!(all[0].relevance_score, 0.9);
    }

    #[tokio::test]
    async fn save_all_writes_every_digest() {
        let dir = tempdir().unwrap();
        let store = JsonDigestStore::open(dir.path()).await.unwrap();
        store
            .save_all(vec![
                Digest::new("https://example.com/a", "example.com", 1_000),
                Digest::new("https://example.com/b", "example.com", 1_000),
            ])
            .await
            .unwrap();

        let reopened = JsonDigestStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.len().await, 2);
    }

    #[tokio::test]
    async fn failed_write_leaves_store_unchanged() {
        let dir = tempdir().unwrap();
        let store = JsonDigestStore::open(dir.path()).await.unwrap();
        store
            .save(Digest::new("https://example.com/a", "example.com", 1_000))
            .await
            .unwrap();

        // A directory where the temp file should go makes the write fail.
        std::fs::create_dir(dir.path().join("digests.json.tmp")).unwrap();
        let result = store
            .save(Digest::new("https://example.com/b", "example.com", 1_000))
            .await;

        assert!(result.is_err());
        assert_eq!(store.len().await, 1);
        assert!(store
            .get_by_url("https://example.com/b")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn corrupt_file_is_a_storage_error() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(DIGESTS_FILE), "{not json").unwrap();

        let err = JsonDigestStore::open(dir.path()).await.unwrap_err();
        assert!(err.to_string().contains("invalid"));
    }
}
