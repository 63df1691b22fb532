//! Host collaborators: digest storage, vector metadata, device identity.
//!
//! The sync engine owns no persistence. The host application supplies these
//! traits; [`MemoryDigestStore`] is an in-process implementation used by
//! tests and small tools.

use async_trait::async_trait;
use std::collections::BTreeMap;
use sync_types::{DeviceInfo, Digest, VectorSpace};
use thiserror::Error;
use tokio::sync::RwLock;

/// Error reported by a [`DigestStore`].
#[derive(Debug, Error)]
#[error("storage error: {0}")]
pub struct StoreError(String);

impl StoreError {
    /// Create an error from any message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Persistent digest storage.
#[async_trait]
pub trait DigestStore: Send + Sync {
    /// Every stored digest.
    async fn list_all(&self) -> Result<Vec<Digest>, StoreError>;

    /// The digest for `url`, if any.
    async fn get_by_url(&self, url: &str) -> Result<Option<Digest>, StoreError>;

    /// Insert or replace a digest. Saving the same digest twice is a no-op.
    async fn save(&self, digest: Digest) -> Result<(), StoreError>;

    /// Insert or replace several digests at once.
    ///
    /// The merge pass calls this once per session. Stores with costly writes
    /// should override it to write everything in one go.
    async fn save_all(&self, digests: Vec<Digest>) -> Result<(), StoreError> {
        for digest in digests {
            self.save(digest).await?;
        }
        Ok(())
    }
}

/// Source of the local embedding space.
#[async_trait]
pub trait VectorMetadataProvider: Send + Sync {
    /// The embedding space the local digests were produced in.
    async fn vector_space(&self) -> VectorSpace;
}

/// Source of the local device description.
#[async_trait]
pub trait DeviceIdentityProvider: Send + Sync {
    /// Description of this device as sent in `key_exchange`.
    async fn device_info(&self) -> DeviceInfo;
}

#[async_trait]
impl VectorMetadataProvider for VectorSpace {
    async fn vector_space(&self) -> VectorSpace {
        self.clone()
    }
}

#[async_trait]
impl DeviceIdentityProvider for DeviceInfo {
    async fn device_info(&self) -> DeviceInfo {
        self.clone()
    }
}

/// In-memory digest store keyed by URL.
#[derive(Debug, Default)]
pub struct MemoryDigestStore {
    digests: RwLock<BTreeMap<String, Digest>>,
}

impl MemoryDigestStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-filled with `digests`.
    pub fn with_digests(digests: impl IntoIterator<Item = Digest>) -> Self {
        let map = digests.into_iter().map(|d| (d.url.clone(), d)).collect();
        Self {
            digests: RwLock::new(map),
        }
    }

    /// Number of stored digests.
    pub async fn len(&self) -> usize {
        self.digests.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.digests.read().await.is_empty()
    }
}

#[async_trait]
impl DigestStore for MemoryDigestStore {
    async fn list_all(&self) -> Result<Vec<Digest>, StoreError> {
        Ok(self.digests.read().await.values().cloned().collect())
    }

    async fn get_by_url(&self, url: &str) -> Result<Option<Digest>, StoreError> {
        Ok(self.digests.read().await.get(url).cloned())
    }

    async fn save(&self, digest: Digest) -> Result<(), StoreError> {
        self.digests.write().await.insert(digest.url.clone(), digest);
        Ok(())
    }

    async fn save_all(&self, digests: Vec<Digest>) -> Result<(), StoreError> {
        let mut stored = self.digests.write().await;
        stored.extend(digests.into_iter().map(|d| (d.url.clone(), d)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(url: &str) -> Digest {
        Digest::new(url, "example.com", 1_000)
    }

    #[tokio::test]
    async fn save_then_lookup_by_url() {
        let store = MemoryDigestStore::new();
        assert!(store.is_empty().await);

        store.save(digest("https://example.com/a")).await.unwrap();

        let found = store.get_by_url("https://example.com/a").await.unwrap();
        assert_eq!(found.unwrap().url, "https://example.com/a");
        assert!(store
            .get_by_url("https://example.com/b")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn save_is_an_upsert() {
        let store = MemoryDigestStore::new();
        let mut d = digest("https://example.com/a");
        store.save(d.clone()).await.unwrap();
        store.save(d.clone()).await.unwrap();
        assert_eq!(store.len().await, 1);

        d.visit_count = 7;
        store.save(d).await.unwrap();
        let found = store
            .get_by_url("https://example.com/a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.visit_count, 7);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn save_all_upserts_every_digest() {
        let store = MemoryDigestStore::with_digests([digest("https://example.com/a")]);
        let mut a = digest("https://example.com/a");
        a.visit_count = 3;
        store
            .save_all(vec![a, digest("https://example.com/b")])
            .await
            .unwrap();

        assert_eq!(store.len().await, 2);
        let found = store
            .get_by_url("https://example.com/a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.visit_count, 3);
    }

    /// Store that only implements the required methods.
    #[derive(Default)]
    struct SaveCounter {
        saves: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl DigestStore for SaveCounter {
        async fn list_all(&self) -> Result<Vec<Digest>, StoreError> {
            Ok(vec![])
        }

        async fn get_by_url(&self, _url: &str) -> Result<Option<Digest>, StoreError> {
            Ok(None)
        }

        async fn save(&self, _digest: Digest) -> Result<(), StoreError> {
            self.saves.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn default_save_all_saves_one_by_one() {
        let store = SaveCounter::default();
        store
            .save_all(vec![
                digest("https://example.com/a"),
                digest("https://example.com/b"),
            ])
            .await
            .unwrap();
        assert_eq!(store.saves.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn list_all_returns_everything() {
        let store = MemoryDigestStore::with_digests([
            digest("https://example.com/a"),
            digest("https://example.com/b"),
        ]);
        assert_eq!(store.list_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn plain_values_act_as_providers() {
        let space = VectorSpace::new("minilm", 384, "wasm");
        assert_eq!(space.vector_space().await.dimension, 384);
    }
}
