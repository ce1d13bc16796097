//! Typed wrapper over the hot cache.
//!
//! Two namespaces share one [`TtlCache`], both keyed by the canonical key's
//! string form: `landmarks` holds materialized projection lists, `requests`
//! holds request-record snapshots. Values are JSON-encoded; any encode or
//! decode trouble degrades to a miss/no-op with a `warn!`; the cache is never
//! allowed to fail an operation, only to slow one down.
use crate::model::{CanonicalKey, LandmarkView, RequestRecord};
use bytes::Bytes;
use landmark_cache::{CacheConfig, TtlCache};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::warn;

pub const LANDMARKS_NAMESPACE: &str = "landmarks";
pub const REQUESTS_NAMESPACE: &str = "requests";

#[derive(Debug, Clone)]
pub struct LandmarkCaches {
    inner: Arc<TtlCache>,
}

impl LandmarkCaches {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(TtlCache::new(config)),
        }
    }

    pub async fn landmarks(&self, key: &CanonicalKey) -> Option<Vec<LandmarkView>> {
        self.read(LANDMARKS_NAMESPACE, key).await
    }

    pub async fn put_landmarks(&self, key: &CanonicalKey, views: &[LandmarkView]) {
        self.write(LANDMARKS_NAMESPACE, key, &views).await;
    }

    pub async fn request(&self, key: &CanonicalKey) -> Option<RequestRecord> {
        self.read(REQUESTS_NAMESPACE, key).await
    }

    pub async fn put_request(&self, key: &CanonicalKey, record: &RequestRecord) {
        self.write(REQUESTS_NAMESPACE, key, record).await;
    }

    pub async fn evict_landmarks(&self, key: &CanonicalKey) {
        self.inner
            .evict(LANDMARKS_NAMESPACE, &key.storage_key())
            .await;
    }

    pub async fn evict_request(&self, key: &CanonicalKey) {
        self.inner
            .evict(REQUESTS_NAMESPACE, &key.storage_key())
            .await;
    }

    /// Drop both namespaces for a key; used by the refresh protocol.
    pub async fn evict_all(&self, key: &CanonicalKey) {
        self.evict_landmarks(key).await;
        self.evict_request(key).await;
    }

    async fn read<T: DeserializeOwned>(&self, namespace: &str, key: &CanonicalKey) -> Option<T> {
        let storage_key = key.storage_key();
        let bytes = self.inner.get(namespace, &storage_key).await?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(err) => {
                // Undecodable entries are poison; drop them and treat as a miss.
                warn!(namespace, key = %storage_key, error = %err, "evicting undecodable cache entry");
                self.inner.evict(namespace, &storage_key).await;
                None
            }
        }
    }

    async fn write<T: Serialize>(&self, namespace: &str, key: &CanonicalKey, value: &T) {
        let storage_key = key.storage_key();
        match serde_json::to_vec(value) {
            Ok(encoded) => {
                self.inner
                    .put(namespace, &storage_key, Bytes::from(encoded))
                    .await;
            }
            Err(err) => {
                warn!(namespace, key = %storage_key, error = %err, "failed to encode cache entry; skipping write");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RequestStatus, canonicalize};
    use chrono::Utc;

    fn caches() -> LandmarkCaches {
        LandmarkCaches::new(CacheConfig {
            max_entries_per_namespace: 16,
            ttl: None,
        })
    }

    fn key() -> CanonicalKey {
        canonicalize(48.8584, 2.2945, 500).expect("canonical")
    }

    #[tokio::test]
    async fn request_snapshots_round_trip() {
        let caches = caches();
        let record = RequestRecord::new_pending(&key(), Utc::now());
        caches.put_request(&key(), &record).await;
        let cached = caches.request(&key()).await.expect("snapshot");
        assert_eq!(cached.id, record.id);
        assert_eq!(cached.status, RequestStatus::Pending);
    }

    #[tokio::test]
    async fn namespaces_do_not_collide() {
        let caches = caches();
        let record = RequestRecord::new_pending(&key(), Utc::now());
        caches.put_request(&key(), &record).await;
        // Same storage key, different namespace: no landmarks entry exists.
        assert!(caches.landmarks(&key()).await.is_none());
    }

    #[tokio::test]
    async fn undecodable_entries_degrade_to_miss() {
        let caches = caches();
        caches
            .inner
            .put(
                LANDMARKS_NAMESPACE,
                &key().storage_key(),
                Bytes::from_static(b"{not json"),
            )
            .await;
        assert!(caches.landmarks(&key()).await.is_none());
        // The poison entry was evicted outright.
        assert_eq!(caches.inner.len(LANDMARKS_NAMESPACE).await, 0);
    }

    #[tokio::test]
    async fn evict_all_clears_both_namespaces() {
        let caches = caches();
        let record = RequestRecord::new_pending(&key(), Utc::now());
        caches.put_request(&key(), &record).await;
        caches.put_landmarks(&key(), &[]).await;
        caches.evict_all(&key()).await;
        assert!(caches.request(&key()).await.is_none());
        assert!(caches.landmarks(&key()).await.is_none());
    }
}
