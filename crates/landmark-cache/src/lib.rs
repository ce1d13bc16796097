// Namespaced in-memory cache with TTL expiry and a bounded capacity.
use bytes::Bytes;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    // Hard cap applied independently to each namespace.
    pub max_entries_per_namespace: usize,
    // Time-to-live measured from the last write; `None` disables expiry.
    pub ttl: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries_per_namespace: 10_000,
            ttl: Some(Duration::from_secs(600)),
        }
    }
}

/// In-memory cache holding opaque byte values under `(namespace, key)`.
///
/// Entries expire lazily on read once their TTL has elapsed. When a namespace
/// exceeds its capacity, the least-recently-accessed entry is evicted
/// (approximate LRU via a per-namespace access counter).
///
/// ```
/// use bytes::Bytes;
/// use landmark_cache::{CacheConfig, TtlCache};
///
/// let cache = TtlCache::new(CacheConfig::default());
/// let rt = tokio::runtime::Runtime::new().expect("rt");
/// rt.block_on(async {
///     cache.put("landmarks", "k", Bytes::from_static(b"v")).await;
///     assert_eq!(
///         cache.get("landmarks", "k").await,
///         Some(Bytes::from_static(b"v"))
///     );
/// });
/// ```
#[derive(Debug)]
pub struct TtlCache {
    // RwLock allows concurrent readers while writes take exclusive access.
    inner: RwLock<HashMap<String, NamespaceState>>,
    config: CacheConfig,
}

#[derive(Debug, Default)]
struct NamespaceState {
    entries: HashMap<String, CacheEntry>,
    // Monotonic counter; every read/write stamps the touched entry.
    tick: u64,
}

#[derive(Debug)]
struct CacheEntry {
    value: Bytes,
    expires_at: Option<Instant>,
    last_access: u64,
}

impl NamespaceState {
    fn touch(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    // Drop least-recently-accessed entries until back under the cap.
    fn enforce_capacity(&mut self, max_entries: usize) {
        while self.entries.len() > max_entries {
            let coldest = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(key, _)| key.clone());
            match coldest {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }
}

impl TtlCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub async fn put(&self, namespace: &str, key: &str, value: Bytes) {
        // Compute expiry once so reads only compare Instants.
        let expires_at = self.config.ttl.map(|ttl| Instant::now() + ttl);
        let mut guard = self.inner.write().await;
        let state = guard.entry(namespace.to_string()).or_default();
        let last_access = state.touch();
        state.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at,
                last_access,
            },
        );
        state.enforce_capacity(self.config.max_entries_per_namespace);
    }

    pub async fn get(&self, namespace: &str, key: &str) -> Option<Bytes> {
        // Take a write lock so we can evict expired entries and bump access order.
        let mut guard = self.inner.write().await;
        let state = guard.get_mut(namespace)?;
        let expired = match state.entries.get(key) {
            Some(entry) => entry
                .expires_at
                .is_some_and(|deadline| Instant::now() >= deadline),
            None => return None,
        };
        if expired {
            // Lazy-expire on read to avoid a background sweeper.
            state.entries.remove(key);
            return None;
        }
        let tick = state.touch();
        let entry = state.entries.get_mut(key)?;
        entry.last_access = tick;
        Some(entry.value.clone())
    }

    pub async fn evict(&self, namespace: &str, key: &str) -> Option<Bytes> {
        let mut guard = self.inner.write().await;
        guard
            .get_mut(namespace)?
            .entries
            .remove(key)
            .map(|entry| entry.value)
    }

    pub async fn clear(&self, namespace: &str) {
        let mut guard = self.inner.write().await;
        if let Some(state) = guard.get_mut(namespace) {
            state.entries.clear();
        }
    }

    pub async fn len(&self, namespace: &str) -> usize {
        self.inner
            .read()
            .await
            .get(namespace)
            .map(|state| state.entries.len())
            .unwrap_or(0)
    }

    pub async fn is_empty(&self, namespace: &str) -> bool {
        self.len(namespace).await == 0
    }
}
