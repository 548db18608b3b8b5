//! TTL cache in front of [`Store::resolve_model`].
//!
//! Positive and negative results are cached identically so a missing model
//! cannot storm the store while an operator is still configuring it.
//! Entries are immutable once inserted; `invalidate` swaps the whole map
//! and is called by the management surface after any mutation.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::{Duration, Instant},
};

use store::{ResolvedModel, Store};

use crate::error::{GatewayError, Result};

struct CachedResolution {
    resolved: Option<ResolvedModel>,
    expires_at: Instant,
}

/// Read-mostly model-name → upstream resolution cache.
pub struct ResolutionCache {
    store: Arc<dyn Store>,
    ttl: Duration,
    entries: RwLock<HashMap<String, CachedResolution>>,
}

impl ResolutionCache {
    /// Create a cache over the given store with one TTL for hits and
    /// misses alike.
    pub fn new(store: Arc<dyn Store>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve a model name, consulting the store only when the cached
    /// entry is absent or expired. Concurrent misses may each hit the
    /// store; the extra lookups are harmless and last writer wins.
    pub async fn resolve(&self, model: &str) -> Result<Option<ResolvedModel>> {
        if let Ok(entries) = self.entries.read()
            && let Some(entry) = entries.get(model)
            && entry.expires_at > Instant::now()
        {
            return Ok(entry.resolved.clone());
        }

        let resolved = self
            .store
            .resolve_model(model)
            .await
            .map_err(|e| GatewayError::Internal(format!("model resolution failed: {e}")))?;

        if let Ok(mut entries) = self.entries.write() {
            entries.insert(
                model.to_string(),
                CachedResolution {
                    resolved: resolved.clone(),
                    expires_at: Instant::now() + self.ttl,
                },
            );
        }

        Ok(resolved)
    }

    /// Drop every entry by swapping the backing map.
    pub fn invalidate(&self) {
        if let Ok(mut entries) = self.entries.write() {
            *entries = HashMap::new();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use secrecy::SecretString;
    use store::{
        Dialect, LlmKeyRecord, LogEntry, ManagementKeyRecord, ModelRecord, StoreError,
    };

    use super::*;

    struct CountingStore {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Store for CountingStore {
        async fn resolve_model(&self, name: &str) -> std::result::Result<Option<ResolvedModel>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            if name == "known" {
                Ok(Some(ResolvedModel {
                    model: ModelRecord {
                        id: 1,
                        name: name.to_string(),
                        display_name: None,
                        provider: "openai".to_string(),
                        upstream_ref: Some(1),
                        input_cost_per_million: 1.0,
                        output_cost_per_million: 1.0,
                        active: true,
                    },
                    upstream_id: 1,
                    base_url: "http://upstream".to_string(),
                    credential: SecretString::from("k"),
                    dialect: Dialect::Openai,
                }))
            } else {
                Ok(None)
            }
        }

        async fn insert_log_batch(&self, _: &[LogEntry]) -> std::result::Result<(), StoreError> {
            Ok(())
        }

        async fn batch_update_llm_key_last_used(&self, _: &[i64]) -> std::result::Result<(), StoreError> {
            Ok(())
        }

        async fn get_llm_key_by_hash(&self, _: &str) -> std::result::Result<Option<LlmKeyRecord>, StoreError> {
            Ok(None)
        }

        async fn get_management_key_by_hash(
            &self,
            _: &str,
        ) -> std::result::Result<Option<ManagementKeyRecord>, StoreError> {
            Ok(None)
        }
    }

    fn cache(ttl: Duration) -> (ResolutionCache, Arc<CountingStore>) {
        let store = Arc::new(CountingStore {
            calls: AtomicUsize::new(0),
        });
        (ResolutionCache::new(store.clone(), ttl), store)
    }

    #[tokio::test]
    async fn entries_are_served_from_cache_within_ttl() {
        let (cache, store) = cache(Duration::from_secs(60));

        assert!(cache.resolve("known").await.unwrap().is_some());
        assert!(cache.resolve("known").await.unwrap().is_some());
        assert!(cache.resolve("known").await.unwrap().is_some());

        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_entries_hit_the_store_again() {
        let (cache, store) = cache(Duration::from_millis(20));

        assert!(cache.resolve("known").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.resolve("known").await.unwrap().is_some());

        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn negative_results_are_cached_identically() {
        let (cache, store) = cache(Duration::from_secs(60));

        assert!(cache.resolve("missing").await.unwrap().is_none());
        assert!(cache.resolve("missing").await.unwrap().is_none());

        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_clears_everything() {
        let (cache, store) = cache(Duration::from_secs(60));

        assert!(cache.resolve("known").await.unwrap().is_some());
        assert!(cache.resolve("missing").await.unwrap().is_none());
        cache.invalidate();
        assert!(cache.resolve("known").await.unwrap().is_some());
        assert!(cache.resolve("missing").await.unwrap().is_none());

        assert_eq!(store.calls.load(Ordering::SeqCst), 4);
    }
}
