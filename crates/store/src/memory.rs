//! In-memory [`Store`] implementation.
//!
//! Seeded from configuration at startup, this backs single-node deployments
//! without a management plane and doubles as the test store. Log batches are
//! retained in memory so tests can assert on what the gateway recorded.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    Dialect, LlmKeyRecord, LogEntry, ManagementKeyRecord, ModelRecord, ResolvedModel, Store, StoreError,
    UpstreamRecord,
};

/// Pricing update produced by the pricing sync job.
#[derive(Debug, Clone, PartialEq)]
pub struct PricingUpdate {
    /// Model name the update applies to.
    pub model: String,
    /// New cost per million input tokens.
    pub input_cost_per_million: f64,
    /// New cost per million output tokens.
    pub output_cost_per_million: f64,
}

#[derive(Default)]
struct Inner {
    models: HashMap<String, ModelRecord>,
    upstreams: HashMap<i64, UpstreamRecord>,
    llm_keys: HashMap<String, LlmKeyRecord>,
    management_keys: HashMap<String, ManagementKeyRecord>,
    logs: Vec<LogEntry>,
}

/// Config-seeded in-memory store.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a model record, keyed by name.
    pub async fn upsert_model(&self, model: ModelRecord) {
        self.inner.write().await.models.insert(model.name.clone(), model);
    }

    /// Insert or replace an upstream record, keyed by id.
    pub async fn upsert_upstream(&self, upstream: UpstreamRecord) {
        self.inner.write().await.upstreams.insert(upstream.id, upstream);
    }

    /// Insert or replace an LLM key record, keyed by hash.
    pub async fn upsert_llm_key(&self, key: LlmKeyRecord) {
        self.inner.write().await.llm_keys.insert(key.key_hash.clone(), key);
    }

    /// Insert or replace a management key record, keyed by hash.
    pub async fn upsert_management_key(&self, key: ManagementKeyRecord) {
        self.inner
            .write()
            .await
            .management_keys
            .insert(key.key_hash.clone(), key);
    }

    /// Apply pricing updates to known models. Unknown model names are
    /// ignored; returns how many records changed.
    pub async fn apply_pricing(&self, updates: &[PricingUpdate]) -> usize {
        let mut inner = self.inner.write().await;
        let mut applied = 0;

        for update in updates {
            if let Some(model) = inner.models.get_mut(&update.model) {
                model.input_cost_per_million = update.input_cost_per_million;
                model.output_cost_per_million = update.output_cost_per_million;
                applied += 1;
            }
        }

        applied
    }

    /// Snapshot of all ingested log entries, oldest first.
    pub async fn logs(&self) -> Vec<LogEntry> {
        self.inner.read().await.logs.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn resolve_model(&self, name: &str) -> Result<Option<ResolvedModel>, StoreError> {
        let inner = self.inner.read().await;

        let Some(model) = inner.models.get(name).filter(|m| m.active) else {
            return Ok(None);
        };

        let upstream = match model.upstream_ref {
            Some(id) => inner.upstreams.get(&id).filter(|u| u.active),
            // No explicit link: pick the active upstream whose name matches
            // the model's provider, highest priority first.
            None => inner
                .upstreams
                .values()
                .filter(|u| u.active && u.name == model.provider)
                .max_by_key(|u| u.priority),
        };

        let Some(upstream) = upstream else {
            return Ok(None);
        };

        Ok(Some(ResolvedModel {
            model: model.clone(),
            upstream_id: upstream.id,
            base_url: upstream.base_url.clone(),
            credential: upstream.credential.clone(),
            dialect: upstream.dialect,
        }))
    }

    async fn insert_log_batch(&self, entries: &[LogEntry]) -> Result<(), StoreError> {
        self.inner.write().await.logs.extend_from_slice(entries);
        Ok(())
    }

    async fn batch_update_llm_key_last_used(&self, ids: &[i64]) -> Result<(), StoreError> {
        let now = jiff::Timestamp::now();
        let mut inner = self.inner.write().await;

        for key in inner.llm_keys.values_mut() {
            if ids.contains(&key.id) {
                key.last_used_at = Some(now);
            }
        }

        Ok(())
    }

    async fn get_llm_key_by_hash(&self, hash: &str) -> Result<Option<LlmKeyRecord>, StoreError> {
        Ok(self.inner.read().await.llm_keys.get(hash).cloned())
    }

    async fn get_management_key_by_hash(&self, hash: &str) -> Result<Option<ManagementKeyRecord>, StoreError> {
        Ok(self.inner.read().await.management_keys.get(hash).cloned())
    }
}
