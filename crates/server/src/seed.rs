//! Store seeding from configuration.
//!
//! Deployments without a management plane declare their upstreams, models,
//! and keys in pxgate.toml; this builds the in-memory store from those
//! sections at startup.

use std::sync::Arc;

use anyhow::Context as _;
use config::Config;
use secrecy::ExposeSecret as _;
use store::{KeyKind, LlmKeyRecord, MemoryStore, ModelRecord, UpstreamRecord};

/// Build and seed the in-memory store.
pub async fn build_store(config: &Config) -> anyhow::Result<Arc<MemoryStore>> {
    let store = Arc::new(MemoryStore::new());

    for upstream in &config.upstreams {
        store
            .upsert_upstream(UpstreamRecord {
                id: upstream.id,
                name: upstream.name.clone(),
                base_url: upstream.base_url.as_str().trim_end_matches('/').to_string(),
                credential: upstream.api_key.clone(),
                dialect: upstream.dialect,
                priority: upstream.priority,
                active: upstream.active,
            })
            .await;
    }

    for (index, model) in config.models.iter().enumerate() {
        store
            .upsert_model(ModelRecord {
                id: index as i64 + 1,
                name: model.name.clone(),
                display_name: model.display_name.clone(),
                provider: model.provider.clone(),
                upstream_ref: model.upstream,
                input_cost_per_million: model.input_cost_per_million,
                output_cost_per_million: model.output_cost_per_million,
                active: model.active,
            })
            .await;
    }

    for key in &config.llm_keys {
        let (key_hash, key_prefix) = match (&key.key, &key.key_hash) {
            (Some(plaintext), None) => {
                let plaintext = plaintext.expose_secret();

                if store::parse_key(plaintext) != Some(KeyKind::Llm) {
                    anyhow::bail!("llm key '{}' is not a well-formed pxb_ key", key.name);
                }

                (store::hash_key(plaintext), plaintext[..8].to_string())
            }
            (None, Some(hash)) => (
                hash.clone(),
                key.key_prefix.clone().unwrap_or_else(|| "pxb_????".to_string()),
            ),
            _ => anyhow::bail!("llm key '{}' must set exactly one of key or key_hash", key.name),
        };

        store
            .upsert_llm_key(LlmKeyRecord {
                id: key.id,
                key_hash,
                key_prefix,
                name: key.name.clone(),
                active: key.active,
                created_at: jiff::Timestamp::now(),
                last_used_at: None,
            })
            .await;
    }

    config.validate().context("invalid configuration")?;

    Ok(store)
}
