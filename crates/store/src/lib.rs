//! Shared persistence vocabulary for the pxgate gateway.
//!
//! This crate defines the records the gateway reads and writes, the
//! [`Store`] contract the management plane implements, and a config-seeded
//! [`MemoryStore`] used by the binary and the test suite. Relational
//! implementations and schema migrations live with the management surface,
//! not here.

#![deny(missing_docs)]

mod keys;
mod memory;

use std::fmt;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

pub use keys::{GeneratedKey, KeyKind, hash_key, parse_key};
pub use memory::{MemoryStore, PricingUpdate};

/// Wire protocol spoken by an upstream or an inbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// OpenAI Chat Completions (and Responses) protocol.
    Openai,
    /// Anthropic Messages protocol.
    Anthropic,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Openai => f.write_str("openai"),
            Dialect::Anthropic => f.write_str("anthropic"),
        }
    }
}

impl std::str::FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(Dialect::Openai),
            "anthropic" => Ok(Dialect::Anthropic),
            other => Err(format!("unknown dialect '{other}', expected 'openai' or 'anthropic'")),
        }
    }
}

/// A routable model with its per-million-token pricing.
#[derive(Debug, Clone)]
pub struct ModelRecord {
    /// Surrogate id assigned by the management plane.
    pub id: i64,
    /// Unique model name clients put in the `model` field.
    pub name: String,
    /// Optional human-facing name.
    pub display_name: Option<String>,
    /// Provider label, e.g. `openai` or `anthropic`.
    pub provider: String,
    /// Upstream this model routes to, if linked.
    pub upstream_ref: Option<i64>,
    /// Cost per million input tokens.
    pub input_cost_per_million: f64,
    /// Cost per million output tokens.
    pub output_cost_per_million: f64,
    /// Inactive models resolve as unknown.
    pub active: bool,
}

/// A configured backend provider endpoint.
#[derive(Debug, Clone)]
pub struct UpstreamRecord {
    /// Surrogate id; the client cache is keyed by it.
    pub id: i64,
    /// Unique upstream name.
    pub name: String,
    /// Base URL, e.g. `https://api.openai.com`.
    pub base_url: String,
    /// API credential. Encrypted at rest by the management plane; this
    /// in-memory form is the decrypted value and must not be logged.
    pub credential: SecretString,
    /// Protocol the upstream speaks.
    pub dialect: Dialect,
    /// Selection priority among upstreams serving the same model.
    pub priority: i32,
    /// Inactive upstreams are skipped during resolution.
    pub active: bool,
}

/// Result of resolving a model name to a routable upstream.
#[derive(Debug, Clone)]
pub struct ResolvedModel {
    /// The model record, including pricing.
    pub model: ModelRecord,
    /// Id of the upstream serving this model.
    pub upstream_id: i64,
    /// Upstream base URL.
    pub base_url: String,
    /// Decrypted upstream credential.
    pub credential: SecretString,
    /// Upstream dialect, drives passthrough vs translate.
    pub dialect: Dialect,
}

/// One request-log row, ingested in batches by the async logger.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    /// Id of the inbound LLM key.
    pub key_id: i64,
    /// Time the handler was entered.
    pub timestamp: jiff::Timestamp,
    /// HTTP method of the inbound request.
    pub method: String,
    /// Inbound request path.
    pub path: String,
    /// Requested model name, when one could be determined.
    pub model: Option<String>,
    /// Dialect the client spoke.
    pub input_format: Dialect,
    /// Upstream the request was routed to, if resolution succeeded.
    pub upstream_ref: Option<i64>,
    /// Status code returned to the client.
    pub status_code: u16,
    /// Wall time from handler entry to response completion.
    pub latency_ms: u64,
    /// Time from handler entry until just before the upstream dispatch.
    pub overhead_us: u64,
    /// Fresh input tokens, cache reads excluded.
    pub input_tokens: u64,
    /// Output tokens.
    pub output_tokens: u64,
    /// Tokens spent creating prompt-cache entries.
    pub cache_creation_tokens: u64,
    /// Prompt tokens served from the provider cache.
    pub cache_read_tokens: u64,
    /// Billed cost in dollars.
    pub cost: f64,
    /// Upstream or gateway error body, when the request failed.
    pub error_message: Option<String>,
    /// Client-supplied metadata echoed into the log.
    pub request_metadata: Option<serde_json::Value>,
}

/// An inbound LLM API key.
#[derive(Debug, Clone)]
pub struct LlmKeyRecord {
    /// Surrogate id, referenced by log entries.
    pub id: i64,
    /// SHA-256 hex of the plaintext key.
    pub key_hash: String,
    /// First 8 plaintext characters, kept for display.
    pub key_prefix: String,
    /// Human-facing key name.
    pub name: String,
    /// Inactive keys fail authentication.
    pub active: bool,
    /// Creation time.
    pub created_at: jiff::Timestamp,
    /// Last time the key authenticated a request, batched by the tracker.
    pub last_used_at: Option<jiff::Timestamp>,
}

/// A management-surface API key. Same shape as [`LlmKeyRecord`]; kept as a
/// distinct type because the two live in separate tables and must never
/// authenticate across surfaces.
#[derive(Debug, Clone)]
pub struct ManagementKeyRecord {
    /// Surrogate id.
    pub id: i64,
    /// SHA-256 hex of the plaintext key.
    pub key_hash: String,
    /// First 8 plaintext characters, kept for display.
    pub key_prefix: String,
    /// Human-facing key name.
    pub name: String,
    /// Inactive keys fail authentication.
    pub active: bool,
    /// Creation time.
    pub created_at: jiff::Timestamp,
}

/// Store access failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing store could not be reached or timed out.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The store rejected the operation.
    #[error("store query failed: {0}")]
    Query(String),
}

/// Contract between the gateway core and the persistence layer.
#[async_trait]
pub trait Store: Send + Sync {
    /// Resolve a model name to its linked upstream. Returns `None` when the
    /// model is unknown, inactive, or has no active upstream.
    async fn resolve_model(&self, name: &str) -> Result<Option<ResolvedModel>, StoreError>;

    /// Insert a batch of request-log rows.
    async fn insert_log_batch(&self, entries: &[LogEntry]) -> Result<(), StoreError>;

    /// Stamp `last_used_at` for a batch of LLM keys.
    async fn batch_update_llm_key_last_used(&self, ids: &[i64]) -> Result<(), StoreError>;

    /// Look up an LLM key by its SHA-256 hex hash.
    async fn get_llm_key_by_hash(&self, hash: &str) -> Result<Option<LlmKeyRecord>, StoreError>;

    /// Look up a management key by its SHA-256 hex hash.
    async fn get_management_key_by_hash(&self, hash: &str) -> Result<Option<ManagementKeyRecord>, StoreError>;
}
