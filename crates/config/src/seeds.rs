//! Seed records for running without a management plane.
//!
//! Upstreams, models, and LLM keys declared in pxgate.toml are loaded into
//! the in-memory store at startup. Deployments with a management plane leave
//! these sections empty.

use secrecy::SecretString;
use serde::Deserialize;
use store::Dialect;
use url::Url;

/// A seeded upstream endpoint.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpstreamSeed {
    /// Upstream id; must be unique.
    pub id: i64,
    /// Upstream name; models reference it via `provider`.
    pub name: String,
    /// Base URL of the provider API.
    pub base_url: Url,
    /// Credential sent to the upstream.
    pub api_key: SecretString,
    /// Protocol the upstream speaks.
    pub dialect: Dialect,
    /// Selection priority among same-provider upstreams.
    #[serde(default)]
    pub priority: i32,
    /// Whether the upstream is routable.
    #[serde(default = "default_true")]
    pub active: bool,
}

/// A seeded model.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelSeed {
    /// Model name clients request.
    pub name: String,
    /// Optional display name.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Provider label; used to pick an upstream when `upstream` is unset.
    pub provider: String,
    /// Explicit upstream id link.
    #[serde(default)]
    pub upstream: Option<i64>,
    /// Cost per million input tokens.
    #[serde(default)]
    pub input_cost_per_million: f64,
    /// Cost per million output tokens.
    #[serde(default)]
    pub output_cost_per_million: f64,
    /// Whether the model is routable.
    #[serde(default = "default_true")]
    pub active: bool,
}

/// A seeded inference key.
///
/// Exactly one of `key` (plaintext, hashed at load) or `key_hash` must be
/// set. Plaintext seeding is meant for development; production setups should
/// seed hashes only.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmKeySeed {
    /// Key id; referenced by log entries.
    pub id: i64,
    /// Human-facing key name.
    pub name: String,
    /// Plaintext key, e.g. `pxb_<40 hex>`.
    #[serde(default)]
    pub key: Option<SecretString>,
    /// SHA-256 hex of the plaintext key.
    #[serde(default)]
    pub key_hash: Option<String>,
    /// Display prefix; derived from `key` when seeding plaintext.
    #[serde(default)]
    pub key_prefix: Option<String>,
    /// Whether the key authenticates.
    #[serde(default = "default_true")]
    pub active: bool,
}

/// Pricing sync settings.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PricingConfig {
    /// URL of the external pricing document. Sync is skipped when unset.
    pub url: Option<Url>,
}

fn default_true() -> bool {
    true
}
