//! pxgate configuration structures mapping the pxgate.toml file.

#![deny(missing_docs)]

mod gateway;
mod loader;
mod logging;
mod seeds;
mod server;

use std::path::Path;

use serde::Deserialize;

pub use gateway::{CircuitBreakerConfig, GatewayConfig, HttpPoolConfig, RetryConfig};
pub use logging::{LastUsedConfig, RequestLogConfig};
pub use seeds::{LlmKeySeed, ModelSeed, PricingConfig, UpstreamSeed};
pub use server::ServerConfig;

/// Main configuration structure for the pxgate application.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Gateway core tuning: probe cap, resolution TTL, upstream resilience.
    pub gateway: GatewayConfig,
    /// Async request-log ingestion settings.
    pub request_log: RequestLogConfig,
    /// Key last-used tracker settings.
    pub last_used: LastUsedConfig,
    /// Pricing sync settings.
    pub pricing: PricingConfig,
    /// Seeded upstream endpoints.
    pub upstreams: Vec<UpstreamSeed>,
    /// Seeded models.
    pub models: Vec<ModelSeed>,
    /// Seeded LLM keys.
    pub llm_keys: Vec<LlmKeySeed>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }

    /// Validate cross-field constraints the type system cannot express.
    pub fn validate(&self) -> anyhow::Result<()> {
        loader::validate(self)
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_debug_snapshot;

    use crate::Config;

    #[test]
    fn defaults() {
        let config: Config = toml::from_str("").unwrap();

        assert_debug_snapshot!(&config.gateway, @r#"
        GatewayConfig {
            body_limit_bytes: 33554432,
            model_probe_limit: 131072,
            resolve_ttl: 30s,
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 5,
                cooldown: 30s,
            },
            retry: RetryConfig {
                attempts: 3,
                initial_backoff: 200ms,
            },
            pool: HttpPoolConfig {
                max_idle_connections: 100,
                idle_timeout: 90s,
                connect_timeout: 30s,
                tcp_keepalive: 30s,
            },
        }
        "#);

        assert_debug_snapshot!(&config.request_log, @r"
        RequestLogConfig {
            channel_capacity: 1024,
            batch_size: 64,
            flush_interval: 250ms,
            workers: 2,
        }
        ");

        assert!(config.upstreams.is_empty());
        assert!(config.models.is_empty());
    }

    #[test]
    fn parses_seeded_upstreams_and_models() {
        let config: Config = toml::from_str(indoc::indoc! {r#"
            [[upstreams]]
            id = 1
            name = "openai"
            base_url = "https://api.openai.com"
            api_key = "sk-test"
            dialect = "openai"
            priority = 10

            [[models]]
            name = "gpt-4o"
            provider = "openai"
            upstream = 1
            input_cost_per_million = 2.5
            output_cost_per_million = 10.0
        "#})
        .unwrap();

        assert_eq!(config.upstreams.len(), 1);
        assert_eq!(config.upstreams[0].name, "openai");
        assert_eq!(config.upstreams[0].dialect, store::Dialect::Openai);
        assert_eq!(config.models[0].upstream, Some(1));
        assert!(config.models[0].active);
    }

    #[test]
    fn rejects_unknown_fields() {
        let result: Result<Config, _> = toml::from_str("unknown_section = true");
        assert!(result.is_err());
    }
}
