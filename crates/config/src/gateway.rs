//! Gateway core tuning knobs.

use std::time::Duration;

use duration_str::deserialize_duration;
use serde::Deserialize;

/// Gateway core settings: inbound body handling, model resolution caching,
/// and upstream resilience.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    /// Maximum inbound request body size in bytes.
    pub body_limit_bytes: usize,
    /// How many body bytes the model probe inspects before falling back to a
    /// full parse.
    pub model_probe_limit: usize,
    /// TTL for model-resolution cache entries, positive and negative alike.
    #[serde(deserialize_with = "deserialize_duration")]
    pub resolve_ttl: Duration,
    /// Per-upstream circuit breaker.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Retry policy for upstream connection errors.
    pub retry: RetryConfig,
    /// Upstream HTTP connection pool tuning.
    pub pool: HttpPoolConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            body_limit_bytes: 32 << 20,
            model_probe_limit: 128 << 10,
            resolve_ttl: Duration::from_secs(30),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            pool: HttpPoolConfig::default(),
        }
    }
}

/// Circuit breaker settings, applied per upstream client.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the breaker opens.
    pub failure_threshold: u32,
    /// How long the breaker stays open before admitting a probe request.
    #[serde(deserialize_with = "deserialize_duration")]
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Retry settings for upstream sends with replayable bodies.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Total attempts, including the first. `1` disables retries.
    pub attempts: u32,
    /// Backoff before the second attempt; doubles per attempt after that.
    #[serde(deserialize_with = "deserialize_duration")]
    pub initial_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_millis(200),
        }
    }
}

/// Connection pool tuning for upstream HTTP clients. Streams can be
/// long-lived, so no overall request timeout is configured here.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpPoolConfig {
    /// Maximum idle connections kept per host.
    pub max_idle_connections: usize,
    /// Idle connection lifetime.
    #[serde(deserialize_with = "deserialize_duration")]
    pub idle_timeout: Duration,
    /// TCP connect timeout.
    #[serde(deserialize_with = "deserialize_duration")]
    pub connect_timeout: Duration,
    /// TCP keep-alive interval.
    #[serde(deserialize_with = "deserialize_duration")]
    pub tcp_keepalive: Duration,
}

impl Default for HttpPoolConfig {
    fn default() -> Self {
        Self {
            max_idle_connections: 100,
            idle_timeout: Duration::from_secs(90),
            connect_timeout: Duration::from_secs(30),
            tcp_keepalive: Duration::from_secs(30),
        }
    }
}
