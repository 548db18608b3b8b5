//! Request-log ingestion and last-used tracker settings.

use std::time::Duration;

use duration_str::deserialize_duration;
use serde::Deserialize;

/// Async request logger tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RequestLogConfig {
    /// Bounded channel capacity. When full, the oldest pending entry is
    /// dropped and counted.
    pub channel_capacity: usize,
    /// Entries per batched store insert.
    pub batch_size: usize,
    /// Maximum time a worker waits to fill a batch before flushing.
    #[serde(deserialize_with = "deserialize_duration")]
    pub flush_interval: Duration,
    /// Number of flush workers draining the channel.
    pub workers: usize,
}

impl Default for RequestLogConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            batch_size: 64,
            flush_interval: Duration::from_millis(250),
            workers: 2,
        }
    }
}

/// Key last-used tracker tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LastUsedConfig {
    /// How often pending touches are flushed to the store.
    #[serde(deserialize_with = "deserialize_duration")]
    pub flush_interval: Duration,
    /// Per-flush store call timeout.
    #[serde(deserialize_with = "deserialize_duration")]
    pub store_timeout: Duration,
}

impl Default for LastUsedConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(30),
            store_timeout: Duration::from_secs(10),
        }
    }
}
