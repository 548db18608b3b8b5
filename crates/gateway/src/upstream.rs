//! Pooled HTTP clients for upstream providers.
//!
//! One client per upstream record, cached by upstream id. The connection
//! pool is tuned for long-lived streams: no overall request timeout, idle
//! connections kept warm, compression off so passthrough bytes reach the
//! client exactly as the provider sent them.

mod breaker;

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use bytes::Bytes;
use config::GatewayConfig;
use http::HeaderMap;
use secrecy::{ExposeSecret as _, SecretString};
use store::ResolvedModel;

use crate::error::{GatewayError, Result};

pub(crate) use breaker::CircuitBreaker;

/// Anthropic upstream auth headers.
pub(crate) const ANTHROPIC_VERSION: &str = "2023-06-01";

/// A pooled client bound to one upstream endpoint and credential.
pub(crate) struct UpstreamClient {
    client: reqwest::Client,
    base_url: String,
    credential: SecretString,
    breaker: CircuitBreaker,
    retry_attempts: u32,
    retry_backoff: std::time::Duration,
}

impl UpstreamClient {
    fn build(base_url: &str, credential: SecretString, config: &GatewayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(config.pool.max_idle_connections)
            .pool_idle_timeout(config.pool.idle_timeout)
            .connect_timeout(config.pool.connect_timeout)
            .tcp_keepalive(config.pool.tcp_keepalive)
            .tcp_nodelay(true)
            // No overall timeout: streams may be long-lived.
            .build()
            .map_err(|e| GatewayError::Internal(format!("failed to build upstream client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credential,
            breaker: CircuitBreaker::new(&config.circuit_breaker),
            retry_attempts: config.retry.attempts.max(1),
            retry_backoff: config.retry.initial_backoff,
        })
    }

    /// The decrypted upstream credential, for callers building their own
    /// auth headers.
    pub(crate) fn credential(&self) -> &SecretString {
        &self.credential
    }

    /// POST with `Authorization: Bearer <credential>` (OpenAI-style
    /// upstreams).
    pub(crate) async fn send(&self, path: &str, query: Option<&str>, body: Bytes) -> Result<reqwest::Response> {
        let mut headers = HeaderMap::new();

        let bearer = format!("Bearer {}", self.credential.expose_secret());
        let value = bearer
            .parse()
            .map_err(|_| GatewayError::Internal("upstream credential is not a valid header value".to_string()))?;
        headers.insert(http::header::AUTHORIZATION, value);

        self.send_raw(path, query, headers, body).await
    }

    /// POST with caller-supplied auth headers (Anthropic-style upstreams:
    /// `x-api-key` + `anthropic-version`).
    pub(crate) async fn send_raw(
        &self,
        path: &str,
        query: Option<&str>,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<reqwest::Response> {
        if !self.breaker.allow() {
            return Err(GatewayError::UpstreamUnavailable);
        }

        let mut url = format!("{}{}", self.base_url, path);

        if let Some(query) = query
            && !query.is_empty()
        {
            url.push('?');
            url.push_str(query);
        }

        let mut backoff = self.retry_backoff;
        let mut attempt = 0;

        loop {
            attempt += 1;

            // Bytes clones are reference-counted, so every attempt replays
            // the identical body.
            let result = self
                .client
                .post(&url)
                .headers(headers.clone())
                .header(http::header::CONTENT_TYPE, "application/json")
                .body(body.clone())
                .send()
                .await;

            match result {
                Ok(response) => {
                    // Any HTTP response means the upstream is reachable;
                    // status errors are the translators' business.
                    self.breaker.record_success();
                    return Ok(response);
                }
                Err(error) => {
                    if attempt < self.retry_attempts {
                        log::debug!("upstream send attempt {attempt} failed, retrying: {error}");
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                        continue;
                    }

                    self.breaker.record_failure();
                    return Err(GatewayError::UpstreamConnection(error.to_string()));
                }
            }
        }
    }
}

/// Anthropic auth headers for [`UpstreamClient::send_raw`].
pub(crate) fn anthropic_headers(credential: &SecretString) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();

    let key = credential
        .expose_secret()
        .parse()
        .map_err(|_| GatewayError::Internal("upstream credential is not a valid header value".to_string()))?;
    headers.insert("x-api-key", key);
    headers.insert(
        "anthropic-version",
        http::HeaderValue::from_static(ANTHROPIC_VERSION),
    );

    Ok(headers)
}

struct CacheEntry {
    base_url: String,
    credential: SecretString,
    client: Arc<UpstreamClient>,
}

/// Client cache keyed by upstream id.
///
/// The `(base_url, credential)` pair acts as the entry version: the
/// management plane rewrites upstream records in place, and a stale entry
/// would keep using a revoked credential. A mismatch evicts and rebuilds;
/// untouched upstreams keep their clients and breaker state.
pub(crate) struct ClientCache {
    config: GatewayConfig,
    clients: RwLock<HashMap<i64, CacheEntry>>,
}

impl ClientCache {
    pub(crate) fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Get or build the client for a resolved upstream.
    pub(crate) fn get(&self, resolved: &ResolvedModel) -> Result<Arc<UpstreamClient>> {
        if let Ok(clients) = self.clients.read()
            && let Some(entry) = clients.get(&resolved.upstream_id)
            && entry.base_url == resolved.base_url
            && entry.credential.expose_secret() == resolved.credential.expose_secret()
        {
            return Ok(entry.client.clone());
        }

        let client = Arc::new(UpstreamClient::build(
            &resolved.base_url,
            resolved.credential.clone(),
            &self.config,
        )?);

        if let Ok(mut clients) = self.clients.write() {
            clients.insert(
                resolved.upstream_id,
                CacheEntry {
                    base_url: resolved.base_url.clone(),
                    credential: resolved.credential.clone(),
                    client: client.clone(),
                },
            );
        }

        Ok(client)
    }
}
