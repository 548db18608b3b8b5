//! Inbound endpoint handlers.
//!
//! Every handler follows the same skeleton: read the body under the size
//! limit, determine the model, resolve the upstream, pick passthrough or
//! translate, and account the request. Exactly one log entry leaves the
//! handler on every terminating path; streaming paths hand the entry to a
//! drop guard owned by the response stream so cancellation and completion
//! are logged alike.

pub(crate) mod anthropic;
pub(crate) mod chat;
pub(crate) mod responses;

use std::time::Instant;

use axum::{
    body::{Body, Bytes},
    http::request::Parts,
    response::Response,
};
use store::{Dialect, LogEntry, ResolvedModel};

use crate::{
    Gateway,
    error::{GatewayError, Result},
    logging::LogHandle,
    stream::passthrough::UsageScraper,
    translate::usage::NormalizedUsage,
};

/// Mutable accounting state for one inbound request.
pub(crate) struct RequestLog {
    start: Instant,
    timestamp: jiff::Timestamp,
    key_id: i64,
    method: String,
    path: String,
    input_format: Dialect,
    model: Option<String>,
    upstream_ref: Option<i64>,
    pricing: Option<(f64, f64)>,
    overhead_us: u64,
    status: u16,
    usage: NormalizedUsage,
    error: Option<String>,
    metadata: Option<serde_json::Value>,
}

impl RequestLog {
    pub(crate) fn new(key_id: i64, parts: &Parts, input_format: Dialect) -> Self {
        Self {
            start: Instant::now(),
            timestamp: jiff::Timestamp::now(),
            key_id,
            method: parts.method.to_string(),
            path: parts.uri.path().to_string(),
            input_format,
            model: None,
            upstream_ref: None,
            pricing: None,
            overhead_us: 0,
            status: 200,
            usage: NormalizedUsage::default(),
            error: None,
            metadata: None,
        }
    }

    pub(crate) fn model(&mut self, model: &str) {
        self.model = Some(model.to_string());
    }

    pub(crate) fn resolved(&mut self, resolved: &ResolvedModel) {
        self.upstream_ref = Some(resolved.upstream_id);
        self.pricing = Some((
            resolved.model.input_cost_per_million,
            resolved.model.output_cost_per_million,
        ));
    }

    /// Call just before dispatching to the upstream client.
    pub(crate) fn mark_overhead(&mut self) {
        self.overhead_us = self.start.elapsed().as_micros() as u64;
    }

    pub(crate) fn status(&mut self, status: u16) {
        self.status = status;
    }

    pub(crate) fn usage(&mut self, usage: NormalizedUsage) {
        self.usage = usage;
    }

    pub(crate) fn error(&mut self, message: String) {
        self.error = Some(message);
    }

    pub(crate) fn metadata(&mut self, metadata: serde_json::Value) {
        self.metadata = Some(metadata);
    }

    /// Record a failed outcome from a gateway error.
    pub(crate) fn fail(&mut self, error: &GatewayError) {
        self.status = error.status_code().as_u16();
        self.error = Some(error.log_message());
    }

    pub(crate) fn into_entry(self) -> LogEntry {
        let (input_cost, output_cost) = self.pricing.unwrap_or((0.0, 0.0));
        let cost = self.usage.input_tokens as f64 * input_cost / 1_000_000.0
            + self.usage.output_tokens as f64 * output_cost / 1_000_000.0;

        LogEntry {
            key_id: self.key_id,
            timestamp: self.timestamp,
            method: self.method,
            path: self.path,
            model: self.model,
            input_format: self.input_format,
            upstream_ref: self.upstream_ref,
            status_code: self.status,
            latency_ms: self.start.elapsed().as_millis() as u64,
            overhead_us: self.overhead_us,
            input_tokens: self.usage.input_tokens,
            output_tokens: self.usage.output_tokens,
            cache_creation_tokens: self.usage.cache_creation_tokens,
            cache_read_tokens: self.usage.cache_read_tokens,
            cost,
            error_message: self.error,
            request_metadata: self.metadata,
        }
    }
}

/// Owns the [`RequestLog`] for a streaming response and submits it exactly
/// once when the stream is dropped, whether it completed or the client went
/// away mid-stream.
pub(crate) struct LogGuard {
    handle: LogHandle,
    log: Option<RequestLog>,
}

impl LogGuard {
    pub(crate) fn new(handle: LogHandle, log: RequestLog) -> Self {
        Self { handle, log: Some(log) }
    }

    /// Refresh the usage snapshot; called after every processed chunk so a
    /// drop at any point carries the latest counts.
    pub(crate) fn usage(&mut self, usage: NormalizedUsage) {
        if let Some(log) = self.log.as_mut() {
            log.usage(usage);
        }
    }
}

impl Drop for LogGuard {
    fn drop(&mut self) {
        if let Some(log) = self.log.take() {
            self.handle.submit(log.into_entry());
        }
    }
}

/// Holder passing one [`RequestLog`] through a handler. Streaming paths
/// take it into a [`LogGuard`]; whatever is left when the handler returns
/// is submitted by [`finish_request`].
pub(crate) struct LogCell {
    inner: Option<RequestLog>,
}

impl LogCell {
    pub(crate) fn new(log: RequestLog) -> Self {
        Self { inner: Some(log) }
    }

    pub(crate) fn with(&mut self, f: impl FnOnce(&mut RequestLog)) {
        if let Some(log) = self.inner.as_mut() {
            f(log);
        }
    }

    pub(crate) fn take(&mut self) -> Option<RequestLog> {
        self.inner.take()
    }
}

/// Submit the log entry for a finished handler invocation. Streaming paths
/// have already moved the entry into their guard; everything else is
/// accounted here, success and failure alike.
pub(crate) fn finish_request(gateway: &Gateway, mut cell: LogCell, result: Result<Response>) -> Result<Response> {
    match result {
        Ok(response) => {
            if let Some(log) = cell.take() {
                gateway.log.submit(log.into_entry());
            }

            Ok(response)
        }
        Err(error) => {
            if let Some(mut log) = cell.take() {
                log.fail(&error);
                gateway.log.submit(log.into_entry());
            }

            Err(error)
        }
    }
}

/// Which passthrough vocabulary to scrape usage from.
#[derive(Debug, Clone, Copy)]
pub(crate) enum PassthroughKind {
    Anthropic,
    Chat,
    Responses,
}

/// Finish a passthrough exchange: relay upstream errors with their status,
/// stream SSE bodies through the scraper, and buffer JSON bodies while
/// extracting usage opportunistically.
pub(crate) async fn finish_passthrough(
    gateway: &Gateway,
    cell: &mut LogCell,
    response: reqwest::Response,
    kind: PassthroughKind,
) -> Result<Response> {
    let status = response.status();
    let headers = response.headers().clone();

    if status.as_u16() >= 400 {
        let body = response.bytes().await.unwrap_or_default();

        cell.with(|log| {
            log.status(status.as_u16());
            log.error(String::from_utf8_lossy(&body).into_owned());
        });

        return Ok(relay_response(status, &headers, Body::from(body)));
    }

    if is_event_stream(&response) {
        let scraper = match kind {
            PassthroughKind::Anthropic => UsageScraper::anthropic(),
            PassthroughKind::Chat => UsageScraper::chat(),
            PassthroughKind::Responses => UsageScraper::responses(),
        };

        let Some(mut log) = cell.take() else {
            return Err(GatewayError::Internal("request log taken twice".to_string()));
        };
        log.status(status.as_u16());

        let guard = LogGuard::new(gateway.log.clone(), log);

        return Ok(passthrough_stream(response, scraper, guard));
    }

    let body = response
        .bytes()
        .await
        .map_err(|error| GatewayError::UpstreamConnection(error.to_string()))?;

    let usage = match kind {
        PassthroughKind::Anthropic => sonic_rs::from_slice::<crate::protocol::anthropic::MessagesResponse>(&body)
            .ok()
            .map(|response| NormalizedUsage::from_anthropic(&response.usage)),
        PassthroughKind::Chat => sonic_rs::from_slice::<crate::protocol::openai::ChatCompletionResponse>(&body)
            .ok()
            .and_then(|response| response.usage)
            .map(|usage| NormalizedUsage::from_openai(&usage)),
        PassthroughKind::Responses => sonic_rs::from_slice::<crate::protocol::responses::ResponsesResponse>(&body)
            .ok()
            .and_then(|response| response.usage)
            .map(|usage| NormalizedUsage::from_responses(&usage)),
    };

    cell.with(|log| {
        log.status(status.as_u16());

        if let Some(usage) = usage {
            log.usage(usage);
        }
    });

    Ok(relay_response(status, &headers, Body::from(body)))
}

/// Read the inbound body under the configured limit, rejecting non-JSON
/// content types up front.
pub(crate) async fn read_body(gateway: &Gateway, parts: &Parts, body: Body) -> Result<Bytes> {
    let is_json = parts
        .headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"));

    if !is_json {
        return Err(GatewayError::InvalidRequest(
            "unsupported Content-Type, expected 'application/json'".to_string(),
        ));
    }

    let limit = gateway.config.body_limit_bytes;

    axum::body::to_bytes(body, limit).await.map_err(|error| {
        let source = std::error::Error::source(&error);

        if source.is_some_and(|s| s.is::<http_body_util::LengthLimitError>()) {
            GatewayError::InvalidRequest(format!("request body is too large, limit is {limit} bytes"))
        } else {
            GatewayError::InvalidRequest(format!("failed to read request body: {error}"))
        }
    })
}

/// Resolve a model name through the TTL cache, mapping misses to the
/// generic resolve failure.
pub(crate) async fn resolve_model(gateway: &Gateway, cell: &mut LogCell, model: &str) -> Result<ResolvedModel> {
    cell.with(|log| log.model(model));

    let Some(resolved) = gateway.resolver.resolve(model).await? else {
        return Err(GatewayError::ResolveFailed(model.to_string()));
    };

    cell.with(|log| log.resolved(&resolved));

    Ok(resolved)
}

/// Relay an upstream response body verbatim with its original status.
///
/// Hop-by-hop headers are dropped; everything else is forwarded.
pub(crate) fn relay_response(status: http::StatusCode, headers: &http::HeaderMap, body: Body) -> Response {
    let mut builder = Response::builder().status(status);

    for (name, value) in headers {
        if *name == http::header::CONTENT_LENGTH
            || *name == http::header::TRANSFER_ENCODING
            || *name == http::header::CONNECTION
        {
            continue;
        }

        builder = builder.header(name, value);
    }

    builder.body(body).unwrap_or_else(|_| Response::new(Body::empty()))
}

/// Whether an upstream response is an SSE stream.
pub(crate) fn is_event_stream(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get(http::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("text/event-stream"))
}

/// Passthrough a streaming upstream response byte-for-byte, scraping usage
/// on the side. The log guard rides inside the body stream.
pub(crate) fn passthrough_stream(upstream: reqwest::Response, scraper: UsageScraper, guard: LogGuard) -> Response {
    use futures::StreamExt as _;

    let status = upstream.status();
    let headers = upstream.headers().clone();

    let stream = futures::stream::unfold(
        (upstream.bytes_stream(), scraper, guard),
        |(mut bytes, mut scraper, mut guard)| async move {
            match bytes.next().await {
                Some(Ok(chunk)) => {
                    scraper.observe(&chunk);
                    guard.usage(scraper.usage());
                    Some((Ok(chunk), (bytes, scraper, guard)))
                }
                Some(Err(error)) => {
                    log::warn!("upstream stream error during passthrough: {error}");
                    Some((Err(error), (bytes, scraper, guard)))
                }
                None => None,
            }
        },
    );

    relay_response(status, &headers, Body::from_stream(stream))
}

/// Read an upstream error body and produce the relaying error value. Used
/// on translate paths, where the body must be re-enveloped in the inbound
/// dialect.
pub(crate) async fn upstream_http_error(response: reqwest::Response) -> GatewayError {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "failed to read upstream error body".to_string());

    GatewayError::UpstreamHttp { status, body }
}

#[cfg(test)]
mod tests {
    use store::ModelRecord;

    use super::*;

    #[test]
    fn entry_cost_scales_per_million_tokens_and_skips_cache_reads() {
        let parts = http::Request::builder()
            .method("POST")
            .uri("/v1/messages")
            .body(())
            .unwrap()
            .into_parts()
            .0;

        let mut log = RequestLog::new(7, &parts, Dialect::Anthropic);

        log.resolved(&ResolvedModel {
            model: ModelRecord {
                id: 1,
                name: "m".to_string(),
                display_name: None,
                provider: "openai".to_string(),
                upstream_ref: Some(1),
                input_cost_per_million: 2.5,
                output_cost_per_million: 10.0,
                active: true,
            },
            upstream_id: 1,
            base_url: "http://u".to_string(),
            credential: secrecy::SecretString::from("k"),
            dialect: Dialect::Openai,
        });
        log.usage(NormalizedUsage {
            input_tokens: 1_000_000,
            output_tokens: 500_000,
            cache_creation_tokens: 0,
            cache_read_tokens: 123_456,
        });

        let entry = log.into_entry();
        assert!((entry.cost - 7.5).abs() < 1e-9, "cache reads are free: {}", entry.cost);
        assert_eq!(entry.upstream_ref, Some(1));
        assert_eq!(entry.method, "POST");
        assert_eq!(entry.path, "/v1/messages");
    }

    #[test]
    fn fail_records_status_and_detail() {
        let parts = http::Request::builder()
            .method("POST")
            .uri("/v1/chat/completions")
            .body(())
            .unwrap()
            .into_parts()
            .0;

        let mut log = RequestLog::new(1, &parts, Dialect::Openai);
        log.fail(&GatewayError::ResolveFailed("gpt-99".to_string()));

        let entry = log.into_entry();
        assert_eq!(entry.status_code, 500);
        assert!(entry.error_message.unwrap().contains("gpt-99"));
    }
}
