//! pxgate core: dialect translation and upstream dispatch.
//!
//! The gateway receives Anthropic Messages, OpenAI Chat Completions, and
//! OpenAI Responses traffic, resolves the requested model to a configured
//! upstream, and either forwards bytes untouched (matching dialects) or
//! rewrites requests, responses, and SSE streams between dialects. Usage is
//! normalised to the Anthropic accounting convention and recorded through a
//! non-blocking batching logger.

use std::sync::Arc;

use axum::{Router, routing::post};
use store::{LlmKeyRecord, Store};

mod error;
mod handlers;
mod ids;
mod logging;
mod pricing;
mod protocol;
mod resolve;
mod stream;
mod translate;
mod upstream;

pub use error::{AnthropicError, AnthropicResult, GatewayError, Result};
pub use logging::{LastUsedTracker, LogHandle, RequestLogger};
pub use pricing::fetch_pricing;
pub use resolve::ResolutionCache;

use crate::upstream::ClientCache;

/// The authenticated inbound key, inserted as a request extension by the
/// server's auth layer and consumed by every handler for accounting.
#[derive(Clone)]
pub struct AuthenticatedKey(pub Arc<LlmKeyRecord>);

/// Shared gateway state: configuration, the model-resolution cache, the
/// per-upstream client cache, and the log submission handle.
pub struct Gateway {
    pub(crate) config: config::GatewayConfig,
    pub(crate) resolver: ResolutionCache,
    pub(crate) clients: ClientCache,
    pub(crate) log: LogHandle,
}

impl Gateway {
    /// Build the gateway state over a store and a log handle.
    pub fn new(config: &config::Config, store: Arc<dyn Store>, log: LogHandle) -> Self {
        Self {
            config: config.gateway.clone(),
            resolver: ResolutionCache::new(store, config.gateway.resolve_ttl),
            clients: ClientCache::new(config.gateway.clone()),
            log,
        }
    }

    /// The model-resolution cache, exposed so a management surface can
    /// invalidate it after mutations.
    pub fn resolver(&self) -> &ResolutionCache {
        &self.resolver
    }
}

/// The inbound LLM routes. Authentication is layered on by the server.
pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/v1/messages", post(handlers::anthropic::messages))
        .route("/v1/chat/completions", post(handlers::chat::completions))
        .route("/v1/responses", post(handlers::responses::create))
        .route("/v1/responses/{*rest}", post(handlers::responses::subpath))
        .with_state(gateway)
}
