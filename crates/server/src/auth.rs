//! Inbound LLM key authentication.
//!
//! Keys arrive as `x-api-key: <key>` or `Authorization: Bearer <key>`, are
//! validated by shape, hashed with SHA-256, and resolved against the store.
//! A successful lookup inserts the key record as a request extension and
//! touches the last-used tracker; failures answer 401 in the dialect the
//! path implies, before any handler runs.

use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use axum::{
    body::Body,
    response::IntoResponse as _,
};
use gateway::{AuthenticatedKey, GatewayError, LastUsedTracker};
use http::{Request, Response};
use store::{KeyKind, Store};
use tower::Layer;

pub(crate) struct AuthLayer(Arc<AuthInner>);

impl Clone for AuthLayer {
    fn clone(&self) -> Self {
        AuthLayer(self.0.clone())
    }
}

struct AuthInner {
    store: Arc<dyn Store>,
    tracker: Arc<LastUsedTracker>,
}

impl AuthLayer {
    pub(crate) fn new(store: Arc<dyn Store>, tracker: Arc<LastUsedTracker>) -> Self {
        Self(Arc::new(AuthInner { store, tracker }))
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, next: S) -> Self::Service {
        AuthService {
            next,
            inner: self.0.clone(),
        }
    }
}

pub(crate) struct AuthService<S> {
    next: S,
    inner: Arc<AuthInner>,
}

impl<S: Clone> Clone for AuthService<S> {
    fn clone(&self) -> Self {
        AuthService {
            next: self.next.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<S> tower::Service<Request<Body>> for AuthService<S>
where
    S: tower::Service<Request<Body>, Response = Response<Body>> + Send + Clone + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.next.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        let mut next = self.next.clone();
        let inner = self.inner.clone();

        Box::pin(async move {
            let presented = presented_key(&request);

            let Some(presented) = presented else {
                return Ok(unauthorized(&request, "missing API key"));
            };

            if store::parse_key(&presented) != Some(KeyKind::Llm) {
                return Ok(unauthorized(&request, "invalid API key"));
            }

            let hash = store::hash_key(&presented);

            let record = match inner.store.get_llm_key_by_hash(&hash).await {
                Ok(record) => record,
                Err(error) => {
                    log::error!("key lookup failed: {error}");
                    return Ok(GatewayError::Internal("key lookup failed".to_string()).into_response());
                }
            };

            let Some(record) = record.filter(|record| record.active) else {
                return Ok(unauthorized(&request, "invalid API key"));
            };

            inner.tracker.touch(record.id);
            request.extensions_mut().insert(AuthenticatedKey(Arc::new(record)));

            next.call(request).await
        })
    }
}

/// The key from `x-api-key` or `Authorization: Bearer`, in that order.
fn presented_key(request: &Request<Body>) -> Option<String> {
    if let Some(value) = request.headers().get("x-api-key") {
        return value.to_str().ok().map(str::to_string);
    }

    request
        .headers()
        .get(http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// 401 in the dialect the request path implies.
fn unauthorized(request: &Request<Body>, message: &str) -> Response<Body> {
    let error = GatewayError::Authentication(message.to_string());

    if request.uri().path().starts_with("/v1/messages") {
        gateway::AnthropicError(error).into_response()
    } else {
        error.into_response()
    }
}
