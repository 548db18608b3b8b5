//! `POST /v1/responses[/…]` — inbound OpenAI Responses dialect.
//!
//! The main endpoint is bridged over Chat Completions so any OpenAI-dialect
//! upstream can serve it; sub-paths forward verbatim when the upstream
//! dialect matches. Anthropic upstreams cannot serve this surface at all
//! and are rejected before any upstream call.

use std::{collections::VecDeque, sync::Arc};

use axum::{
    Json,
    body::Bytes,
    extract::{Extension, State},
    response::{IntoResponse, Response, Sse, sse::Event},
};
use eventsource_stream::Eventsource as _;
use futures::StreamExt as _;
use store::Dialect;

use crate::{
    AuthenticatedKey, Gateway,
    error::{GatewayError, Result},
    handlers::{
        LogCell, LogGuard, PassthroughKind, RequestLog, finish_passthrough, finish_request, read_body, resolve_model,
        upstream_http_error,
    },
    protocol::{openai, probe, responses},
    stream::chat_to_responses::ChatToResponses,
    translate,
};

/// Handle a Responses API request by bridging it over Chat Completions.
pub(crate) async fn create(
    State(gateway): State<Arc<Gateway>>,
    Extension(key): Extension<AuthenticatedKey>,
    request: axum::extract::Request,
) -> Result<Response> {
    let (parts, body) = request.into_parts();
    let mut cell = LogCell::new(RequestLog::new(key.0.id, &parts, Dialect::Openai));

    let result = handle_create(&gateway, &mut cell, &parts, body).await;

    finish_request(&gateway, cell, result)
}

async fn handle_create(
    gateway: &Gateway,
    cell: &mut LogCell,
    parts: &http::request::Parts,
    body: axum::body::Body,
) -> Result<Response> {
    let bytes = read_body(gateway, parts, body).await?;

    let request: responses::ResponsesRequest = sonic_rs::from_slice(&bytes)
        .map_err(|error| GatewayError::InvalidRequest(format!("failed to parse request body: {error}")))?;

    if let Some(user) = &request.user {
        cell.with(|log| log.metadata(serde_json::json!({ "user": user })));
    }

    let resolved = resolve_model(gateway, cell, &request.model).await?;

    if resolved.dialect == Dialect::Anthropic {
        return Err(GatewayError::DialectMismatch(
            "the Responses API is not supported for this model's upstream".to_string(),
        ));
    }

    let client = gateway.clients.get(&resolved)?;

    let streaming = request.stream == Some(true);
    let model = request.model.clone();

    let chat_request = translate::responses::chat_request(request)?;
    let body = sonic_rs::to_vec(&chat_request)
        .map_err(|error| GatewayError::Internal(format!("failed to serialize upstream request: {error}")))?;

    cell.with(RequestLog::mark_overhead);
    let response = client.send("/v1/chat/completions", None, Bytes::from(body)).await?;

    if !response.status().is_success() {
        return Err(upstream_http_error(response).await);
    }

    if streaming {
        return translated_stream(gateway, cell, response, &model);
    }

    let body = response
        .bytes()
        .await
        .map_err(|error| GatewayError::UpstreamConnection(error.to_string()))?;

    let chat_response: openai::ChatCompletionResponse = sonic_rs::from_slice(&body)
        .map_err(|error| GatewayError::TranslationResponse(format!("unparsable upstream response: {error}")))?;

    let translated = translate::responses::responses_response(chat_response, &model)?;

    cell.with(|log| {
        log.status(200);

        if let Some(usage) = translated.usage {
            log.usage(crate::translate::usage::NormalizedUsage::from_responses(&usage));
        }
    });

    Ok(Json(translated).into_response())
}

/// Forward a Responses sub-path verbatim when the upstream speaks the
/// OpenAI dialect. The body is probed for the model, never parsed.
pub(crate) async fn subpath(
    State(gateway): State<Arc<Gateway>>,
    Extension(key): Extension<AuthenticatedKey>,
    request: axum::extract::Request,
) -> Result<Response> {
    let (parts, body) = request.into_parts();
    let mut cell = LogCell::new(RequestLog::new(key.0.id, &parts, Dialect::Openai));

    let result = handle_subpath(&gateway, &mut cell, &parts, body).await;

    finish_request(&gateway, cell, result)
}

async fn handle_subpath(
    gateway: &Gateway,
    cell: &mut LogCell,
    parts: &http::request::Parts,
    body: axum::body::Body,
) -> Result<Response> {
    let bytes = read_body(gateway, parts, body).await?;

    let Some(model) = probe::extract_model(&bytes, gateway.config.model_probe_limit) else {
        return Err(GatewayError::InvalidRequest(
            "request body has no model field".to_string(),
        ));
    };

    let resolved = resolve_model(gateway, cell, &model).await?;

    if resolved.dialect == Dialect::Anthropic {
        return Err(GatewayError::DialectMismatch(
            "the Responses API is not supported for this model's upstream".to_string(),
        ));
    }

    let client = gateway.clients.get(&resolved)?;

    cell.with(RequestLog::mark_overhead);
    let response = client.send(parts.uri.path(), parts.uri.query(), bytes).await?;

    finish_passthrough(gateway, cell, response, PassthroughKind::Responses).await
}

/// Drive the Chat→Responses state machine over the upstream SSE stream.
fn translated_stream(
    gateway: &Gateway,
    cell: &mut LogCell,
    response: reqwest::Response,
    model: &str,
) -> Result<Response> {
    let Some(mut log) = cell.take() else {
        return Err(GatewayError::Internal("request log taken twice".to_string()));
    };
    log.status(200);

    let guard = LogGuard::new(gateway.log.clone(), log);
    let machine = ChatToResponses::new(model);
    let events = response.bytes_stream().eventsource();

    struct StreamState<S> {
        events: S,
        machine: ChatToResponses,
        queue: VecDeque<responses::StreamEvent>,
        done: bool,
        guard: LogGuard,
    }

    let stream = futures::stream::unfold(
        StreamState {
            events: Box::pin(events),
            machine,
            queue: VecDeque::new(),
            done: false,
            guard,
        },
        |mut state| async move {
            loop {
                if let Some(event) = state.queue.pop_front() {
                    let sse = Event::default()
                        .event(event.name())
                        .data(sonic_rs::to_string(&event).unwrap_or_default());

                    return Some((Ok::<_, std::convert::Infallible>(sse), state));
                }

                if state.done {
                    return None;
                }

                let mut emitted = Vec::new();

                match state.events.next().await {
                    Some(Ok(event)) => {
                        if event.data == "[DONE]" {
                            state.machine.finish(&mut emitted);
                            state.done = true;
                        } else {
                            match sonic_rs::from_str::<openai::ChatCompletionChunk>(&event.data) {
                                Ok(chunk) => state.machine.process(chunk, &mut emitted),
                                Err(error) => {
                                    log::warn!("skipping unparsable upstream chunk: {error}");
                                }
                            }
                        }
                    }
                    Some(Err(error)) => {
                        log::warn!("upstream SSE parse error: {error}");
                        continue;
                    }
                    None => {
                        state.machine.finish(&mut emitted);
                        state.done = true;
                    }
                }

                state.guard.usage(state.machine.usage());
                state.queue.extend(emitted);
            }
        },
    );

    Ok(Sse::new(stream).into_response())
}
