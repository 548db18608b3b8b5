//! `POST /v1/chat/completions` — inbound OpenAI Chat Completions dialect.

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
    protocol::{anthropic, openai, probe},
    stream::anthropic_to_chat::AnthropicToChat,
    translate,
    upstream::anthropic_headers,
};

/// Handle a Chat Completions request: passthrough to OpenAI-dialect
/// upstreams using the streaming-safe model probe, translate through the
/// Messages API otherwise.
pub(crate) async fn completions(
    State(gateway): State<Arc<Gateway>>,
    Extension(key): Extension<AuthenticatedKey>,
    request: axum::extract::Request,
) -> Result<Response> {
    let (parts, body) = request.into_parts();
    let mut cell = LogCell::new(RequestLog::new(key.0.id, &parts, Dialect::Openai));

    let result = handle(&gateway, &mut cell, &parts, body).await;

    finish_request(&gateway, cell, result)
}

async fn handle(
    gateway: &Gateway,
    cell: &mut LogCell,
    parts: &http::request::Parts,
    body: axum::body::Body,
) -> Result<Response> {
    let bytes = read_body(gateway, parts, body).await?;

    // The probe keeps the passthrough path byte-exact: no parse, no
    // re-serialisation of the client's body.
    let Some(model) = probe::extract_model(&bytes, gateway.config.model_probe_limit) else {
        return Err(GatewayError::InvalidRequest(
            "request body has no model field".to_string(),
        ));
    };

    let resolved = resolve_model(gateway, cell, &model).await?;
    let client = gateway.clients.get(&resolved)?;

    match resolved.dialect {
        Dialect::Openai => {
            cell.with(RequestLog::mark_overhead);
            let response = client
                .send("/v1/chat/completions", parts.uri.query(), bytes)
                .await?;

            finish_passthrough(gateway, cell, response, PassthroughKind::Chat).await
        }
        Dialect::Anthropic => {
            // Translate path: now the body needs a full parse.
            let request: openai::ChatCompletionRequest = sonic_rs::from_slice(&bytes)
                .map_err(|error| GatewayError::InvalidRequest(format!("failed to parse request body: {error}")))?;

            if let Some(user) = &request.user {
                cell.with(|log| log.metadata(serde_json::json!({ "user": user })));
            }

            let streaming = request.stream == Some(true);
            let translated = translate::openai::messages_request(request)?;

            let body = sonic_rs::to_vec(&translated)
                .map_err(|error| GatewayError::Internal(format!("failed to serialize upstream request: {error}")))?;

            let headers = anthropic_headers(client.credential())?;

            cell.with(RequestLog::mark_overhead);
            let response = client.send_raw("/v1/messages", None, headers, Bytes::from(body)).await?;

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

            let messages_response: anthropic::MessagesResponse = sonic_rs::from_slice(&body)
                .map_err(|error| GatewayError::TranslationResponse(format!("unparsable upstream response: {error}")))?;

            cell.with(|log| {
                log.status(200);
                log.usage(crate::translate::usage::NormalizedUsage::from_anthropic(
                    &messages_response.usage,
                ));
            });

            let chat_response = translate::openai::chat_response(messages_response);

            Ok(Json(chat_response).into_response())
        }
    }
}

/// Drive the Anthropic→Chat state machine over the upstream SSE stream.
/// Chunks are emitted as `data:`-only events, terminated by the literal
/// `data: [DONE]`.
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
    let machine = AnthropicToChat::new(model);
    let events = response.bytes_stream().eventsource();

    struct StreamState<S> {
        events: S,
        machine: AnthropicToChat,
        queue: VecDeque<Event>,
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
                    return Some((Ok::<_, std::convert::Infallible>(event), state));
                }

                if state.done {
                    return None;
                }

                match state.events.next().await {
                    Some(Ok(event)) => {
                        let mut chunks = Vec::new();

                        match sonic_rs::from_str::<anthropic::StreamEvent>(&event.data) {
                            Ok(upstream_event) => state.machine.process(upstream_event, &mut chunks),
                            Err(error) => {
                                log::warn!("skipping unparsable upstream event: {error}");
                            }
                        }

                        state.guard.usage(state.machine.usage());

                        for chunk in chunks {
                            state
                                .queue
                                .push_back(Event::default().data(sonic_rs::to_string(&chunk).unwrap_or_default()));
                        }
                    }
                    Some(Err(error)) => {
                        log::warn!("upstream SSE parse error: {error}");
                        continue;
                    }
                    None => {
                        state.guard.usage(state.machine.usage());
                        state.queue.push_back(Event::default().data("[DONE]"));
                        state.done = true;
                    }
                }
            }
        },
    );

    Ok(Sse::new(stream).into_response())
}
