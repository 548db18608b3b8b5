//! `POST /v1/messages` — inbound Anthropic Messages dialect.

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
    error::{AnthropicResult, GatewayError, Result},
    handlers::{
        LogCell, LogGuard, PassthroughKind, RequestLog, finish_passthrough, finish_request, read_body, resolve_model,
        upstream_http_error,
    },
    protocol::{anthropic, openai},
    stream::chat_to_anthropic::ChatToAnthropic,
    translate,
    upstream::anthropic_headers,
};

/// Handle an Anthropic Messages request: passthrough to Anthropic-dialect
/// upstreams, translate through Chat Completions otherwise.
pub(crate) async fn messages(
    State(gateway): State<Arc<Gateway>>,
    Extension(key): Extension<AuthenticatedKey>,
    request: axum::extract::Request,
) -> AnthropicResult<Response> {
    let (parts, body) = request.into_parts();
    let mut cell = LogCell::new(RequestLog::new(key.0.id, &parts, Dialect::Anthropic));

    let result = handle(&gateway, &mut cell, &parts, body).await;

    finish_request(&gateway, cell, result).map_err(Into::into)
}

async fn handle(
    gateway: &Gateway,
    cell: &mut LogCell,
    parts: &http::request::Parts,
    body: axum::body::Body,
) -> Result<Response> {
    let bytes = read_body(gateway, parts, body).await?;

    let request: anthropic::MessagesRequest = sonic_rs::from_slice(&bytes)
        .map_err(|error| GatewayError::InvalidRequest(format!("failed to parse request body: {error}")))?;

    if let Some(metadata) = &request.metadata
        && let Ok(value) = serde_json::to_value(metadata)
    {
        cell.with(|log| log.metadata(value));
    }

    let resolved = resolve_model(gateway, cell, &request.model).await?;
    let client = gateway.clients.get(&resolved)?;

    match resolved.dialect {
        Dialect::Anthropic => {
            // Matching dialects: the original bytes go through untouched.
            let headers = anthropic_headers(client.credential())?;

            cell.with(RequestLog::mark_overhead);
            let response = client
                .send_raw("/v1/messages", parts.uri.query(), headers, bytes)
                .await?;

            finish_passthrough(gateway, cell, response, PassthroughKind::Anthropic).await
        }
        Dialect::Openai => {
            let streaming = request.stream == Some(true);
            let model = request.model.clone();

            let chat_request = translate::anthropic::chat_request(request);
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

            let translated = translate::anthropic::messages_response(chat_response, &model)?;

            cell.with(|log| {
                log.status(200);
                log.usage(crate::translate::usage::NormalizedUsage::from_anthropic(&translated.usage));
            });

            Ok(Json(translated).into_response())
        }
    }
}

/// Drive the Chat→Anthropic state machine over the upstream SSE stream.
/// Events are emitted as `event: <type>\ndata: <json>` pairs and flushed as
/// they are produced; the log guard rides in the stream state.
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
    let machine = ChatToAnthropic::new(model);
    let events = response.bytes_stream().eventsource();

    struct StreamState<S> {
        events: S,
        machine: ChatToAnthropic,
        queue: VecDeque<anthropic::StreamEvent>,
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
