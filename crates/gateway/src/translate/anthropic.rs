//! Inbound Anthropic Messages ⇄ Chat Completions upstream.

use serde_json::Value;

use crate::{
    error::{GatewayError, Result},
    ids,
    protocol::{anthropic, openai},
    translate::usage::NormalizedUsage,
};

/// Rewrite an inbound Messages request for a Chat Completions upstream.
pub(crate) fn chat_request(request: anthropic::MessagesRequest) -> openai::ChatCompletionRequest {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);

    if let Some(system) = &request.system {
        messages.push(openai::ChatMessage::text(openai::ChatRole::System, system.joined()));
    }

    for message in request.messages {
        match message.role {
            anthropic::Role::User => translate_user_message(message.content, &mut messages),
            anthropic::Role::Assistant => translate_assistant_message(message.content, &mut messages),
        }
    }

    let stream = request.stream;

    // Reasoning rewires the token budget: the thinking allowance is added on
    // top of the response allowance under max_completion_tokens.
    let (max_tokens, max_completion_tokens, reasoning_effort) = match &request.thinking {
        Some(thinking) if thinking.is_enabled() => match thinking.budget_tokens {
            Some(budget) => (
                None,
                Some(request.max_tokens.unwrap_or(0) + budget),
                Some("high".to_string()),
            ),
            None => (request.max_tokens, None, Some("high".to_string())),
        },
        _ => (request.max_tokens, None, None),
    };

    openai::ChatCompletionRequest {
        model: request.model,
        messages,
        max_tokens,
        max_completion_tokens,
        temperature: request.temperature,
        top_p: request.top_p,
        frequency_penalty: None,
        presence_penalty: None,
        stop: request.stop_sequences.map(openai::StopSequences::Many),
        stream,
        // A final usage chunk is required for billing.
        stream_options: (stream == Some(true)).then_some(openai::StreamOptions {
            include_usage: Some(true),
        }),
        reasoning_effort,
        tools: request.tools.map(|tools| {
            tools
                .into_iter()
                .filter(anthropic::Tool::is_custom)
                .map(|tool| openai::Tool {
                    tool_type: "function".to_string(),
                    function: openai::FunctionDef {
                        name: tool.name,
                        description: tool.description,
                        parameters: tool.input_schema,
                        strict: None,
                    },
                })
                .collect()
        }),
        tool_choice: request.tool_choice.map(|choice| match choice {
            anthropic::ToolChoice::Auto => openai::ToolChoice::Mode(openai::ToolChoiceMode::Auto),
            anthropic::ToolChoice::Any => openai::ToolChoice::Mode(openai::ToolChoiceMode::Required),
            anthropic::ToolChoice::None => openai::ToolChoice::Mode(openai::ToolChoiceMode::None),
            anthropic::ToolChoice::Tool { name } => openai::ToolChoice::Specific {
                choice_type: "function".to_string(),
                function: openai::FunctionChoice { name },
            },
        }),
        parallel_tool_calls: None,
        user: request.metadata.and_then(|metadata| metadata.user_id),
    }
}

/// Tool results become `tool` role messages, ordered before the remaining
/// content parts of the same user message.
fn translate_user_message(content: anthropic::MessageContent, messages: &mut Vec<openai::ChatMessage>) {
    let mut parts = Vec::new();

    for block in content.into_blocks() {
        match block {
            anthropic::ContentBlock::ToolResult {
                tool_use_id, content, ..
            } => messages.push(openai::ChatMessage {
                role: openai::ChatRole::Tool,
                content: Some(openai::ChatContent::Text(
                    content.map(|content| content.flattened()).unwrap_or_default(),
                )),
                tool_calls: None,
                tool_call_id: Some(tool_use_id),
            }),
            anthropic::ContentBlock::Text { text } => parts.push(openai::ContentPart::Text { text }),
            anthropic::ContentBlock::Image { source } => parts.push(openai::ContentPart::ImageUrl {
                image_url: openai::ImageUrl {
                    url: match source {
                        anthropic::ImageSource::Base64 { media_type, data } => {
                            format!("data:{media_type};base64,{data}")
                        }
                        anthropic::ImageSource::Url { url } => url,
                    },
                    detail: None,
                },
            }),
            // Thinking and unrecognised blocks have no user-side equivalent.
            _ => {}
        }
    }

    match parts.len() {
        0 => {}
        1 if matches!(parts[0], openai::ContentPart::Text { .. }) => {
            let openai::ContentPart::Text { text } = parts.remove(0) else {
                return;
            };
            messages.push(openai::ChatMessage::text(openai::ChatRole::User, text));
        }
        _ => messages.push(openai::ChatMessage {
            role: openai::ChatRole::User,
            content: Some(openai::ChatContent::Parts(parts)),
            tool_calls: None,
            tool_call_id: None,
        }),
    }
}

fn translate_assistant_message(content: anthropic::MessageContent, messages: &mut Vec<openai::ChatMessage>) {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in content.into_blocks() {
        match block {
            anthropic::ContentBlock::Text { text: fragment } => text.push_str(&fragment),
            anthropic::ContentBlock::ToolUse { id, name, input } => tool_calls.push(openai::ToolCall {
                id,
                call_type: "function".to_string(),
                function: openai::FunctionCall {
                    name,
                    arguments: serde_json::to_string(&input).unwrap_or_else(|_| "{}".to_string()),
                },
            }),
            // Thinking blocks are not replayable through Chat Completions.
            _ => {}
        }
    }

    messages.push(openai::ChatMessage {
        role: openai::ChatRole::Assistant,
        content: (!text.is_empty()).then_some(openai::ChatContent::Text(text)),
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_call_id: None,
    });
}

/// Rewrite a Chat Completions upstream answer into a Messages response.
pub(crate) fn messages_response(
    response: openai::ChatCompletionResponse,
    model: &str,
) -> Result<anthropic::MessagesResponse> {
    let Some(choice) = response.choices.into_iter().next() else {
        return Err(GatewayError::TranslationResponse(
            "chat completion contained no choices".to_string(),
        ));
    };

    let mut content = Vec::new();

    if let Some(text) = choice.message.content
        && !text.is_empty()
    {
        content.push(anthropic::ContentBlock::Text { text });
    }

    if let Some(tool_calls) = choice.message.tool_calls {
        for call in tool_calls {
            content.push(anthropic::ContentBlock::ToolUse {
                id: if call.id.is_empty() { ids::tool_use_id() } else { call.id },
                name: call.function.name,
                input: parse_arguments(&call.function.arguments),
            });
        }
    }

    let stop_reason = match choice.finish_reason {
        Some(openai::FinishReason::ToolCalls) => anthropic::StopReason::ToolUse,
        Some(openai::FinishReason::Length) => anthropic::StopReason::MaxTokens,
        _ => anthropic::StopReason::EndTurn,
    };

    let usage = response
        .usage
        .as_ref()
        .map(NormalizedUsage::from_openai)
        .unwrap_or_default();

    Ok(anthropic::MessagesResponse {
        id: ids::message_id(),
        response_type: "message".to_string(),
        role: anthropic::Role::Assistant,
        content,
        model: model.to_string(),
        stop_reason: Some(stop_reason),
        stop_sequence: None,
        usage: usage.to_anthropic(),
    })
}

/// Upstreams stream arguments as text; by the time a full response exists
/// the string should parse, but a misbehaving upstream must not take the
/// translation down with it.
pub(crate) fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }

    serde_json::from_str(raw).unwrap_or_else(|_| Value::Object(Default::default()))
}
