//! Inbound Chat Completions ⇄ Anthropic Messages upstream.

use crate::{
    error::{GatewayError, Result},
    ids,
    protocol::{anthropic, openai},
    translate::{anthropic::parse_arguments, usage::NormalizedUsage},
};

/// Anthropic requires a token cap; applied when the inbound Chat request
/// sets neither `max_tokens` nor `max_completion_tokens`.
const DEFAULT_MAX_TOKENS: u32 = 8192;

/// Rewrite an inbound Chat Completions request for an Anthropic upstream.
pub(crate) fn messages_request(request: openai::ChatCompletionRequest) -> Result<anthropic::MessagesRequest> {
    let mut system_parts = Vec::new();
    let mut messages: Vec<anthropic::Message> = Vec::with_capacity(request.messages.len());
    // Tool results accumulate until the next user turn and lead it.
    let mut pending_tool_results: Vec<anthropic::ContentBlock> = Vec::new();

    for message in request.messages {
        match message.role {
            openai::ChatRole::System | openai::ChatRole::Developer => {
                if let Some(content) = message.content {
                    system_parts.push(content.flattened());
                }
            }
            openai::ChatRole::Tool => {
                let Some(tool_use_id) = message.tool_call_id else {
                    return Err(GatewayError::InvalidRequest(
                        "tool message is missing tool_call_id".to_string(),
                    ));
                };

                pending_tool_results.push(anthropic::ContentBlock::ToolResult {
                    tool_use_id,
                    content: Some(anthropic::ToolResultContent::Text(
                        message.content.map(|content| content.flattened()).unwrap_or_default(),
                    )),
                    is_error: None,
                });
            }
            openai::ChatRole::User => {
                let mut blocks = std::mem::take(&mut pending_tool_results);
                blocks.extend(user_blocks(message.content)?);
                push_merged(&mut messages, anthropic::Role::User, blocks);
            }
            openai::ChatRole::Assistant => {
                flush_tool_results(&mut messages, &mut pending_tool_results);
                push_merged(&mut messages, anthropic::Role::Assistant, assistant_blocks(message));
            }
        }
    }

    flush_tool_results(&mut messages, &mut pending_tool_results);

    let thinking = request.reasoning_effort.as_deref().and_then(|effort| {
        let budget_tokens = match effort {
            "low" => 5_000,
            "medium" => 10_000,
            "high" => 20_000,
            _ => return None,
        };

        Some(anthropic::ThinkingConfig {
            kind: "enabled".to_string(),
            budget_tokens: Some(budget_tokens),
        })
    });

    Ok(anthropic::MessagesRequest {
        model: request.model,
        messages,
        system: (!system_parts.is_empty()).then(|| anthropic::SystemPrompt::Text(system_parts.join("\n\n"))),
        max_tokens: Some(
            request
                .max_completion_tokens
                .or(request.max_tokens)
                .unwrap_or(DEFAULT_MAX_TOKENS),
        ),
        temperature: request.temperature,
        top_p: request.top_p,
        top_k: None,
        stop_sequences: request.stop.map(openai::StopSequences::into_vec),
        stream: request.stream,
        tools: request.tools.map(|tools| {
            tools
                .into_iter()
                .map(|tool| anthropic::Tool {
                    tool_type: None,
                    name: tool.function.name,
                    description: tool.function.description,
                    input_schema: tool.function.parameters,
                })
                .collect()
        }),
        tool_choice: request.tool_choice.map(|choice| match choice {
            openai::ToolChoice::Mode(openai::ToolChoiceMode::Auto) => anthropic::ToolChoice::Auto,
            openai::ToolChoice::Mode(openai::ToolChoiceMode::Required) => anthropic::ToolChoice::Any,
            openai::ToolChoice::Mode(openai::ToolChoiceMode::None) => anthropic::ToolChoice::None,
            openai::ToolChoice::Specific { function, .. } => anthropic::ToolChoice::Tool { name: function.name },
        }),
        thinking,
        metadata: request.user.map(|user_id| anthropic::Metadata {
            user_id: Some(user_id),
        }),
    })
}

/// Push a message, merging into the previous one when the role repeats so
/// translated conversations always alternate strictly.
fn push_merged(messages: &mut Vec<anthropic::Message>, role: anthropic::Role, blocks: Vec<anthropic::ContentBlock>) {
    if blocks.is_empty() {
        return;
    }

    if let Some(last) = messages.last_mut()
        && last.role == role
    {
        let existing = std::mem::replace(&mut last.content, anthropic::MessageContent::Blocks(Vec::new()));
        let mut merged = existing.into_blocks();
        merged.extend(blocks);
        last.content = anthropic::MessageContent::Blocks(merged);
        return;
    }

    messages.push(anthropic::Message {
        role,
        content: anthropic::MessageContent::Blocks(blocks),
    });
}

/// Tool results with no following user message still need a user turn.
fn flush_tool_results(messages: &mut Vec<anthropic::Message>, pending: &mut Vec<anthropic::ContentBlock>) {
    if pending.is_empty() {
        return;
    }

    push_merged(messages, anthropic::Role::User, std::mem::take(pending));
}

fn user_blocks(content: Option<openai::ChatContent>) -> Result<Vec<anthropic::ContentBlock>> {
    let mut blocks = Vec::new();

    match content {
        None => {}
        Some(openai::ChatContent::Text(text)) => blocks.push(anthropic::ContentBlock::Text { text }),
        Some(openai::ChatContent::Parts(parts)) => {
            for part in parts {
                match part {
                    openai::ContentPart::Text { text } => blocks.push(anthropic::ContentBlock::Text { text }),
                    openai::ContentPart::ImageUrl { image_url } => blocks.push(anthropic::ContentBlock::Image {
                        source: image_source(&image_url.url)?,
                    }),
                    openai::ContentPart::Unknown(_) => {}
                }
            }
        }
    }

    Ok(blocks)
}

/// Decompose a data URL into inline base64 source; anything else is passed
/// as a URL reference.
fn image_source(url: &str) -> Result<anthropic::ImageSource> {
    let Some(rest) = url.strip_prefix("data:") else {
        return Ok(anthropic::ImageSource::Url { url: url.to_string() });
    };

    let (media_type, data) = rest
        .split_once(";base64,")
        .ok_or_else(|| GatewayError::InvalidRequest(format!("unsupported image data URL: {}", truncate(url, 64))))?;

    Ok(anthropic::ImageSource::Base64 {
        media_type: media_type.to_string(),
        data: data.to_string(),
    })
}

fn truncate(s: &str, max: usize) -> &str {
    let mut end = s.len().min(max);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn assistant_blocks(message: openai::ChatMessage) -> Vec<anthropic::ContentBlock> {
    let mut blocks = Vec::new();

    if let Some(content) = message.content {
        let text = content.flattened();
        if !text.is_empty() {
            blocks.push(anthropic::ContentBlock::Text { text });
        }
    }

    for call in message.tool_calls.unwrap_or_default() {
        blocks.push(anthropic::ContentBlock::ToolUse {
            id: call.id,
            name: call.function.name,
            input: parse_arguments(&call.function.arguments),
        });
    }

    blocks
}

/// Rewrite an Anthropic upstream answer into a Chat Completions response.
pub(crate) fn chat_response(response: anthropic::MessagesResponse) -> openai::ChatCompletionResponse {
    let mut text = String::new();
    let mut reasoning = String::new();
    let mut tool_calls = Vec::new();

    for block in response.content {
        match block {
            anthropic::ContentBlock::Text { text: fragment } => text.push_str(&fragment),
            anthropic::ContentBlock::Thinking { thinking, .. } => reasoning.push_str(&thinking),
            anthropic::ContentBlock::ToolUse { id, name, input } => tool_calls.push(openai::ToolCall {
                id,
                call_type: "function".to_string(),
                function: openai::FunctionCall {
                    name,
                    arguments: serde_json::to_string(&input).unwrap_or_else(|_| "{}".to_string()),
                },
            }),
            _ => {}
        }
    }

    let finish_reason = finish_reason(response.stop_reason.as_ref());
    let usage = NormalizedUsage::from_anthropic(&response.usage);

    openai::ChatCompletionResponse {
        id: ids::completion_id(),
        object: "chat.completion".to_string(),
        created: ids::now_unix(),
        model: response.model,
        choices: vec![openai::ChatChoice {
            index: 0,
            message: openai::ResponseMessage {
                role: openai::ChatRole::Assistant,
                content: (!text.is_empty()).then_some(text),
                reasoning_content: (!reasoning.is_empty()).then_some(reasoning),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            },
            finish_reason: Some(finish_reason),
        }],
        usage: Some(usage.to_openai()),
    }
}

/// Inverse of the stop-reason map used on the Messages side.
pub(crate) fn finish_reason(stop_reason: Option<&anthropic::StopReason>) -> openai::FinishReason {
    match stop_reason {
        Some(anthropic::StopReason::ToolUse) => openai::FinishReason::ToolCalls,
        Some(anthropic::StopReason::MaxTokens) => openai::FinishReason::Length,
        Some(anthropic::StopReason::EndTurn | anthropic::StopReason::StopSequence) | None => {
            openai::FinishReason::Stop
        }
        Some(anthropic::StopReason::Other(_)) => openai::FinishReason::Stop,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn request_from_json(value: serde_json::Value) -> openai::ChatCompletionRequest {
        serde_json::from_value(value).unwrap()
    }

    fn roles(request: &anthropic::MessagesRequest) -> Vec<anthropic::Role> {
        request.messages.iter().map(|m| m.role).collect()
    }

    #[test]
    fn tool_messages_merge_into_next_user_turn() {
        let request = request_from_json(json!({
            "model": "claude-sonnet",
            "messages": [
                {"role": "user", "content": "weather?"},
                {"role": "assistant", "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "get_weather", "arguments": "{\"city\":\"NYC\"}"}
                }]},
                {"role": "tool", "tool_call_id": "call_1", "content": "72F"},
                {"role": "user", "content": "thanks"}
            ]
        }));

        let translated = messages_request(request).unwrap();

        assert_eq!(
            roles(&translated),
            vec![anthropic::Role::User, anthropic::Role::Assistant, anthropic::Role::User]
        );

        // The final user turn leads with the tool result.
        let anthropic::MessageContent::Blocks(ref blocks) = translated.messages[2].content else {
            unreachable!("expected blocks");
        };
        assert!(matches!(
            blocks[0],
            anthropic::ContentBlock::ToolResult { ref tool_use_id, .. } if tool_use_id == "call_1"
        ));
        assert!(matches!(blocks[1], anthropic::ContentBlock::Text { ref text } if text == "thanks"));

        // Tool-call arguments were parsed into structured input.
        let anthropic::MessageContent::Blocks(ref blocks) = translated.messages[1].content else {
            unreachable!("expected blocks");
        };
        assert!(matches!(
            blocks[0],
            anthropic::ContentBlock::ToolUse { ref input, .. } if input == &json!({"city": "NYC"})
        ));
    }

    #[test]
    fn roles_alternate_after_merging_consecutive_users() {
        let request = request_from_json(json!({
            "model": "claude-sonnet",
            "messages": [
                {"role": "user", "content": "one"},
                {"role": "user", "content": "two"},
                {"role": "assistant", "content": "ack"},
                {"role": "user", "content": "three"}
            ]
        }));

        let translated = messages_request(request).unwrap();

        assert_eq!(
            roles(&translated),
            vec![anthropic::Role::User, anthropic::Role::Assistant, anthropic::Role::User]
        );

        let anthropic::MessageContent::Blocks(ref blocks) = translated.messages[0].content else {
            unreachable!("expected blocks");
        };
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn system_and_developer_messages_join_as_system() {
        let request = request_from_json(json!({
            "model": "claude-sonnet",
            "messages": [
                {"role": "system", "content": "be terse"},
                {"role": "developer", "content": "answer in french"},
                {"role": "user", "content": "hi"}
            ]
        }));

        let translated = messages_request(request).unwrap();

        assert_eq!(
            translated.system.as_ref().map(|s| s.joined()).as_deref(),
            Some("be terse\n\nanswer in french")
        );
        assert_eq!(translated.messages.len(), 1);
    }

    #[test]
    fn max_tokens_defaults_when_unset() {
        let request = request_from_json(json!({
            "model": "claude-sonnet",
            "messages": [{"role": "user", "content": "hi"}]
        }));

        assert_eq!(messages_request(request).unwrap().max_tokens, Some(8192));

        let request = request_from_json(json!({
            "model": "claude-sonnet",
            "max_tokens": 100,
            "max_completion_tokens": 200,
            "messages": [{"role": "user", "content": "hi"}]
        }));

        assert_eq!(messages_request(request).unwrap().max_tokens, Some(200));
    }

    #[test]
    fn reasoning_effort_maps_to_thinking_budget() {
        for (effort, budget) in [("low", 5_000), ("medium", 10_000), ("high", 20_000)] {
            let request = request_from_json(json!({
                "model": "claude-sonnet",
                "reasoning_effort": effort,
                "messages": [{"role": "user", "content": "hi"}]
            }));

            let thinking = messages_request(request).unwrap().thinking.unwrap();
            assert_eq!(thinking.kind, "enabled");
            assert_eq!(thinking.budget_tokens, Some(budget));
        }
    }

    #[test]
    fn data_urls_are_decomposed() {
        let request = request_from_json(json!({
            "model": "claude-sonnet",
            "messages": [{"role": "user", "content": [
                {"type": "text", "text": "look"},
                {"type": "image_url", "image_url": {"url": "data:image/jpeg;base64,Zm9v"}},
                {"type": "image_url", "image_url": {"url": "https://example.com/cat.jpg"}}
            ]}]
        }));

        let translated = messages_request(request).unwrap();

        let anthropic::MessageContent::Blocks(ref blocks) = translated.messages[0].content else {
            unreachable!("expected blocks");
        };

        assert!(matches!(
            blocks[1],
            anthropic::ContentBlock::Image {
                source: anthropic::ImageSource::Base64 { ref media_type, ref data }
            } if media_type == "image/jpeg" && data == "Zm9v"
        ));
        assert!(matches!(
            blocks[2],
            anthropic::ContentBlock::Image { source: anthropic::ImageSource::Url { .. } }
        ));
    }

    #[test]
    fn tool_message_without_call_id_is_rejected() {
        let request = request_from_json(json!({
            "model": "claude-sonnet",
            "messages": [{"role": "tool", "content": "orphan"}]
        }));

        assert!(matches!(
            messages_request(request),
            Err(GatewayError::InvalidRequest(_))
        ));
    }

    #[test]
    fn required_tool_choice_becomes_any() {
        let request = request_from_json(json!({
            "model": "claude-sonnet",
            "messages": [{"role": "user", "content": "hi"}],
            "tool_choice": "required"
        }));

        assert_eq!(
            messages_request(request).unwrap().tool_choice,
            Some(anthropic::ToolChoice::Any)
        );

        let request = request_from_json(json!({
            "model": "claude-sonnet",
            "messages": [{"role": "user", "content": "hi"}],
            "tool_choice": {"type": "function", "function": {"name": "get_weather"}}
        }));

        assert_eq!(
            messages_request(request).unwrap().tool_choice,
            Some(anthropic::ToolChoice::Tool {
                name: "get_weather".to_string()
            })
        );
    }

    #[test]
    fn invalid_tool_arguments_become_empty_object() {
        let request = request_from_json(json!({
            "model": "claude-sonnet",
            "messages": [
                {"role": "assistant", "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "f", "arguments": "{broken"}
                }]}
            ]
        }));

        let translated = messages_request(request).unwrap();

        let anthropic::MessageContent::Blocks(ref blocks) = translated.messages[0].content else {
            unreachable!("expected blocks");
        };
        assert!(matches!(
            blocks[0],
            anthropic::ContentBlock::ToolUse { ref input, .. } if input == &json!({})
        ));
    }

    #[test]
    fn tool_calls_round_trip_between_dialects() {
        let original: anthropic::MessagesRequest = serde_json::from_value(json!({
            "model": "claude-sonnet",
            "max_tokens": 128,
            "messages": [
                {"role": "user", "content": "weather?"},
                {"role": "assistant", "content": [
                    {"type": "text", "text": "checking"},
                    {"type": "tool_use", "id": "call_1", "name": "get_weather", "input": {"city": "NYC", "units": "F"}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "call_1", "content": "72F"}
                ]}
            ]
        }))
        .unwrap();

        let chat = crate::translate::anthropic::chat_request(original);
        let back = messages_request(chat).unwrap();

        assert_eq!(
            roles(&back),
            vec![anthropic::Role::User, anthropic::Role::Assistant, anthropic::Role::User]
        );

        let anthropic::MessageContent::Blocks(ref blocks) = back.messages[1].content else {
            unreachable!("expected blocks");
        };
        assert!(matches!(
            blocks[1],
            anthropic::ContentBlock::ToolUse { ref id, ref name, ref input }
                if id == "call_1" && name == "get_weather" && input == &json!({"city": "NYC", "units": "F"})
        ));

        let anthropic::MessageContent::Blocks(ref blocks) = back.messages[2].content else {
            unreachable!("expected blocks");
        };
        assert!(matches!(
            blocks[0],
            anthropic::ContentBlock::ToolResult { ref tool_use_id, .. } if tool_use_id == "call_1"
        ));
    }

    #[test]
    fn anthropic_response_translates_to_chat() {
        let response: anthropic::MessagesResponse = serde_json::from_value(json!({
            "id": "msg_01",
            "type": "message",
            "role": "assistant",
            "model": "claude-sonnet",
            "content": [
                {"type": "thinking", "thinking": "hmm"},
                {"type": "text", "text": "It is "},
                {"type": "text", "text": "72F."},
                {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {"city": "NYC"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 11, "output_tokens": 2, "cache_read_input_tokens": 3}
        }))
        .unwrap();

        let chat = chat_response(response);

        assert!(chat.id.starts_with("chatcmpl-"));
        let choice = &chat.choices[0];
        assert_eq!(choice.finish_reason, Some(openai::FinishReason::ToolCalls));
        assert_eq!(choice.message.content.as_deref(), Some("It is 72F."));
        assert_eq!(choice.message.reasoning_content.as_deref(), Some("hmm"));
        assert_eq!(
            choice.message.tool_calls.as_ref().unwrap()[0].function.arguments,
            r#"{"city":"NYC"}"#
        );

        let usage = chat.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 14);
        assert_eq!(usage.completion_tokens, 2);
        assert_eq!(usage.prompt_tokens_details.unwrap().cached_tokens, 3);
    }
}
