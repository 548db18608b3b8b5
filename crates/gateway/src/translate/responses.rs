//! Inbound OpenAI Responses ⇄ Chat Completions upstream.

use serde_json::Value;

use crate::{
    error::{GatewayError, Result},
    ids,
    protocol::{openai, responses},
    translate::usage::NormalizedUsage,
};

/// Rewrite an inbound Responses request for a Chat Completions upstream.
pub(crate) fn chat_request(request: responses::ResponsesRequest) -> Result<openai::ChatCompletionRequest> {
    let mut messages = Vec::new();

    if let Some(instructions) = &request.instructions
        && !instructions.is_empty()
    {
        messages.push(openai::ChatMessage::text(openai::ChatRole::System, instructions.clone()));
    }

    match request.input {
        None => {}
        Some(responses::ResponsesInput::Text(text)) => {
            messages.push(openai::ChatMessage::text(openai::ChatRole::User, text));
        }
        Some(responses::ResponsesInput::Items(items)) => {
            for item in items {
                match item {
                    responses::InputItem::Message(message) => messages.push(translate_message_item(message)?),
                    responses::InputItem::FunctionCall(call) => attach_function_call(&mut messages, call),
                    responses::InputItem::FunctionCallOutput(output) => messages.push(openai::ChatMessage {
                        role: openai::ChatRole::Tool,
                        content: Some(openai::ChatContent::Text(output.output.flattened())),
                        tool_calls: None,
                        tool_call_id: Some(output.call_id),
                    }),
                    // Built-in and future item kinds without a role have no
                    // Chat Completions equivalent.
                    responses::InputItem::Unknown(_) => {}
                }
            }
        }
    }

    let stream = request.stream;

    Ok(openai::ChatCompletionRequest {
        model: request.model,
        messages,
        max_tokens: None,
        max_completion_tokens: request.max_output_tokens,
        temperature: request.temperature,
        top_p: request.top_p,
        frequency_penalty: None,
        presence_penalty: None,
        stop: None,
        stream,
        stream_options: (stream == Some(true)).then_some(openai::StreamOptions {
            include_usage: Some(true),
        }),
        reasoning_effort: None,
        tools: translate_tools(request.tools),
        tool_choice: request.tool_choice.and_then(translate_tool_choice),
        parallel_tool_calls: request.parallel_tool_calls,
        user: request.user,
    })
}

fn translate_message_item(message: responses::MessageItem) -> Result<openai::ChatMessage> {
    let role = match message.role.as_str() {
        "system" => openai::ChatRole::System,
        "developer" => openai::ChatRole::Developer,
        "user" => openai::ChatRole::User,
        "assistant" => openai::ChatRole::Assistant,
        other => {
            return Err(GatewayError::InvalidRequest(format!(
                "unrecognized input message role '{other}'"
            )));
        }
    };

    let content = match message.content {
        responses::ResponsesContent::Text(text) => openai::ChatContent::Text(text),
        responses::ResponsesContent::Parts(parts) => {
            let mut texts: Vec<String> = parts
                .iter()
                .filter_map(|part| part.text().map(str::to_string))
                .collect();

            if texts.len() == 1 {
                openai::ChatContent::Text(texts.remove(0))
            } else {
                openai::ChatContent::Parts(
                    texts
                        .into_iter()
                        .map(|text| openai::ContentPart::Text { text })
                        .collect(),
                )
            }
        }
    };

    Ok(openai::ChatMessage {
        role,
        content: Some(content),
        tool_calls: None,
        tool_call_id: None,
    })
}

/// Function-call items attach to the preceding assistant message, creating
/// one when the conversation has none yet.
fn attach_function_call(messages: &mut Vec<openai::ChatMessage>, call: responses::FunctionCallItem) {
    let tool_call = openai::ToolCall {
        id: call.call_id,
        call_type: "function".to_string(),
        function: openai::FunctionCall {
            name: call.name,
            arguments: call.arguments,
        },
    };

    if let Some(last) = messages.last_mut()
        && last.role == openai::ChatRole::Assistant
    {
        last.tool_calls.get_or_insert_with(Vec::new).push(tool_call);
        return;
    }

    messages.push(openai::ChatMessage {
        role: openai::ChatRole::Assistant,
        content: None,
        tool_calls: Some(vec![tool_call]),
        tool_call_id: None,
    });
}

/// Only `function` tools translate; built-in tools (`web_search`,
/// `file_search`, …) are dropped silently.
fn translate_tools(tools: Option<Vec<responses::ResponsesTool>>) -> Option<Vec<openai::Tool>> {
    let translated: Vec<openai::Tool> = tools?
        .into_iter()
        .filter(|tool| tool.tool_type == "function")
        .filter_map(|tool| {
            Some(openai::Tool {
                tool_type: "function".to_string(),
                function: openai::FunctionDef {
                    name: tool.name?,
                    description: tool.description,
                    parameters: tool.parameters,
                    strict: tool.strict,
                },
            })
        })
        .collect();

    (!translated.is_empty()).then_some(translated)
}

/// Responses selects a specific function flat (`{"type":"function","name"}`)
/// where Chat nests it under a `function` object.
fn translate_tool_choice(choice: Value) -> Option<openai::ToolChoice> {
    match choice {
        Value::String(mode) => match mode.as_str() {
            "auto" => Some(openai::ToolChoice::Mode(openai::ToolChoiceMode::Auto)),
            "none" => Some(openai::ToolChoice::Mode(openai::ToolChoiceMode::None)),
            "required" => Some(openai::ToolChoice::Mode(openai::ToolChoiceMode::Required)),
            _ => None,
        },
        Value::Object(object) => {
            if object.get("type").and_then(Value::as_str) != Some("function") {
                return None;
            }

            let name = object.get("name").and_then(Value::as_str)?;

            Some(openai::ToolChoice::Specific {
                choice_type: "function".to_string(),
                function: openai::FunctionChoice {
                    name: name.to_string(),
                },
            })
        }
        _ => None,
    }
}

/// Rewrite a Chat Completions upstream answer into a Responses response.
pub(crate) fn responses_response(
    response: openai::ChatCompletionResponse,
    model: &str,
) -> Result<responses::ResponsesResponse> {
    let Some(choice) = response.choices.into_iter().next() else {
        return Err(GatewayError::TranslationResponse(
            "chat completion contained no choices".to_string(),
        ));
    };

    let mut output = Vec::new();

    if let Some(text) = choice.message.content
        && !text.is_empty()
    {
        output.push(responses::OutputItem::Message {
            id: ids::message_id(),
            status: "completed".to_string(),
            role: "assistant".to_string(),
            content: vec![responses::ResponsesContentPart::OutputText { text }],
        });
    }

    for call in choice.message.tool_calls.unwrap_or_default() {
        output.push(responses::OutputItem::FunctionCall {
            id: ids::function_call_item_id(),
            call_id: call.id,
            name: call.function.name,
            arguments: call.function.arguments,
            status: "completed".to_string(),
        });
    }

    let usage = response.usage.as_ref().map(NormalizedUsage::from_openai);

    Ok(responses::ResponsesResponse {
        id: ids::response_id(),
        object: "response".to_string(),
        created_at: ids::now_unix(),
        status: "completed".to_string(),
        model: model.to_string(),
        output,
        usage: usage.map(NormalizedUsage::to_responses),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn request_from_json(value: serde_json::Value) -> responses::ResponsesRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn string_input_becomes_user_message() {
        let request = request_from_json(json!({
            "model": "gpt-4o",
            "instructions": "be terse",
            "input": "hello",
            "max_output_tokens": 128
        }));

        let chat = chat_request(request).unwrap();

        assert_eq!(chat.messages.len(), 2);
        assert_eq!(chat.messages[0].role, openai::ChatRole::System);
        assert_eq!(chat.messages[1].role, openai::ChatRole::User);
        assert_eq!(chat.max_completion_tokens, Some(128));
    }

    #[test]
    fn function_call_items_attach_to_preceding_assistant() {
        let request = request_from_json(json!({
            "model": "gpt-4o",
            "input": [
                {"role": "user", "content": "weather?"},
                {"type": "message", "role": "assistant", "content": [{"type": "output_text", "text": "checking"}]},
                {"type": "function_call", "call_id": "call_1", "name": "get_weather", "arguments": "{}"},
                {"type": "function_call_output", "call_id": "call_1", "output": "72F"}
            ]
        }));

        let chat = chat_request(request).unwrap();

        assert_eq!(chat.messages.len(), 3);
        assert_eq!(chat.messages[1].role, openai::ChatRole::Assistant);
        assert_eq!(chat.messages[1].tool_calls.as_ref().unwrap()[0].id, "call_1");
        assert_eq!(chat.messages[2].role, openai::ChatRole::Tool);
        assert_eq!(chat.messages[2].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn orphan_function_call_creates_assistant_message() {
        let request = request_from_json(json!({
            "model": "gpt-4o",
            "input": [
                {"type": "function_call", "call_id": "call_9", "name": "lookup", "arguments": "{\"q\":1}"}
            ]
        }));

        let chat = chat_request(request).unwrap();

        assert_eq!(chat.messages.len(), 1);
        assert_eq!(chat.messages[0].role, openai::ChatRole::Assistant);
        assert!(chat.messages[0].content.is_none());
    }

    #[test]
    fn built_in_tools_and_unknown_items_are_dropped() {
        let request = request_from_json(json!({
            "model": "gpt-4o",
            "input": [
                {"role": "user", "content": "search for cats"},
                {"type": "reasoning", "summary": []}
            ],
            "tools": [
                {"type": "web_search"},
                {"type": "function", "name": "lookup", "parameters": {"type": "object"}}
            ]
        }));

        let chat = chat_request(request).unwrap();

        assert_eq!(chat.messages.len(), 1);
        let tools = chat.tools.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].function.name, "lookup");
    }

    #[test]
    fn unknown_role_is_rejected() {
        let request = request_from_json(json!({
            "model": "gpt-4o",
            "input": [{"role": "narrator", "content": "meanwhile"}]
        }));

        assert!(matches!(chat_request(request), Err(GatewayError::InvalidRequest(_))));
    }

    #[test]
    fn flat_tool_choice_is_nested_for_chat() {
        let request = request_from_json(json!({
            "model": "gpt-4o",
            "input": "hi",
            "tool_choice": {"type": "function", "name": "lookup"}
        }));

        let chat = chat_request(request).unwrap();

        assert_eq!(
            chat.tool_choice,
            Some(openai::ToolChoice::Specific {
                choice_type: "function".to_string(),
                function: openai::FunctionChoice {
                    name: "lookup".to_string()
                }
            })
        );
    }

    #[test]
    fn chat_response_becomes_output_items() {
        let response: openai::ChatCompletionResponse = serde_json::from_value(json!({
            "id": "chatcmpl-abc",
            "object": "chat.completion",
            "created": 1,
            "model": "gpt-4o",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "Sunny.",
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "get_weather", "arguments": "{\"city\":\"NYC\"}"}
                    }]
                },
                "finish_reason": "stop"
            }],
            "usage": {
                "prompt_tokens": 12,
                "completion_tokens": 4,
                "total_tokens": 16,
                "prompt_tokens_details": {"cached_tokens": 5}
            }
        }))
        .unwrap();

        let translated = responses_response(response, "gpt-4o").unwrap();

        assert!(translated.id.starts_with("resp_"));
        assert_eq!(translated.status, "completed");
        assert_eq!(translated.output.len(), 2);

        let responses::OutputItem::Message { ref content, .. } = translated.output[0] else {
            unreachable!("expected message item");
        };
        assert_eq!(content[0].text(), Some("Sunny."));

        let responses::OutputItem::FunctionCall { ref call_id, .. } = translated.output[1] else {
            unreachable!("expected function_call item");
        };
        assert_eq!(call_id, "call_1");

        let usage = translated.usage.unwrap();
        assert_eq!(usage.input_tokens, 12);
        assert_eq!(usage.input_tokens_details.unwrap().cached_tokens, 5);
    }
}
