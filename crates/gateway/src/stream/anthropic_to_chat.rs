//! Anthropic Messages events → Chat Completions chunks.
//!
//! All chunks share one synthetic `chatcmpl-` id and creation timestamp.
//! The terminal chunk carries the mapped finish reason and final usage; the
//! dispatch layer appends the literal `data: [DONE]` after the stream ends.

use std::collections::HashMap;

use crate::{
    ids,
    protocol::{anthropic, openai},
    translate::{self, usage::NormalizedUsage},
};

/// State machine translating one Anthropic Messages stream into one Chat
/// Completions stream.
pub(crate) struct AnthropicToChat {
    id: String,
    created: u64,
    model: String,
    /// Content-block index → position in the chat tool_calls array.
    tool_calls: HashMap<u64, u32>,
    next_tool_index: u32,
    usage: NormalizedUsage,
    stop_reason: Option<anthropic::StopReason>,
}

impl AnthropicToChat {
    pub(crate) fn new(model: &str) -> Self {
        Self {
            id: ids::completion_id(),
            created: ids::now_unix(),
            model: model.to_string(),
            tool_calls: HashMap::new(),
            next_tool_index: 0,
            usage: NormalizedUsage::default(),
            stop_reason: None,
        }
    }

    /// Feed one upstream event, appending emitted chunks to `out`.
    pub(crate) fn process(&mut self, event: anthropic::StreamEvent, out: &mut Vec<openai::ChatCompletionChunk>) {
        match event {
            anthropic::StreamEvent::MessageStart { message } => {
                if !message.model.is_empty() {
                    self.model = message.model.clone();
                }

                self.usage = NormalizedUsage::from_anthropic(&message.usage);

                out.push(openai::ChatCompletionChunk::delta(
                    &self.id,
                    &self.model,
                    self.created,
                    openai::ChunkDelta {
                        role: Some(openai::ChatRole::Assistant),
                        ..Default::default()
                    },
                ));
            }

            anthropic::StreamEvent::ContentBlockStart { index, content_block } => {
                // Text and thinking blocks emit nothing until their first
                // delta; tool blocks announce id and name immediately.
                let anthropic::ContentBlock::ToolUse { id, name, .. } = content_block else {
                    return;
                };

                let tool_index = self.next_tool_index;
                self.next_tool_index += 1;
                self.tool_calls.insert(index, tool_index);

                out.push(openai::ChatCompletionChunk::delta(
                    &self.id,
                    &self.model,
                    self.created,
                    openai::ChunkDelta {
                        tool_calls: Some(vec![openai::ToolCallDelta {
                            index: tool_index,
                            id: Some(id),
                            call_type: Some("function".to_string()),
                            function: Some(openai::FunctionDelta {
                                name: Some(name),
                                arguments: Some(String::new()),
                            }),
                        }]),
                        ..Default::default()
                    },
                ));
            }

            anthropic::StreamEvent::ContentBlockDelta { index, delta } => match delta {
                anthropic::BlockDelta::TextDelta { text } => {
                    out.push(openai::ChatCompletionChunk::delta(
                        &self.id,
                        &self.model,
                        self.created,
                        openai::ChunkDelta {
                            content: Some(text),
                            ..Default::default()
                        },
                    ));
                }
                anthropic::BlockDelta::InputJsonDelta { partial_json } => {
                    let Some(&tool_index) = self.tool_calls.get(&index) else {
                        log::warn!("input_json_delta for unknown content block {index}");
                        return;
                    };

                    out.push(openai::ChatCompletionChunk::delta(
                        &self.id,
                        &self.model,
                        self.created,
                        openai::ChunkDelta {
                            tool_calls: Some(vec![openai::ToolCallDelta {
                                index: tool_index,
                                id: None,
                                call_type: None,
                                function: Some(openai::FunctionDelta {
                                    name: None,
                                    arguments: Some(partial_json),
                                }),
                            }]),
                            ..Default::default()
                        },
                    ));
                }
                anthropic::BlockDelta::ThinkingDelta { thinking } => {
                    out.push(openai::ChatCompletionChunk::delta(
                        &self.id,
                        &self.model,
                        self.created,
                        openai::ChunkDelta {
                            reasoning_content: Some(thinking),
                            ..Default::default()
                        },
                    ));
                }
                anthropic::BlockDelta::SignatureDelta { .. } | anthropic::BlockDelta::Unknown(_) => {}
            },

            anthropic::StreamEvent::MessageDelta { delta, usage } => {
                if let Some(usage) = usage {
                    self.usage.output_tokens = usage.output_tokens;

                    if usage.input_tokens > 0 {
                        self.usage.input_tokens = usage.input_tokens;
                    }
                    if let Some(cache_read) = usage.cache_read_input_tokens {
                        self.usage.cache_read_tokens = cache_read;
                    }
                    if let Some(cache_creation) = usage.cache_creation_input_tokens {
                        self.usage.cache_creation_tokens = cache_creation;
                    }
                }

                if delta.stop_reason.is_some() {
                    self.stop_reason = delta.stop_reason;
                }
            }

            anthropic::StreamEvent::MessageStop => {
                let mut chunk = openai::ChatCompletionChunk::delta(
                    &self.id,
                    &self.model,
                    self.created,
                    openai::ChunkDelta::default(),
                );
                chunk.choices[0].finish_reason =
                    Some(translate::openai::finish_reason(self.stop_reason.as_ref()));
                chunk.usage = Some(self.usage.to_openai());

                out.push(chunk);
            }

            anthropic::StreamEvent::Error { error } => {
                log::error!("upstream stream error: {} - {}", error.error_type, error.message);
            }

            anthropic::StreamEvent::ContentBlockStop { .. }
            | anthropic::StreamEvent::Ping
            | anthropic::StreamEvent::Unknown(_) => {}
        }
    }

    /// Normalised usage observed so far, for the request log.
    pub(crate) fn usage(&self) -> NormalizedUsage {
        self.usage
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn event(value: serde_json::Value) -> anthropic::StreamEvent {
        serde_json::from_value(value).unwrap()
    }

    fn drive(events: Vec<serde_json::Value>) -> (Vec<openai::ChatCompletionChunk>, AnthropicToChat) {
        let mut machine = AnthropicToChat::new("claude-sonnet");
        let mut out = Vec::new();

        for value in events {
            machine.process(event(value), &mut out);
        }

        (out, machine)
    }

    fn full_stream() -> Vec<serde_json::Value> {
        vec![
            json!({"type": "message_start", "message": {
                "id": "msg_01", "type": "message", "role": "assistant", "content": [],
                "model": "claude-sonnet-4", "usage": {"input_tokens": 11, "output_tokens": 0,
                "cache_read_input_tokens": 3}}}),
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hel"}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "lo"}}),
            json!({"type": "content_block_stop", "index": 0}),
            json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"},
                   "usage": {"output_tokens": 2}}),
            json!({"type": "message_stop"}),
        ]
    }

    #[test]
    fn chunks_share_one_id_and_timestamp() {
        let (chunks, _) = drive(full_stream());

        assert!(chunks.len() >= 3);
        assert!(chunks[0].id.starts_with("chatcmpl-"));
        assert!(chunks.iter().all(|chunk| chunk.id == chunks[0].id));
        assert!(chunks.iter().all(|chunk| chunk.created == chunks[0].created));
        assert!(chunks.iter().all(|chunk| chunk.model == "claude-sonnet-4"));
    }

    #[test]
    fn first_chunk_sets_role_and_terminal_chunk_sets_finish() {
        let (chunks, machine) = drive(full_stream());

        assert_eq!(chunks[0].choices[0].delta.role, Some(openai::ChatRole::Assistant));

        let texts: Vec<_> = chunks
            .iter()
            .filter_map(|chunk| chunk.choices.first().and_then(|c| c.delta.content.as_deref()))
            .collect();
        assert_eq!(texts, vec!["Hel", "lo"]);

        let last = chunks.last().unwrap();
        assert_eq!(last.choices[0].finish_reason, Some(openai::FinishReason::Stop));

        let usage = last.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 14, "prompt includes cache reads");
        assert_eq!(usage.completion_tokens, 2);
        assert_eq!(usage.prompt_tokens_details.unwrap().cached_tokens, 3);

        let normalized = machine.usage();
        assert_eq!(normalized.input_tokens, 11);
        assert_eq!(normalized.output_tokens, 2);
        assert_eq!(normalized.cache_read_tokens, 3);
    }

    #[test]
    fn tool_use_blocks_become_indexed_tool_call_deltas() {
        let (chunks, _) = drive(vec![
            json!({"type": "message_start", "message": {
                "id": "msg_01", "type": "message", "role": "assistant", "content": [],
                "model": "claude-sonnet-4", "usage": {"input_tokens": 5, "output_tokens": 0}}}),
            json!({"type": "content_block_start", "index": 0, "content_block":
                {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {}}}),
            json!({"type": "content_block_delta", "index": 0, "delta":
                {"type": "input_json_delta", "partial_json": "{\"ci"}}),
            json!({"type": "content_block_delta", "index": 0, "delta":
                {"type": "input_json_delta", "partial_json": "ty\":\"NYC\"}"}}),
            json!({"type": "content_block_stop", "index": 0}),
            json!({"type": "content_block_start", "index": 1, "content_block":
                {"type": "tool_use", "id": "toolu_2", "name": "get_time", "input": {}}}),
            json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"},
                   "usage": {"output_tokens": 9}}),
            json!({"type": "message_stop"}),
        ]);

        let starts: Vec<_> = chunks
            .iter()
            .filter_map(|chunk| chunk.choices.first())
            .filter_map(|choice| choice.delta.tool_calls.as_ref())
            .flatten()
            .filter(|delta| delta.id.is_some())
            .map(|delta| (delta.index, delta.id.clone().unwrap()))
            .collect();
        assert_eq!(starts, vec![(0, "toolu_1".to_string()), (1, "toolu_2".to_string())]);

        let fragments: Vec<_> = chunks
            .iter()
            .filter_map(|chunk| chunk.choices.first())
            .filter_map(|choice| choice.delta.tool_calls.as_ref())
            .flatten()
            .filter(|delta| delta.id.is_none())
            .filter_map(|delta| delta.function.as_ref()?.arguments.clone())
            .collect();
        assert_eq!(fragments, vec!["{\"ci", "ty\":\"NYC\"}"]);

        let last = chunks.last().unwrap();
        assert_eq!(last.choices[0].finish_reason, Some(openai::FinishReason::ToolCalls));
    }

    #[test]
    fn thinking_deltas_become_reasoning_content() {
        let (chunks, _) = drive(vec![
            json!({"type": "message_start", "message": {
                "id": "msg_01", "type": "message", "role": "assistant", "content": [],
                "model": "claude-sonnet-4", "usage": {"input_tokens": 5, "output_tokens": 0}}}),
            json!({"type": "content_block_start", "index": 0, "content_block":
                {"type": "thinking", "thinking": ""}}),
            json!({"type": "content_block_delta", "index": 0, "delta":
                {"type": "thinking_delta", "thinking": "step 1"}}),
        ]);

        let reasoning: Vec<_> = chunks
            .iter()
            .filter_map(|chunk| chunk.choices.first().and_then(|c| c.delta.reasoning_content.as_deref()))
            .collect();
        assert_eq!(reasoning, vec!["step 1"]);
    }

    #[test]
    fn pings_and_unknown_events_emit_nothing() {
        let (chunks, _) = drive(vec![
            json!({"type": "message_start", "message": {
                "id": "msg_01", "type": "message", "role": "assistant", "content": [],
                "model": "claude-sonnet-4", "usage": {"input_tokens": 5, "output_tokens": 0}}}),
            json!({"type": "ping"}),
            json!({"type": "brand_new_event", "payload": 7}),
        ]);

        assert_eq!(chunks.len(), 1);
    }
}
