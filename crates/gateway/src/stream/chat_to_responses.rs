//! Chat Completions chunks → Responses API events.
//!
//! Responses streams are built around output items. Text deltas accumulate
//! into a message item with one `output_text` part; tool calls become
//! `function_call` items. Closing a message item requires the
//! `output_text.done` → `content_part.done` → `output_item.done` sequence;
//! function-call items stay open until end of stream.

use std::collections::HashMap;

use crate::{
    ids,
    protocol::{openai, responses},
    translate::usage::NormalizedUsage,
};

/// Output items under construction, indexed by their `output_index`.
enum ItemState {
    Message {
        id: String,
        text: String,
    },
    FunctionCall {
        id: String,
        call_id: String,
        name: String,
        arguments: String,
    },
}

/// State machine translating one Chat Completions stream into one Responses
/// stream.
pub(crate) struct ChatToResponses {
    response_id: String,
    created_at: u64,
    model: String,
    started: bool,
    items: Vec<ItemState>,
    /// Index into `items` of the currently open message item.
    open_message: Option<usize>,
    /// Upstream tool-call array index → index into `items`.
    tools_by_upstream: HashMap<u32, usize>,
    finish_reason: Option<openai::FinishReason>,
    usage: Option<openai::ChatUsage>,
}

impl ChatToResponses {
    pub(crate) fn new(model: &str) -> Self {
        Self {
            response_id: ids::response_id(),
            created_at: ids::now_unix(),
            model: model.to_string(),
            started: false,
            items: Vec::new(),
            open_message: None,
            tools_by_upstream: HashMap::new(),
            finish_reason: None,
            usage: None,
        }
    }

    /// Feed one upstream chunk, appending emitted events to `out`.
    pub(crate) fn process(&mut self, chunk: openai::ChatCompletionChunk, out: &mut Vec<responses::StreamEvent>) {
        if !self.started {
            self.started = true;

            out.push(responses::StreamEvent::Created {
                response: self.snapshot("in_progress", Vec::new(), None),
            });
            out.push(responses::StreamEvent::InProgress {
                response: self.snapshot("in_progress", Vec::new(), None),
            });
        }

        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            return;
        };

        if let Some(text) = choice.delta.content
            && !text.is_empty()
        {
            self.append_text(text, out);
        }

        for call in choice.delta.tool_calls.unwrap_or_default() {
            self.process_tool_call(call, out);
        }

        if let Some(reason) = choice.finish_reason {
            self.finish_reason = Some(reason);
        }
    }

    /// End of upstream stream: close open items and emit the terminal
    /// `response.completed` with the full output list.
    pub(crate) fn finish(&mut self, out: &mut Vec<responses::StreamEvent>) {
        if !self.started {
            self.started = true;

            out.push(responses::StreamEvent::Created {
                response: self.snapshot("in_progress", Vec::new(), None),
            });
            out.push(responses::StreamEvent::InProgress {
                response: self.snapshot("in_progress", Vec::new(), None),
            });
        }

        self.close_open_message(out);

        for (output_index, item) in self.items.iter().enumerate() {
            let ItemState::FunctionCall {
                id,
                call_id,
                name,
                arguments,
            } = item
            else {
                continue;
            };

            out.push(responses::StreamEvent::FunctionCallArgumentsDone {
                item_id: id.clone(),
                output_index: output_index as u64,
                arguments: arguments.clone(),
            });
            out.push(responses::StreamEvent::OutputItemDone {
                output_index: output_index as u64,
                item: responses::OutputItem::FunctionCall {
                    id: id.clone(),
                    call_id: call_id.clone(),
                    name: name.clone(),
                    arguments: arguments.clone(),
                    status: "completed".to_string(),
                },
            });
        }

        let output = self.final_output();
        let usage = self.usage().to_responses();

        out.push(responses::StreamEvent::Completed {
            response: self.snapshot("completed", output, Some(usage)),
        });
    }

    /// Normalised usage observed so far, for the request log.
    pub(crate) fn usage(&self) -> NormalizedUsage {
        self.usage
            .as_ref()
            .map(NormalizedUsage::from_openai)
            .unwrap_or_default()
    }

    fn append_text(&mut self, text: String, out: &mut Vec<responses::StreamEvent>) {
        let index = match self.open_message {
            Some(index) => index,
            None => {
                let index = self.items.len();
                let item_id = ids::message_id();

                self.items.push(ItemState::Message {
                    id: item_id.clone(),
                    text: String::new(),
                });
                self.open_message = Some(index);

                out.push(responses::StreamEvent::OutputItemAdded {
                    output_index: index as u64,
                    item: responses::OutputItem::Message {
                        id: item_id.clone(),
                        status: "in_progress".to_string(),
                        role: "assistant".to_string(),
                        content: Vec::new(),
                    },
                });
                out.push(responses::StreamEvent::ContentPartAdded {
                    item_id,
                    output_index: index as u64,
                    content_index: 0,
                    part: responses::ResponsesContentPart::OutputText { text: String::new() },
                });

                index
            }
        };

        let ItemState::Message { id, text: accumulated } = &mut self.items[index] else {
            return;
        };

        accumulated.push_str(&text);

        out.push(responses::StreamEvent::OutputTextDelta {
            item_id: id.clone(),
            output_index: index as u64,
            content_index: 0,
            delta: text,
        });
    }

    fn process_tool_call(&mut self, call: openai::ToolCallDelta, out: &mut Vec<responses::StreamEvent>) {
        let has_id = call.id.as_deref().is_some_and(|id| !id.is_empty());

        if has_id {
            self.close_open_message(out);

            let index = self.items.len();
            let item_id = ids::function_call_item_id();
            let call_id = call.id.clone().unwrap_or_default();
            let name = call.function.as_ref().and_then(|f| f.name.clone()).unwrap_or_default();

            self.items.push(ItemState::FunctionCall {
                id: item_id.clone(),
                call_id: call_id.clone(),
                name: name.clone(),
                arguments: String::new(),
            });
            self.tools_by_upstream.insert(call.index, index);

            out.push(responses::StreamEvent::OutputItemAdded {
                output_index: index as u64,
                item: responses::OutputItem::FunctionCall {
                    id: item_id,
                    call_id,
                    name,
                    arguments: String::new(),
                    status: "in_progress".to_string(),
                },
            });
        }

        let Some(fragment) = call.function.and_then(|function| function.arguments) else {
            return;
        };

        if fragment.is_empty() {
            return;
        }

        let Some(&index) = self.tools_by_upstream.get(&call.index) else {
            log::warn!("tool-call arguments for unknown upstream index {}", call.index);
            return;
        };

        let ItemState::FunctionCall { id, arguments, .. } = &mut self.items[index] else {
            return;
        };

        arguments.push_str(&fragment);

        out.push(responses::StreamEvent::FunctionCallArgumentsDelta {
            item_id: id.clone(),
            output_index: index as u64,
            delta: fragment,
        });
    }

    fn close_open_message(&mut self, out: &mut Vec<responses::StreamEvent>) {
        let Some(index) = self.open_message.take() else {
            return;
        };

        let ItemState::Message { id, text } = &self.items[index] else {
            return;
        };

        out.push(responses::StreamEvent::OutputTextDone {
            item_id: id.clone(),
            output_index: index as u64,
            content_index: 0,
            text: text.clone(),
        });
        out.push(responses::StreamEvent::ContentPartDone {
            item_id: id.clone(),
            output_index: index as u64,
            content_index: 0,
            part: responses::ResponsesContentPart::OutputText { text: text.clone() },
        });
        out.push(responses::StreamEvent::OutputItemDone {
            output_index: index as u64,
            item: responses::OutputItem::Message {
                id: id.clone(),
                status: "completed".to_string(),
                role: "assistant".to_string(),
                content: vec![responses::ResponsesContentPart::OutputText { text: text.clone() }],
            },
        });
    }

    fn final_output(&self) -> Vec<responses::OutputItem> {
        self.items
            .iter()
            .map(|item| match item {
                ItemState::Message { id, text } => responses::OutputItem::Message {
                    id: id.clone(),
                    status: "completed".to_string(),
                    role: "assistant".to_string(),
                    content: vec![responses::ResponsesContentPart::OutputText { text: text.clone() }],
                },
                ItemState::FunctionCall {
                    id,
                    call_id,
                    name,
                    arguments,
                } => responses::OutputItem::FunctionCall {
                    id: id.clone(),
                    call_id: call_id.clone(),
                    name: name.clone(),
                    arguments: arguments.clone(),
                    status: "completed".to_string(),
                },
            })
            .collect()
    }

    fn snapshot(
        &self,
        status: &str,
        output: Vec<responses::OutputItem>,
        usage: Option<responses::ResponsesUsage>,
    ) -> responses::ResponsesResponse {
        responses::ResponsesResponse {
            id: self.response_id.clone(),
            object: "response".to_string(),
            created_at: self.created_at,
            status: status.to_string(),
            model: self.model.clone(),
            output,
            usage,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn chunk(value: serde_json::Value) -> openai::ChatCompletionChunk {
        serde_json::from_value(value).unwrap()
    }

    fn drive(chunks: Vec<serde_json::Value>) -> Vec<responses::StreamEvent> {
        let mut machine = ChatToResponses::new("gpt-4o");
        let mut out = Vec::new();

        for value in chunks {
            machine.process(chunk(value), &mut out);
        }

        machine.finish(&mut out);
        out
    }

    fn names(events: &[responses::StreamEvent]) -> Vec<&'static str> {
        events.iter().map(|event| event.name()).collect()
    }

    #[test]
    fn text_stream_produces_item_lifecycle() {
        let events = drive(vec![
            json!({"id": "c", "object": "chat.completion.chunk", "created": 1, "model": "gpt-4o",
                   "choices": [{"index": 0, "delta": {"role": "assistant"}}]}),
            json!({"id": "c", "object": "chat.completion.chunk", "created": 1, "model": "gpt-4o",
                   "choices": [{"index": 0, "delta": {"content": "Hel"}}]}),
            json!({"id": "c", "object": "chat.completion.chunk", "created": 1, "model": "gpt-4o",
                   "choices": [{"index": 0, "delta": {"content": "lo"}}, ],
                   "usage": {"prompt_tokens": 12, "completion_tokens": 4, "total_tokens": 16,
                             "prompt_tokens_details": {"cached_tokens": 5}}}),
        ]);

        assert_eq!(
            names(&events),
            vec![
                "response.created",
                "response.in_progress",
                "response.output_item.added",
                "response.content_part.added",
                "response.output_text.delta",
                "response.output_text.delta",
                "response.output_text.done",
                "response.content_part.done",
                "response.output_item.done",
                "response.completed",
            ]
        );

        let responses::StreamEvent::OutputTextDone { ref text, .. } = events[6] else {
            unreachable!("expected output_text.done");
        };
        assert_eq!(text, "Hello");

        let responses::StreamEvent::Completed { ref response } = events[9] else {
            unreachable!("expected completed");
        };
        assert_eq!(response.status, "completed");
        assert_eq!(response.output.len(), 1);
        assert_eq!(response.usage.unwrap().input_tokens_details.unwrap().cached_tokens, 5);
    }

    #[test]
    fn message_closes_before_tool_call_item_opens() {
        let events = drive(vec![
            json!({"id": "c", "object": "chat.completion.chunk", "created": 1, "model": "gpt-4o",
                   "choices": [{"index": 0, "delta": {"content": "checking"}}]}),
            json!({"id": "c", "object": "chat.completion.chunk", "created": 1, "model": "gpt-4o",
                   "choices": [{"index": 0, "delta": {"tool_calls": [{"index": 0, "id": "call_1",
                       "type": "function", "function": {"name": "get_weather", "arguments": ""}}]}}]}),
            json!({"id": "c", "object": "chat.completion.chunk", "created": 1, "model": "gpt-4o",
                   "choices": [{"index": 0, "delta": {"tool_calls": [{"index": 0,
                       "function": {"arguments": "{\"city\":\"NYC\"}"}}]}}]}),
        ]);

        assert_eq!(
            names(&events),
            vec![
                "response.created",
                "response.in_progress",
                "response.output_item.added",
                "response.content_part.added",
                "response.output_text.delta",
                // Message item closes in order before the tool item starts.
                "response.output_text.done",
                "response.content_part.done",
                "response.output_item.done",
                "response.output_item.added",
                "response.function_call_arguments.delta",
                "response.function_call_arguments.done",
                "response.output_item.done",
                "response.completed",
            ]
        );

        let responses::StreamEvent::Completed { response } = events.last().unwrap() else {
            unreachable!("expected completed");
        };
        assert_eq!(response.output.len(), 2);

        let responses::OutputItem::FunctionCall {
            ref call_id,
            ref arguments,
            ref status,
            ..
        } = response.output[1]
        else {
            unreachable!("expected function_call item");
        };
        assert_eq!(call_id, "call_1");
        assert_eq!(arguments, "{\"city\":\"NYC\"}");
        assert_eq!(status, "completed");
    }

    #[test]
    fn tool_only_stream_skips_message_item() {
        let events = drive(vec![
            json!({"id": "c", "object": "chat.completion.chunk", "created": 1, "model": "gpt-4o",
                   "choices": [{"index": 0, "delta": {"tool_calls": [{"index": 0, "id": "call_1",
                       "type": "function", "function": {"name": "lookup", "arguments": ""}}]}}]}),
        ]);

        assert_eq!(
            names(&events),
            vec![
                "response.created",
                "response.in_progress",
                "response.output_item.added",
                "response.function_call_arguments.done",
                "response.output_item.done",
                "response.completed",
            ]
        );
    }

    #[test]
    fn empty_stream_completes_with_empty_output() {
        let events = drive(vec![]);

        assert_eq!(
            names(&events),
            vec!["response.created", "response.in_progress", "response.completed"]
        );

        let responses::StreamEvent::Completed { ref response } = events[2] else {
            unreachable!("expected completed");
        };
        assert!(response.output.is_empty());
    }

    #[test]
    fn item_ids_are_stable_across_the_lifecycle() {
        let events = drive(vec![
            json!({"id": "c", "object": "chat.completion.chunk", "created": 1, "model": "gpt-4o",
                   "choices": [{"index": 0, "delta": {"content": "x"}}]}),
        ]);

        let added_id = events.iter().find_map(|event| match event {
            responses::StreamEvent::OutputItemAdded {
                item: responses::OutputItem::Message { id, .. },
                ..
            } => Some(id.clone()),
            _ => None,
        });
        let done_id = events.iter().find_map(|event| match event {
            responses::StreamEvent::OutputItemDone {
                item: responses::OutputItem::Message { id, .. },
                ..
            } => Some(id.clone()),
            _ => None,
        });

        assert_eq!(added_id, done_id);
        assert!(added_id.unwrap().starts_with("msg_"));
    }
}
