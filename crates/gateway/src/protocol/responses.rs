//! OpenAI Responses API wire types.
//!
//! Covers the request shape, the non-streaming response with its output
//! items, and the streaming event vocabulary, per the [Responses
//! reference](https://platform.openai.com/docs/api-reference/responses).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request body for `POST /v1/responses`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponsesRequest {
    /// Model identifier.
    pub model: String,

    /// Conversation input: a bare string or a list of typed items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<ResponsesInput>,

    /// System-level instructions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Output-token cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,

    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Nucleus sampling cutoff.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Whether to stream the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    /// Tools the model may call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ResponsesTool>>,

    /// Tool-choice directive; kept loose as the Responses surface also
    /// accepts built-in tool selectors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,

    /// Whether multiple tool calls may be emitted in one turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,

    /// Opaque end-user identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

/// Conversation input: string shorthand or item list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsesInput {
    /// Shorthand for a single user message.
    Text(String),
    /// Typed input items.
    Items(Vec<InputItem>),
}

/// One input item. Message items may omit `type` entirely, so variants are
/// discriminated structurally: function call shapes first, then anything
/// with a `role`, then an opaque fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputItem {
    /// A prior model tool invocation.
    FunctionCall(FunctionCallItem),
    /// The client-supplied result of a tool invocation.
    FunctionCallOutput(FunctionCallOutputItem),
    /// A conversation message.
    Message(MessageItem),
    /// Unrecognised item, dropped on translation.
    Unknown(Value),
}

/// `function_call` input item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCallItem {
    /// Literal `function_call`.
    #[serde(rename = "type")]
    pub item_type: FunctionCallTag,
    /// Item id assigned by the API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Call id, echoed by the matching output item.
    pub call_id: String,
    /// Function name.
    pub name: String,
    /// Arguments as a JSON string.
    pub arguments: String,
    /// Item status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Forces the `type` field to be exactly `function_call` so untagged
/// matching cannot misclassify other items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FunctionCallTag {
    /// The only value.
    #[serde(rename = "function_call")]
    FunctionCall,
}

/// `function_call_output` input item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCallOutputItem {
    /// Literal `function_call_output`.
    #[serde(rename = "type")]
    pub item_type: FunctionCallOutputTag,
    /// Call id this output answers.
    pub call_id: String,
    /// Tool output, string or parts.
    pub output: ResponsesContent,
}

/// Forces the `type` field to be exactly `function_call_output`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FunctionCallOutputTag {
    /// The only value.
    #[serde(rename = "function_call_output")]
    FunctionCallOutput,
}

/// A message input item. `type` is optional; any item carrying a `role`
/// translates as a message regardless of its declared type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageItem {
    /// `message` when present.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub item_type: Option<String>,
    /// Sender role: `system`, `developer`, `user`, or `assistant`.
    pub role: String,
    /// Message content.
    pub content: ResponsesContent,
}

/// Message content: string shorthand or typed parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsesContent {
    /// Plain string.
    Text(String),
    /// Typed parts.
    Parts(Vec<ResponsesContentPart>),
}

impl ResponsesContent {
    /// Flatten to a single string, joining text-bearing parts.
    pub fn flattened(&self) -> String {
        match self {
            ResponsesContent::Text(text) => text.clone(),
            ResponsesContent::Parts(parts) => {
                use itertools::Itertools as _;
                parts
                    .iter()
                    .filter_map(|part| part.text())
                    .join("\n")
            }
        }
    }
}

/// One content part. `input_text`, `output_text`, and `text` all carry
/// plain text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsesContentPart {
    /// Text supplied as input.
    InputText {
        /// The text content.
        text: String,
    },
    /// Text produced by a prior model turn.
    OutputText {
        /// The text content.
        text: String,
    },
    /// Bare text part.
    Text {
        /// The text content.
        text: String,
    },
    /// Forward-compatible fallback.
    #[serde(untagged)]
    Unknown(Value),
}

impl ResponsesContentPart {
    /// The text payload, when this part carries one.
    pub fn text(&self) -> Option<&str> {
        match self {
            ResponsesContentPart::InputText { text }
            | ResponsesContentPart::OutputText { text }
            | ResponsesContentPart::Text { text } => Some(text),
            ResponsesContentPart::Unknown(_) => None,
        }
    }
}

/// A tool definition. Responses function tools are flat (no nested
/// `function` object). Built-in tools (`web_search`, `file_search`, …)
/// carry other type strings and do not translate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesTool {
    /// Tool type, `function` for client-defined tools.
    #[serde(rename = "type")]
    pub tool_type: String,
    /// Function name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Natural-language description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    /// Strict schema adherence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,
}

/// Non-streaming response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesResponse {
    /// Response id, `resp_` prefixed.
    pub id: String,
    /// Always `response`.
    pub object: String,
    /// Unix creation timestamp.
    pub created_at: u64,
    /// `completed`, `in_progress`, or `incomplete`.
    pub status: String,
    /// Model that produced the response.
    pub model: String,
    /// Generated output items.
    pub output: Vec<OutputItem>,
    /// Token accounting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<ResponsesUsage>,
}

/// One output item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    /// An assistant message.
    Message {
        /// Item id.
        id: String,
        /// Item status.
        status: String,
        /// Always `assistant`.
        role: String,
        /// Message content parts.
        content: Vec<ResponsesContentPart>,
    },
    /// A tool invocation.
    FunctionCall {
        /// Item id.
        id: String,
        /// Call id, matched by a later `function_call_output`.
        call_id: String,
        /// Function name.
        name: String,
        /// Arguments as a JSON string.
        arguments: String,
        /// Item status.
        status: String,
    },
    /// Forward-compatible fallback.
    #[serde(untagged)]
    Unknown(Value),
}

/// Token accounting. Like Chat Completions, `input_tokens` includes cache
/// reads, broken out in `input_tokens_details`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ResponsesUsage {
    /// Input tokens, cache reads included.
    #[serde(default)]
    pub input_tokens: u64,
    /// Generated tokens.
    #[serde(default)]
    pub output_tokens: u64,
    /// Sum of the above.
    #[serde(default)]
    pub total_tokens: u64,
    /// Input token breakdown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens_details: Option<InputTokensDetails>,
}

/// Input token breakdown.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct InputTokensDetails {
    /// Input tokens served from the provider cache.
    #[serde(default)]
    pub cached_tokens: u64,
}

/// Streaming event vocabulary. Events are emitted as
/// `event: <type>\ndata: <json>\n\n`; the JSON repeats the type in a `type`
/// field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    /// The response object was created.
    #[serde(rename = "response.created")]
    Created {
        /// Snapshot of the response, status `in_progress`.
        response: ResponsesResponse,
    },
    /// Generation is in progress.
    #[serde(rename = "response.in_progress")]
    InProgress {
        /// Snapshot of the response.
        response: ResponsesResponse,
    },
    /// A new output item was added.
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded {
        /// Position in the output list.
        output_index: u64,
        /// The new item, initially empty.
        item: OutputItem,
    },
    /// A content part was added to a message item.
    #[serde(rename = "response.content_part.added")]
    ContentPartAdded {
        /// Id of the owning item.
        item_id: String,
        /// Position of the owning item.
        output_index: u64,
        /// Position of the part within the item.
        content_index: u64,
        /// The new part, initially empty.
        part: ResponsesContentPart,
    },
    /// Incremental output text.
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta {
        /// Id of the owning item.
        item_id: String,
        /// Position of the owning item.
        output_index: u64,
        /// Position of the part within the item.
        content_index: u64,
        /// Text fragment to append.
        delta: String,
    },
    /// Output text for a part is complete.
    #[serde(rename = "response.output_text.done")]
    OutputTextDone {
        /// Id of the owning item.
        item_id: String,
        /// Position of the owning item.
        output_index: u64,
        /// Position of the part within the item.
        content_index: u64,
        /// The accumulated text.
        text: String,
    },
    /// A content part is complete.
    #[serde(rename = "response.content_part.done")]
    ContentPartDone {
        /// Id of the owning item.
        item_id: String,
        /// Position of the owning item.
        output_index: u64,
        /// Position of the part within the item.
        content_index: u64,
        /// The completed part.
        part: ResponsesContentPart,
    },
    /// An output item is complete.
    #[serde(rename = "response.output_item.done")]
    OutputItemDone {
        /// Position in the output list.
        output_index: u64,
        /// The completed item.
        item: OutputItem,
    },
    /// Incremental function-call arguments.
    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta {
        /// Id of the owning item.
        item_id: String,
        /// Position of the owning item.
        output_index: u64,
        /// Raw argument fragment.
        delta: String,
    },
    /// Function-call arguments are complete.
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        /// Id of the owning item.
        item_id: String,
        /// Position of the owning item.
        output_index: u64,
        /// The accumulated arguments.
        arguments: String,
    },
    /// Terminal event with the full output list and usage.
    #[serde(rename = "response.completed")]
    Completed {
        /// Final response snapshot.
        response: ResponsesResponse,
    },
    /// Forward-compatible fallback.
    #[serde(untagged)]
    Unknown(Value),
}

impl StreamEvent {
    /// The SSE `event:` name this payload is emitted under.
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Created { .. } => "response.created",
            StreamEvent::InProgress { .. } => "response.in_progress",
            StreamEvent::OutputItemAdded { .. } => "response.output_item.added",
            StreamEvent::ContentPartAdded { .. } => "response.content_part.added",
            StreamEvent::OutputTextDelta { .. } => "response.output_text.delta",
            StreamEvent::OutputTextDone { .. } => "response.output_text.done",
            StreamEvent::ContentPartDone { .. } => "response.content_part.done",
            StreamEvent::OutputItemDone { .. } => "response.output_item.done",
            StreamEvent::FunctionCallArgumentsDelta { .. } => "response.function_call_arguments.delta",
            StreamEvent::FunctionCallArgumentsDone { .. } => "response.function_call_arguments.done",
            StreamEvent::Completed { .. } => "response.completed",
            StreamEvent::Unknown(_) => "response.in_progress",
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn input_items_discriminate_structurally() {
        let input: ResponsesInput = serde_json::from_value(json!([
            {"role": "user", "content": "hello"},
            {"type": "message", "role": "assistant", "content": [{"type": "output_text", "text": "hi"}]},
            {"type": "function_call", "call_id": "call_1", "name": "get_weather", "arguments": "{}"},
            {"type": "function_call_output", "call_id": "call_1", "output": "72F"},
            {"type": "reasoning", "summary": []}
        ]))
        .unwrap();

        let ResponsesInput::Items(items) = input else {
            unreachable!("expected items");
        };

        assert!(matches!(items[0], InputItem::Message(ref m) if m.role == "user"));
        assert!(matches!(items[1], InputItem::Message(ref m) if m.item_type.as_deref() == Some("message")));
        assert!(matches!(items[2], InputItem::FunctionCall(ref c) if c.name == "get_weather"));
        assert!(matches!(items[3], InputItem::FunctionCallOutput(_)));
        assert!(matches!(items[4], InputItem::Unknown(_)));
    }

    #[test]
    fn string_input_is_shorthand() {
        let input: ResponsesInput = serde_json::from_value(json!("hello")).unwrap();
        assert!(matches!(input, ResponsesInput::Text(ref t) if t == "hello"));
    }

    #[test]
    fn content_part_text_accessor_covers_all_aliases() {
        let parts: Vec<ResponsesContentPart> = serde_json::from_value(json!([
            {"type": "input_text", "text": "a"},
            {"type": "output_text", "text": "b"},
            {"type": "text", "text": "c"},
            {"type": "input_audio", "audio": {}}
        ]))
        .unwrap();

        let texts: Vec<_> = parts.iter().filter_map(|p| p.text()).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
    }

    #[test]
    fn stream_event_names_match_wire_types() {
        let event = StreamEvent::OutputTextDelta {
            item_id: "msg_1".to_string(),
            output_index: 0,
            content_index: 0,
            delta: "Hel".to_string(),
        };

        assert_eq!(event.name(), "response.output_text.delta");

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "response.output_text.delta");
        assert_eq!(json["delta"], "Hel");
    }

    #[test]
    fn parses_completed_event_usage() {
        let event: StreamEvent = serde_json::from_value(json!({
            "type": "response.completed",
            "response": {
                "id": "resp_1",
                "object": "response",
                "created_at": 1,
                "status": "completed",
                "model": "gpt-4o",
                "output": [],
                "usage": {
                    "input_tokens": 12,
                    "output_tokens": 4,
                    "total_tokens": 16,
                    "input_tokens_details": {"cached_tokens": 5}
                }
            }
        }))
        .unwrap();

        let StreamEvent::Completed { response } = event else {
            unreachable!("expected completed");
        };
        assert_eq!(response.usage.unwrap().input_tokens_details.unwrap().cached_tokens, 5);
    }
}
