//! Anthropic Messages API wire types.
//!
//! Request and response shapes follow the [Messages API
//! reference](https://docs.anthropic.com/en/api/messages), the streaming
//! event vocabulary follows the [streaming
//! reference](https://docs.anthropic.com/en/api/messages-streaming).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request body for `POST /v1/messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesRequest {
    /// Model identifier.
    pub model: String,

    /// Alternating user/assistant conversation turns.
    pub messages: Vec<Message>,

    /// System prompt, either a plain string or text blocks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemPrompt>,

    /// Maximum tokens to generate. Required by the provider; optional here
    /// so translation can supply a default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Nucleus sampling cutoff.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Top-k sampling. No Chat Completions equivalent; dropped on
    /// translation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,

    /// Sequences that halt generation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,

    /// Whether to stream the response as SSE.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    /// Tools the model may call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,

    /// How the model should use tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,

    /// Extended thinking configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingConfig>,

    /// Request metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

/// System prompt: the API accepts a bare string or an array of text blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    /// Plain string form.
    Text(String),
    /// Block-array form.
    Blocks(Vec<SystemBlock>),
}

impl SystemPrompt {
    /// Concatenate all text content with blank lines between blocks.
    pub fn joined(&self) -> String {
        match self {
            SystemPrompt::Text(text) => text.clone(),
            SystemPrompt::Blocks(blocks) => {
                use itertools::Itertools as _;
                blocks.iter().map(|block| block.text.as_str()).join("\n\n")
            }
        }
    }
}

/// A single system prompt block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemBlock {
    /// Always `text`.
    #[serde(rename = "type", default = "text_block_type")]
    pub block_type: String,
    /// The block text.
    pub text: String,
}

fn text_block_type() -> String {
    "text".to_string()
}

/// A conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Sender role.
    pub role: Role,
    /// String or content-block content.
    pub content: MessageContent,
}

/// Message author role. Anthropic conversations only carry user and
/// assistant turns; system prompts live on the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// End-user input.
    User,
    /// Model output.
    Assistant,
}

/// Message content: the API accepts a bare string or typed blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain string, shorthand for a single text block.
    Text(String),
    /// Typed content blocks.
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// View the content as blocks, expanding the string shorthand.
    pub fn into_blocks(self) -> Vec<ContentBlock> {
        match self {
            MessageContent::Text(text) => vec![ContentBlock::Text { text }],
            MessageContent::Blocks(blocks) => blocks,
        }
    }
}

/// A typed unit of content inside a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// The text content.
        text: String,
    },
    /// Image input.
    Image {
        /// Inline data or URL reference.
        source: ImageSource,
    },
    /// Tool invocation requested by the model.
    ToolUse {
        /// Call id, correlated by later `tool_result` blocks.
        id: String,
        /// Tool name.
        name: String,
        /// Structured arguments.
        input: Value,
    },
    /// Result of a tool invocation, supplied by the client.
    ToolResult {
        /// Id of the `tool_use` block this answers.
        tool_use_id: String,
        /// Result payload.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<ToolResultContent>,
        /// Whether the tool errored.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    /// Extended-thinking block emitted by the model.
    Thinking {
        /// The thinking text.
        thinking: String,
        /// Integrity signature over the thinking content.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    /// Forward-compatible fallback for unrecognised block types.
    #[serde(untagged)]
    Unknown(Value),
}

/// Image payload source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ImageSource {
    /// Inline base64 data.
    Base64 {
        /// MIME type, e.g. `image/png`.
        media_type: String,
        /// Base64 payload without a data-URL prefix.
        data: String,
    },
    /// Externally hosted image.
    Url {
        /// HTTP(S) URL.
        url: String,
    },
}

/// Tool result payload: a bare string or typed blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    /// Plain string result.
    Text(String),
    /// Block-array result.
    Blocks(Vec<ContentBlock>),
}

impl ToolResultContent {
    /// Flatten the result into a single string, joining text blocks and
    /// ignoring non-text blocks.
    pub fn flattened(&self) -> String {
        match self {
            ToolResultContent::Text(text) => text.clone(),
            ToolResultContent::Blocks(blocks) => {
                use itertools::Itertools as _;
                blocks
                    .iter()
                    .filter_map(|block| match block {
                        ContentBlock::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .join("\n")
            }
        }
    }
}

/// A tool definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    /// Optional tool type. Empty and `custom` are client-defined tools;
    /// anything else (server tools like `web_search_20250305`) has no Chat
    /// Completions equivalent.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub tool_type: Option<String>,
    /// Tool name.
    pub name: String,
    /// Natural-language description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

impl Tool {
    /// Whether this is a client-defined tool that can translate to a Chat
    /// Completions function.
    pub fn is_custom(&self) -> bool {
        match self.tool_type.as_deref() {
            None | Some("") | Some("custom") => true,
            Some(_) => false,
        }
    }
}

/// Tool-choice directive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolChoice {
    /// Model decides whether to call tools.
    Auto,
    /// Model must call at least one tool.
    Any,
    /// Model must not call tools.
    None,
    /// Model must call the named tool.
    Tool {
        /// Name of the required tool.
        name: String,
    },
}

/// Extended thinking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkingConfig {
    /// `enabled` or `disabled`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Token budget for thinking when enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_tokens: Option<u32>,
}

impl ThinkingConfig {
    /// Whether extended thinking is requested.
    pub fn is_enabled(&self) -> bool {
        self.kind == "enabled"
    }
}

/// Request metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// Opaque end-user identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Response body for a non-streaming `POST /v1/messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesResponse {
    /// Message id, `msg_` prefixed.
    pub id: String,
    /// Always `message`.
    #[serde(rename = "type")]
    pub response_type: String,
    /// Always `assistant`.
    pub role: Role,
    /// Generated content blocks.
    pub content: Vec<ContentBlock>,
    /// Model that produced the response.
    pub model: String,
    /// Why generation stopped.
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
    /// Which stop sequence matched, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequence: Option<String>,
    /// Token accounting.
    pub usage: Usage,
}

/// Reason the model stopped generating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of turn.
    EndTurn,
    /// Hit the `max_tokens` limit.
    MaxTokens,
    /// Matched a stop sequence.
    StopSequence,
    /// The model invoked a tool.
    ToolUse,
    /// Forward-compatible fallback.
    #[serde(untagged)]
    Other(String),
}

/// Token accounting in the Anthropic convention: `input_tokens` excludes
/// cache reads, which are reported separately.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Fresh input tokens.
    #[serde(default)]
    pub input_tokens: u64,
    /// Generated tokens.
    #[serde(default)]
    pub output_tokens: u64,
    /// Tokens spent writing prompt-cache entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_creation_input_tokens: Option<u64>,
    /// Prompt tokens served from cache.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_input_tokens: Option<u64>,
}

/// Error envelope: `{"type":"error","error":{"type":...,"message":...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always `error`.
    #[serde(rename = "type")]
    pub response_type: String,
    /// Error detail.
    pub error: ErrorDetail,
}

impl ErrorResponse {
    /// Build an envelope from a type string and message.
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            response_type: "error".to_string(),
            error: ErrorDetail {
                error_type: error_type.into(),
                message: message.into(),
            },
        }
    }
}

/// The inner error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// One of `invalid_request_error`, `authentication_error`,
    /// `permission_error`, `not_found_error`, `rate_limit_error`,
    /// `api_error`.
    #[serde(rename = "type")]
    pub error_type: String,
    /// Human-readable message.
    pub message: String,
}

/// Server-sent event vocabulary of the streaming Messages API.
///
/// Each variant maps to a concrete SSE `event:` name. Streams begin with
/// [`StreamEvent::MessageStart`], carry one or more content-block lifecycles
/// (`content_block_start` → `content_block_delta*` → `content_block_stop`),
/// then finish with [`StreamEvent::MessageDelta`] and
/// [`StreamEvent::MessageStop`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Announces the streamed message with its id, model, and initial usage.
    MessageStart {
        /// Message metadata; `content` is always empty here.
        message: Box<StreamMessageStart>,
    },
    /// A content block begins at `index`.
    ContentBlockStart {
        /// Block index, strictly increasing from 0.
        index: u64,
        /// Initial block state.
        content_block: ContentBlock,
    },
    /// Incremental update to the block at `index`.
    ContentBlockDelta {
        /// Block index.
        index: u64,
        /// The delta payload.
        delta: BlockDelta,
    },
    /// The block at `index` is complete.
    ContentBlockStop {
        /// Block index.
        index: u64,
    },
    /// Top-level updates: stop reason and cumulative usage.
    MessageDelta {
        /// Stop reason / stop sequence updates.
        delta: MessageDeltaData,
        /// Cumulative usage counters.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
    /// Terminal event; nothing follows.
    MessageStop,
    /// Keep-alive heartbeat; may appear anywhere.
    Ping,
    /// In-stream error, e.g. `overloaded_error`.
    Error {
        /// Error detail.
        error: ErrorDetail,
    },
    /// Forward-compatible fallback for unrecognised events.
    #[serde(untagged)]
    Unknown(Value),
}

impl StreamEvent {
    /// The SSE `event:` name this payload is emitted under.
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::MessageStart { .. } => "message_start",
            StreamEvent::ContentBlockStart { .. } => "content_block_start",
            StreamEvent::ContentBlockDelta { .. } => "content_block_delta",
            StreamEvent::ContentBlockStop { .. } => "content_block_stop",
            StreamEvent::MessageDelta { .. } => "message_delta",
            StreamEvent::MessageStop => "message_stop",
            StreamEvent::Ping => "ping",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Unknown(_) => "message_delta",
        }
    }
}

/// Payload of the `message_start` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamMessageStart {
    /// Message id.
    pub id: String,
    /// Always `message`.
    #[serde(rename = "type", default = "message_type")]
    pub message_type: String,
    /// Always `assistant`.
    pub role: Role,
    /// Empty at stream start.
    pub content: Vec<ContentBlock>,
    /// Model emitting the stream.
    pub model: String,
    /// Stop reason, always null at start.
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
    /// Stop sequence, always null at start.
    #[serde(default)]
    pub stop_sequence: Option<String>,
    /// Usage snapshot; input tokens are final, output tokens accumulate in
    /// later `message_delta` events.
    pub usage: Usage,
}

fn message_type() -> String {
    "message".to_string()
}

/// Delta payload of a `content_block_delta` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockDelta {
    /// Text fragment for a text block.
    TextDelta {
        /// Fragment to append.
        text: String,
    },
    /// Partial JSON for a tool-use block's arguments. Fragments are not
    /// valid JSON on their own and must only be concatenated.
    InputJsonDelta {
        /// Raw argument fragment.
        partial_json: String,
    },
    /// Thinking fragment for a thinking block.
    ThinkingDelta {
        /// Fragment to append.
        thinking: String,
    },
    /// Signature for a completed thinking block.
    SignatureDelta {
        /// Signature fragment.
        signature: String,
    },
    /// Forward-compatible fallback.
    #[serde(untagged)]
    Unknown(Value),
}

/// Inner `delta` object of a `message_delta` event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageDeltaData {
    /// Stop reason, set when generation ended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    /// Stop sequence that matched, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequence: Option<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn deserialize_request_with_string_shorthand() {
        let request: MessagesRequest = serde_json::from_value(json!({
            "model": "claude-sonnet",
            "system": "Be terse.",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 32,
            "stream": true,
            "unknown_field": {"ignored": true}
        }))
        .unwrap();

        assert_eq!(request.model, "claude-sonnet");
        assert_eq!(request.system.unwrap().joined(), "Be terse.");
        assert!(matches!(request.messages[0].content, MessageContent::Text(ref t) if t == "hi"));
    }

    #[test]
    fn system_blocks_join_with_blank_lines() {
        let system: SystemPrompt = serde_json::from_value(json!([
            {"type": "text", "text": "one"},
            {"type": "text", "text": "two"}
        ]))
        .unwrap();

        assert_eq!(system.joined(), "one\n\ntwo");
    }

    #[test]
    fn deserialize_tool_use_and_result_blocks() {
        let blocks: Vec<ContentBlock> = serde_json::from_value(json!([
            {"type": "tool_use", "id": "call_1", "name": "get_weather", "input": {"city": "NYC"}},
            {"type": "tool_result", "tool_use_id": "call_1", "content": "72F"},
            {"type": "tool_result", "tool_use_id": "call_1", "content": [{"type": "text", "text": "72F"}]},
            {"type": "server_side_thing", "payload": 1}
        ]))
        .unwrap();

        assert!(matches!(blocks[0], ContentBlock::ToolUse { ref name, .. } if name == "get_weather"));

        let ContentBlock::ToolResult { content: Some(ref content), .. } = blocks[1] else {
            unreachable!("expected tool_result");
        };
        assert_eq!(content.flattened(), "72F");

        let ContentBlock::ToolResult { content: Some(ref content), .. } = blocks[2] else {
            unreachable!("expected tool_result");
        };
        assert_eq!(content.flattened(), "72F");

        assert!(matches!(blocks[3], ContentBlock::Unknown(_)));
    }

    #[test]
    fn stop_reason_keeps_unknown_values() {
        let reason: StopReason = serde_json::from_value(json!("model_context_window_exceeded")).unwrap();
        assert_eq!(reason, StopReason::Other("model_context_window_exceeded".to_string()));
    }

    #[test]
    fn stream_events_round_trip_by_name() {
        let event: StreamEvent = serde_json::from_str(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{\"ci"}}"#,
        )
        .unwrap();

        assert_eq!(event.name(), "content_block_delta");

        let StreamEvent::ContentBlockDelta {
            index,
            delta: BlockDelta::InputJsonDelta { ref partial_json },
        } = event
        else {
            unreachable!("expected input_json_delta");
        };
        assert_eq!(index, 0);
        assert_eq!(partial_json, "{\"ci");
    }

    #[test]
    fn serialize_message_delta_omits_empty_fields() {
        let event = StreamEvent::MessageDelta {
            delta: MessageDeltaData {
                stop_reason: Some(StopReason::EndTurn),
                stop_sequence: None,
            },
            usage: Some(Usage {
                output_tokens: 2,
                ..Default::default()
            }),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            json!({
                "type": "message_delta",
                "delta": {"stop_reason": "end_turn"},
                "usage": {"input_tokens": 0, "output_tokens": 2}
            })
        );
    }

    #[test]
    fn unknown_stream_event_is_preserved() {
        let event: StreamEvent =
            serde_json::from_str(r#"{"type":"content_block_annotation","index":4,"annotation":{}}"#).unwrap();
        assert!(matches!(event, StreamEvent::Unknown(_)));
    }
}
