//! Chat Completions chunks → Anthropic Messages events.
//!
//! Chat streams are flat deltas; Anthropic streams are structured around
//! content blocks. The machine opens and closes blocks as the chunk content
//! switches type, guaranteeing that every `content_block_start` index gets
//! exactly one `content_block_stop` before the stream terminates.

use std::collections::HashMap;

use crate::{
    ids,
    protocol::{anthropic, openai},
    translate::usage::NormalizedUsage,
};

/// The block currently open on the downstream side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBlock {
    None,
    Text(u64),
    Thinking(u64),
    ToolUse(u64),
}

/// State machine translating one Chat Completions stream into one Anthropic
/// Messages stream.
pub(crate) struct ChatToAnthropic {
    model: String,
    message_id: String,
    started: bool,
    block: OpenBlock,
    next_index: u64,
    /// Upstream tool-call array index → emitted content-block index.
    tool_blocks: HashMap<u32, u64>,
    finish_reason: Option<openai::FinishReason>,
    usage: Option<openai::ChatUsage>,
}

impl ChatToAnthropic {
    pub(crate) fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            message_id: ids::message_id(),
            started: false,
            block: OpenBlock::None,
            next_index: 0,
            tool_blocks: HashMap::new(),
            finish_reason: None,
            usage: None,
        }
    }

    /// Feed one upstream chunk, appending emitted events to `out`.
    pub(crate) fn process(&mut self, chunk: openai::ChatCompletionChunk, out: &mut Vec<anthropic::StreamEvent>) {
        if !self.started {
            self.started = true;

            out.push(anthropic::StreamEvent::MessageStart {
                message: Box::new(anthropic::StreamMessageStart {
                    id: self.message_id.clone(),
                    message_type: "message".to_string(),
                    role: anthropic::Role::Assistant,
                    content: Vec::new(),
                    model: self.model.clone(),
                    stop_reason: None,
                    stop_sequence: None,
                    usage: anthropic::Usage::default(),
                }),
            });
            out.push(anthropic::StreamEvent::Ping);
        }

        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            // Usage-only chunk.
            return;
        };

        if let Some(reasoning) = choice.delta.reasoning_content
            && !reasoning.is_empty()
        {
            let index = self.ensure_thinking_block(out);
            out.push(anthropic::StreamEvent::ContentBlockDelta {
                index,
                delta: anthropic::BlockDelta::ThinkingDelta { thinking: reasoning },
            });
        }

        if let Some(text) = choice.delta.content
            && !text.is_empty()
        {
            let index = self.ensure_text_block(out);
            out.push(anthropic::StreamEvent::ContentBlockDelta {
                index,
                delta: anthropic::BlockDelta::TextDelta { text },
            });
        }

        for call in choice.delta.tool_calls.unwrap_or_default() {
            self.process_tool_call(call, out);
        }

        if let Some(reason) = choice.finish_reason {
            // Deferred until end-of-stream so trailing usage chunks are seen.
            self.finish_reason = Some(reason);
        }
    }

    /// End of upstream stream: close the open block and emit the terminal
    /// events with normalised usage.
    pub(crate) fn finish(&mut self, out: &mut Vec<anthropic::StreamEvent>) {
        if !self.started {
            // Nothing arrived; still emit a complete, empty message.
            self.started = true;

            out.push(anthropic::StreamEvent::MessageStart {
                message: Box::new(anthropic::StreamMessageStart {
                    id: self.message_id.clone(),
                    message_type: "message".to_string(),
                    role: anthropic::Role::Assistant,
                    content: Vec::new(),
                    model: self.model.clone(),
                    stop_reason: None,
                    stop_sequence: None,
                    usage: anthropic::Usage::default(),
                }),
            });
            out.push(anthropic::StreamEvent::Ping);
        }

        self.close_open_block(out);

        let usage = self.usage();

        out.push(anthropic::StreamEvent::MessageDelta {
            delta: anthropic::MessageDeltaData {
                stop_reason: Some(self.stop_reason()),
                stop_sequence: None,
            },
            usage: Some(usage.to_anthropic()),
        });
        out.push(anthropic::StreamEvent::MessageStop);
    }

    /// Normalised usage observed so far, for the request log.
    pub(crate) fn usage(&self) -> NormalizedUsage {
        self.usage
            .as_ref()
            .map(NormalizedUsage::from_openai)
            .unwrap_or_default()
    }

    fn stop_reason(&self) -> anthropic::StopReason {
        match self.finish_reason {
            Some(openai::FinishReason::ToolCalls) => anthropic::StopReason::ToolUse,
            Some(openai::FinishReason::Length) => anthropic::StopReason::MaxTokens,
            _ => anthropic::StopReason::EndTurn,
        }
    }

    fn process_tool_call(&mut self, call: openai::ToolCallDelta, out: &mut Vec<anthropic::StreamEvent>) {
        let has_id = call.id.as_deref().is_some_and(|id| !id.is_empty());

        if has_id {
            // A fresh id opens a new tool_use block one past the prior block.
            self.close_open_block(out);

            let index = self.next_index;
            self.next_index += 1;
            self.block = OpenBlock::ToolUse(index);
            self.tool_blocks.insert(call.index, index);

            out.push(anthropic::StreamEvent::ContentBlockStart {
                index,
                content_block: anthropic::ContentBlock::ToolUse {
                    id: call.id.unwrap_or_default(),
                    name: call.function.as_ref().and_then(|f| f.name.clone()).unwrap_or_default(),
                    input: serde_json::Value::Object(Default::default()),
                },
            });
        }

        // Argument fragments are forwarded verbatim, never re-parsed.
        let Some(fragment) = call.function.and_then(|function| function.arguments) else {
            return;
        };

        if fragment.is_empty() {
            return;
        }

        let Some(&index) = self.tool_blocks.get(&call.index) else {
            log::warn!("tool-call arguments for unknown upstream index {}", call.index);
            return;
        };

        if self.block != OpenBlock::ToolUse(index) {
            log::warn!("dropping tool-call arguments for closed block {index}");
            return;
        }

        out.push(anthropic::StreamEvent::ContentBlockDelta {
            index,
            delta: anthropic::BlockDelta::InputJsonDelta {
                partial_json: fragment,
            },
        });
    }

    fn ensure_text_block(&mut self, out: &mut Vec<anthropic::StreamEvent>) -> u64 {
        if let OpenBlock::Text(index) = self.block {
            return index;
        }

        self.close_open_block(out);

        let index = self.next_index;
        self.next_index += 1;
        self.block = OpenBlock::Text(index);

        out.push(anthropic::StreamEvent::ContentBlockStart {
            index,
            content_block: anthropic::ContentBlock::Text { text: String::new() },
        });

        index
    }

    fn ensure_thinking_block(&mut self, out: &mut Vec<anthropic::StreamEvent>) -> u64 {
        if let OpenBlock::Thinking(index) = self.block {
            return index;
        }

        self.close_open_block(out);

        let index = self.next_index;
        self.next_index += 1;
        self.block = OpenBlock::Thinking(index);

        out.push(anthropic::StreamEvent::ContentBlockStart {
            index,
            content_block: anthropic::ContentBlock::Thinking {
                thinking: String::new(),
                signature: None,
            },
        });

        index
    }

    fn close_open_block(&mut self, out: &mut Vec<anthropic::StreamEvent>) {
        let index = match self.block {
            OpenBlock::None => return,
            OpenBlock::Text(index) | OpenBlock::Thinking(index) | OpenBlock::ToolUse(index) => index,
        };

        out.push(anthropic::StreamEvent::ContentBlockStop { index });
        self.block = OpenBlock::None;
    }
}
