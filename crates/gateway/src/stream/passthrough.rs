//! Opportunistic usage extraction from passthrough streams.
//!
//! When the inbound and upstream dialects match, bytes are forwarded
//! untouched; billing still needs token counts. The scraper watches the
//! byte stream on the side, reassembles `data:` lines across chunk
//! boundaries, and runs a cheap byte test for the few event types that
//! carry usage before paying for a JSON parse. The line buffer is bounded:
//! lines beyond the cap are discarded wholesale rather than grown.

use store::Dialect;

use crate::{
    protocol::{anthropic, openai, responses},
    translate::usage::NormalizedUsage,
};

const INITIAL_LINE_CAPACITY: usize = 64 * 1024;
const MAX_LINE_BYTES: usize = 8 * 1024 * 1024;

/// Byte-test needles. Matching the quoted literal keeps false positives out
/// of ordinary text content that merely mentions an event name.
const ANTHROPIC_MESSAGE_START: &[u8] = b"\"message_start\"";
const ANTHROPIC_MESSAGE_DELTA: &[u8] = b"\"message_delta\"";
const RESPONSES_CREATED: &[u8] = b"\"response.created\"";
const RESPONSES_COMPLETED: &[u8] = b"\"response.completed\"";
const CHAT_USAGE: &[u8] = b"\"usage\"";

/// Side-channel usage observer for a passthrough SSE stream.
pub(crate) struct UsageScraper {
    dialect: Dialect,
    /// Responses passthrough uses the same `Dialect::Openai` upstream as
    /// Chat; this flag picks the event vocabulary.
    responses: bool,
    line: Vec<u8>,
    discarding: bool,
    usage: NormalizedUsage,
    saw_usage: bool,
}

impl UsageScraper {
    pub(crate) fn anthropic() -> Self {
        Self::new(Dialect::Anthropic, false)
    }

    pub(crate) fn chat() -> Self {
        Self::new(Dialect::Openai, false)
    }

    pub(crate) fn responses() -> Self {
        Self::new(Dialect::Openai, true)
    }

    fn new(dialect: Dialect, responses: bool) -> Self {
        Self {
            dialect,
            responses,
            line: Vec::with_capacity(INITIAL_LINE_CAPACITY),
            discarding: false,
            usage: NormalizedUsage::default(),
            saw_usage: false,
        }
    }

    /// Observe one forwarded chunk. Never alters the bytes.
    pub(crate) fn observe(&mut self, chunk: &[u8]) {
        let mut rest = chunk;

        while let Some(newline) = rest.iter().position(|&b| b == b'\n') {
            let (head, tail) = rest.split_at(newline);
            rest = &tail[1..];

            if !self.discarding {
                self.push_bytes(head);

                if !self.discarding {
                    self.handle_line();
                }
            }

            // The newline terminates the line, oversized or not.
            self.line.clear();
            self.discarding = false;
        }

        if !self.discarding {
            self.push_bytes(rest);
        }
    }

    /// Usage observed so far, for the request log.
    pub(crate) fn usage(&self) -> NormalizedUsage {
        self.usage
    }

    /// Whether any usage-bearing event was seen.
    pub(crate) fn saw_usage(&self) -> bool {
        self.saw_usage
    }

    fn push_bytes(&mut self, bytes: &[u8]) {
        if self.line.len() + bytes.len() > MAX_LINE_BYTES {
            self.line.clear();
            self.discarding = true;
            return;
        }

        self.line.extend_from_slice(bytes);
    }

    fn handle_line(&mut self) {
        let line = self.line.strip_suffix(b"\r").unwrap_or(&self.line);

        let Some(data) = line.strip_prefix(b"data:") else {
            return;
        };

        let data = if data.first() == Some(&b' ') { &data[1..] } else { data };

        if data == b"[DONE]" {
            return;
        }

        match self.dialect {
            Dialect::Anthropic => {
                if !contains(data, ANTHROPIC_MESSAGE_START) && !contains(data, ANTHROPIC_MESSAGE_DELTA) {
                    return;
                }

                match sonic_rs::from_slice::<anthropic::StreamEvent>(data) {
                    Ok(anthropic::StreamEvent::MessageStart { message }) => {
                        let usage = NormalizedUsage::from_anthropic(&message.usage);
                        self.usage.input_tokens = usage.input_tokens;
                        self.usage.cache_creation_tokens = usage.cache_creation_tokens;
                        self.usage.cache_read_tokens = usage.cache_read_tokens;
                        self.saw_usage = true;
                    }
                    Ok(anthropic::StreamEvent::MessageDelta {
                        usage: Some(usage), ..
                    }) => {
                        self.usage.output_tokens = usage.output_tokens;

                        if usage.input_tokens > 0 {
                            self.usage.input_tokens = usage.input_tokens;
                        }
                        if let Some(cache_read) = usage.cache_read_input_tokens {
                            self.usage.cache_read_tokens = cache_read;
                        }

                        self.saw_usage = true;
                    }
                    Ok(_) => {}
                    // A single bad line never aborts the stream.
                    Err(_) => {}
                }
            }
            Dialect::Openai if self.responses => {
                if !contains(data, RESPONSES_CREATED) && !contains(data, RESPONSES_COMPLETED) {
                    return;
                }

                let Ok(event) = sonic_rs::from_slice::<responses::StreamEvent>(data) else {
                    return;
                };

                let (responses::StreamEvent::Created { response } | responses::StreamEvent::Completed { response }) =
                    event
                else {
                    return;
                };

                if let Some(usage) = response.usage {
                    self.usage = NormalizedUsage::from_responses(&usage);
                    self.saw_usage = true;
                }
            }
            Dialect::Openai => {
                if !contains(data, CHAT_USAGE) {
                    return;
                }

                let Ok(chunk) = sonic_rs::from_slice::<openai::ChatCompletionChunk>(data) else {
                    return;
                };

                if let Some(usage) = chunk.usage {
                    self.usage = NormalizedUsage::from_openai(&usage);
                    self.saw_usage = true;
                }
            }
        }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.len() >= needle.len() && haystack.windows(needle.len()).any(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(scraper: &mut UsageScraper, bytes: &[u8], split_at: usize) {
        let split = split_at.min(bytes.len());
        scraper.observe(&bytes[..split]);
        scraper.observe(&bytes[split..]);
    }

    #[test]
    fn anthropic_stream_usage_is_extracted() {
        let stream = concat!(
            "event: message_start\n",
            "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"type\":\"message\",",
            "\"role\":\"assistant\",\"content\":[],\"model\":\"claude-sonnet\",",
            "\"usage\":{\"input_tokens\":11,\"output_tokens\":0,\"cache_read_input_tokens\":3}}}\n",
            "\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hel\"}}\n",
            "\n",
            "event: message_delta\n",
            "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":2}}\n",
            "\n",
        );

        // Split mid-line to exercise reassembly across chunk boundaries.
        for split_at in [1, 40, 120, stream.len()] {
            let mut scraper = UsageScraper::anthropic();
            feed(&mut scraper, stream.as_bytes(), split_at);

            assert!(scraper.saw_usage());
            let usage = scraper.usage();
            assert_eq!(usage.input_tokens, 11, "split at {split_at}");
            assert_eq!(usage.output_tokens, 2);
            assert_eq!(usage.cache_read_tokens, 3);
        }
    }

    #[test]
    fn event_names_in_text_content_do_not_confuse_the_scraper() {
        let stream = concat!(
            "data: {\"type\":\"content_block_delta\",\"index\":0,",
            "\"delta\":{\"type\":\"text_delta\",\"text\":\"say \\\"message_start\\\" aloud\"}}\n",
            "\n",
        );

        let mut scraper = UsageScraper::anthropic();
        scraper.observe(stream.as_bytes());

        // The needle matches, the parse runs, and the event is not a
        // usage-bearing one; nothing is recorded.
        assert!(!scraper.saw_usage());
    }

    #[test]
    fn chat_stream_usage_is_extracted() {
        let stream = concat!(
            "data: {\"id\":\"c\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"gpt-4o\",",
            "\"choices\":[{\"index\":0,\"delta\":{\"content\":\"4\"}}]}\n",
            "\n",
            "data: {\"id\":\"c\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"gpt-4o\",",
            "\"choices\":[],\"usage\":{\"prompt_tokens\":8,\"completion_tokens\":1,\"total_tokens\":9,",
            "\"prompt_tokens_details\":{\"cached_tokens\":3}}}\n",
            "\n",
            "data: [DONE]\n",
            "\n",
        );

        let mut scraper = UsageScraper::chat();
        scraper.observe(stream.as_bytes());

        assert!(scraper.saw_usage());
        let usage = scraper.usage();
        assert_eq!(usage.input_tokens, 5);
        assert_eq!(usage.output_tokens, 1);
        assert_eq!(usage.cache_read_tokens, 3);
    }

    #[test]
    fn responses_stream_usage_is_extracted() {
        let stream = concat!(
            "event: response.created\n",
            "data: {\"type\":\"response.created\",\"response\":{\"id\":\"resp_1\",\"object\":\"response\",",
            "\"created_at\":1,\"status\":\"in_progress\",\"model\":\"gpt-4o\",\"output\":[]}}\n",
            "\n",
            "event: response.completed\n",
            "data: {\"type\":\"response.completed\",\"response\":{\"id\":\"resp_1\",\"object\":\"response\",",
            "\"created_at\":1,\"status\":\"completed\",\"model\":\"gpt-4o\",\"output\":[],",
            "\"usage\":{\"input_tokens\":12,\"output_tokens\":4,\"total_tokens\":16,",
            "\"input_tokens_details\":{\"cached_tokens\":5}}}}\n",
            "\n",
        );

        let mut scraper = UsageScraper::responses();
        scraper.observe(stream.as_bytes());

        assert!(scraper.saw_usage());
        let usage = scraper.usage();
        assert_eq!(usage.input_tokens, 7);
        assert_eq!(usage.output_tokens, 4);
        assert_eq!(usage.cache_read_tokens, 5);
    }

    #[test]
    fn oversized_lines_are_discarded_without_growing_the_buffer() {
        let mut scraper = UsageScraper::anthropic();

        // A single line larger than the cap.
        let big = vec![b'x'; MAX_LINE_BYTES + 1024];
        scraper.observe(&big);
        scraper.observe(b"\n");

        assert!(scraper.line.capacity() <= MAX_LINE_BYTES + 1024);
        assert!(!scraper.saw_usage());

        // The scraper recovers on the next line.
        scraper.observe(
            concat!(
                "data: {\"type\":\"message_delta\",\"delta\":{},\"usage\":{\"output_tokens\":7}}\n"
            )
            .as_bytes(),
        );
        assert_eq!(scraper.usage().output_tokens, 7);
    }

    #[test]
    fn invalid_json_lines_are_skipped() {
        let mut scraper = UsageScraper::anthropic();
        scraper.observe(b"data: {\"type\":\"message_start\", busted\n\n");
        assert!(!scraper.saw_usage());
    }
}
