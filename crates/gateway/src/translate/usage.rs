//! Token-usage reconciliation between provider conventions.
//!
//! OpenAI reports `prompt_tokens` inclusive of cache reads, with the cached
//! share broken out in `prompt_tokens_details`. Anthropic reports
//! `input_tokens` exclusive of cache reads, which arrive separately. Billing
//! and the request log always use the Anthropic convention.

use crate::protocol::{anthropic, openai, responses};

/// Usage in the Anthropic convention: input excludes cache reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizedUsage {
    /// Fresh input tokens.
    pub input_tokens: u64,
    /// Generated tokens.
    pub output_tokens: u64,
    /// Tokens spent creating cache entries.
    pub cache_creation_tokens: u64,
    /// Prompt tokens served from cache.
    pub cache_read_tokens: u64,
}

impl NormalizedUsage {
    /// Normalise OpenAI accounting. The reported cached count is clamped to
    /// the prompt size before subtraction, so a misreporting upstream can
    /// never produce negative input.
    pub fn from_openai(usage: &openai::ChatUsage) -> Self {
        let cached = usage
            .prompt_tokens_details
            .map(|details| details.cached_tokens)
            .unwrap_or(0);

        let cache_read_tokens = cached.min(usage.prompt_tokens);

        Self {
            input_tokens: usage.prompt_tokens - cache_read_tokens,
            output_tokens: usage.completion_tokens,
            cache_creation_tokens: 0,
            cache_read_tokens,
        }
    }

    /// Anthropic accounting is already in the normalised convention.
    pub fn from_anthropic(usage: &anthropic::Usage) -> Self {
        Self {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cache_creation_tokens: usage.cache_creation_input_tokens.unwrap_or(0),
            cache_read_tokens: usage.cache_read_input_tokens.unwrap_or(0),
        }
    }

    /// Normalise Responses accounting; same cache-inclusive convention as
    /// Chat Completions.
    pub fn from_responses(usage: &responses::ResponsesUsage) -> Self {
        let cached = usage
            .input_tokens_details
            .map(|details| details.cached_tokens)
            .unwrap_or(0);

        let cache_read_tokens = cached.min(usage.input_tokens);

        Self {
            input_tokens: usage.input_tokens - cache_read_tokens,
            output_tokens: usage.output_tokens,
            cache_creation_tokens: 0,
            cache_read_tokens,
        }
    }

    /// The inverse mapping back to OpenAI accounting.
    pub fn to_openai(self) -> openai::ChatUsage {
        let prompt_tokens = self.input_tokens + self.cache_read_tokens;

        openai::ChatUsage {
            prompt_tokens,
            completion_tokens: self.output_tokens,
            total_tokens: prompt_tokens + self.output_tokens,
            prompt_tokens_details: (self.cache_read_tokens > 0).then_some(openai::PromptTokensDetails {
                cached_tokens: self.cache_read_tokens,
            }),
        }
    }

    /// The mapping to Anthropic wire usage.
    pub fn to_anthropic(self) -> anthropic::Usage {
        anthropic::Usage {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            cache_creation_input_tokens: (self.cache_creation_tokens > 0).then_some(self.cache_creation_tokens),
            cache_read_input_tokens: (self.cache_read_tokens > 0).then_some(self.cache_read_tokens),
        }
    }

    /// The mapping to Responses wire usage.
    pub fn to_responses(self) -> responses::ResponsesUsage {
        let input_tokens = self.input_tokens + self.cache_read_tokens;

        responses::ResponsesUsage {
            input_tokens,
            output_tokens: self.output_tokens,
            total_tokens: input_tokens + self.output_tokens,
            input_tokens_details: (self.cache_read_tokens > 0).then_some(responses::InputTokensDetails {
                cached_tokens: self.cache_read_tokens,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::openai::{ChatUsage, PromptTokensDetails};

    use super::*;

    fn openai_usage(prompt: u64, completion: u64, cached: Option<u64>) -> ChatUsage {
        ChatUsage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt + completion,
            prompt_tokens_details: cached.map(|cached_tokens| PromptTokensDetails { cached_tokens }),
        }
    }

    #[test]
    fn openai_cache_is_subtracted_from_input() {
        let normalized = NormalizedUsage::from_openai(&openai_usage(8, 1, Some(3)));

        assert_eq!(normalized.input_tokens, 5);
        assert_eq!(normalized.output_tokens, 1);
        assert_eq!(normalized.cache_read_tokens, 3);
    }

    #[test]
    fn overreported_cache_is_clamped_to_prompt() {
        let normalized = NormalizedUsage::from_openai(&openai_usage(8, 1, Some(50)));

        assert_eq!(normalized.input_tokens, 0);
        assert_eq!(normalized.cache_read_tokens, 8);
    }

    #[test]
    fn round_trip_reconstructs_openai_usage() {
        for (prompt, completion, cached) in [(0, 0, 0), (10, 5, 0), (10, 5, 10), (123, 7, 42)] {
            let original = openai_usage(prompt, completion, (cached > 0).then_some(cached));
            let back = NormalizedUsage::from_openai(&original).to_openai();

            assert_eq!(back.prompt_tokens, prompt);
            assert_eq!(back.completion_tokens, completion);
            assert_eq!(
                back.prompt_tokens_details.map(|d| d.cached_tokens).unwrap_or(0),
                cached
            );
        }
    }

    #[test]
    fn anthropic_usage_passes_through() {
        let usage = crate::protocol::anthropic::Usage {
            input_tokens: 11,
            output_tokens: 2,
            cache_creation_input_tokens: Some(1),
            cache_read_input_tokens: Some(3),
        };

        let normalized = NormalizedUsage::from_anthropic(&usage);
        assert_eq!(normalized.input_tokens, 11);
        assert_eq!(normalized.cache_read_tokens, 3);
        assert_eq!(normalized.cache_creation_tokens, 1);

        let back = normalized.to_anthropic();
        assert_eq!(back.input_tokens, 11);
        assert_eq!(back.cache_read_input_tokens, Some(3));
    }

    #[test]
    fn openai_projection_folds_cache_into_prompt() {
        let normalized = NormalizedUsage {
            input_tokens: 5,
            output_tokens: 1,
            cache_creation_tokens: 0,
            cache_read_tokens: 3,
        };

        let usage = normalized.to_openai();
        assert_eq!(usage.prompt_tokens, 8);
        assert_eq!(usage.total_tokens, 9);
        assert_eq!(usage.prompt_tokens_details.unwrap().cached_tokens, 3);

        let without_cache = NormalizedUsage {
            cache_read_tokens: 0,
            ..normalized
        };
        assert!(without_cache.to_openai().prompt_tokens_details.is_none());
    }
}
