//! Typed wire formats for the three supported dialects.
//!
//! Inbound payloads are parsed tolerantly (unknown fields ignored, unknown
//! enum variants preserved through `Unknown` fallbacks) and outbound payloads
//! are emitted canonically (`skip_serializing_if` on every optional field).

pub(crate) mod anthropic;
pub(crate) mod openai;
pub(crate) mod probe;
pub(crate) mod responses;
