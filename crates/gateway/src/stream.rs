//! Streaming translators between SSE dialects.
//!
//! Each translator is a per-request state machine fed one upstream event at
//! a time, appending zero or more downstream events to an output queue. The
//! dispatch layer drives the machine from an `eventsource-stream` parse of
//! the upstream body and flushes every emitted event immediately, so no part
//! of the response is ever buffered whole.
//!
//! Invalid JSON on a single upstream `data:` line is skipped without
//! aborting the stream. When the inbound request is cancelled the upstream
//! body is dropped, the event stream ends, and the machine's `finish` runs
//! best-effort.

pub(crate) mod anthropic_to_chat;
pub(crate) mod chat_to_anthropic;
pub(crate) mod chat_to_responses;
pub(crate) mod passthrough;
