//! Request and response rewriters between dialects.
//!
//! Modules are named for the inbound dialect they serve: `anthropic` rewrites
//! inbound Messages traffic for a Chat Completions upstream, `openai`
//! rewrites inbound Chat traffic for an Anthropic upstream, and `responses`
//! rewrites inbound Responses traffic for a Chat Completions upstream.
//!
//! Request-phase failures surface as 400s in the inbound dialect;
//! response-phase failures as 502s.

pub(crate) mod anthropic;
pub(crate) mod openai;
pub(crate) mod responses;
pub(crate) mod usage;
