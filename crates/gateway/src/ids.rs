//! Synthetic identifiers for translated responses.
//!
//! Translation crosses id namespaces: a Chat Completions upstream answer has
//! no `msg_` id and an Anthropic upstream answer has no `chatcmpl-` id, so
//! the translators mint fresh ones in the shape the inbound dialect expects.

use rand::RngCore as _;

/// `msg_` + 24 hex chars.
pub(crate) fn message_id() -> String {
    random_id("msg_")
}

/// `chatcmpl-` + 24 hex chars.
pub(crate) fn completion_id() -> String {
    random_id("chatcmpl-")
}

/// `toolu_` + 24 hex chars, for upstream tool calls missing an id.
pub(crate) fn tool_use_id() -> String {
    random_id("toolu_")
}

/// `resp_` + 24 hex chars.
pub(crate) fn response_id() -> String {
    random_id("resp_")
}

/// `fc_` + 24 hex chars, for function-call output items.
pub(crate) fn function_call_item_id() -> String {
    random_id("fc_")
}

pub(crate) fn random_id(prefix: &str) -> String {
    use std::fmt::Write as _;

    let mut bytes = [0u8; 12];
    rand::rng().fill_bytes(&mut bytes);

    let mut id = String::with_capacity(prefix.len() + 24);
    id.push_str(prefix);

    for byte in bytes {
        let _ = write!(id, "{byte:02x}");
    }

    id
}

/// Seconds since the Unix epoch, for `created` fields.
pub(crate) fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_have_prefix_and_24_hex_chars() {
        for (id, prefix) in [
            (message_id(), "msg_"),
            (completion_id(), "chatcmpl-"),
            (tool_use_id(), "toolu_"),
            (response_id(), "resp_"),
            (function_call_item_id(), "fc_"),
        ] {
            assert!(id.starts_with(prefix), "{id}");
            let suffix = &id[prefix.len()..];
            assert_eq!(suffix.len(), 24, "{id}");
            assert!(suffix.bytes().all(|b| b.is_ascii_hexdigit()), "{id}");
        }
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(message_id(), message_id());
    }
}
