//! Streaming-safe extraction of the top-level `model` field.
//!
//! Passthrough handlers must forward the inbound body byte-for-byte, so the
//! probe never mutates or re-serialises anything: it scans the raw bytes with
//! a minimal JSON lexer, tracking string/escape state and brace depth, and
//! reads the `"model"` value only when it appears as a top-level object key.
//! The scan inspects at most `limit` bytes; if the body is larger and the
//! field was not found within the cap, it falls back to a full parse.

use serde::Deserialize;

/// Locate the top-level `model` string in a JSON request body.
///
/// Returns `None` when the body has no top-level `model` string, including
/// when it is not a JSON object at all.
pub fn extract_model(body: &[u8], limit: usize) -> Option<String> {
    let capped = body.len() > limit;
    let window = &body[..body.len().min(limit)];

    match scan(window) {
        Scan::Found(model) => Some(model),
        Scan::NotFound if !capped => None,
        // Cap exhausted or a token ran past the window: full parse.
        _ => full_parse(body),
    }
}

enum Scan {
    Found(String),
    NotFound,
    Truncated,
}

fn scan(bytes: &[u8]) -> Scan {
    let mut i = 0;
    let mut depth = 0u32;
    // A string at depth 1 is an object key only directly after `{` or `,`.
    let mut expect_key = false;

    while i < bytes.len() {
        match bytes[i] {
            b'"' => {
                let Some(end) = string_end(bytes, i) else {
                    return Scan::Truncated;
                };

                if depth == 1 && expect_key && &bytes[i + 1..end] == b"model" {
                    match read_string_value(bytes, end + 1) {
                        Value::Found(model) => return Scan::Found(model),
                        // `model` is bound to a non-string value.
                        Value::NotString => return Scan::NotFound,
                        Value::Truncated => return Scan::Truncated,
                    }
                }

                expect_key = false;
                i = end + 1;
            }
            b'{' => {
                depth += 1;
                expect_key = depth == 1;
                i += 1;
            }
            b'[' => {
                depth += 1;
                expect_key = false;
                i += 1;
            }
            b'}' | b']' => {
                depth = depth.saturating_sub(1);
                expect_key = false;
                i += 1;
            }
            b',' => {
                expect_key = depth == 1;
                i += 1;
            }
            b':' => {
                expect_key = false;
                i += 1;
            }
            _ => i += 1,
        }
    }

    Scan::NotFound
}

enum Value {
    Found(String),
    NotString,
    Truncated,
}

/// After a matched key, expect `: "<value>"` and decode the value with full
/// escape handling.
fn read_string_value(bytes: &[u8], mut i: usize) -> Value {
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }

    if i >= bytes.len() {
        return Value::Truncated;
    }

    if bytes[i] != b':' {
        return Value::NotString;
    }

    i += 1;

    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }

    if i >= bytes.len() {
        return Value::Truncated;
    }

    if bytes[i] != b'"' {
        return Value::NotString;
    }

    let Some(end) = string_end(bytes, i) else {
        return Value::Truncated;
    };

    // Delegate unescaping to the JSON parser over the exact token.
    match sonic_rs::from_slice::<String>(&bytes[i..=end]) {
        Ok(value) => Value::Found(value),
        Err(_) => Value::NotString,
    }
}

/// Index of the closing quote of the string starting at `start` (which must
/// point at the opening quote), honouring escapes.
fn string_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start + 1;

    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => return Some(i),
            _ => i += 1,
        }
    }

    None
}

fn full_parse(body: &[u8]) -> Option<String> {
    #[derive(Deserialize)]
    struct ModelOnly {
        model: Option<String>,
    }

    sonic_rs::from_slice::<ModelOnly>(body).ok().and_then(|b| b.model)
}
