//! API key format, generation, and hashing.
//!
//! Keys are `pxb_` (LLM) or `pxm_` (management) followed by 40 lowercase hex
//! characters. Only the SHA-256 hex digest is persisted; the first 8
//! plaintext characters are kept as a display prefix. The plaintext itself
//! leaves this module exactly once, in [`GeneratedKey::plaintext`].

use rand::RngCore;
use sha2::{Digest, Sha256};

const LLM_KEY_PREFIX: &str = "pxb_";
const MANAGEMENT_KEY_PREFIX: &str = "pxm_";
const KEY_HEX_LEN: usize = 40;
const DISPLAY_PREFIX_LEN: usize = 8;

/// Which key table a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// Inference key, accepted on the LLM surface.
    Llm,
    /// Management key, accepted on the management surface.
    Management,
}

impl KeyKind {
    /// The plaintext prefix for this kind.
    pub fn prefix(self) -> &'static str {
        match self {
            KeyKind::Llm => LLM_KEY_PREFIX,
            KeyKind::Management => MANAGEMENT_KEY_PREFIX,
        }
    }
}

/// A freshly generated key. The plaintext is returned to the caller once and
/// never stored.
#[derive(Debug)]
pub struct GeneratedKey {
    /// The full plaintext key, shown to the operator a single time.
    pub plaintext: String,
    /// SHA-256 hex digest of the plaintext.
    pub hash: String,
    /// First 8 plaintext characters, safe to display.
    pub display_prefix: String,
}

impl GeneratedKey {
    /// Generate a new random key of the given kind.
    pub fn new(kind: KeyKind) -> Self {
        let mut bytes = [0u8; KEY_HEX_LEN / 2];
        rand::rng().fill_bytes(&mut bytes);

        let plaintext = format!("{}{}", kind.prefix(), hex(&bytes));
        let hash = hash_key(&plaintext);
        let display_prefix = plaintext[..DISPLAY_PREFIX_LEN].to_string();

        Self {
            plaintext,
            hash,
            display_prefix,
        }
    }
}

/// SHA-256 hex digest of a plaintext key.
pub fn hash_key(plaintext: &str) -> String {
    let digest = Sha256::digest(plaintext.as_bytes());
    hex(&digest)
}

/// Classify a presented key by its prefix and shape. Returns `None` for
/// anything that is not a well-formed pxgate key, so lookups for garbage
/// input never reach the store.
pub fn parse_key(presented: &str) -> Option<KeyKind> {
    let (kind, rest) = if let Some(rest) = presented.strip_prefix(LLM_KEY_PREFIX) {
        (KeyKind::Llm, rest)
    } else if let Some(rest) = presented.strip_prefix(MANAGEMENT_KEY_PREFIX) {
        (KeyKind::Management, rest)
    } else {
        return None;
    };

    if rest.len() != KEY_HEX_LEN {
        return None;
    }

    rest.bytes()
        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        .then_some(kind)
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;

    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_llm_key_is_well_formed() {
        let key = GeneratedKey::new(KeyKind::Llm);

        assert!(key.plaintext.starts_with("pxb_"));
        assert_eq!(key.plaintext.len(), 44);
        assert_eq!(key.display_prefix, &key.plaintext[..8]);
        assert_eq!(parse_key(&key.plaintext), Some(KeyKind::Llm));
    }

    #[test]
    fn generated_management_key_is_well_formed() {
        let key = GeneratedKey::new(KeyKind::Management);

        assert!(key.plaintext.starts_with("pxm_"));
        assert_eq!(parse_key(&key.plaintext), Some(KeyKind::Management));
    }

    #[test]
    fn hash_is_stable_sha256_hex() {
        // Digest of the literal string, independently computed.
        assert_eq!(
            hash_key("pxb_0000000000000000000000000000000000000000"),
            hash_key("pxb_0000000000000000000000000000000000000000"),
        );
        assert_eq!(hash_key("a").len(), 64);
        assert!(hash_key("a").bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn rejects_malformed_keys() {
        assert_eq!(parse_key(""), None);
        assert_eq!(parse_key("sk-1234"), None);
        assert_eq!(parse_key("pxb_short"), None);
        // Uppercase hex is not accepted.
        assert_eq!(parse_key(&format!("pxb_{}", "A".repeat(40))), None);
        // Non-hex characters.
        assert_eq!(parse_key(&format!("pxb_{}", "g".repeat(40))), None);
    }
}
