//! Stable content hashing for cache keys.
//!
//! Both functions return the first 32 hex characters (16 bytes) of a SHA-256
//! digest. The truncation trades collision resistance for a short cache key;
//! full 256-bit digests are unnecessary here because a collision only causes
//! an extra upstream call (cache miss), never data corruption.

use sha2::{Digest, Sha256};

/// Number of hex characters kept from the full 64-character SHA-256 hex digest.
pub const KEY_HEX_LEN: usize = 32;

/// Computes the response-cache key for `(model, payload)`.
///
/// Concatenates `model` then the raw payload bytes before hashing, so a model
/// name followed by a numerically-identical payload never collides with a
/// different model/payload split (the length of `model` is not itself
/// hashed, but payload bytes are opaque JSON that cannot be mistaken for a
/// model name in practice, matching the source system's key derivation).
#[inline]
pub fn key(model: &str, payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update(payload);
    hex_prefix(&hasher.finalize())
}

/// Computes the prompt-cache key for raw system-prompt text.
#[inline]
pub fn prompt_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex_prefix(&hasher.finalize())
}

fn hex_prefix(digest: &[u8]) -> String {
    let mut out = String::with_capacity(KEY_HEX_LEN);
    for byte in digest.iter().take(KEY_HEX_LEN / 2) {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Estimates token count from character length: `ceil(len / 4)`.
///
/// Used by the prompt cache for both accounting (byte-budget estimation) and
/// the `estimated-tokens-saved` statistic. The 4-chars-per-token constant is
/// a widely used rough heuristic for English text; it is not meant to match
/// any specific tokenizer's output exactly.
#[inline]
pub fn estimate_tokens(text: &str) -> u64 {
    let len = text.len() as u64;
    len.div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_deterministic() {
        let a = key("gpt-4", b"{\"messages\":[]}");
        let b = key("gpt-4", b"{\"messages\":[]}");
        assert_eq!(a, b);
        assert_eq!(a.len(), KEY_HEX_LEN);
    }

    #[test]
    fn key_differs_by_model() {
        let a = key("gpt-4", b"payload");
        let b = key("gpt-4o", b"payload");
        assert_ne!(a, b);
    }

    #[test]
    fn key_differs_by_payload() {
        let a = key("gpt-4", b"payload-1");
        let b = key("gpt-4", b"payload-2");
        assert_ne!(a, b);
    }

    #[test]
    fn prompt_hash_is_deterministic_and_hex() {
        let h1 = prompt_hash("You are a helpful assistant.");
        let h2 = prompt_hash("You are a helpful assistant.");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), KEY_HEX_LEN);
        assert!(h1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn prompt_hash_sensitive_to_whitespace() {
        let a = prompt_hash("hello");
        let b = prompt_hash("hello ");
        assert_ne!(a, b);
    }

    /// Regression fixture: pins the exact hex encoding so an accidental
    /// endianness or truncation-length change would fail this test.
    #[test]
    fn prompt_hash_regression_fixture() {
        let h = prompt_hash("gatehouse");
        assert_eq!(h, sha256_hex32_reference("gatehouse"));
    }

    fn sha256_hex32_reference(text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        let digest = hasher.finalize();
        digest[..16].iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("a"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
