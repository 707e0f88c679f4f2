//! Shared statistics and error types for the response/prompt caches.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Counters maintained by both caches. Every field is monotonically
/// non-decreasing except `size`, which tracks live entry count.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: u64,
    pub unique: u64,
    pub total_requests: u64,
    /// Prompt cache only; always 0 for the response cache.
    pub estimated_tokens_saved: u64,
    pub top_providers: HashMap<String, u64>,
}

impl CacheStats {
    pub fn record_hit(&mut self) {
        self.hits += 1;
        self.total_requests += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
        self.total_requests += 1;
    }

    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }
}

/// Errors surfaced by cache persistence. Admission/eviction never fail;
/// only disk I/O against a configured snapshot path can.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to read snapshot at {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write snapshot at {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode snapshot at {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: bincode::Error,
    },

    #[error("failed to encode snapshot: {0}")]
    Encode(#[source] bincode::Error),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Matches an exclusion pattern against a model id.
///
/// Supported syntax, per the admission rules: exact match, a bare `*`
/// matching everything, `prefix*`, and `*suffix`. No other wildcarding is
/// supported (e.g. `a*b` is treated as a literal string that will only
/// match a model literally named `a*b`).
pub fn pattern_matches(pattern: &str, model: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return model.starts_with(prefix);
    }
    if let Some(suffix) = pattern.strip_prefix('*') {
        return model.ends_with(suffix);
    }
    pattern == model
}

pub fn matches_any_exclude(patterns: &[String], model: &str) -> bool {
    patterns.iter().any(|p| pattern_matches(p, model))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_pattern() {
        assert!(pattern_matches("gpt-4", "gpt-4"));
        assert!(!pattern_matches("gpt-4", "gpt-4o"));
    }

    #[test]
    fn star_matches_everything() {
        assert!(pattern_matches("*", "anything"));
    }

    #[test]
    fn prefix_pattern() {
        assert!(pattern_matches("o1-*", "o1-preview"));
        assert!(!pattern_matches("o1-*", "gpt-o1"));
    }

    #[test]
    fn suffix_pattern() {
        assert!(pattern_matches("*-thinking", "gemini-claude-sonnet-4-5-thinking"));
        assert!(!pattern_matches("*-thinking", "thinking-mode"));
    }

    #[test]
    fn no_infix_wildcarding() {
        // "a*b" is not prefix or suffix syntax, so it's a literal.
        assert!(!pattern_matches("a*b", "aXb"));
        assert!(pattern_matches("a*b", "a*b"));
    }
}
