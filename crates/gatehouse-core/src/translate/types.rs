//! Shared types for the translation layer.

use thiserror::Error;

/// Identifies which calling tool sent the request, resolved once at request
/// entry (by User-Agent / header sniffing) and carried through the request
/// context rather than re-sniffed in every hardening/sanitation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientProfile {
    /// Generic OpenAI-compatible client: no special-casing applied.
    Generic,
    /// factory-cli or droid: gets history compaction and response reordering.
    Factory,
    /// Headers identify a Stainless-generated SDK: same compaction/reordering
    /// rules as Factory, since both misparse raw `[DONE]` framing.
    Stainless,
    /// Codex CLI: eligible for checkpoint/huge-payload synthesized streaming.
    Codex,
    /// Claude Code / claude-cli: routed to the Claude-style model listing.
    ClaudeCli,
}

impl ClientProfile {
    /// Whether this profile needs Factory/Stainless-specific response
    /// reordering and `[DONE]` suppression.
    pub fn is_factory_like(self) -> bool {
        matches!(self, ClientProfile::Factory | ClientProfile::Stainless)
    }

    /// Resolves a profile from the request's User-Agent and a few
    /// Stainless-SDK-specific headers. First match wins.
    pub fn sniff(user_agent: &str, has_stainless_headers: bool) -> Self {
        let ua = user_agent.to_ascii_lowercase();
        if ua.contains("factory-cli") || ua.contains("droid") {
            ClientProfile::Factory
        } else if has_stainless_headers {
            ClientProfile::Stainless
        } else if ua.contains("codex") {
            ClientProfile::Codex
        } else if ua.starts_with("claude-cli") {
            ClientProfile::ClaudeCli
        } else {
            ClientProfile::Generic
        }
    }
}

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("malformed request payload: {0}")]
    MalformedRequest(String),
    #[error("malformed upstream response: {0}")]
    MalformedResponse(String),
}

pub type TranslateResult<T> = Result<T, TranslateError>;
