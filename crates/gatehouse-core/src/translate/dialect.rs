//! Dialect dispatch: represents each client-facing wire format as a value
//! implementing a small capability set, resolved once per request (by route
//! + User-Agent) instead of scattering type assertions through the handler
//! code.

use serde_json::Value;

use super::harden;
use super::sanitize;
use super::types::ClientProfile;

/// How a dialect wants its streaming frames written. The actual byte framing
/// lives in `gatehouse-server`; this only tells the gateway which shape to
/// use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStyle {
    /// OpenAI "responses"-style `response.*` event sequence.
    OpenAiResponses,
    /// OpenAI chat-completions-style `chat.completion.chunk` deltas.
    OpenAiChat,
    /// Anthropic `message_start` / `content_block_delta` / ... sequence.
    Anthropic,
    /// Gemini `generateContent` streamed JSON array elements.
    Gemini,
}

/// Capability set for one client dialect: pre-translation hardening,
/// post-translation sanitation, and the frame style its streaming path uses.
pub trait ClientDialect: Send + Sync {
    fn harden(&self, request: &mut Value);
    fn sanitize(&self, response: &mut Value, request: &Value);
    fn frame_style(&self) -> FrameStyle;
}

pub struct OpenAiDialect;

impl ClientDialect for OpenAiDialect {
    fn harden(&self, request: &mut Value) {
        harden::tighten_tool_schemas(request);
    }

    fn sanitize(&self, response: &mut Value, request: &Value) {
        sanitize::filter_tool_arguments(response, request);
        sanitize::inline_tool_call_to_structured(response);
        sanitize::backfill_output_text(response);
    }

    fn frame_style(&self) -> FrameStyle {
        FrameStyle::OpenAiResponses
    }
}

pub struct AnthropicDialect;

impl ClientDialect for AnthropicDialect {
    fn harden(&self, request: &mut Value) {
        harden::tighten_tool_schemas(request);
    }

    fn sanitize(&self, response: &mut Value, request: &Value) {
        sanitize::filter_tool_arguments(response, request);
        sanitize::inline_tool_call_to_structured(response);
    }

    fn frame_style(&self) -> FrameStyle {
        FrameStyle::Anthropic
    }
}

pub struct GeminiDialect;

impl ClientDialect for GeminiDialect {
    fn harden(&self, request: &mut Value) {
        harden::tighten_tool_schemas(request);
        harden::gemini_role_normalization(request);
        harden::gemini_tool_adjacency(request);
    }

    fn sanitize(&self, response: &mut Value, request: &Value) {
        sanitize::filter_tool_arguments(response, request);
    }

    fn frame_style(&self) -> FrameStyle {
        FrameStyle::Gemini
    }
}

/// Decorator that layers the Factory/Droid/Stainless compaction and
/// response-reordering rules (§4.6) on top of any underlying dialect — these
/// rules apply across dialects, not to one wire format specifically.
pub struct FactoryCompat<D: ClientDialect> {
    inner: D,
}

impl<D: ClientDialect> FactoryCompat<D> {
    pub fn new(inner: D) -> Self {
        Self { inner }
    }
}

impl<D: ClientDialect> ClientDialect for FactoryCompat<D> {
    fn harden(&self, request: &mut Value) {
        self.inner.harden(request);
        harden::factory_compaction(request);
    }

    fn sanitize(&self, response: &mut Value, request: &Value) {
        self.inner.sanitize(response, request);
        sanitize::reorder_output_messages_first(response);
    }

    fn frame_style(&self) -> FrameStyle {
        self.inner.frame_style()
    }
}

/// Resolves the dialect object for one request from its route family and
/// sniffed [`ClientProfile`]. The profile is resolved once at request entry
/// (see [`ClientProfile::sniff`]) and threaded through rather than re-sniffed
/// inside hardening/sanitation.
pub fn resolve(route_dialect: RouteDialect, profile: ClientProfile) -> Box<dyn ClientDialect> {
    let base: Box<dyn ClientDialect> = match route_dialect {
        RouteDialect::OpenAi => Box::new(OpenAiDialect),
        RouteDialect::Anthropic => Box::new(AnthropicDialect),
        RouteDialect::Gemini => Box::new(GeminiDialect),
    };
    if profile.is_factory_like() {
        match route_dialect {
            RouteDialect::OpenAi => Box::new(FactoryCompat::new(OpenAiDialect)),
            RouteDialect::Anthropic => Box::new(FactoryCompat::new(AnthropicDialect)),
            RouteDialect::Gemini => Box::new(FactoryCompat::new(GeminiDialect)),
        }
    } else {
        base
    }
}

/// Which wire family a route belongs to, independent of the sniffed client
/// profile (a Factory client can still hit the OpenAI routes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDialect {
    OpenAi,
    Anthropic,
    Gemini,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn factory_compat_adds_compaction_on_top_of_base_hardening() {
        let dialect = resolve(RouteDialect::OpenAi, ClientProfile::Factory);
        let mut req = json!({
            "messages": [{"role": "user", "content": "before <tool_call>{}</tool_call> after"}],
            "tools": [{"type": "function", "function": {"name": "f", "parameters": {"type": "object"}}}]
        });
        dialect.harden(&mut req);
        assert_eq!(req["messages"][0]["content"], json!("before  after"));
        assert_eq!(req["tools"][0]["function"]["parameters"]["additionalProperties"], json!(false));
    }

    #[test]
    fn generic_profile_does_not_apply_factory_compaction() {
        let dialect = resolve(RouteDialect::OpenAi, ClientProfile::Generic);
        let mut req = json!({
            "messages": [{"role": "user", "content": "<tool_call>{}</tool_call>"}]
        });
        dialect.harden(&mut req);
        assert_eq!(req["messages"][0]["content"], json!("<tool_call>{}</tool_call>"));
    }

    #[test]
    fn frame_style_matches_route_dialect() {
        assert_eq!(resolve(RouteDialect::Gemini, ClientProfile::Generic).frame_style(), FrameStyle::Gemini);
        assert_eq!(resolve(RouteDialect::Anthropic, ClientProfile::Generic).frame_style(), FrameStyle::Anthropic);
    }
}
