//! Per-provider wiring: base URLs, credential attachment, and the ordered
//! provider list tried for each client dialect family.

use gatehouse::executor::CredentialAttachment;
use gatehouse::translate::RouteDialect;

/// One upstream provider this gateway can dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Anthropic,
    Gemini,
}

impl Provider {
    pub fn name(self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Gemini => "gemini",
        }
    }

    pub fn attachment(self) -> CredentialAttachment {
        match self {
            Provider::OpenAi => CredentialAttachment::BearerHeader,
            Provider::Anthropic => CredentialAttachment::NamedHeader("x-api-key".to_string()),
            Provider::Gemini => CredentialAttachment::QueryParam("key".to_string()),
        }
    }
}

/// Base URL + path suffix for one upstream call.
pub fn upstream_url(provider: Provider, path: &str) -> String {
    let base = match provider {
        Provider::OpenAi => "https://api.openai.com/v1",
        Provider::Anthropic => "https://api.anthropic.com/v1",
        Provider::Gemini => "https://generativelanguage.googleapis.com/v1beta",
    };
    format!("{base}{path}")
}

/// Providers tried, in order, for a given route family — every route is
/// proxied by exactly one upstream dialect, so this is a single-element list
/// today, but kept as a `Vec` since `Selector::run` is written against an
/// ordered provider list (a future multi-provider-per-route routing policy
/// would only need to change this function).
pub fn providers_for(route_dialect: RouteDialect) -> Vec<String> {
    let provider = match route_dialect {
        RouteDialect::OpenAi => Provider::OpenAi,
        RouteDialect::Anthropic => Provider::Anthropic,
        RouteDialect::Gemini => Provider::Gemini,
    };
    vec![provider.name().to_string()]
}

pub fn provider_for(route_dialect: RouteDialect) -> Provider {
    match route_dialect {
        RouteDialect::OpenAi => Provider::OpenAi,
        RouteDialect::Anthropic => Provider::Anthropic,
        RouteDialect::Gemini => Provider::Gemini,
    }
}
