//! Executor request/response/error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::credential::Credential;

/// How the executor attaches a credential's auth material to the outgoing
/// upstream request, chosen per provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialAttachment {
    /// `Authorization: Bearer <token>`.
    BearerHeader,
    /// An arbitrary header, e.g. `x-api-key`.
    NamedHeader(String),
    /// A query string parameter, e.g. Gemini's `?key=`.
    QueryParam(String),
}

/// One upstream call to make: the fully-translated request body, the target
/// URL, and how to attach the chosen credential.
#[derive(Debug, Clone)]
pub struct ExecutorRequest {
    pub url: String,
    pub body: Vec<u8>,
    pub content_type: String,
    pub attach: CredentialAttachment,
    pub stream: bool,
}

/// A complete, buffered non-streaming upstream response.
#[derive(Debug, Clone)]
pub struct ExecutorResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub content_type: String,
}

impl ExecutorResponse {
    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("upstream request failed: {0}")]
    Network(#[source] reqwest::Error),

    #[error("upstream response exceeded the {limit}-byte cap")]
    BodyTooLarge { limit: usize },

    #[error("cancelled")]
    Cancelled,

    #[error("upstream returned status {status}: {message}")]
    Status { status: u16, message: String },
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// Minimal fields the silent-MAX_TOKENS heuristic and header-addon
/// extraction need, decoded once from an upstream JSON body.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ResponseSignals {
    #[serde(default)]
    pub output_text: String,
    #[serde(default)]
    pub output: Vec<serde_json::Value>,
    #[serde(default)]
    pub incomplete_details: Option<IncompleteDetails>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct IncompleteDetails {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Usage {
    #[serde(default)]
    pub output_tokens: u64,
}

impl ExecutorRequest {
    pub fn new(url: impl Into<String>, body: Vec<u8>, attach: CredentialAttachment) -> Self {
        Self {
            url: url.into(),
            body,
            content_type: "application/json".to_string(),
            attach,
            stream: false,
        }
    }
}

/// Attaches a credential's auth material onto an outgoing `reqwest::RequestBuilder`.
pub fn apply_credential(
    builder: reqwest::RequestBuilder,
    credential: &Credential,
    attach: &CredentialAttachment,
    url: &str,
) -> reqwest::RequestBuilder {
    use crate::credential::AuthMaterial;

    let secret = match &credential.auth {
        AuthMaterial::ApiKey { key } => key.clone(),
        AuthMaterial::OAuthToken { access, .. } => access.clone(),
        AuthMaterial::VendorSession { session_blob } => session_blob.clone(),
    };

    match attach {
        CredentialAttachment::BearerHeader => builder.bearer_auth(secret),
        CredentialAttachment::NamedHeader(name) => builder.header(name.as_str(), secret),
        CredentialAttachment::QueryParam(name) => {
            let _ = url;
            builder.query(&[(name.as_str(), secret.as_str())])
        }
    }
}
