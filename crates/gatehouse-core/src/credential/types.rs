//! Credential data model.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Authentication material. An exhaustive sum type so adding a new auth
/// scheme is a compile error everywhere a credential is consumed, not a
/// silently-ignored new variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthMaterial {
    ApiKey {
        key: String,
    },
    OAuthToken {
        access: String,
        refresh: Option<String>,
        /// Unix timestamp the access token expires at, if known.
        expires_at: Option<i64>,
    },
    VendorSession {
        session_blob: String,
    },
}

impl AuthMaterial {
    /// Returns a masked representation safe to log or surface to clients.
    pub fn masked(&self) -> String {
        match self {
            AuthMaterial::ApiKey { key } => mask_tail(key),
            AuthMaterial::OAuthToken { access, .. } => mask_tail(access),
            AuthMaterial::VendorSession { session_blob } => mask_tail(session_blob),
        }
    }
}

fn mask_tail(secret: &str) -> String {
    let tail: String = secret.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
    if secret.len() <= 4 {
        "*".repeat(secret.len())
    } else {
        format!("{}{}", "*".repeat(secret.len() - 4), tail)
    }
}

/// A single upstream credential and its rotation state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: String,
    pub provider: String,
    pub label: String,
    pub auth: AuthMaterial,
    pub priority: i32,
    pub disabled: bool,
    /// Unix timestamp; `0` means "not cooling".
    pub cooling_until: i64,
    pub last_error: Option<String>,
    pub last_used: i64,
    pub usage: std::collections::HashMap<String, u64>,
}

impl Credential {
    pub fn new(id: impl Into<String>, provider: impl Into<String>, label: impl Into<String>, auth: AuthMaterial) -> Self {
        Self {
            id: id.into(),
            provider: provider.into(),
            label: label.into(),
            auth,
            priority: 0,
            disabled: false,
            cooling_until: 0,
            last_error: None,
            last_used: 0,
            usage: std::collections::HashMap::new(),
        }
    }

    pub fn masked_account(&self) -> String {
        self.auth.masked()
    }

    pub fn is_cooling(&self, now: i64) -> bool {
        self.cooling_until > now
    }

    /// Selectable iff not disabled and not cooling.
    pub fn is_selectable(&self, now: i64) -> bool {
        !self.disabled && !self.is_cooling(now)
    }
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("unknown credential id: {0}")]
    NotFound(String),

    #[error("failed to read credential directory {path}: {source}")]
    DirRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write credential file {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode credential file {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type CredentialResult<T> = Result<T, CredentialError>;
