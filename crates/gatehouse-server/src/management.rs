//! The `/v0/management/` surface: operator-facing inventory, config, and
//! cache controls. Mounted only when `Config::management_enabled()` is
//! true; gated per-request by [`require_management_key`].

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing::{delete, get, post, put}};
use serde::Deserialize;
use serde_json::{Value, json};
use subtle::ConstantTimeEq;

use gatehouse::config::ManagementConfig;

use crate::state::AppState;

const MANAGEMENT_KEY_HEADER: &str = "x-management-key";

/// Compares `candidate` against `expected` in constant time, so a timing
/// side-channel can't be used to brute-force the management key byte by byte.
fn constant_time_eq(candidate: &str, expected: &str) -> bool {
    candidate.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// `Some(true)` for authorized, `Some(false)` for wrong key, `None` when
/// management is disabled entirely (caller should 404).
fn authorize(state: &AppState, headers: &HeaderMap, remote: Option<SocketAddr>) -> Option<bool> {
    if !state.config.management_enabled() {
        return None;
    }
    let provided = headers
        .get(MANAGEMENT_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if let Some(secret) = &state.config.management_secret {
        if constant_time_eq(provided, secret) {
            return Some(true);
        }
    }
    if let Some(password) = &state.config.management_password {
        let is_loopback = remote.map(|addr| addr.ip().is_loopback()).unwrap_or(false);
        if is_loopback && constant_time_eq(provided, password) {
            return Some(true);
        }
    }
    Some(false)
}

async fn gate(
    state: &AppState,
    headers: &HeaderMap,
    remote: Option<SocketAddr>,
) -> Result<(), Response> {
    match authorize(state, headers, remote) {
        None => Err(StatusCode::NOT_FOUND.into_response()),
        Some(false) => Err((StatusCode::UNAUTHORIZED, Json(json!({"error": "invalid management key"}))).into_response()),
        Some(true) => Ok(()),
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/config", get(get_config).put(put_config))
        .route("/credentials", get(list_credentials).post(add_credential))
        .route("/credentials/{id}/priority", put(set_priority))
        .route("/credentials/{id}/reset-cooldown", post(reset_one_cooldown))
        .route("/credentials/reset-cooldown", post(reset_all_cooldown))
        .route("/credentials/{id}/disable", post(disable_credential))
        .route("/credentials/{id}/enable", post(enable_credential))
        .route("/credentials/{id}", delete(delete_credential))
        .route("/cache/response/stats", get(response_cache_stats))
        .route("/cache/response/clear", post(clear_response_cache))
        .route("/cache/prompt/stats", get(prompt_cache_stats))
        .route("/cache/prompt/clear", post(clear_prompt_cache))
        .route("/cache/prompt/top", get(prompt_cache_top))
        .route("/cache/prompt/warm", post(warm_prompt_cache))
        .route("/version", get(version))
}

async fn version() -> Response {
    Json(json!({"name": env!("CARGO_PKG_NAME"), "version": env!("CARGO_PKG_VERSION")})).into_response()
}

#[derive(Deserialize)]
struct ConfigPatch {
    /// Dotted path into the config document, e.g. `response_cache_enabled`.
    key: String,
    value: Value,
}

/// Renders the live config as a YAML-shaped JSON document. Secrets
/// (`management_password`/`management_secret`) are redacted.
async fn get_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    remote: Option<ConnectInfo<SocketAddr>>,
) -> Response {
    if let Err(resp) = gate(&state, &headers, remote.map(|ConnectInfo(addr)| addr)).await {
        return resp;
    }
    let cfg = &state.config;
    let managed = match ManagementConfig::load(&cfg.management_config_path()) {
        Ok(m) => m,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))).into_response(),
    };
    Json(json!({
        "port": cfg.port,
        "bind_addr": cfg.bind_addr.to_string(),
        "auth_dir": cfg.auth_dir.to_string_lossy(),
        "cache_dir": cfg.cache_dir.to_string_lossy(),
        "response_cache_enabled": cfg.response_cache_enabled,
        "response_cache_max_size": managed.response_cache_max_size,
        "response_cache_max_bytes": managed.response_cache_max_bytes,
        "response_cache_ttl_secs": managed.response_cache_ttl_secs,
        "response_cache_exclude_models": managed.response_cache_exclude_models,
        "prompt_cache_max_size": managed.prompt_cache_max_size,
        "prompt_cache_max_bytes": managed.prompt_cache_max_bytes,
        "prompt_cache_ttl_secs": managed.prompt_cache_ttl_secs,
        "credential_priorities": managed.credential_priorities,
        "max_body_bytes": cfg.max_body_bytes,
        "management_password": cfg.management_password.as_ref().map(|_| "***"),
        "management_secret": cfg.management_secret.as_ref().map(|_| "***"),
        "codex_synth_enable": cfg.codex_synth_enable,
        "codex_synth_huge_bytes": cfg.codex_synth_huge_bytes,
        "keep_alive_idle_secs": cfg.keep_alive_idle_secs,
    }))
    .into_response()
}

const PATCHABLE_KEYS: &[&str] = &[
    "response_cache_max_size",
    "response_cache_max_bytes",
    "response_cache_ttl_secs",
    "response_cache_exclude_models",
    "prompt_cache_max_size",
    "prompt_cache_max_bytes",
    "prompt_cache_ttl_secs",
    "credential_priorities",
];

/// Partial-key config writes against the YAML-backed hot-patchable subset
/// (cache sizing/TTL/exclude-list and per-credential priority overrides).
/// Process-identity fields (`port`, `bind_addr`, `auth_dir`) require a
/// restart and are rejected here — see [`get_config`] for how they're read.
/// Changes take effect for every new response/prompt-cache lookup after
/// this call, but do not resize a cache already running with a smaller
/// capacity; that requires a restart to pick up the new
/// `ResponseCacheConfig`/`PromptCacheConfig`.
async fn put_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    remote: Option<ConnectInfo<SocketAddr>>,
    Json(patch): Json<ConfigPatch>,
) -> Response {
    if let Err(resp) = gate(&state, &headers, remote.map(|ConnectInfo(addr)| addr)).await {
        return resp;
    }
    if !PATCHABLE_KEYS.contains(&patch.key.as_str()) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": format!("'{}' is not writable at runtime", patch.key)})),
        )
            .into_response();
    }

    let yaml_value: serde_yaml::Value = match serde_yaml::to_value(&patch.value) {
        Ok(v) => v,
        Err(e) => return (StatusCode::BAD_REQUEST, Json(json!({"error": e.to_string()}))).into_response(),
    };

    match ManagementConfig::patch_key(&state.config.management_config_path(), &patch.key, yaml_value) {
        Ok(updated) => {
            if patch.key == "credential_priorities" {
                for (id, priority) in &updated.credential_priorities {
                    let _ = state.credentials.set_priority(id, *priority);
                }
            }
            (StatusCode::OK, Json(json!({"accepted": patch.value}))).into_response()
        }
        Err(e) => (StatusCode::BAD_REQUEST, Json(json!({"error": e.to_string()}))).into_response(),
    }
}

async fn list_credentials(
    State(state): State<AppState>,
    headers: HeaderMap,
    remote: Option<ConnectInfo<SocketAddr>>,
) -> Response {
    if let Err(resp) = gate(&state, &headers, remote.map(|ConnectInfo(addr)| addr)).await {
        return resp;
    }
    let creds = state.credentials.list_all();
    let redacted: Vec<Value> = creds
        .iter()
        .map(|c| {
            json!({
                "id": c.id,
                "provider": c.provider,
                "label": c.label,
                "priority": c.priority,
                "disabled": c.disabled,
                "cooling_until": c.cooling_until,
                "last_used": c.last_used,
                "last_error": c.last_error,
                "usage": c.usage,
            })
        })
        .collect();
    Json(json!({"credentials": redacted})).into_response()
}

#[derive(Deserialize)]
struct NewCredential {
    id: String,
    provider: String,
    label: String,
    api_key: String,
}

async fn add_credential(
    State(state): State<AppState>,
    headers: HeaderMap,
    remote: Option<ConnectInfo<SocketAddr>>,
    Json(body): Json<NewCredential>,
) -> Response {
    if let Err(resp) = gate(&state, &headers, remote.map(|ConnectInfo(addr)| addr)).await {
        return resp;
    }
    let cred = gatehouse::credential::Credential::new(
        &body.id,
        &body.provider,
        &body.label,
        gatehouse::credential::AuthMaterial::ApiKey { key: body.api_key },
    );
    state.credentials.add(cred);
    (StatusCode::CREATED, Json(json!({"id": body.id}))).into_response()
}

#[derive(Deserialize)]
struct PriorityPatch {
    priority: i32,
}

async fn set_priority(
    State(state): State<AppState>,
    headers: HeaderMap,
    remote: Option<ConnectInfo<SocketAddr>>,
    Path(id): Path<String>,
    Json(body): Json<PriorityPatch>,
) -> Response {
    if let Err(resp) = gate(&state, &headers, remote.map(|ConnectInfo(addr)| addr)).await {
        return resp;
    }
    match state.credentials.set_priority(&id, body.priority) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::NOT_FOUND, Json(json!({"error": e.to_string()}))).into_response(),
    }
}

async fn reset_one_cooldown(
    State(state): State<AppState>,
    headers: HeaderMap,
    remote: Option<ConnectInfo<SocketAddr>>,
    Path(id): Path<String>,
) -> Response {
    if let Err(resp) = gate(&state, &headers, remote.map(|ConnectInfo(addr)| addr)).await {
        return resp;
    }
    match state.credentials.reset_cooldown(&id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::NOT_FOUND, Json(json!({"error": e.to_string()}))).into_response(),
    }
}

async fn reset_all_cooldown(
    State(state): State<AppState>,
    headers: HeaderMap,
    remote: Option<ConnectInfo<SocketAddr>>,
) -> Response {
    if let Err(resp) = gate(&state, &headers, remote.map(|ConnectInfo(addr)| addr)).await {
        return resp;
    }
    let _ = state.credentials.reset_cooldown("");
    StatusCode::NO_CONTENT.into_response()
}

async fn disable_credential(
    State(state): State<AppState>,
    headers: HeaderMap,
    remote: Option<ConnectInfo<SocketAddr>>,
    Path(id): Path<String>,
) -> Response {
    if let Err(resp) = gate(&state, &headers, remote.map(|ConnectInfo(addr)| addr)).await {
        return resp;
    }
    match state.credentials.disable(&id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::NOT_FOUND, Json(json!({"error": e.to_string()}))).into_response(),
    }
}

async fn enable_credential(
    State(state): State<AppState>,
    headers: HeaderMap,
    remote: Option<ConnectInfo<SocketAddr>>,
    Path(id): Path<String>,
) -> Response {
    if let Err(resp) = gate(&state, &headers, remote.map(|ConnectInfo(addr)| addr)).await {
        return resp;
    }
    match state.credentials.enable(&id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::NOT_FOUND, Json(json!({"error": e.to_string()}))).into_response(),
    }
}

async fn delete_credential(
    State(state): State<AppState>,
    headers: HeaderMap,
    remote: Option<ConnectInfo<SocketAddr>>,
    Path(id): Path<String>,
) -> Response {
    if let Err(resp) = gate(&state, &headers, remote.map(|ConnectInfo(addr)| addr)).await {
        return resp;
    }
    match state.credentials.delete(&id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::NOT_FOUND, Json(json!({"error": e.to_string()}))).into_response(),
    }
}

async fn response_cache_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
    remote: Option<ConnectInfo<SocketAddr>>,
) -> Response {
    if let Err(resp) = gate(&state, &headers, remote.map(|ConnectInfo(addr)| addr)).await {
        return resp;
    }
    Json(state.response_cache.get_stats()).into_response()
}

async fn clear_response_cache(
    State(state): State<AppState>,
    headers: HeaderMap,
    remote: Option<ConnectInfo<SocketAddr>>,
) -> Response {
    if let Err(resp) = gate(&state, &headers, remote.map(|ConnectInfo(addr)| addr)).await {
        return resp;
    }
    state.response_cache.clear();
    StatusCode::NO_CONTENT.into_response()
}

async fn prompt_cache_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
    remote: Option<ConnectInfo<SocketAddr>>,
) -> Response {
    if let Err(resp) = gate(&state, &headers, remote.map(|ConnectInfo(addr)| addr)).await {
        return resp;
    }
    Json(state.prompt_cache.get_stats()).into_response()
}

async fn clear_prompt_cache(
    State(state): State<AppState>,
    headers: HeaderMap,
    remote: Option<ConnectInfo<SocketAddr>>,
) -> Response {
    if let Err(resp) = gate(&state, &headers, remote.map(|ConnectInfo(addr)| addr)).await {
        return resp;
    }
    state.prompt_cache.clear();
    StatusCode::NO_CONTENT.into_response()
}

#[derive(Deserialize)]
struct TopQuery {
    #[serde(default = "default_top_n")]
    n: usize,
}

fn default_top_n() -> usize {
    10
}

async fn prompt_cache_top(
    State(state): State<AppState>,
    headers: HeaderMap,
    remote: Option<ConnectInfo<SocketAddr>>,
    axum::extract::Query(query): axum::extract::Query<TopQuery>,
) -> Response {
    if let Err(resp) = gate(&state, &headers, remote.map(|ConnectInfo(addr)| addr)).await {
        return resp;
    }
    let top = state.prompt_cache.top_prompts(query.n);
    Json(json!({"prompts": top})).into_response()
}

#[derive(Deserialize)]
struct WarmRequest {
    /// `(prompt_text, provider)` pairs to pre-seed the prompt cache with.
    items: Vec<(String, String)>,
}

async fn warm_prompt_cache(
    State(state): State<AppState>,
    headers: HeaderMap,
    remote: Option<ConnectInfo<SocketAddr>>,
    Json(body): Json<WarmRequest>,
) -> Response {
    if let Err(resp) = gate(&state, &headers, remote.map(|ConnectInfo(addr)| addr)).await {
        return resp;
    }
    let report = state.prompt_cache.warm_cache(&body.items);
    Json(report).into_response()
}
