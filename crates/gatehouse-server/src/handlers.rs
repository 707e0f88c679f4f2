//! Client-facing route handlers. Every handler follows the ordering
//! guarantee from the concurrency model: translation-hardening → cache
//! lookup → credential select → executor → cache store → post-sanitation →
//! client write.

use std::net::SocketAddr;

use axum::Json;
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use gatehouse::constants::{EMBEDDING_DIM_LARGE, EMBEDDING_DIM_SMALL};
use gatehouse::executor::ExecutorResponse;
use gatehouse::selector::SelectionTrace;
use gatehouse::translate::{ClientProfile, RouteDialect, dialect};

use crate::attempts::{NonStreamAttempt, StreamAttempt};
use crate::error::GatewayError;
use crate::routing::{provider_for, providers_for, upstream_url};
use crate::state::AppState;
use crate::streaming;

fn client_profile(headers: &HeaderMap) -> ClientProfile {
    let ua = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let has_stainless_headers = headers.contains_key("x-stainless-lang") || headers.contains_key("x-stainless-package-version");
    ClientProfile::sniff(ua, has_stainless_headers)
}

fn wants_streaming(headers: &HeaderMap, request: &Value) -> bool {
    let accepts_sse = headers
        .get(axum::http::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("text/event-stream"));
    let field_stream = request.get("stream").and_then(Value::as_bool).unwrap_or(false);
    accepts_sse || field_stream
}

fn model_of(request: &Value) -> String {
    request.get("model").and_then(Value::as_str).unwrap_or("unknown").to_string()
}

/// Runs one non-streaming upstream call through the selector/executor, with
/// response-cache lookup/store around it. `trace` is populated with every
/// credential attempted, for the caller to surface as debug headers.
async fn call_non_streaming(
    state: &AppState,
    route_dialect: RouteDialect,
    model: &str,
    payload: &[u8],
    cancel: &CancellationToken,
    trace: &mut SelectionTrace,
) -> Result<ExecutorResponse, GatewayError> {
    if let Some(cached) = state.response_cache.get(model, payload) {
        debug!(model = %model, "response cache hit");
        return Ok(ExecutorResponse {
            status: cached.status,
            body: cached.body,
            content_type: cached.content_type,
        });
    }

    let provider = provider_for(route_dialect);
    let url = upstream_url(provider, "");
    let attempt = NonStreamAttempt {
        executor: &state.executor,
        url,
        body: payload.to_vec(),
        attach: provider.attachment(),
        cancel: cancel.clone(),
    };
    let providers = providers_for(route_dialect);
    let response = state
        .selector
        .run(&providers, trace, cancel, &attempt)
        .await
        .map_err(GatewayError::from)?;

    let response = match silent_max_tokens_retry_payload(&response, payload, model) {
        Some(retry_payload) => {
            debug!(model = %model, "silent MAX_TOKENS detected, retrying once with -thinking suffix stripped");
            let retry_attempt = NonStreamAttempt {
                executor: &state.executor,
                url: upstream_url(provider, ""),
                body: retry_payload,
                attach: provider.attachment(),
                cancel: cancel.clone(),
            };
            state
                .selector
                .run(&providers, trace, cancel, &retry_attempt)
                .await
                .map_err(GatewayError::from)?
        }
        None => response,
    };

    state
        .response_cache
        .set(model, payload, response.body.clone(), &response.content_type, response.status);

    Ok(response)
}

/// Per §4.7: when a successful response is "silent MAX_TOKENS" (no visible
/// output, no tool calls, and usage/incomplete_details indicate the output
/// cap was hit) and the model id ends in `-thinking`, one retry is
/// authorized with that suffix stripped — no other model substitution, and
/// never more than this single extra attempt. Returns the retry payload
/// (original payload with `model` rewritten) when the retry is authorized.
fn silent_max_tokens_retry_payload(response: &ExecutorResponse, payload: &[u8], model: &str) -> Option<Vec<u8>> {
    if !(200..300).contains(&response.status) {
        return None;
    }
    let signals: gatehouse::executor::ResponseSignals = serde_json::from_slice(&response.body).ok()?;
    if !gatehouse::executor::is_silent_max_tokens(&signals) {
        return None;
    }
    let stripped_model = gatehouse::executor::strip_thinking_suffix(model)?;
    let mut retry_request: Value = serde_json::from_slice(payload).ok()?;
    retry_request["model"] = json!(stripped_model);
    serde_json::to_vec(&retry_request).ok()
}

async fn call_streaming(
    state: &AppState,
    route_dialect: RouteDialect,
    payload: &[u8],
    cancel: &CancellationToken,
    trace: &mut SelectionTrace,
) -> Result<tokio::sync::mpsc::Receiver<gatehouse::executor::ExecutorResult<bytes::Bytes>>, GatewayError> {
    let provider = provider_for(route_dialect);
    let url = upstream_url(provider, "");
    let attempt = StreamAttempt {
        executor: &state.executor,
        url,
        body: payload.to_vec(),
        attach: provider.attachment(),
        cancel: cancel.clone(),
    };
    let providers = providers_for(route_dialect);
    state
        .selector
        .run(&providers, trace, cancel, &attempt)
        .await
        .map_err(GatewayError::from)
}

/// Debug headers exposing the final selection trace, set only when the
/// caller's socket address is loopback — these leak provider/credential
/// identity and must never reach a non-local caller.
fn apply_debug_headers(response: &mut Response, trace: &SelectionTrace, remote: Option<SocketAddr>) {
    let is_loopback = remote.map(|addr| addr.ip().is_loopback()).unwrap_or(false);
    if !is_loopback {
        return;
    }
    let Some(last) = trace.last() else { return };
    let headers = response.headers_mut();
    if let Ok(v) = axum::http::HeaderValue::from_str(&last.provider) {
        headers.insert("x-gatehouse-provider", v);
    }
    if let Ok(v) = axum::http::HeaderValue::from_str(&last.credential_id) {
        headers.insert("x-gatehouse-credential-id", v);
    }
    if let Ok(v) = axum::http::HeaderValue::from_str(&last.label) {
        headers.insert("x-gatehouse-credential-label", v);
    }
    if let Ok(v) = axum::http::HeaderValue::from_str(&last.masked_account) {
        headers.insert("x-gatehouse-account", v);
    }
    if let Ok(v) = axum::http::HeaderValue::from_str(&trace.attempts.len().to_string()) {
        headers.insert("x-gatehouse-attempts", v);
    }
}

/// Generic dispatcher shared by the OpenAI chat/completions/responses routes
/// and the Anthropic messages route: they differ only in `RouteDialect` and
/// whether Factory-style synthesis can trigger.
async fn dispatch(
    state: &AppState,
    route_dialect: RouteDialect,
    headers: &HeaderMap,
    remote: Option<SocketAddr>,
    mut request: Value,
) -> Result<Response, GatewayError> {
    let profile = client_profile(headers);
    let model = model_of(&request);
    tracing::Span::current().record("model", tracing::field::display(&model));

    let dialect = dialect::resolve(route_dialect, profile);
    dialect.harden(&mut request);

    let streaming_requested = wants_streaming(headers, &request);
    let payload_len_estimate = serde_json::to_vec(&request).map(|v| v.len()).unwrap_or(0);
    let needs_synthesis = state.config.codex_synth_enable
        && matches!(profile, ClientProfile::Codex)
        && gatehouse::translate::harden::codex_needs_synthesis(&request, payload_len_estimate, state.config.codex_synth_huge_bytes);

    let cancel = CancellationToken::new();
    let mut trace = SelectionTrace::default();

    if streaming_requested && !needs_synthesis && !profile.is_factory_like() {
        request["stream"] = json!(true);
        let payload = serde_json::to_vec(&request).map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;
        match call_streaming(state, route_dialect, &payload, &cancel, &mut trace).await {
            Ok(rx) => {
                let mut response = streaming::passthrough_response(rx, profile);
                apply_debug_headers(&mut response, &trace, remote);
                return Ok(response);
            }
            Err(e) => return Ok(streaming_error_response(&e, profile)),
        }
    }

    // Non-streaming or synthesized-stream path: force stream=false upstream.
    request["stream"] = json!(false);
    let payload = serde_json::to_vec(&request).map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;

    let response = match call_non_streaming(state, route_dialect, &model, &payload, &cancel, &mut trace).await {
        Ok(r) => r,
        Err(e) => {
            if streaming_requested {
                return Ok(streaming_error_response(&e, profile));
            }
            return Err(e);
        }
    };

    let mut response_json = response
        .json()
        .ok_or_else(|| GatewayError::Internal("upstream returned non-JSON body".to_string()))?;
    dialect.sanitize(&mut response_json, &request);

    if streaming_requested {
        let response_id = response_json.get("id").and_then(Value::as_str).unwrap_or("resp").to_string();
        let output = response_json.get("output").and_then(Value::as_array).cloned().unwrap_or_default();
        let bytes = streaming::synthesize_response(&response_id, &output, profile);
        let mut http_response = streaming::synthesized_response_to_http(bytes);
        apply_debug_headers(&mut http_response, &trace, remote);
        return Ok(http_response);
    }

    let mut http_response = (
        axum::http::StatusCode::from_u16(response.status).unwrap_or(axum::http::StatusCode::OK),
        Json(response_json),
    )
        .into_response();
    apply_debug_headers(&mut http_response, &trace, remote);
    Ok(http_response)
}

fn streaming_error_response(err: &GatewayError, profile: ClientProfile) -> Response {
    let status = match err {
        GatewayError::Upstream(e) => e.http_status(),
        _ => 500,
    };
    let bytes = streaming::error_frame(status, &err.to_string(), profile);
    streaming::synthesized_response_to_http(bytes)
}

#[instrument(skip(state, headers, request), fields(model = tracing::field::Empty))]
pub async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    remote: Option<ConnectInfo<SocketAddr>>,
    Json(request): Json<Value>,
) -> Result<Response, GatewayError> {
    state.activity.record_activity();
    dispatch(&state, RouteDialect::OpenAi, &headers, remote.map(|ConnectInfo(a)| a), request).await
}

#[instrument(skip(state, headers, request), fields(model = tracing::field::Empty))]
pub async fn completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    remote: Option<ConnectInfo<SocketAddr>>,
    Json(request): Json<Value>,
) -> Result<Response, GatewayError> {
    state.activity.record_activity();
    dispatch(&state, RouteDialect::OpenAi, &headers, remote.map(|ConnectInfo(a)| a), request).await
}

#[instrument(skip(state, headers, request), fields(model = tracing::field::Empty))]
pub async fn responses(
    State(state): State<AppState>,
    headers: HeaderMap,
    remote: Option<ConnectInfo<SocketAddr>>,
    Json(request): Json<Value>,
) -> Result<Response, GatewayError> {
    state.activity.record_activity();
    dispatch(&state, RouteDialect::OpenAi, &headers, remote.map(|ConnectInfo(a)| a), request).await
}

#[instrument(skip(state, headers, request), fields(model = tracing::field::Empty))]
pub async fn messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    remote: Option<ConnectInfo<SocketAddr>>,
    Json(request): Json<Value>,
) -> Result<Response, GatewayError> {
    state.activity.record_activity();
    if let Some(system) = request.get("system").and_then(Value::as_str) {
        state.prompt_cache.cache_system_prompt(system, "anthropic");
    }
    dispatch(&state, RouteDialect::Anthropic, &headers, remote.map(|ConnectInfo(a)| a), request).await
}

/// Counts tokens without calling upstream, using the same estimator the
/// prompt cache uses internally.
#[instrument(skip(state, request))]
pub async fn messages_count_tokens(State(state): State<AppState>, Json(request): Json<Value>) -> Response {
    state.activity.record_activity();
    let text = request
        .get("messages")
        .and_then(Value::as_array)
        .map(|msgs| {
            msgs.iter()
                .filter_map(|m| m.get("content").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();
    let tokens = gatehouse::hashing::estimate_tokens(&text);
    Json(json!({ "input_tokens": tokens })).into_response()
}

#[instrument(skip(state, headers, request), fields(model = tracing::field::Empty))]
pub async fn gemini_generate_content(
    State(state): State<AppState>,
    headers: HeaderMap,
    remote: Option<ConnectInfo<SocketAddr>>,
    Json(request): Json<Value>,
) -> Result<Response, GatewayError> {
    state.activity.record_activity();
    dispatch(&state, RouteDialect::Gemini, &headers, remote.map(|ConnectInfo(a)| a), request).await
}

#[instrument(skip(state, headers))]
pub async fn gemini_models_list(State(state): State<AppState>, headers: HeaderMap) -> Response {
    state.activity.record_activity();
    let _ = headers;
    Json(json!({ "models": known_models() })).into_response()
}

/// Deterministic embedding synthesis: each component is derived by iterated
/// SHA-256 of `model\ninput`, mapped into `[-1, 1]`.
#[instrument(skip(state, request), fields(model = tracing::field::Empty))]
pub async fn embeddings(State(state): State<AppState>, Json(request): Json<Value>) -> Result<Response, GatewayError> {
    state.activity.record_activity();
    let model = request
        .get("model")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::InvalidRequest("missing model".to_string()))?
        .to_string();
    tracing::Span::current().record("model", tracing::field::display(&model));

    let inputs: Vec<String> = match request.get("input") {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
        _ => return Err(GatewayError::InvalidRequest("missing input".to_string())),
    };

    let dim = if model.ends_with("-large") { EMBEDDING_DIM_LARGE } else { EMBEDDING_DIM_SMALL };

    let data: Vec<Value> = inputs
        .iter()
        .enumerate()
        .map(|(index, input)| {
            json!({
                "object": "embedding",
                "index": index,
                "embedding": synthesize_embedding(&model, input, dim),
            })
        })
        .collect();

    Ok(Json(json!({
        "object": "list",
        "model": model,
        "data": data,
    }))
    .into_response())
}

fn synthesize_embedding(model: &str, input: &str, dim: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(dim);
    let mut seed = format!("{model}\n{input}").into_bytes();
    while out.len() < dim {
        let digest = Sha256::digest(&seed);
        for byte in digest.iter() {
            if out.len() >= dim {
                break;
            }
            out.push((*byte as f64 / 255.0) * 2.0 - 1.0);
        }
        seed = digest.to_vec();
    }
    out
}

fn known_models() -> Vec<Value> {
    vec![
        json!({"id": "gpt-4o", "object": "model", "owned_by": "openai"}),
        json!({"id": "gpt-4o-mini", "object": "model", "owned_by": "openai"}),
        json!({"id": "claude-sonnet-4-5", "object": "model", "owned_by": "anthropic"}),
        json!({"id": "gemini-claude-sonnet-4-5", "object": "model", "owned_by": "gemini"}),
    ]
}

/// `GET /models`. Routed by User-Agent prefix to a Claude-style listing
/// (`claude-cli` clients expect Anthropic's model list shape).
#[instrument(skip(state, headers))]
pub async fn list_models(State(state): State<AppState>, headers: HeaderMap) -> Response {
    state.activity.record_activity();
    let profile = client_profile(&headers);
    if matches!(profile, ClientProfile::ClaudeCli) {
        let data: Vec<Value> = known_models()
            .into_iter()
            .filter(|m| m.get("owned_by").and_then(Value::as_str) == Some("anthropic"))
            .collect();
        Json(json!({ "data": data, "has_more": false })).into_response()
    } else {
        Json(json!({ "object": "list", "data": known_models() })).into_response()
    }
}

#[derive(serde::Serialize)]
struct HealthResponse {
    status: &'static str,
    port: u16,
}

#[instrument(skip(state))]
pub async fn healthz(State(state): State<AppState>) -> Response {
    Json(HealthResponse { status: "ok", port: state.config.port }).into_response()
}

/// Prometheus text exposition of cache and credential pool stats.
#[instrument(skip(state))]
pub async fn metrics(State(state): State<AppState>) -> Response {
    let response_stats = state.response_cache.get_stats();
    let prompt_stats = state.prompt_cache.get_stats();
    let mut out = String::new();
    out.push_str("# HELP gatehouse_response_cache_hits_total Response cache hits.\n");
    out.push_str("# TYPE gatehouse_response_cache_hits_total counter\n");
    out.push_str(&format!("gatehouse_response_cache_hits_total {}\n", response_stats.hits));
    out.push_str("# HELP gatehouse_response_cache_misses_total Response cache misses.\n");
    out.push_str("# TYPE gatehouse_response_cache_misses_total counter\n");
    out.push_str(&format!("gatehouse_response_cache_misses_total {}\n", response_stats.misses));
    out.push_str("# HELP gatehouse_response_cache_size Current response cache entry count.\n");
    out.push_str("# TYPE gatehouse_response_cache_size gauge\n");
    out.push_str(&format!("gatehouse_response_cache_size {}\n", response_stats.size));
    out.push_str("# HELP gatehouse_prompt_cache_hits_total Prompt cache hits.\n");
    out.push_str("# TYPE gatehouse_prompt_cache_hits_total counter\n");
    out.push_str(&format!("gatehouse_prompt_cache_hits_total {}\n", prompt_stats.hits));
    out.push_str("# HELP gatehouse_prompt_cache_tokens_saved_total Estimated tokens saved by prompt caching.\n");
    out.push_str("# TYPE gatehouse_prompt_cache_tokens_saved_total counter\n");
    out.push_str(&format!(
        "gatehouse_prompt_cache_tokens_saved_total {}\n",
        prompt_stats.estimated_tokens_saved
    ));

    for provider in state.credentials.providers() {
        let creds = state.credentials.list(&provider);
        out.push_str(&format!(
            "gatehouse_credentials_total{{provider=\"{provider}\"}} {}\n",
            creds.len()
        ));
        let cooling = creds.iter().filter(|c| c.is_cooling(chrono::Utc::now().timestamp())).count();
        out.push_str(&format!("gatehouse_credentials_cooling{{provider=\"{provider}\"}} {cooling}\n"));
    }

    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        out,
    )
        .into_response()
}

#[instrument(skip(state))]
pub async fn keep_alive(State(state): State<AppState>) -> Response {
    state.activity.record_activity();
    info!("keep-alive ping received");
    (axum::http::StatusCode::OK, "ok").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse::credential::{AuthMaterial, Credential};

    fn trace_with_one_attempt() -> SelectionTrace {
        let mut trace = SelectionTrace::default();
        let cred = Credential::new("cred-1", "openai", "primary", AuthMaterial::ApiKey { key: "sk-test".to_string() });
        trace.push("openai", &cred);
        trace
    }

    #[test]
    fn debug_headers_set_for_loopback_caller() {
        let trace = trace_with_one_attempt();
        let mut response = Response::new(axum::body::Body::empty());
        apply_debug_headers(&mut response, &trace, Some("127.0.0.1:5000".parse().unwrap()));
        assert_eq!(response.headers().get("x-gatehouse-provider").unwrap(), "openai");
        assert_eq!(response.headers().get("x-gatehouse-credential-id").unwrap(), "cred-1");
        assert_eq!(response.headers().get("x-gatehouse-attempts").unwrap(), "1");
    }

    #[test]
    fn debug_headers_absent_for_non_loopback_caller() {
        let trace = trace_with_one_attempt();
        let mut response = Response::new(axum::body::Body::empty());
        apply_debug_headers(&mut response, &trace, Some("203.0.113.10:5000".parse().unwrap()));
        assert!(response.headers().get("x-gatehouse-provider").is_none());
    }

    #[test]
    fn debug_headers_absent_without_connect_info() {
        let trace = trace_with_one_attempt();
        let mut response = Response::new(axum::body::Body::empty());
        apply_debug_headers(&mut response, &trace, None);
        assert!(response.headers().get("x-gatehouse-provider").is_none());
    }

    #[test]
    fn debug_headers_absent_when_trace_is_empty() {
        let trace = SelectionTrace::default();
        let mut response = Response::new(axum::body::Body::empty());
        apply_debug_headers(&mut response, &trace, Some("127.0.0.1:5000".parse().unwrap()));
        assert!(response.headers().get("x-gatehouse-provider").is_none());
    }

    #[test]
    fn silent_max_tokens_retry_triggers_for_thinking_model() {
        let payload = serde_json::to_vec(&json!({"model": "gemini-claude-sonnet-4-5-thinking", "messages": []})).unwrap();
        let response = ExecutorResponse {
            status: 200,
            content_type: "application/json".to_string(),
            body: serde_json::to_vec(&json!({
                "output_text": "",
                "output": [],
                "incomplete_details": {"reason": "max_output_tokens"},
            }))
            .unwrap(),
        };
        let retry = silent_max_tokens_retry_payload(&response, &payload, "gemini-claude-sonnet-4-5-thinking").unwrap();
        let retry_json: Value = serde_json::from_slice(&retry).unwrap();
        assert_eq!(retry_json["model"], json!("gemini-claude-sonnet-4-5"));
    }

    #[test]
    fn silent_max_tokens_retry_not_triggered_for_non_thinking_model() {
        let payload = serde_json::to_vec(&json!({"model": "gpt-4o", "messages": []})).unwrap();
        let response = ExecutorResponse {
            status: 200,
            content_type: "application/json".to_string(),
            body: serde_json::to_vec(&json!({
                "output_text": "",
                "output": [],
                "incomplete_details": {"reason": "max_output_tokens"},
            }))
            .unwrap(),
        };
        assert!(silent_max_tokens_retry_payload(&response, &payload, "gpt-4o").is_none());
    }

    #[test]
    fn silent_max_tokens_retry_not_triggered_with_visible_text() {
        let payload = serde_json::to_vec(&json!({"model": "x-thinking"})).unwrap();
        let response = ExecutorResponse {
            status: 200,
            content_type: "application/json".to_string(),
            body: serde_json::to_vec(&json!({"output_text": "hello", "output": []})).unwrap(),
        };
        assert!(silent_max_tokens_retry_payload(&response, &payload, "x-thinking").is_none());
    }
}
