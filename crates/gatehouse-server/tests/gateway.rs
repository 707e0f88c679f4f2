//! Router-level integration tests, using `tower::ServiceExt::oneshot`
//! against the fully assembled router, matching the teacher's
//! `reflex-server/tests/` harness style.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use gatehouse::cache::{PromptCache, PromptCacheConfig, ResponseCache, ResponseCacheConfig};
use gatehouse::config::Config;
use gatehouse::credential::CredentialPool;
use gatehouse::executor::Executor;
use gatehouse::selector::{Selector, SelectorConfig};
use gatehouse_server::state::{ActivityTracker, AppState};
use gatehouse_server::build_router;

fn test_state(management_secret: Option<&str>) -> AppState {
    let mut config = Config::default();
    config.management_secret = management_secret.map(str::to_string);

    let response_cache = ResponseCache::new(ResponseCacheConfig {
        persist_path: None,
        ..ResponseCacheConfig::default()
    });
    let prompt_cache = PromptCache::new(PromptCacheConfig {
        persist_path: None,
        ..PromptCacheConfig::default()
    });
    let credentials = Arc::new(CredentialPool::new());
    let selector = Arc::new(Selector::new(Arc::clone(&credentials), SelectorConfig::default()));
    let executor = Arc::new(Executor::new(reqwest::Client::new(), config.max_body_bytes));

    AppState {
        config: Arc::new(config),
        credentials,
        selector,
        executor,
        response_cache: Arc::new(response_cache),
        prompt_cache: Arc::new(prompt_cache),
        activity: Arc::new(ActivityTracker::new()),
    }
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn healthz_reports_ok_and_port() {
    let app = build_router(test_state(None));
    let response = app
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["port"], 8080);
}

#[tokio::test]
async fn metrics_is_prometheus_text_exposition() {
    let app = build_router(test_state(None));
    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("gatehouse_response_cache_hits_total"));
    assert!(text.contains("# TYPE"));
}

#[tokio::test]
async fn models_route_is_mounted_at_root_and_v1() {
    let app = build_router(test_state(None));
    for path in ["/models", "/v1/models"] {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "path {path}");
    }
}

#[tokio::test]
async fn claude_cli_user_agent_gets_anthropic_only_models() {
    let app = build_router(test_state(None));
    let response = app
        .oneshot(
            Request::builder()
                .uri("/models")
                .header("user-agent", "claude-cli/1.0")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let json = body_json(response).await;
    let data = json["data"].as_array().unwrap();
    assert!(!data.is_empty());
    assert!(data.iter().all(|m| m["owned_by"] == "anthropic"));
}

#[tokio::test]
async fn management_routes_404_when_disabled() {
    let app = build_router(test_state(None));
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v0/management/version")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn management_routes_401_when_enabled_but_key_wrong() {
    let app = build_router(test_state(Some("correct-secret")));
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v0/management/version")
                .header("x-management-key", "wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn management_routes_200_with_correct_secret() {
    let app = build_router(test_state(Some("correct-secret")));
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v0/management/version")
                .header("x-management-key", "correct-secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn management_credential_inventory_lists_added_credential() {
    let state = test_state(Some("s3cret"));
    let cred = gatehouse::credential::Credential::new(
        "cred-1",
        "openai",
        "test key",
        gatehouse::credential::AuthMaterial::ApiKey { key: "sk-test".to_string() },
    );
    state.credentials.add(cred);
    let app = build_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/v0/management/credentials")
                .header("x-management-key", "s3cret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let creds = json["credentials"].as_array().unwrap();
    assert_eq!(creds.len(), 1);
    assert_eq!(creds[0]["id"], "cred-1");
}

#[tokio::test]
async fn embeddings_are_deterministic_and_correctly_sized() {
    let app = build_router(test_state(None));
    let request = |model: &str| {
        Request::builder()
            .method("POST")
            .uri("/embeddings")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&serde_json::json!({"model": model, "input": "hello world"})).unwrap()))
            .unwrap()
    };

    let small = app.clone().oneshot(request("text-embedding-3-small")).await.unwrap();
    assert_eq!(small.status(), StatusCode::OK);
    let small_json = body_json(small).await;
    let small_vec = small_json["data"][0]["embedding"].as_array().unwrap();
    assert_eq!(small_vec.len(), 1536);

    let large = app.oneshot(request("text-embedding-3-large")).await.unwrap();
    let large_json = body_json(large).await;
    let large_vec = large_json["data"][0]["embedding"].as_array().unwrap();
    assert_eq!(large_vec.len(), 3072);
}

#[tokio::test]
async fn chat_completions_without_credentials_exhausts_with_503_and_no_debug_headers() {
    // `test_state` registers no credentials for any provider, so the
    // selector's provider loop immediately finds every provider soft-empty
    // and returns a 503 "no upstream reached" exhaustion — this exercises
    // the dispatch path without needing a live upstream.
    let app = build_router(test_state(None));
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/chat/completions")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&serde_json::json!({"model": "gpt-4o", "messages": []})).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    // No ConnectInfo layer is present in this test harness (oneshot against
    // the bare Router), so the selection-trace debug headers — which must
    // never reach a non-loopback caller — are absent here too.
    assert!(!response.headers().contains_key("x-gatehouse-provider"));
}

#[tokio::test]
async fn embeddings_same_input_is_deterministic() {
    let app = build_router(test_state(None));
    let make_request = || {
        Request::builder()
            .method("POST")
            .uri("/embeddings")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::to_vec(&serde_json::json!({"model": "text-embedding-3-small", "input": "same text"})).unwrap(),
            ))
            .unwrap()
    };

    let first = body_json(app.clone().oneshot(make_request()).await.unwrap()).await;
    let second = body_json(app.oneshot(make_request()).await.unwrap()).await;
    assert_eq!(first["data"][0]["embedding"], second["data"][0]["embedding"]);
}
