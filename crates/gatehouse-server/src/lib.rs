//! Gatehouse's HTTP gateway surface: client dialect routing, the three
//! execution paths (pass-through stream / non-streaming / synthesized
//! stream), and the operator-facing management API.

pub mod attempts;
pub mod error;
pub mod handlers;
pub mod management;
pub mod routing;
pub mod state;
pub mod streaming;

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Builds the full router: client-facing chat/completion/messages/models
/// routes mounted at both `/` and `/v1`, plus the management surface (only
/// when enabled) and the always-on health/metrics/keep-alive probes.
///
/// The caller must serve this with
/// `into_make_service_with_connect_info::<SocketAddr>()`, since the
/// management routes extract `ConnectInfo` to decide whether
/// `MANAGEMENT_PASSWORD` is usable from the caller's address.
pub fn build_router(state: AppState) -> Router {
    let client_routes = Router::new()
        .route("/chat/completions", post(handlers::chat_completions))
        .route("/completions", post(handlers::completions))
        .route("/responses", post(handlers::responses))
        .route("/messages", post(handlers::messages))
        .route("/messages/count_tokens", post(handlers::messages_count_tokens))
        .route("/embeddings", post(handlers::embeddings))
        .route("/models", get(handlers::list_models))
        .route("/v1beta/models", get(handlers::gemini_models_list))
        .route(
            "/v1beta/models/{*action}",
            get(handlers::gemini_models_list).post(handlers::gemini_generate_content),
        );

    let management_routes = if state.config.management_enabled() {
        Some(management::router())
    } else {
        None
    };

    let mut app = Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/metrics", get(handlers::metrics))
        .route("/keep-alive", get(handlers::keep_alive))
        .merge(client_routes.clone())
        .nest("/v1", client_routes);

    if let Some(management) = management_routes {
        app = app.nest("/v0/management", management);
    }

    app.layer(TraceLayer::new_for_http()).with_state(state)
}
