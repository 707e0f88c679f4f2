//! The only error type in this crate that writes an HTTP response: executor
//! and selector errors are converted into it at the router boundary, never
//! written to the client directly by lower layers.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use gatehouse::selector::SelectorError;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("upstream exhausted: {0}")]
    Upstream(#[from] SelectorError),

    #[error("request cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    fn status(&self) -> StatusCode {
        match self {
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::UnknownModel(_) => StatusCode::BAD_REQUEST,
            GatewayError::Upstream(e) => {
                StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            GatewayError::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The `{error:{message,type,code?}}` envelope used by both the HTTP
    /// error path and the synthesized-SSE error frame.
    pub fn body_json(&self) -> serde_json::Value {
        let error_type = match self {
            GatewayError::InvalidRequest(_) | GatewayError::UnknownModel(_) => "invalid_request_error",
            GatewayError::Upstream(_) => "upstream_error",
            GatewayError::Cancelled => "cancelled",
            GatewayError::Internal(_) => "internal_error",
        };
        json!({
            "error": {
                "message": self.to_string(),
                "type": error_type,
                "code": self.status().as_u16(),
            }
        })
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(self.body_json())).into_response()
    }
}
