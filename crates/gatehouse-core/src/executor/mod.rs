//! C7: one attempt — translate is already done by the caller; this module
//! owns the actual upstream HTTP call, both non-streaming and streaming, and
//! per-attempt failure classification.

pub mod types;

pub use types::{
    CredentialAttachment, ExecutorError, ExecutorRequest, ExecutorResponse, ExecutorResult,
    IncompleteDetails, ResponseSignals, Usage,
};

use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::constants::{DEFAULT_MAX_BODY_BYTES, SILENT_MAX_TOKENS_OUTPUT_THRESHOLD};
use crate::credential::Credential;
use crate::selector::Classification;

/// Wraps a `reqwest::Client` with the size cap and credential-attachment
/// logic shared by every upstream call.
pub struct Executor {
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(reqwest::Client::new(), DEFAULT_MAX_BODY_BYTES)
    }
}

impl Executor {
    pub fn new(client: reqwest::Client, max_body_bytes: usize) -> Self {
        Self { client, max_body_bytes }
    }

    /// Builds, attaches the credential to, sends, and buffers one
    /// non-streaming upstream call, reading the body under the hard size
    /// cap.
    pub async fn call_non_streaming(
        &self,
        req: &ExecutorRequest,
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> ExecutorResult<ExecutorResponse> {
        let builder = self
            .client
            .post(&req.url)
            .header(reqwest::header::CONTENT_TYPE, req.content_type.clone())
            .body(req.body.clone());
        let builder = types::apply_credential(builder, credential, &req.attach, &req.url);

        let response = tokio::select! {
            res = builder.send() => res.map_err(ExecutorError::Network)?,
            _ = cancel.cancelled() => return Err(ExecutorError::Cancelled),
        };

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/json")
            .to_string();

        let body = read_body_capped(response, self.max_body_bytes, cancel).await?;

        Ok(ExecutorResponse { status, body, content_type })
    }

    /// Opens the upstream connection and forwards frames one at a time into
    /// a capacity-1 channel — the "bounded single-slot channel" from the
    /// concurrency model. The receiver sees `Ok(frame)` per SSE record and a
    /// final `Err` only on a genuine transport failure; a clean upstream EOF
    /// simply closes the channel.
    pub async fn call_streaming(
        &self,
        req: &ExecutorRequest,
        credential: &Credential,
        cancel: CancellationToken,
    ) -> ExecutorResult<mpsc::Receiver<ExecutorResult<Bytes>>> {
        let builder = self
            .client
            .post(&req.url)
            .header(reqwest::header::CONTENT_TYPE, req.content_type.clone())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .body(req.body.clone());
        let builder = types::apply_credential(builder, credential, &req.attach, &req.url);

        let response = tokio::select! {
            res = builder.send() => res.map_err(ExecutorError::Network)?,
            _ = cancel.cancelled() => return Err(ExecutorError::Cancelled),
        };

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = read_body_capped(response, self.max_body_bytes, &cancel).await?;
            let message = String::from_utf8_lossy(&body).to_string();
            return Err(ExecutorError::Status { status, message });
        }

        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(forward_frames(response, tx, cancel));
        Ok(rx)
    }
}

async fn forward_frames(
    response: reqwest::Response,
    tx: mpsc::Sender<ExecutorResult<Bytes>>,
    cancel: CancellationToken,
) {
    let mut stream = response.bytes_stream();
    let mut buf = Vec::new();

    loop {
        let chunk = tokio::select! {
            c = stream.next() => c,
            _ = cancel.cancelled() => {
                debug!("streaming forward cancelled, closing upstream connection");
                return;
            }
        };

        let Some(chunk) = chunk else {
            if !buf.is_empty() {
                let _ = tx.send(Ok(Bytes::from(buf))).await;
            }
            return;
        };

        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                let _ = tx.send(Err(ExecutorError::Network(e))).await;
                return;
            }
        };

        buf.extend_from_slice(&chunk);
        // SSE records are terminated by a blank line ("\n\n").
        while let Some(pos) = find_double_newline(&buf) {
            let frame = buf.drain(..pos + 2).collect::<Vec<u8>>();
            if tx.send(Ok(Bytes::from(frame))).await.is_err() {
                return; // receiver dropped: client disconnected
            }
            if cancel.is_cancelled() {
                return;
            }
        }
    }
}

fn find_double_newline(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

async fn read_body_capped(
    response: reqwest::Response,
    max_body_bytes: usize,
    cancel: &CancellationToken,
) -> ExecutorResult<Vec<u8>> {
    let mut stream = response.bytes_stream();
    let mut out = Vec::new();
    loop {
        let chunk = tokio::select! {
            c = stream.next() => c,
            _ = cancel.cancelled() => return Err(ExecutorError::Cancelled),
        };
        let Some(chunk) = chunk else {
            return Ok(out);
        };
        let chunk = chunk.map_err(ExecutorError::Network)?;
        if out.len() + chunk.len() > max_body_bytes {
            return Err(ExecutorError::BodyTooLarge { limit: max_body_bytes });
        }
        out.extend_from_slice(&chunk);
    }
}

/// Known "quota exceeded" body shapes that should rotate credentials even
/// when the HTTP status alone wouldn't indicate it (some upstreams return
/// 200 with an error envelope).
fn body_matches_quota_exceeded(body: &[u8]) -> bool {
    let text = String::from_utf8_lossy(body).to_lowercase();
    text.contains("quota exceeded") || text.contains("resource_exhausted") || text.contains("rate limit")
}

/// Classifies one attempt's outcome per §4.5: which HTTP statuses rotate
/// credentials, which retry the same one, and which are terminal.
pub fn classify_response(status: u16, body: &[u8]) -> Classification {
    match status {
        s if (200..300).contains(&s) => Classification::Success,
        401 | 403 => Classification::RetryOtherCredential,
        408 | 409 | 425 | 429 => Classification::RetryOtherCredential,
        502 | 503 | 504 => Classification::RetryThisCredential,
        s if (400..500).contains(&s) => {
            if body_matches_quota_exceeded(body) {
                Classification::RetryOtherCredential
            } else {
                Classification::NonRetryable
            }
        }
        _ => Classification::RetryThisCredential,
    }
}

/// Classifies a transport-level (non-HTTP) failure: always worth one same-
/// credential retry, per §4.5's "transient network error" rule.
pub fn classify_transport_error() -> Classification {
    Classification::RetryThisCredential
}

/// `true` iff the response qualifies as "silent MAX_TOKENS": no visible
/// output text, no function/tool call items, and either the upstream
/// explicitly reports hitting the output-token limit or usage suggests it.
pub fn is_silent_max_tokens(signals: &ResponseSignals) -> bool {
    if !signals.output_text.is_empty() {
        return false;
    }
    let has_call = signals
        .output
        .iter()
        .any(|item| matches!(item.get("type").and_then(|t| t.as_str()), Some("function_call") | Some("tool_call")));
    if has_call {
        return false;
    }
    let reason_hit = signals
        .incomplete_details
        .as_ref()
        .and_then(|d| d.reason.as_deref())
        == Some("max_output_tokens");
    let usage_hit = signals
        .usage
        .as_ref()
        .is_some_and(|u| u.output_tokens >= SILENT_MAX_TOKENS_OUTPUT_THRESHOLD);
    reason_hit || usage_hit
}

/// If `model` ends with `-thinking`, returns the model id with that suffix
/// stripped (the single authorized retry substitution); otherwise `None`.
pub fn strip_thinking_suffix(model: &str) -> Option<String> {
    model.strip_suffix("-thinking").map(str::to_string)
}

/// `base = 250ms`, backoff bookkeeping shared with the selector for
/// documentation purposes; actual sleeps happen in `selector::Selector`.
pub const _BASE_BACKOFF_DOC: Duration = crate::constants::BASE_BACKOFF;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classify_success_status() {
        assert_eq!(classify_response(200, b""), Classification::Success);
    }

    #[test]
    fn classify_auth_and_quota_rotate() {
        assert_eq!(classify_response(401, b""), Classification::RetryOtherCredential);
        assert_eq!(classify_response(429, b""), Classification::RetryOtherCredential);
    }

    #[test]
    fn classify_transient_retries_same_credential() {
        assert_eq!(classify_response(503, b""), Classification::RetryThisCredential);
    }

    #[test]
    fn classify_other_4xx_is_non_retryable() {
        assert_eq!(classify_response(422, b"{}"), Classification::NonRetryable);
    }

    #[test]
    fn classify_4xx_with_quota_body_rotates() {
        assert_eq!(
            classify_response(400, b"{\"error\":\"quota exceeded for this key\"}"),
            Classification::RetryOtherCredential
        );
    }

    #[test]
    fn silent_max_tokens_detected_by_reason() {
        let signals = ResponseSignals {
            output_text: String::new(),
            output: vec![],
            incomplete_details: Some(IncompleteDetails { reason: Some("max_output_tokens".to_string()) }),
            usage: None,
        };
        assert!(is_silent_max_tokens(&signals));
    }

    #[test]
    fn silent_max_tokens_detected_by_usage_threshold() {
        let signals = ResponseSignals {
            output_text: String::new(),
            output: vec![],
            incomplete_details: None,
            usage: Some(Usage { output_tokens: 8000 }),
        };
        assert!(is_silent_max_tokens(&signals));
    }

    #[test]
    fn silent_max_tokens_not_triggered_with_function_call_present() {
        let signals = ResponseSignals {
            output_text: String::new(),
            output: vec![json!({"type": "function_call"})],
            incomplete_details: Some(IncompleteDetails { reason: Some("max_output_tokens".to_string()) }),
            usage: None,
        };
        assert!(!is_silent_max_tokens(&signals));
    }

    #[test]
    fn silent_max_tokens_not_triggered_with_visible_text() {
        let signals = ResponseSignals {
            output_text: "hello".to_string(),
            output: vec![],
            incomplete_details: Some(IncompleteDetails { reason: Some("max_output_tokens".to_string()) }),
            usage: None,
        };
        assert!(!is_silent_max_tokens(&signals));
    }

    #[test]
    fn strip_thinking_suffix_only_matches_suffix() {
        assert_eq!(strip_thinking_suffix("gemini-claude-sonnet-4-5-thinking"), Some("gemini-claude-sonnet-4-5".to_string()));
        assert_eq!(strip_thinking_suffix("gpt-4"), None);
    }
}
