//! C8's three execution paths' framing logic: pass-through forwarding,
//! synthesized SSE event sequences, and error framing.

use axum::body::Body;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::Response;
use bytes::Bytes;
use futures_util::stream;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use gatehouse::constants::ERROR_FRAME_MAX_CHARS;
use gatehouse::executor::ExecutorResult;
use gatehouse::translate::ClientProfile;

fn sse_headers(response: axum::response::Builder) -> axum::response::Builder {
    response
        .header(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"))
        .header(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"))
        .header(header::CONNECTION, HeaderValue::from_static("keep-alive"))
}

/// Forwards every frame from the executor's channel to the client verbatim,
/// one at a time (the channel's capacity-1 back-pressure already enforces
/// "don't read the next upstream frame until the previous write returned").
/// Strips `[DONE]` lines for Factory/Stainless clients (who misparse the
/// sentinel) and appends one for everyone else if the upstream never sent
/// it.
pub fn passthrough_response(rx: mpsc::Receiver<ExecutorResult<Bytes>>, profile: ClientProfile) -> Response {
    let strip_done = profile.is_factory_like();

    let stream = stream::unfold((rx, false), move |(mut rx, done)| async move {
        if done {
            return None;
        }
        match rx.recv().await {
            Some(Ok(bytes)) => {
                let text = String::from_utf8_lossy(&bytes);
                if strip_done && text.contains("[DONE]") {
                    // Drop this frame but keep polling for more.
                    Some((Ok::<Bytes, std::io::Error>(Bytes::new()), (rx, false)))
                } else {
                    Some((Ok(bytes), (rx, false)))
                }
            }
            Some(Err(e)) => Some((Err(std::io::Error::other(e.to_string())), (rx, true))),
            None => None,
        }
    });

    let body = Body::from_stream(stream);

    sse_headers(Response::builder())
        .status(StatusCode::OK)
        .body(body)
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

/// One synthesized SSE event: `event: <name>\ndata: <json>\n\n`.
struct SseEvent {
    name: &'static str,
    data: Value,
}

impl SseEvent {
    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(format!("event: {}\n", self.name).as_bytes());
        out.extend_from_slice(b"data: ");
        out.extend_from_slice(serde_json::to_string(&self.data).unwrap_or_default().as_bytes());
        out.extend_from_slice(b"\n\n");
        out
    }
}

/// Fabricates the full `response.*` event sequence from one buffered
/// non-streaming response, per the "synthesized stream" path.
pub fn synthesize_response(response_id: &str, output: &[Value], profile: ClientProfile) -> Vec<u8> {
    let mut seq: u64 = 0;
    let mut next = || {
        seq += 1;
        seq
    };
    let mut bytes = Vec::new();

    bytes.extend(
        SseEvent {
            name: "response.created",
            data: json!({"type": "response.created", "response": {"id": response_id}, "sequence_number": next()}),
        }
        .to_bytes(),
    );
    bytes.extend(
        SseEvent {
            name: "response.in_progress",
            data: json!({"type": "response.in_progress", "response": {"id": response_id}, "sequence_number": next()}),
        }
        .to_bytes(),
    );

    for item in output {
        bytes.extend(
            SseEvent {
                name: "response.output_item.added",
                data: json!({"type": "response.output_item.added", "item": item, "sequence_number": next()}),
            }
            .to_bytes(),
        );

        match item.get("type").and_then(Value::as_str) {
            Some("message") => {
                if let Some(parts) = item.get("content").and_then(Value::as_array) {
                    for part in parts {
                        if part.get("type").and_then(Value::as_str) != Some("output_text") {
                            continue;
                        }
                        let text = part.get("text").and_then(Value::as_str).unwrap_or_default();
                        bytes.extend(
                            SseEvent {
                                name: "response.content_part.added",
                                data: json!({"type": "response.content_part.added", "part": part, "sequence_number": next()}),
                            }
                            .to_bytes(),
                        );
                        bytes.extend(
                            SseEvent {
                                name: "response.output_text.delta",
                                data: json!({"type": "response.output_text.delta", "delta": text, "sequence_number": next()}),
                            }
                            .to_bytes(),
                        );
                        bytes.extend(
                            SseEvent {
                                name: "response.output_text.done",
                                data: json!({"type": "response.output_text.done", "text": text, "sequence_number": next()}),
                            }
                            .to_bytes(),
                        );
                    }
                }
            }
            Some("function_call") => {
                let arguments = item.get("arguments").and_then(Value::as_str).unwrap_or("{}");
                bytes.extend(
                    SseEvent {
                        name: "response.function_call_arguments.delta",
                        data: json!({"type": "response.function_call_arguments.delta", "delta": arguments, "sequence_number": next()}),
                    }
                    .to_bytes(),
                );
                bytes.extend(
                    SseEvent {
                        name: "response.function_call_arguments.done",
                        data: json!({"type": "response.function_call_arguments.done", "arguments": arguments, "sequence_number": next()}),
                    }
                    .to_bytes(),
                );
            }
            _ => {}
        }

        bytes.extend(
            SseEvent {
                name: "response.output_item.done",
                data: json!({"type": "response.output_item.done", "item": item, "sequence_number": next()}),
            }
            .to_bytes(),
        );
    }

    bytes.extend(
        SseEvent {
            name: "response.completed",
            data: json!({"type": "response.completed", "response": {"id": response_id}, "sequence_number": next()}),
        }
        .to_bytes(),
    );

    if !profile.is_factory_like() {
        bytes.extend_from_slice(b"data: [DONE]\n\n");
    }

    bytes
}

pub fn synthesized_response_to_http(bytes: Vec<u8>) -> Response {
    sse_headers(Response::builder())
        .status(StatusCode::OK)
        .body(Body::from(bytes))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

/// Frames an error as a synthesized SSE sequence, for failures that occur
/// after headers were already flushed on a streaming path. The message is
/// truncated to `ERROR_FRAME_MAX_CHARS` and prefixed with the upstream
/// status.
pub fn error_frame(status: u16, message: &str, profile: ClientProfile) -> Vec<u8> {
    let prefixed = format!("[{status}] {message}");
    let truncated: String = prefixed.chars().take(ERROR_FRAME_MAX_CHARS).collect();
    let item = json!({
        "type": "message",
        "content": [{"type": "output_text", "text": truncated}],
    });
    synthesize_response("error", std::slice::from_ref(&item), profile)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesize_response_emits_sequential_numbers_starting_at_one() {
        let output = vec![json!({
            "type": "message",
            "content": [{"type": "output_text", "text": "hi"}],
        })];
        let bytes = synthesize_response("resp_1", &output, ClientProfile::Generic);
        let text = String::from_utf8(bytes).unwrap();

        let sequence_numbers: Vec<u64> = text
            .lines()
            .filter(|l| l.starts_with("data: "))
            .filter_map(|l| serde_json::from_str::<Value>(&l[6..]).ok())
            .filter_map(|v| v.get("sequence_number").and_then(Value::as_u64))
            .collect();

        assert_eq!(sequence_numbers, (1..=sequence_numbers.len() as u64).collect::<Vec<_>>());
        assert!(text.contains("response.created"));
        assert!(text.contains("response.completed"));
        assert!(text.ends_with("data: [DONE]\n\n"));
    }

    #[test]
    fn synthesize_response_omits_done_sentinel_for_factory_clients() {
        let bytes = synthesize_response("resp_2", &[], ClientProfile::Factory);
        let text = String::from_utf8(bytes).unwrap();
        assert!(!text.contains("[DONE]"));
    }

    #[test]
    fn error_frame_truncates_long_messages() {
        let huge = "x".repeat(ERROR_FRAME_MAX_CHARS * 2);
        let bytes = error_frame(500, &huge, ClientProfile::Generic);
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("response.output_text.delta"));

        let delta_event = text
            .lines()
            .filter(|l| l.starts_with("data: "))
            .filter_map(|l| serde_json::from_str::<Value>(&l[6..]).ok())
            .find(|v| v.get("type").and_then(Value::as_str) == Some("response.output_text.delta"))
            .unwrap();
        let delta_text = delta_event.get("delta").and_then(Value::as_str).unwrap();
        assert!(delta_text.len() < huge.len());
    }

    #[test]
    fn function_call_items_emit_argument_delta_and_done() {
        let output = vec![json!({
            "type": "function_call",
            "arguments": "{\"x\":1}",
        })];
        let bytes = synthesize_response("resp_3", &output, ClientProfile::Generic);
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("response.function_call_arguments.delta"));
        assert!(text.contains("response.function_call_arguments.done"));
    }
}
