//! Pre-translation hardening: JSON rewrites applied to the client's request
//! before it is translated into the selected upstream's dialect.
//!
//! Every transform here fails open: a malformed subtree is left untouched
//! rather than aborting the request, matching the spec's "pre-translation
//! hardening fails silently" error policy. None of these functions return a
//! `Result` for that reason — there is nothing a caller could usefully do
//! with a hardening failure except skip it, which is exactly what happens.

use serde_json::Value;

use crate::constants::{
    CODEX_CHECKPOINT_SENTINELS, FACTORY_KEEP_HEAD, FACTORY_KEEP_TAIL, FACTORY_MAX_TEXT_LEN,
    FACTORY_SUMMARY_KEEP_TAIL, FACTORY_TRUNCATION_MARKER,
};

/// Tool-schema tightening: for every declared `function` tool, if its
/// parameters schema is a plain `object` with no `additionalProperties`,
/// set it to `false`. Separately (and more generally), any `type` field
/// anywhere under a tool's schema that holds an array like
/// `["string","null"]` is collapsed to its first non-null element. The walk
/// recurses through every nested object and array.
pub fn tighten_tool_schemas(request: &mut Value) {
    let Some(tools) = request.get_mut("tools").and_then(Value::as_array_mut) else {
        return;
    };
    for tool in tools {
        if tool.get("type").and_then(Value::as_str) != Some("function") {
            continue;
        }
        for schema in tool_parameter_schemas(tool) {
            normalize_type_arrays(schema);
            tighten_additional_properties(schema);
        }
    }
}

/// Finds the parameters/input schema value under a tool entry, regardless of
/// which dialect's shape it arrived in (OpenAI nests under `function`,
/// Anthropic and Gemini keep it at the top level).
fn tool_parameter_schemas(tool: &mut Value) -> Vec<&mut Value> {
    let mut out = Vec::new();
    if let Some(v) = tool.get_mut("parameters") {
        out.push(v);
    }
    if let Some(v) = tool.get_mut("input_schema") {
        out.push(v);
    }
    if let Some(function) = tool.get_mut("function") {
        if let Some(v) = function.get_mut("parameters") {
            out.push(v);
        }
    }
    out
}

fn tighten_additional_properties(schema: &mut Value) {
    if let Some(obj) = schema.as_object_mut() {
        let is_object_type = obj.get("type").and_then(Value::as_str) == Some("object");
        if is_object_type && !obj.contains_key("additionalProperties") {
            obj.insert("additionalProperties".to_string(), Value::Bool(false));
        }
    }
}

/// Recursively replaces any `"type": [...]` array with its first non-null
/// element, walking every nested object and array.
fn normalize_type_arrays(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if let Some(Value::Array(variants)) = map.get("type") {
                if let Some(first) = variants.iter().find(|v| !v.is_null()).cloned() {
                    map.insert("type".to_string(), first);
                }
            }
            for v in map.values_mut() {
                normalize_type_arrays(v);
            }
        }
        Value::Array(items) => {
            for v in items.iter_mut() {
                normalize_type_arrays(v);
            }
        }
        _ => {}
    }
}

/// Gemini tool-response adjacency repair. Every `model`-role content item
/// carrying one or more `functionCall` parts must be immediately followed by
/// a `user`-role item whose parts are the matching `functionResponse`
/// entries (matched by `id`). Orphan `functionResponse` parts are moved into
/// place; missing ones are synthesized as a placeholder result. Two-pass:
/// index responses by id, then rebuild the list.
pub fn gemini_tool_adjacency(request: &mut Value) {
    let Some(contents) = request.get_mut("contents").and_then(Value::as_array_mut) else {
        return;
    };

    let mut responses_by_id: std::collections::HashMap<String, Value> = std::collections::HashMap::new();
    for item in contents.iter() {
        let Some(parts) = item.get("parts").and_then(Value::as_array) else {
            continue;
        };
        for part in parts {
            if let Some(id) = function_response_id(part) {
                responses_by_id.insert(id, part.clone());
            }
        }
    }

    let mut rebuilt: Vec<Value> = Vec::with_capacity(contents.len());
    for item in contents.drain(..) {
        let is_model_with_calls = item.get("role").and_then(Value::as_str) == Some("model")
            && item
                .get("parts")
                .and_then(Value::as_array)
                .is_some_and(|parts| parts.iter().any(|p| function_call_id(p).is_some()));

        if !is_model_with_calls {
            // Drop any functionResponse-only item here; it's been
            // re-attached immediately after its matching call below, or will
            // be synthesized if no call exists for it.
            if item_is_pure_function_response(&item) {
                continue;
            }
            rebuilt.push(item);
            continue;
        }

        let call_ids: Vec<String> = item
            .get("parts")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(function_call_id)
            .collect();

        let response_parts: Vec<Value> = call_ids
            .iter()
            .map(|id| {
                responses_by_id.remove(id).unwrap_or_else(|| {
                    serde_json::json!({
                        "functionResponse": {
                            "id": id,
                            "response": { "result": format!("tool_result missing for {id}") }
                        }
                    })
                })
            })
            .collect();

        rebuilt.push(item);
        rebuilt.push(serde_json::json!({ "role": "user", "parts": response_parts }));
    }

    *contents = rebuilt;
}

fn function_call_id(part: &Value) -> Option<String> {
    part.get("functionCall")
        .and_then(|fc| fc.get("id"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn function_response_id(part: &Value) -> Option<String> {
    part.get("functionResponse")
        .and_then(|fr| fr.get("id"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn item_is_pure_function_response(item: &Value) -> bool {
    item.get("parts")
        .and_then(Value::as_array)
        .is_some_and(|parts| !parts.is_empty() && parts.iter().all(|p| function_response_id(p).is_some()))
}

/// Gemini role normalization: an item with a missing/invalid `role` becomes
/// `user` if it's first, otherwise alternates with the previous item's role.
pub fn gemini_role_normalization(request: &mut Value) {
    let Some(contents) = request.get_mut("contents").and_then(Value::as_array_mut) else {
        return;
    };
    let mut previous = "model"; // so the first unset item becomes "user"
    for item in contents.iter_mut() {
        let valid = matches!(item.get("role").and_then(Value::as_str), Some("user") | Some("model"));
        if !valid {
            let assigned = if previous == "user" { "model" } else { "user" };
            if let Some(obj) = item.as_object_mut() {
                obj.insert("role".to_string(), Value::String(assigned.to_string()));
            }
            previous = assigned;
        } else {
            previous = item.get("role").and_then(Value::as_str).unwrap_or("user");
        }
    }
}

/// Factory/Droid/Stainless client compaction: strips embedded
/// `<tool_call>...</tool_call>` blocks from input text parts, truncates
/// previous-instance summaries and oversized histories, and ensures a
/// default tool manifest and system instructions are present.
pub fn factory_compaction(request: &mut Value) {
    walk_text_parts_mut(request, compact_text);
    inject_defaults(request);
}

fn compact_text(text: &mut String) {
    *text = strip_tool_call_blocks(text);

    let is_summary = text.len() > FACTORY_SUMMARY_KEEP_TAIL
        && (text.contains("previous instance summary") || text.contains("PREVIOUS INSTANCE SUMMARY"));
    if is_summary {
        let tail_start = text.len().saturating_sub(FACTORY_SUMMARY_KEEP_TAIL);
        let boundary = floor_char_boundary(text, tail_start);
        *text = text[boundary..].to_string();
        return;
    }

    if text.len() > FACTORY_MAX_TEXT_LEN {
        let head_end = floor_char_boundary(text, FACTORY_KEEP_HEAD);
        let tail_start = floor_char_boundary(text, text.len().saturating_sub(FACTORY_KEEP_TAIL));
        let mut out = String::with_capacity(FACTORY_KEEP_HEAD + FACTORY_KEEP_TAIL + FACTORY_TRUNCATION_MARKER.len());
        out.push_str(&text[..head_end]);
        out.push_str(FACTORY_TRUNCATION_MARKER);
        out.push_str(&text[tail_start..]);
        *text = out;
    }
}

fn floor_char_boundary(s: &str, idx: usize) -> usize {
    let mut i = idx.min(s.len());
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn strip_tool_call_blocks(text: &str) -> String {
    const OPEN: &str = "<tool_call>";
    const CLOSE: &str = "</tool_call>";
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    loop {
        match rest.find(OPEN) {
            Some(start) => {
                out.push_str(&rest[..start]);
                match rest[start..].find(CLOSE) {
                    Some(end_rel) => {
                        rest = &rest[start + end_rel + CLOSE.len()..];
                    }
                    None => {
                        // Unterminated block: drop the rest rather than emit
                        // a dangling open tag.
                        rest = "";
                        break;
                    }
                }
            }
            None => {
                out.push_str(rest);
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Walks every input "text" field nested anywhere under `request`, applying
/// `f` in place. Matches both the flat `{"content":"..."}` chat shape and the
/// `{"content":[{"type":"text","text":"..."}]}` parts shape.
fn walk_text_parts_mut(value: &mut Value, f: impl Fn(&mut String) + Copy) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(text)) = map.get_mut("text") {
                f(text);
            }
            for v in map.values_mut() {
                walk_text_parts_mut(v, f);
            }
        }
        Value::Array(items) => {
            for v in items.iter_mut() {
                walk_text_parts_mut(v, f);
            }
        }
        _ => {}
    }
}

fn inject_defaults(request: &mut Value) {
    let Some(obj) = request.as_object_mut() else {
        return;
    };
    let has_tools = obj.get("tools").and_then(Value::as_array).is_some_and(|t| !t.is_empty());
    if !has_tools {
        obj.insert(
            "tools".to_string(),
            serde_json::json!([default_tool_manifest_entry()]),
        );
    }
    let has_system = obj.get("instructions").and_then(Value::as_str).is_some_and(|s| !s.trim().is_empty())
        || obj.get("system").is_some();
    if !has_system {
        obj.insert(
            "instructions".to_string(),
            Value::String(default_system_instructions().to_string()),
        );
    }
}

fn default_tool_manifest_entry() -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": "noop",
            "description": "Placeholder tool manifest injected for a Factory/Droid-compatible client that omitted one.",
            "parameters": { "type": "object", "properties": {}, "additionalProperties": false }
        }
    })
}

fn default_system_instructions() -> &'static str {
    "You are a helpful coding assistant."
}

/// Returns `true` if the request should be marked "synthesize-streaming" for
/// the Codex checkpoint/huge-payload path: either a checkpoint/compaction
/// sentinel appears in the instructions or last user text, or the payload
/// exceeds `huge_bytes`.
pub fn codex_needs_synthesis(request: &Value, payload_len: usize, huge_bytes: usize) -> bool {
    if payload_len > huge_bytes {
        return true;
    }
    let haystack = codex_sentinel_haystack(request);
    let lower = haystack.to_ascii_lowercase();
    let has_named_sentinel = CODEX_CHECKPOINT_SENTINELS.iter().any(|s| lower.contains(s));
    let has_pair = lower.contains("checkpoint") && lower.contains("compaction");
    has_named_sentinel || has_pair
}

fn codex_sentinel_haystack(request: &Value) -> String {
    let mut out = String::new();
    if let Some(instructions) = request.get("instructions").and_then(Value::as_str) {
        out.push_str(instructions);
        out.push('\n');
    }
    if let Some(last_text) = last_user_text(request) {
        out.push_str(&last_text);
    }
    out
}

fn last_user_text(request: &Value) -> Option<String> {
    let messages = request
        .get("messages")
        .or_else(|| request.get("input"))
        .and_then(Value::as_array)?;
    let last_user = messages.iter().rev().find(|m| m.get("role").and_then(Value::as_str) == Some("user"))?;
    match last_user.get("content") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Array(parts)) => Some(
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tighten_tool_schemas_sets_additional_properties_false() {
        let mut req = json!({
            "tools": [{
                "type": "function",
                "function": { "name": "f", "parameters": { "type": "object", "properties": {} } }
            }]
        });
        tighten_tool_schemas(&mut req);
        assert_eq!(req["tools"][0]["function"]["parameters"]["additionalProperties"], json!(false));
    }

    #[test]
    fn tighten_tool_schemas_leaves_existing_additional_properties() {
        let mut req = json!({
            "tools": [{
                "type": "function",
                "function": { "parameters": { "type": "object", "additionalProperties": true } }
            }]
        });
        tighten_tool_schemas(&mut req);
        assert_eq!(req["tools"][0]["function"]["parameters"]["additionalProperties"], json!(true));
    }

    #[test]
    fn normalize_type_arrays_recurses_into_nested_schema() {
        let mut req = json!({
            "tools": [{
                "type": "function",
                "function": {
                    "parameters": {
                        "type": "object",
                        "properties": {
                            "x": { "type": ["string", "null"] }
                        }
                    }
                }
            }]
        });
        tighten_tool_schemas(&mut req);
        assert_eq!(req["tools"][0]["function"]["parameters"]["properties"]["x"]["type"], json!("string"));
    }

    #[test]
    fn gemini_tool_adjacency_reorders_model_and_response() {
        let mut req = json!({
            "contents": [
                { "role": "user", "parts": [{"text": "hi"}] },
                { "role": "model", "parts": [{"functionCall": {"id": "A", "name": "f", "args": {}}}] },
                { "role": "model", "parts": [{"text": "thinking"}] },
                { "role": "user", "parts": [{"functionResponse": {"id": "A", "response": {"ok": true}}}] },
            ]
        });
        gemini_tool_adjacency(&mut req);
        let contents = req["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 4);
        assert_eq!(contents[1]["role"], json!("model"));
        assert_eq!(contents[2]["role"], json!("user"));
        assert_eq!(contents[2]["parts"][0]["functionResponse"]["id"], json!("A"));
        assert_eq!(contents[3]["role"], json!("model"));
    }

    #[test]
    fn gemini_tool_adjacency_synthesizes_missing_response() {
        let mut req = json!({
            "contents": [
                { "role": "model", "parts": [{"functionCall": {"id": "B", "name": "f", "args": {}}}] },
            ]
        });
        gemini_tool_adjacency(&mut req);
        let contents = req["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 2);
        let result = contents[1]["parts"][0]["functionResponse"]["response"]["result"].as_str().unwrap();
        assert!(result.contains("tool_result missing for B"));
    }

    #[test]
    fn gemini_role_normalization_alternates() {
        let mut req = json!({
            "contents": [
                { "parts": [{"text": "a"}] },
                { "parts": [{"text": "b"}] },
                { "role": "user", "parts": [{"text": "c"}] },
                { "parts": [{"text": "d"}] },
            ]
        });
        gemini_role_normalization(&mut req);
        let roles: Vec<&str> = req["contents"].as_array().unwrap().iter().map(|c| c["role"].as_str().unwrap()).collect();
        assert_eq!(roles, vec!["user", "model", "user", "model"]);
    }

    #[test]
    fn factory_compaction_strips_tool_call_blocks() {
        let mut req = json!({
            "messages": [{"role": "user", "content": "before <tool_call>{\"x\":1}</tool_call> after"}]
        });
        factory_compaction(&mut req);
        assert_eq!(req["messages"][0]["content"], json!("before  after"));
    }

    #[test]
    fn factory_compaction_truncates_huge_text() {
        let huge = "x".repeat(90_000);
        let mut req = json!({ "messages": [{"role": "user", "content": huge}] });
        factory_compaction(&mut req);
        let text = req["messages"][0]["content"].as_str().unwrap();
        assert!(text.len() < 90_000);
        assert!(text.contains("ProxyPilot truncated large history"));
    }

    #[test]
    fn factory_compaction_injects_default_tools_and_instructions() {
        let mut req = json!({ "messages": [] });
        factory_compaction(&mut req);
        assert!(req["tools"].as_array().unwrap().len() == 1);
        assert!(req["instructions"].as_str().unwrap().len() > 0);
    }

    #[test]
    fn codex_needs_synthesis_detects_sentinel_pair() {
        let req = json!({ "instructions": "performing a checkpoint before compaction" });
        assert!(codex_needs_synthesis(&req, 10, 250_000));
    }

    #[test]
    fn codex_needs_synthesis_detects_huge_payload() {
        let req = json!({});
        assert!(codex_needs_synthesis(&req, 300_000, 250_000));
        assert!(!codex_needs_synthesis(&req, 10, 250_000));
    }

    #[test]
    fn codex_needs_synthesis_checks_last_user_text() {
        let req = json!({ "messages": [
            {"role": "user", "content": "hello"},
            {"role": "assistant", "content": "hi"},
            {"role": "user", "content": "please resume the task"},
        ]});
        assert!(codex_needs_synthesis(&req, 10, 250_000));
    }
}
