//! Post-translation sanitation: JSON rewrites applied to an upstream
//! response before it is translated back into the client's dialect.
//!
//! Like `harden`, every function here fails open on a malformed subtree —
//! sanitation failures leave the response unchanged rather than erroring.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use uuid::Uuid;

/// Drops argument keys from each tool call that aren't declared in the
/// request's schema for that tool. Leaves the call untouched if its
/// arguments don't parse as a JSON object or if no keys would be dropped.
pub fn filter_tool_arguments(response: &mut Value, request: &Value) {
    let declared = declared_tool_properties(request);
    let Some(output) = response.get_mut("output").and_then(Value::as_array_mut) else {
        return;
    };
    for item in output.iter_mut() {
        if item.get("type").and_then(Value::as_str) != Some("function_call") {
            continue;
        }
        let Some(name) = item.get("name").and_then(Value::as_str).map(str::to_string) else {
            continue;
        };
        let Some(allowed) = declared.get(&name) else {
            continue;
        };
        let Some(args_str) = item.get("arguments").and_then(Value::as_str) else {
            continue;
        };
        let Ok(Value::Object(mut args)) = serde_json::from_str::<Value>(args_str) else {
            continue;
        };
        let before = args.len();
        args.retain(|k, _| allowed.contains(k));
        if args.len() == before {
            continue;
        }
        if let Ok(reserialized) = serde_json::to_string(&Value::Object(args)) {
            if let Some(obj) = item.as_object_mut() {
                obj.insert("arguments".to_string(), Value::String(reserialized));
            }
        }
    }
}

fn declared_tool_properties(request: &Value) -> HashMap<String, HashSet<String>> {
    let mut out = HashMap::new();
    let Some(tools) = request.get("tools").and_then(Value::as_array) else {
        return out;
    };
    for tool in tools {
        let function = tool.get("function").unwrap_or(tool);
        let Some(name) = function.get("name").and_then(Value::as_str) else {
            continue;
        };
        let props = function
            .get("parameters")
            .and_then(|p| p.get("properties"))
            .and_then(Value::as_object)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        out.insert(name.to_string(), props);
    }
    out
}

/// If the response's visible text contains an inline `<tool_call>{...}</tool_call>`
/// block and no structured call is already present, parses its JSON payload
/// (`{name, arguments}`) and replaces the output list with a single
/// `function_call` item carrying a freshly generated call id, clearing the
/// text.
pub fn inline_tool_call_to_structured(response: &mut Value) {
    let Some(output) = response.get_mut("output").and_then(Value::as_array_mut) else {
        return;
    };

    let already_structured = output.iter().any(|i| i.get("type").and_then(Value::as_str) == Some("function_call"));
    if already_structured {
        return;
    }

    for item in output.iter_mut() {
        if item.get("type").and_then(Value::as_str) != Some("message") {
            continue;
        }
        let Some(parts) = item.get_mut("content").and_then(Value::as_array_mut) else {
            continue;
        };
        for part in parts.iter_mut() {
            let Some(text) = part.get("text").and_then(Value::as_str).map(str::to_string) else {
                continue;
            };
            let Some(parsed) = extract_inline_tool_call(&text) else {
                continue;
            };
            let Some(name) = parsed.get("name").and_then(Value::as_str) else {
                continue;
            };
            let arguments = parsed
                .get("arguments")
                .map(|a| if a.is_string() { a.as_str().unwrap().to_string() } else { a.to_string() })
                .unwrap_or_else(|| "{}".to_string());

            let call = serde_json::json!({
                "type": "function_call",
                "id": format!("call_{}", Uuid::new_v4().simple()),
                "name": name,
                "arguments": arguments,
            });
            *output = vec![call];
            return;
        }
    }
}

fn extract_inline_tool_call(text: &str) -> Option<Value> {
    const OPEN: &str = "<tool_call>";
    const CLOSE: &str = "</tool_call>";
    let start = text.find(OPEN)? + OPEN.len();
    let end = text[start..].find(CLOSE)? + start;
    let body = text[start..end].trim();
    serde_json::from_str(body).ok()
}

/// For Factory/Stainless clients, reorders `output` so that every `message`
/// item precedes all non-message items, preserving relative order within
/// each group (a stable sort).
pub fn reorder_output_messages_first(response: &mut Value) {
    let Some(output) = response.get_mut("output").and_then(Value::as_array_mut) else {
        return;
    };
    output.sort_by_key(|item| item.get("type").and_then(Value::as_str) != Some("message"));
}

/// If the response has no top-level `output_text` but contains message items
/// with `output_text`-typed parts, concatenates them (joined by newline)
/// into a top-level `output_text` field.
pub fn backfill_output_text(response: &mut Value) {
    let has_output_text = response
        .get("output_text")
        .and_then(Value::as_str)
        .is_some_and(|s| !s.is_empty());
    if has_output_text {
        return;
    }
    let Some(output) = response.get("output").and_then(Value::as_array) else {
        return;
    };

    let mut pieces = Vec::new();
    for item in output {
        if item.get("type").and_then(Value::as_str) != Some("message") {
            continue;
        }
        let Some(parts) = item.get("content").and_then(Value::as_array) else {
            continue;
        };
        for part in parts {
            if part.get("type").and_then(Value::as_str) == Some("output_text") {
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    pieces.push(text.to_string());
                }
            }
        }
    }
    if pieces.is_empty() {
        return;
    }
    if let Some(obj) = response.as_object_mut() {
        obj.insert("output_text".to_string(), Value::String(pieces.join("\n")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filter_tool_arguments_drops_undeclared_keys() {
        let request = json!({
            "tools": [{"type": "function", "function": {"name": "search", "parameters": {"type": "object", "properties": {"q": {}}}}}]
        });
        let mut response = json!({
            "output": [{"type": "function_call", "name": "search", "arguments": "{\"q\":\"rust\",\"extra\":true}"}]
        });
        filter_tool_arguments(&mut response, &request);
        let args: Value = serde_json::from_str(response["output"][0]["arguments"].as_str().unwrap()).unwrap();
        assert_eq!(args, json!({"q": "rust"}));
    }

    #[test]
    fn filter_tool_arguments_leaves_untouched_on_parse_failure() {
        let request = json!({"tools": [{"type": "function", "function": {"name": "f", "parameters": {"properties": {}}}}]});
        let mut response = json!({"output": [{"type": "function_call", "name": "f", "arguments": "not json"}]});
        filter_tool_arguments(&mut response, &request);
        assert_eq!(response["output"][0]["arguments"], json!("not json"));
    }

    #[test]
    fn inline_tool_call_becomes_structured_call() {
        let mut response = json!({
            "output": [{"type": "message", "content": [{"type": "output_text", "text": "<tool_call>{\"name\":\"TodoWrite\",\"arguments\":{\"items\":[]}}</tool_call>"}]}]
        });
        inline_tool_call_to_structured(&mut response);
        let output = response["output"].as_array().unwrap();
        assert_eq!(output.len(), 1);
        assert_eq!(output[0]["type"], json!("function_call"));
        assert_eq!(output[0]["name"], json!("TodoWrite"));
    }

    #[test]
    fn inline_tool_call_skipped_when_structured_call_present() {
        let mut response = json!({
            "output": [
                {"type": "function_call", "name": "x", "arguments": "{}"},
                {"type": "message", "content": [{"type": "output_text", "text": "<tool_call>{\"name\":\"y\"}</tool_call>"}]}
            ]
        });
        let before = response.clone();
        inline_tool_call_to_structured(&mut response);
        assert_eq!(response, before);
    }

    #[test]
    fn reorder_output_messages_first_moves_messages_ahead() {
        let mut response = json!({
            "output": [
                {"type": "function_call", "id": "c1"},
                {"type": "message", "id": "m1"},
                {"type": "function_call", "id": "c2"},
                {"type": "message", "id": "m2"},
            ]
        });
        reorder_output_messages_first(&mut response);
        let types: Vec<&str> = response["output"].as_array().unwrap().iter().map(|i| i["id"].as_str().unwrap()).collect();
        assert_eq!(types, vec!["m1", "m2", "c1", "c2"]);
    }

    #[test]
    fn backfill_output_text_concatenates_message_parts() {
        let mut response = json!({
            "output": [
                {"type": "message", "content": [{"type": "output_text", "text": "hello"}]},
                {"type": "message", "content": [{"type": "output_text", "text": "world"}]},
            ]
        });
        backfill_output_text(&mut response);
        assert_eq!(response["output_text"], json!("hello\nworld"));
    }

    #[test]
    fn backfill_output_text_is_noop_when_already_present() {
        let mut response = json!({ "output_text": "already set", "output": [] });
        backfill_output_text(&mut response);
        assert_eq!(response["output_text"], json!("already set"));
    }
}
