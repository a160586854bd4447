//! Upstream error body → Anthropic error envelope.
//!
//! Upstream error bodies arrive in whatever shape the target endpoint uses —
//! usually OpenAI's `{"error": {...}}`, sometimes already Anthropic's own
//! `{"type": "error", "error": {...}}` when the target is itself an
//! Anthropic-compatible gateway. This translator is idempotent on the latter
//! and best-effort on everything else.

use serde_json::{json, Value};

/// Translate an upstream error body (any shape) into the Anthropic error
/// envelope. Already-Anthropic-shaped bodies pass through unchanged.
pub fn translate_error(error_response: &Value) -> Value {
    if error_response.get("type").and_then(Value::as_str) == Some("error") && error_response.get("error").is_some() {
        return error_response.clone();
    }

    let error_info = error_response.get("error").cloned().unwrap_or(Value::Null);

    if let Value::String(s) = &error_info {
        return json!({ "type": "error", "error": { "type": "api_error", "message": s } });
    }

    let openai_type = error_info
        .get("type")
        .and_then(Value::as_str)
        .or_else(|| error_info.get("code").and_then(Value::as_str))
        .or_else(|| error_response.get("type").and_then(Value::as_str))
        .unwrap_or("api_error");
    let anthropic_type = map_error_type(openai_type);

    let message = error_info
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| error_response.get("message").and_then(Value::as_str))
        .or_else(|| error_response.get("detail").and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| {
            if error_info.is_null() {
                error_response.to_string()
            } else {
                "An error occurred".to_string()
            }
        });

    json!({ "type": "error", "error": { "type": anthropic_type, "message": message } })
}

fn map_error_type(openai_type: &str) -> &'static str {
    match openai_type {
        "invalid_request_error" => "invalid_request_error",
        "authentication_error" => "authentication_error",
        "permission_error" => "permission_error",
        "not_found_error" => "not_found_error",
        "rate_limit_error" => "rate_limit_error",
        "server_error" => "api_error",
        "timeout" => "overloaded_error",
        _ => "api_error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_anthropic_shaped_error_passes_through() {
        let body = json!({ "type": "error", "error": { "type": "overloaded_error", "message": "busy" } });
        assert_eq!(translate_error(&body), body);
    }

    #[test]
    fn openai_shaped_error_is_translated() {
        let body = json!({ "error": { "type": "invalid_request_error", "message": "bad field" } });
        let out = translate_error(&body);
        assert_eq!(out["type"], "error");
        assert_eq!(out["error"]["type"], "invalid_request_error");
        assert_eq!(out["error"]["message"], "bad field");
    }

    #[test]
    fn error_as_plain_string_maps_to_api_error() {
        let body = json!({ "error": "something broke" });
        let out = translate_error(&body);
        assert_eq!(out["error"]["type"], "api_error");
        assert_eq!(out["error"]["message"], "something broke");
    }

    #[test]
    fn code_field_used_when_type_absent() {
        let body = json!({ "error": { "code": "rate_limit_error", "message": "slow down" } });
        let out = translate_error(&body);
        assert_eq!(out["error"]["type"], "rate_limit_error");
    }

    #[test]
    fn unrecognized_type_falls_back_to_api_error() {
        let body = json!({ "error": { "type": "something_weird", "message": "?" } });
        let out = translate_error(&body);
        assert_eq!(out["error"]["type"], "api_error");
    }

    #[test]
    fn server_error_maps_to_api_error_and_timeout_to_overloaded() {
        assert_eq!(map_error_type("server_error"), "api_error");
        assert_eq!(map_error_type("timeout"), "overloaded_error");
    }

    #[test]
    fn message_falls_back_to_detail_field() {
        let body = json!({ "detail": "not found" });
        let out = translate_error(&body);
        assert_eq!(out["error"]["message"], "not found");
    }

    #[test]
    fn completely_unrecognized_body_stringifies_itself_as_message() {
        let body = json!({ "weird_field": 42 });
        let out = translate_error(&body);
        assert_eq!(out["error"]["type"], "api_error");
        assert!(out["error"]["message"].as_str().unwrap().contains("weird_field"));
    }
}
