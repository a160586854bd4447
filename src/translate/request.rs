//! Anthropic `/v1/messages` request → OpenAI `/chat/completions` request.

use serde_json::{json, Value};

use crate::model_mapper::ModelMapper;

use super::types::{
    stringify_tool_result_content, ContentBlock, OpenAiFunctionCall, OpenAiFunctionDef, OpenAiMessage,
    OpenAiRequest, OpenAiTool, OpenAiToolCall, StreamOptions,
};

const DEFAULT_CLIENT_MODEL: &str = "claude-sonnet-4-20250514";

/// Translate a full Anthropic request body into an [`OpenAiRequest`].
///
/// Structurally invalid top-level input (missing/non-array `messages`) is
/// rejected with an error the dispatcher turns into `invalid_request_error`;
/// everything else degrades per message/block rather than failing the whole
/// request (unknown roles are dropped and logged, malformed blocks skipped).
pub fn translate_request(req: &Value, mapper: &ModelMapper, default_max_tokens: u64) -> anyhow::Result<OpenAiRequest> {
    let client_model = req.get("model").and_then(Value::as_str).unwrap_or(DEFAULT_CLIENT_MODEL);
    let model = mapper.resolve(client_model);

    let raw_messages = req
        .get("messages")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow::anyhow!("`messages` array is required"))?;

    let mut messages = Vec::with_capacity(raw_messages.len() + 1);
    if let Some(system) = translate_system(req.get("system")) {
        messages.push(system);
    }
    for msg in raw_messages {
        messages.extend(translate_message(msg));
    }

    let max_tokens = req.get("max_tokens").and_then(Value::as_u64).unwrap_or(default_max_tokens);

    let stream = req.get("stream").and_then(Value::as_bool);
    let stream_options = stream.filter(|s| *s).map(|_| StreamOptions { include_usage: true });

    let stop = req
        .get("stop_sequences")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect());

    let tools = req.get("tools").and_then(Value::as_array).map(|arr| translate_tools(arr));
    let tool_choice = req.get("tool_choice").map(translate_tool_choice);

    Ok(OpenAiRequest {
        model,
        messages,
        max_tokens,
        temperature: req.get("temperature").and_then(Value::as_f64),
        top_p: req.get("top_p").and_then(Value::as_f64),
        stop,
        stream,
        stream_options,
        tools,
        tool_choice,
    })
}

/// `system` is either a plain string or an array of `text` content blocks,
/// concatenated with single spaces. Absent/empty input yields no message.
fn translate_system(system: Option<&Value>) -> Option<OpenAiMessage> {
    let text = match system? {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(" "),
        _ => return None,
    };
    if text.is_empty() {
        return None;
    }
    Some(OpenAiMessage {
        role: "system",
        content: Some(Value::String(text)),
        tool_calls: None,
        tool_call_id: None,
    })
}

fn translate_message(msg: &Value) -> Vec<OpenAiMessage> {
    match msg.get("role").and_then(Value::as_str) {
        Some("user") => translate_user_message(msg),
        Some("assistant") => vec![translate_assistant_message(msg)],
        // Non-standard top-level `tool_result` role, kept for compatibility
        // with callers that never adopted Anthropic's nested block form.
        Some("tool_result") => vec![translate_tool_result_message(msg)],
        other => {
            tracing::warn!(role = ?other, "dropping message with unknown role");
            vec![]
        }
    }
}

fn translate_user_message(msg: &Value) -> Vec<OpenAiMessage> {
    match msg.get("content") {
        Some(Value::String(s)) => vec![OpenAiMessage::user_text(s.clone())],
        Some(Value::Array(blocks)) => {
            let mut tool_messages = Vec::new();
            let mut other_content = Vec::new();

            for block in blocks {
                match ContentBlock::from_value(block) {
                    Some(ContentBlock::ToolResult { tool_use_id, content, is_error }) => {
                        let content = if is_error { format!("Error: {content}") } else { content };
                        tool_messages.push(OpenAiMessage {
                            role: "tool",
                            content: Some(Value::String(content)),
                            tool_calls: None,
                            tool_call_id: Some(tool_use_id),
                        });
                    }
                    Some(ContentBlock::Text(text)) => {
                        other_content.push(json!({ "type": "text", "text": text }));
                    }
                    Some(ContentBlock::Image { media_type, data }) => {
                        other_content.push(json!({
                            "type": "image_url",
                            "image_url": { "url": format!("data:{media_type};base64,{data}") }
                        }));
                    }
                    // tool_use blocks don't appear in user messages; skip and log.
                    Some(ContentBlock::ToolUse { .. }) => {
                        tracing::warn!("dropping unexpected tool_use block in user message")
                    }
                    None => tracing::warn!("dropping malformed or unrecognized content block"),
                }
            }

            // Tool messages answer the previous assistant turn's tool_calls,
            // so they must precede any user message built from this turn.
            let mut result = tool_messages;
            if !other_content.is_empty() {
                let content = if other_content.len() == 1 && other_content[0]["type"] == "text" {
                    other_content[0]["text"].clone()
                } else {
                    Value::Array(other_content)
                };
                result.push(OpenAiMessage { role: "user", content: Some(content), tool_calls: None, tool_call_id: None });
            }
            if result.is_empty() {
                result.push(OpenAiMessage::user_text(""));
            }
            result
        }
        _ => vec![OpenAiMessage::user_text("")],
    }
}

fn translate_assistant_message(msg: &Value) -> OpenAiMessage {
    match msg.get("content") {
        Some(Value::String(s)) => {
            OpenAiMessage { role: "assistant", content: Some(Value::String(s.clone())), tool_calls: None, tool_call_id: None }
        }
        Some(Value::Array(blocks)) => {
            let mut text_parts = Vec::new();
            let mut tool_calls = Vec::new();

            for (i, block) in blocks.iter().enumerate() {
                match ContentBlock::from_value(block) {
                    Some(ContentBlock::Text(text)) => text_parts.push(text),
                    Some(ContentBlock::ToolUse { id, name, input }) => {
                        let id = if id.is_empty() { format!("call_{i}") } else { id };
                        tool_calls.push(OpenAiToolCall {
                            id,
                            kind: "function",
                            function: OpenAiFunctionCall {
                                name,
                                arguments: serde_json::to_string(&input).unwrap_or_else(|_| "{}".to_string()),
                            },
                        });
                    }
                    _ => tracing::warn!("dropping malformed or unrecognized content block in assistant message"),
                }
            }

            let content = if text_parts.is_empty() { None } else { Some(Value::String(text_parts.join(" "))) };
            OpenAiMessage {
                role: "assistant",
                content,
                tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
                tool_call_id: None,
            }
        }
        _ => OpenAiMessage { role: "assistant", content: None, tool_calls: None, tool_call_id: None },
    }
}

fn translate_tool_result_message(msg: &Value) -> OpenAiMessage {
    let tool_use_id = msg.get("tool_use_id").and_then(Value::as_str).unwrap_or_default().to_string();
    let content = stringify_tool_result_content(msg.get("content"));
    OpenAiMessage { role: "tool", content: Some(Value::String(content)), tool_calls: None, tool_call_id: Some(tool_use_id) }
}

fn translate_tools(tools: &[Value]) -> Vec<OpenAiTool> {
    tools
        .iter()
        .map(|t| OpenAiTool {
            kind: "function",
            function: OpenAiFunctionDef {
                name: t.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
                description: t.get("description").and_then(Value::as_str).unwrap_or_default().to_string(),
                parameters: t
                    .get("input_schema")
                    .cloned()
                    .unwrap_or_else(|| json!({ "type": "object", "properties": {} })),
            },
        })
        .collect()
}

fn translate_tool_choice(choice: &Value) -> Value {
    match choice {
        Value::String(s) => match s.as_str() {
            "auto" => json!("auto"),
            "any" => json!("required"),
            "none" => json!("none"),
            _ => json!("auto"),
        },
        Value::Object(_) => match choice.get("type").and_then(Value::as_str) {
            Some("auto") => json!("auto"),
            Some("any") => json!("required"),
            Some("none") => json!("none"),
            Some("tool") => {
                let name = choice.get("name").and_then(Value::as_str).unwrap_or_default();
                json!({ "type": "function", "function": { "name": name } })
            }
            _ => json!("auto"),
        },
        _ => json!("auto"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper() -> ModelMapper {
        ModelMapper::new(&[])
    }

    // -- E1: simple text round trip --------------------------------------

    #[test]
    fn simple_text_message_translates_to_user_string_content() {
        let req = json!({
            "model": "claude-sonnet-4-5-20250929",
            "messages": [{"role": "user", "content": "hello"}],
            "max_tokens": 100
        });
        let out = translate_request(&req, &mapper(), 16384).unwrap();
        assert_eq!(out.max_tokens, 100);
        assert_eq!(out.messages.len(), 1);
        assert_eq!(out.messages[0].role, "user");
        assert_eq!(out.messages[0].content, Some(json!("hello")));
    }

    // -- Testable property 2: max_tokens always present -------------------

    #[test]
    fn max_tokens_defaults_when_absent() {
        let req = json!({"messages": [{"role": "user", "content": "hi"}]});
        let out = translate_request(&req, &mapper(), 777).unwrap();
        assert_eq!(out.max_tokens, 777);
    }

    // -- E2: system prompt split -------------------------------------------

    #[test]
    fn system_block_array_is_concatenated_and_placed_first() {
        let req = json!({
            "model": "m",
            "system": [{"type": "text", "text": "be brief"}, {"type": "text", "text": "be kind"}],
            "messages": [{"role": "user", "content": "x"}]
        });
        let out = translate_request(&req, &mapper(), 100).unwrap();
        assert_eq!(out.messages[0].role, "system");
        assert_eq!(out.messages[0].content, Some(json!("be brief be kind")));
        assert_eq!(out.messages[1].role, "user");
    }

    #[test]
    fn system_string_is_prepended() {
        let req = json!({
            "system": "you are helpful",
            "messages": [{"role": "user", "content": "hi"}]
        });
        let out = translate_request(&req, &mapper(), 100).unwrap();
        assert_eq!(out.messages[0].content, Some(json!("you are helpful")));
    }

    // -- Testable property 1: system message position ----------------------

    #[test]
    fn system_message_appears_exactly_once_at_index_zero() {
        let req = json!({
            "system": "sys",
            "messages": [
                {"role": "user", "content": "a"},
                {"role": "assistant", "content": "b"},
            ]
        });
        let out = translate_request(&req, &mapper(), 100).unwrap();
        let system_count = out.messages.iter().filter(|m| m.role == "system").count();
        assert_eq!(system_count, 1);
        assert_eq!(out.messages[0].role, "system");
    }

    // -- E4 / testable property 3: tool-result reordering -------------------

    #[test]
    fn tool_result_message_precedes_user_message_from_same_turn() {
        let req = json!({
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "tool_result", "tool_use_id": "call_1", "content": "42"},
                    {"type": "text", "text": "ok"},
                ]
            }]
        });
        let out = translate_request(&req, &mapper(), 100).unwrap();
        assert_eq!(out.messages.len(), 2);
        assert_eq!(out.messages[0].role, "tool");
        assert_eq!(out.messages[0].tool_call_id, Some("call_1".to_string()));
        assert_eq!(out.messages[0].content, Some(json!("42")));
        assert_eq!(out.messages[1].role, "user");
        assert_eq!(out.messages[1].content, Some(json!("ok")));
    }

    #[test]
    fn tool_result_error_flag_prefixes_message() {
        let req = json!({
            "messages": [{
                "role": "user",
                "content": [{"type": "tool_result", "tool_use_id": "call_1", "content": "boom", "is_error": true}]
            }]
        });
        let out = translate_request(&req, &mapper(), 100).unwrap();
        assert_eq!(out.messages[0].content, Some(json!("Error: boom")));
    }

    #[test]
    fn only_tool_messages_emitted_when_no_other_content_remains() {
        let req = json!({
            "messages": [{
                "role": "user",
                "content": [{"type": "tool_result", "tool_use_id": "call_1", "content": "42"}]
            }]
        });
        let out = translate_request(&req, &mapper(), 100).unwrap();
        assert_eq!(out.messages.len(), 1);
        assert_eq!(out.messages[0].role, "tool");
    }

    #[test]
    fn image_block_becomes_image_url_with_data_uri() {
        let req = json!({
            "messages": [{
                "role": "user",
                "content": [{"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "AAAA"}}]
            }]
        });
        let out = translate_request(&req, &mapper(), 100).unwrap();
        let content = out.messages[0].content.as_ref().unwrap();
        assert_eq!(content[0]["type"], "image_url");
        assert_eq!(content[0]["image_url"]["url"], "data:image/png;base64,AAAA");
    }

    // -- Assistant tool_use -> tool_calls ------------------------------------

    #[test]
    fn assistant_tool_use_block_becomes_tool_call_with_json_arguments() {
        let req = json!({
            "messages": [{
                "role": "assistant",
                "content": [
                    {"type": "text", "text": "let me check"},
                    {"type": "tool_use", "id": "toolu_1", "name": "search", "input": {"q": "rust"}},
                ]
            }]
        });
        let out = translate_request(&req, &mapper(), 100).unwrap();
        assert_eq!(out.messages[0].content, Some(json!("let me check")));
        let calls = out.messages[0].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "toolu_1");
        assert_eq!(calls[0].function.name, "search");
        assert_eq!(calls[0].function.arguments, r#"{"q":"rust"}"#);
    }

    #[test]
    fn assistant_tool_use_without_id_generates_index_based_id() {
        let req = json!({
            "messages": [{
                "role": "assistant",
                "content": [{"type": "tool_use", "id": "", "name": "search", "input": {}}]
            }]
        });
        let out = translate_request(&req, &mapper(), 100).unwrap();
        assert_eq!(out.messages[0].tool_calls.as_ref().unwrap()[0].id, "call_0");
    }

    // -- Tools / tool_choice -------------------------------------------------

    #[test]
    fn tools_translate_with_schema_default() {
        let req = json!({
            "messages": [],
            "tools": [{"name": "search", "description": "web search"}]
        });
        let out = translate_request(&req, &mapper(), 100).unwrap();
        let tools = out.tools.unwrap();
        assert_eq!(tools[0].function.name, "search");
        assert_eq!(tools[0].function.parameters, json!({"type": "object", "properties": {}}));
    }

    #[test]
    fn tool_choice_any_maps_to_required() {
        let req = json!({"messages": [], "tool_choice": "any"});
        let out = translate_request(&req, &mapper(), 100).unwrap();
        assert_eq!(out.tool_choice, Some(json!("required")));
    }

    #[test]
    fn tool_choice_specific_tool_maps_to_function_object() {
        let req = json!({"messages": [], "tool_choice": {"type": "tool", "name": "search"}});
        let out = translate_request(&req, &mapper(), 100).unwrap();
        assert_eq!(out.tool_choice, Some(json!({"type": "function", "function": {"name": "search"}})));
    }

    // -- stream / stop_sequences ---------------------------------------------

    #[test]
    fn streaming_request_sets_include_usage() {
        let req = json!({"messages": [], "stream": true});
        let out = translate_request(&req, &mapper(), 100).unwrap();
        assert!(out.stream_options.is_some());
    }

    #[test]
    fn non_streaming_request_omits_stream_options() {
        let req = json!({"messages": [], "stream": false});
        let out = translate_request(&req, &mapper(), 100).unwrap();
        assert!(out.stream_options.is_none());
    }

    #[test]
    fn stop_sequences_map_to_stop() {
        let req = json!({"messages": [], "stop_sequences": ["STOP", "END"]});
        let out = translate_request(&req, &mapper(), 100).unwrap();
        assert_eq!(out.stop, Some(vec!["STOP".to_string(), "END".to_string()]));
    }

    // -- Unknown roles dropped ------------------------------------------------

    #[test]
    fn unknown_role_is_dropped() {
        let req = json!({"messages": [{"role": "narrator", "content": "once upon a time"}]});
        let out = translate_request(&req, &mapper(), 100).unwrap();
        assert!(out.messages.is_empty());
    }

    #[test]
    fn missing_messages_array_is_rejected() {
        let req = json!({"model": "m"});
        assert!(translate_request(&req, &mapper(), 100).is_err());
    }
}
