//! OpenAI `/chat/completions` response → Anthropic `/v1/messages` response.

use serde_json::Value;

use super::types::{AnthropicContentBlock, AnthropicResponse, AnthropicUsage};

pub fn translate_response(openai_response: &Value, original_model: &str) -> AnthropicResponse {
    let id = format!("msg_{}", &uuid::Uuid::new_v4().simple().to_string()[..24]);

    let choice = openai_response.get("choices").and_then(Value::as_array).and_then(|c| c.first());

    let Some(choice) = choice else {
        tracing::warn!("upstream response has no choices");
        return AnthropicResponse {
            id,
            kind: "message",
            role: "assistant",
            model: original_model.to_string(),
            content: Vec::new(),
            stop_reason: None,
            stop_sequence: None,
            usage: AnthropicUsage { input_tokens: 0, output_tokens: 0 },
        };
    };

    let message = choice.get("message").cloned().unwrap_or(Value::Null);
    let finish_reason = choice.get("finish_reason").and_then(Value::as_str);

    let mut content = Vec::new();

    if let Some(text) = message.get("content").and_then(Value::as_str) {
        if !text.is_empty() {
            content.push(AnthropicContentBlock::Text { text: text.to_string() });
        }
    }

    if let Some(tool_calls) = message.get("tool_calls").and_then(Value::as_array) {
        for tc in tool_calls {
            if tc.get("type").and_then(Value::as_str) != Some("function") {
                continue;
            }
            let func = tc.get("function").cloned().unwrap_or(Value::Null);
            let raw_args = func.get("arguments").and_then(Value::as_str).unwrap_or("{}");
            let input = serde_json::from_str(raw_args)
                .unwrap_or_else(|_| serde_json::json!({ "raw": raw_args }));
            let id = tc
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("toolu_{}", &uuid::Uuid::new_v4().simple().to_string()[..24]));
            content.push(AnthropicContentBlock::ToolUse {
                id,
                name: func.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
                input,
            });
        }
    }

    let usage = openai_response.get("usage").cloned().unwrap_or(Value::Null);
    let input_tokens = usage.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0);
    let output_tokens = usage.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0);

    AnthropicResponse {
        id,
        kind: "message",
        role: "assistant",
        model: original_model.to_string(),
        content,
        stop_reason: translate_finish_reason(finish_reason),
        stop_sequence: None,
        usage: AnthropicUsage { input_tokens, output_tokens },
    }
}

/// Shared with the stream translator's `finish_reason` handling.
pub fn translate_finish_reason(finish_reason: Option<&str>) -> Option<String> {
    let reason = finish_reason?;
    let mapped = match reason {
        "stop" => "end_turn",
        "length" => "max_tokens",
        "tool_calls" => "tool_use",
        "content_filter" => "end_turn",
        "function_call" => "tool_use",
        _ => "end_turn",
    };
    Some(mapped.to_string())
}
