//! Shared wire types for the Anthropic <-> OpenAI translation layer.
//!
//! Anthropic payloads are parsed leniently from [`serde_json::Value`] — the
//! source this proxy imitates tolerates unknown or malformed content and
//! degrades rather than rejects (see the propagation policy in the top-level
//! design notes). OpenAI payloads, which this proxy constructs itself, are
//! modeled as plain Rust types instead, so a translator can't accidentally
//! omit a field the upstream requires.

use serde::Serialize;
use serde_json::Value;

/// A single Anthropic content block, dispatched on its `"type"` tag.
///
/// Parsing is lenient: a block with an unrecognized or missing `type` yields
/// `None` rather than an error. Callers skip `None` blocks and log, rather
/// than failing the whole request over one malformed block.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text(String),
    Image { media_type: String, data: String },
    ToolUse { id: String, name: String, input: Value },
    ToolResult { tool_use_id: String, content: String, is_error: bool },
}

impl ContentBlock {
    pub fn from_value(v: &Value) -> Option<Self> {
        match v.get("type").and_then(Value::as_str) {
            Some("text") => Some(ContentBlock::Text(
                v.get("text").and_then(Value::as_str).unwrap_or_default().to_string(),
            )),
            Some("image") => {
                let source = v.get("source")?;
                if source.get("type").and_then(Value::as_str) != Some("base64") {
                    return None;
                }
                Some(ContentBlock::Image {
                    media_type: source
                        .get("media_type")
                        .and_then(Value::as_str)
                        .unwrap_or("image/png")
                        .to_string(),
                    data: source.get("data").and_then(Value::as_str).unwrap_or_default().to_string(),
                })
            }
            Some("tool_use") => Some(ContentBlock::ToolUse {
                id: v.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
                name: v.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
                input: v.get("input").cloned().unwrap_or_else(|| Value::Object(Default::default())),
            }),
            Some("tool_result") => Some(ContentBlock::ToolResult {
                tool_use_id: v.get("tool_use_id").and_then(Value::as_str).unwrap_or_default().to_string(),
                content: stringify_tool_result_content(v.get("content")),
                is_error: v.get("is_error").and_then(Value::as_bool).unwrap_or(false),
            }),
            _ => None,
        }
    }
}

/// Flatten an Anthropic `tool_result.content` field — a plain string or an
/// array of blocks — into a single string, joining text-block fragments
/// with single spaces. Non-text blocks in the array are ignored.
pub fn stringify_tool_result_content(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(" "),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

// ---- OpenAI request types (constructed by this proxy) ----

#[derive(Debug, Serialize)]
pub struct OpenAiRequest {
    pub model: String,
    pub messages: Vec<OpenAiMessage>,
    pub max_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<OpenAiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct StreamOptions {
    pub include_usage: bool,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct OpenAiMessage {
    pub role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<OpenAiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl OpenAiMessage {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self { role: "user", content: Some(Value::String(text.into())), tool_calls: None, tool_call_id: None }
    }
}

#[derive(Debug, Serialize, PartialEq)]
pub struct OpenAiToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: OpenAiFunctionCall,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct OpenAiFunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Serialize)]
pub struct OpenAiTool {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: OpenAiFunctionDef,
}

#[derive(Debug, Serialize)]
pub struct OpenAiFunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

// ---- Anthropic response types (constructed by this proxy) ----

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum AnthropicContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse { id: String, name: String, input: Value },
}

#[derive(Debug, Serialize, PartialEq)]
pub struct AnthropicUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Serialize)]
pub struct AnthropicResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub role: &'static str,
    pub model: String,
    pub content: Vec<AnthropicContentBlock>,
    pub stop_reason: Option<String>,
    pub stop_sequence: Option<String>,
    pub usage: AnthropicUsage,
}
