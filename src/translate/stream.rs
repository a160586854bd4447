//! OpenAI SSE chunk stream → Anthropic SSE event stream.
//!
//! The dispatcher hands this translator one upstream SSE line at a time (the
//! `data: ...` line of each event, split on `\n` boundaries by the
//! dispatcher's read loop). [`StreamTranslator::translate_chunk`]
//! returns zero or more fully-formed Anthropic SSE events — each a complete
//! `event: ...\ndata: ...\n\n` string ready to write to the client.
//!
//! State machine summary: a `content_block_start` for the current block is
//! emitted lazily, on the first delta that actually needs one — text content
//! or (for tool calls) once the function *name* has arrived, since Anthropic
//! blocks commit to a `name` at `content_block_start` time but OpenAI's delta
//! stream may send the name split across chunks or after an empty one. Each
//! open block is closed (`content_block_stop`) before the next one opens, and
//! `current_block_index` only advances when a block actually closes.

use std::collections::HashMap;

use serde_json::{json, Value};

use super::response::translate_finish_reason;

#[derive(Debug, Default)]
struct AccumulatedToolCall {
    id: String,
    name: String,
    block_started: bool,
}

pub struct StreamTranslator {
    message_id: String,
    model: String,
    message_started: bool,
    content_block_started: bool,
    current_block_index: u64,
    current_block_type: &'static str,
    /// Upstream `tool_calls[].index` of the currently open tool_use block,
    /// when `current_block_type == "tool_use"`. Lets the delta handler tell
    /// "this tool's block is already open" apart from "a *different* tool's
    /// block is open and must be closed first".
    current_tool_index: Option<u64>,
    accumulated_tool_calls: HashMap<u64, AccumulatedToolCall>,
    input_tokens: u64,
    output_tokens: u64,
    stop_reason: Option<String>,
}

impl StreamTranslator {
    pub fn new(original_model: impl Into<String>) -> Self {
        Self {
            message_id: format!("msg_{}", &uuid::Uuid::new_v4().simple().to_string()[..24]),
            model: original_model.into(),
            message_started: false,
            content_block_started: false,
            current_block_index: 0,
            current_block_type: "text",
            current_tool_index: None,
            accumulated_tool_calls: HashMap::new(),
            input_tokens: 0,
            output_tokens: 0,
            stop_reason: None,
        }
    }

    pub fn usage(&self) -> (u64, u64) {
        (self.input_tokens, self.output_tokens)
    }

    /// Translate one raw SSE line from upstream into zero or more Anthropic
    /// SSE event strings.
    pub fn translate_chunk(&mut self, raw: &[u8]) -> Vec<String> {
        let chunk_str = match std::str::from_utf8(raw) {
            Ok(s) => s.trim(),
            Err(e) => {
                tracing::error!(error = %e, "failed to decode upstream chunk as utf-8");
                return Vec::new();
            }
        };

        if chunk_str.is_empty() {
            return Vec::new();
        }

        if chunk_str == "data: [DONE]" {
            return self.emit_stream_end();
        }

        let Some(payload) = chunk_str.strip_prefix("data: ") else {
            tracing::debug!(chunk = %truncate(chunk_str, 100), "unexpected chunk format");
            return Vec::new();
        };

        let data: Value = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, chunk = %truncate(payload, 200), "failed to parse chunk JSON");
                return Vec::new();
            }
        };

        if let Some(error) = data.get("error") {
            let message = match error {
                Value::String(s) => s.clone(),
                Value::Object(_) => {
                    error.get("message").and_then(Value::as_str).map(str::to_string).unwrap_or_else(|| error.to_string())
                }
                other => other.to_string(),
            };
            tracing::error!(%message, "upstream sent error in stream");
            let event = json!({ "type": "error", "error": { "type": "api_error", "message": message } });
            return vec![sse("error", &event)];
        }

        let Some(choice) = data.get("choices").and_then(Value::as_array).and_then(|c| c.first()) else {
            if let Some(usage) = data.get("usage") {
                self.input_tokens = usage.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0);
                self.output_tokens = usage.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0);
            }
            return Vec::new();
        };

        let delta = choice.get("delta").cloned().unwrap_or(Value::Null);
        let finish_reason = choice.get("finish_reason").and_then(Value::as_str).map(str::to_string);

        let mut events = Vec::new();

        if !self.message_started {
            events.push(self.emit_message_start());
            self.message_started = true;
        }

        if let Some(text) = delta.get("content").and_then(Value::as_str) {
            if !text.is_empty() {
                if !self.content_block_started {
                    events.push(self.emit_content_block_start("text", self.current_block_index));
                    self.content_block_started = true;
                    self.current_block_type = "text";
                    self.current_tool_index = None;
                }
                events.push(self.emit_text_delta(text));
            }
        }

        if let Some(tool_call_deltas) = delta.get("tool_calls").and_then(Value::as_array) {
            for tc_delta in tool_call_deltas {
                let tc_index = tc_delta.get("index").and_then(Value::as_u64).unwrap_or(0);

                let entry = self.accumulated_tool_calls.entry(tc_index).or_insert_with(|| AccumulatedToolCall {
                    id: format!("toolu_{}", &uuid::Uuid::new_v4().simple().to_string()[..24]),
                    name: String::new(),
                    block_started: false,
                });

                if let Some(id) = tc_delta.get("id").and_then(Value::as_str) {
                    entry.id = id.to_string();
                }

                if let Some(function) = tc_delta.get("function") {
                    if let Some(name) = function.get("name").and_then(Value::as_str) {
                        entry.name = name.to_string();
                    }

                    if !entry.name.is_empty() && !entry.block_started {
                        // Close whatever block is currently open before starting this
                        // tool's block — whether it's the text block, or a *different*
                        // tool_use block (two tool calls can each acquire a name before
                        // either finishes, e.g. index 0 and index 1 interleaved).
                        let other_block_open = self.content_block_started
                            && (self.current_block_type != "tool_use" || self.current_tool_index != Some(tc_index));
                        if other_block_open {
                            events.push(self.emit_content_block_stop());
                            self.current_block_index += 1;
                        }

                        events.push(self.emit_content_block_start_for_tool(tc_index));
                        self.content_block_started = true;
                        self.current_block_type = "tool_use";
                        self.current_tool_index = Some(tc_index);
                        self.accumulated_tool_calls.get_mut(&tc_index).unwrap().block_started = true;
                    }

                    if let Some(args) = function.get("arguments").and_then(Value::as_str) {
                        if self.accumulated_tool_calls.get(&tc_index).map(|t| t.block_started).unwrap_or(false) {
                            events.push(self.emit_input_json_delta(args));
                        }
                    }
                }
            }
        }

        if let Some(reason) = finish_reason {
            self.stop_reason = translate_finish_reason(Some(&reason));
            if self.content_block_started {
                events.push(self.emit_content_block_stop());
            }
        }

        events
    }

    fn emit_message_start(&self) -> String {
        let message = json!({
            "id": self.message_id,
            "type": "message",
            "role": "assistant",
            "content": [],
            "model": self.model,
            "stop_reason": null,
            "stop_sequence": null,
            "usage": { "input_tokens": self.input_tokens, "output_tokens": self.output_tokens },
        });
        sse("message_start", &json!({ "type": "message_start", "message": message }))
    }

    fn emit_content_block_start(&self, block_type: &str, index: u64) -> String {
        let content_block = match block_type {
            "text" => json!({ "type": "text", "text": "" }),
            _ => unreachable!("text is the only block type started through this path"),
        };
        sse(
            "content_block_start",
            &json!({ "type": "content_block_start", "index": index, "content_block": content_block }),
        )
    }

    fn emit_content_block_start_for_tool(&self, tc_index: u64) -> String {
        let tc = &self.accumulated_tool_calls[&tc_index];
        let content_block = json!({ "type": "tool_use", "id": tc.id, "name": tc.name, "input": {} });
        sse(
            "content_block_start",
            &json!({
                "type": "content_block_start",
                "index": self.current_block_index,
                "content_block": content_block,
            }),
        )
    }

    fn emit_text_delta(&self, text: &str) -> String {
        let event = json!({
            "type": "content_block_delta",
            "index": self.current_block_index,
            "delta": { "type": "text_delta", "text": text },
        });
        sse("content_block_delta", &event)
    }

    fn emit_input_json_delta(&self, fragment: &str) -> String {
        let event = json!({
            "type": "content_block_delta",
            "index": self.current_block_index,
            "delta": { "type": "input_json_delta", "partial_json": fragment },
        });
        sse("content_block_delta", &event)
    }

    fn emit_content_block_stop(&self) -> String {
        sse("content_block_stop", &json!({ "type": "content_block_stop", "index": self.current_block_index }))
    }

    /// `message_delta` carrying final usage/stop_reason, then `message_stop`.
    /// Called on `[DONE]`, the authoritative end-of-stream marker. If upstream
    /// closes its connection without ever sending `[DONE]`, the dispatcher's
    /// read loop synthesizes one final call to this path so the client still
    /// sees a terminal event rather than a silently truncated stream.
    fn emit_stream_end(&self) -> Vec<String> {
        let stop_reason = self.stop_reason.clone().unwrap_or_else(|| "end_turn".to_string());
        let message_delta = json!({
            "type": "message_delta",
            "delta": { "stop_reason": stop_reason, "stop_sequence": null },
            "usage": { "output_tokens": self.output_tokens },
        });
        vec![
            sse("message_delta", &message_delta),
            sse("message_stop", &json!({ "type": "message_stop" })),
        ]
    }
}

fn sse(event: &str, data: &Value) -> String {
    format!("event: {event}\ndata: {data}\n\n")
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        s
    } else {
        &s[..max]
    }
}
