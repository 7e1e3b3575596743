// Anthropic Messages adapter

use crate::proxy::adapter::{force_non_streaming, ProtocolAdapter, ANTI_HALLUCINATION_PROMPT};
use serde_json::{json, Value};

pub struct AnthropicAdapter;

impl AnthropicAdapter {
    pub fn new() -> Self {
        AnthropicAdapter
    }

    /// Prepend the instruction to the top-level `system` channel, which may
    /// be a string or an array of content blocks.
    fn inject_instruction(body: &mut Value) {
        match body.get_mut("system") {
            Some(Value::String(existing)) => {
                *existing = format!("{ANTI_HALLUCINATION_PROMPT}\n\n{existing}");
            }
            Some(Value::Array(blocks)) => {
                blocks.insert(0, json!({ "type": "text", "text": ANTI_HALLUCINATION_PROMPT }));
            }
            _ => {
                body["system"] = Value::String(ANTI_HALLUCINATION_PROMPT.to_string());
            }
        }
    }
}

impl Default for AnthropicAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolAdapter for AnthropicAdapter {
    fn backend_name(&self) -> &'static str {
        "anthropic"
    }

    fn upstream_url(&self, base_url: &str, _path: &str) -> String {
        // Tolerate a base URL that already carries /v1.
        let base = base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/messages")
        } else {
            format!("{base}/v1/messages")
        }
    }

    fn apply_auth(
        &self,
        request: reqwest::RequestBuilder,
        api_key: &str,
    ) -> reqwest::RequestBuilder {
        request
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01")
    }

    fn prepare_outbound(&self, body: &mut Value, needs_restoration: bool, client_wants_stream: bool) {
        if needs_restoration && client_wants_stream {
            force_non_streaming(body);
        }
        if needs_restoration {
            Self::inject_instruction(body);
        }
    }

    /// Re-encode a buffered message as the Messages event sequence:
    /// message_start, then per content block start/delta/stop, then
    /// message_delta carrying stop_reason and usage, then message_stop.
    fn encode_sse(&self, response: &Value) -> String {
        let mut out = String::new();
        let mut event = |name: &str, data: Value| {
            out.push_str(&format!("event: {name}\ndata: {data}\n\n"));
        };

        // message_start carries the full message envelope minus its content.
        let mut envelope = response.clone();
        if let Some(map) = envelope.as_object_mut() {
            map.insert("content".to_string(), json!([]));
            map.remove("stop_reason");
            map.remove("stop_sequence");
        }
        event("message_start", json!({ "type": "message_start", "message": envelope }));

        let blocks = response
            .get("content")
            .and_then(|c| c.as_array())
            .cloned()
            .unwrap_or_default();
        for (index, block) in blocks.iter().enumerate() {
            let block_type = block.get("type").and_then(|t| t.as_str()).unwrap_or("text");
            match block_type {
                "tool_use" => {
                    let mut start = block.clone();
                    if let Some(map) = start.as_object_mut() {
                        map.insert("input".to_string(), json!({}));
                    }
                    event(
                        "content_block_start",
                        json!({ "type": "content_block_start", "index": index, "content_block": start }),
                    );
                    let input = block.get("input").cloned().unwrap_or(json!({}));
                    event(
                        "content_block_delta",
                        json!({
                            "type": "content_block_delta",
                            "index": index,
                            "delta": { "type": "input_json_delta", "partial_json": input.to_string() }
                        }),
                    );
                }
                _ => {
                    let mut start = block.clone();
                    if let Some(map) = start.as_object_mut() {
                        map.insert("text".to_string(), Value::String(String::new()));
                    }
                    event(
                        "content_block_start",
                        json!({ "type": "content_block_start", "index": index, "content_block": start }),
                    );
                    let text = block.get("text").and_then(|t| t.as_str()).unwrap_or("");
                    event(
                        "content_block_delta",
                        json!({
                            "type": "content_block_delta",
                            "index": index,
                            "delta": { "type": "text_delta", "text": text }
                        }),
                    );
                }
            }
            event(
                "content_block_stop",
                json!({ "type": "content_block_stop", "index": index }),
            );
        }

        event(
            "message_delta",
            json!({
                "type": "message_delta",
                "delta": {
                    "stop_reason": response.get("stop_reason").cloned().unwrap_or(Value::Null),
                    "stop_sequence": response.get("stop_sequence").cloned().unwrap_or(Value::Null),
                },
                "usage": response.get("usage").cloned().unwrap_or(json!({})),
            }),
        );
        event("message_stop", json!({ "type": "message_stop" }));
        out
    }
}
