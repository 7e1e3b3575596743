// OpenAI-compatible chat completions adapter

use crate::proxy::adapter::{
    force_non_streaming, prepend_to_first_user_message, ProtocolAdapter, ANTI_HALLUCINATION_PROMPT,
};
use serde_json::{json, Value};

pub struct OpenAiAdapter;

impl OpenAiAdapter {
    pub fn new() -> Self {
        OpenAiAdapter
    }

    /// Reasoner-family models reject non-user instruction roles.
    fn is_reasoner_model(body: &Value) -> bool {
        body.get("model")
            .and_then(|m| m.as_str())
            .map(|m| {
                let m = m.to_lowercase();
                m.contains("reasoner") || m.contains("-r1")
            })
            .unwrap_or(false)
    }

    /// Fold every system/developer message into a prefix of the first user
    /// message, preserving their order.
    fn consolidate_instruction_roles(body: &mut Value) {
        let Some(messages) = body.get_mut("messages").and_then(|m| m.as_array_mut()) else {
            return;
        };
        let mut instructions = Vec::new();
        messages.retain(|message| {
            let role = message.get("role").and_then(|r| r.as_str()).unwrap_or("");
            if role == "system" || role == "developer" {
                if let Some(content) = message.get("content").and_then(|c| c.as_str()) {
                    instructions.push(content.to_string());
                }
                false
            } else {
                true
            }
        });
        if !instructions.is_empty() {
            prepend_to_first_user_message(messages, &instructions.join("\n\n"));
        }
    }
}

impl Default for OpenAiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolAdapter for OpenAiAdapter {
    fn backend_name(&self) -> &'static str {
        "openai"
    }

    fn upstream_url(&self, base_url: &str, _path: &str) -> String {
        let base = base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/chat/completions")
        } else {
            format!("{base}/v1/chat/completions")
        }
    }

    fn apply_auth(
        &self,
        request: reqwest::RequestBuilder,
        api_key: &str,
    ) -> reqwest::RequestBuilder {
        request.header("Authorization", format!("Bearer {api_key}"))
    }

    fn prepare_outbound(&self, body: &mut Value, needs_restoration: bool, client_wants_stream: bool) {
        if needs_restoration && client_wants_stream {
            force_non_streaming(body);
        }

        let reasoner = Self::is_reasoner_model(body);
        if reasoner {
            Self::consolidate_instruction_roles(body);
        }

        if needs_restoration {
            if reasoner {
                if let Some(messages) = body.get_mut("messages").and_then(|m| m.as_array_mut()) {
                    prepend_to_first_user_message(messages, ANTI_HALLUCINATION_PROMPT);
                }
            } else if let Some(messages) = body.get_mut("messages").and_then(|m| m.as_array_mut())
            {
                messages.insert(
                    0,
                    json!({ "role": "system", "content": ANTI_HALLUCINATION_PROMPT }),
                );
            }
        }
    }

    /// Re-encode a buffered completion as a single chat.completion.chunk
    /// followed by the [DONE] sentinel. choices[].message becomes
    /// choices[].delta; tool calls gain an explicit index.
    fn encode_sse(&self, response: &Value) -> String {
        let mut chunk = response.clone();
        if let Some(map) = chunk.as_object_mut() {
            map.insert(
                "object".to_string(),
                Value::String("chat.completion.chunk".to_string()),
            );
        }

        if let Some(choices) = chunk.get_mut("choices").and_then(|c| c.as_array_mut()) {
            for choice in choices {
                let Some(choice_map) = choice.as_object_mut() else {
                    continue;
                };
                if let Some(mut message) = choice_map.remove("message") {
                    if let Some(tool_calls) =
                        message.get_mut("tool_calls").and_then(|t| t.as_array_mut())
                    {
                        for (index, call) in tool_calls.iter_mut().enumerate() {
                            if let Some(call_map) = call.as_object_mut() {
                                call_map.insert("index".to_string(), json!(index));
                            }
                        }
                    }
                    choice_map.insert("delta".to_string(), message);
                }
            }
        }

        format!("data: {chunk}\n\ndata: [DONE]\n\n")
    }
}
