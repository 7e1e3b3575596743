// Gemini generateContent adapter

use crate::proxy::adapter::{ProtocolAdapter, ANTI_HALLUCINATION_PROMPT};
use serde_json::{json, Value};

pub struct GeminiAdapter;

impl GeminiAdapter {
    pub fn new() -> Self {
        GeminiAdapter
    }

    /// Mirror the OpenAI behavior: prepend the instruction to the system
    /// instruction when present, else to the first user content entry.
    fn inject_instruction(body: &mut Value) {
        for key in ["systemInstruction", "system_instruction"] {
            if let Some(instruction) = body.get_mut(key) {
                if let Some(parts) = instruction.get_mut("parts").and_then(|p| p.as_array_mut()) {
                    parts.insert(0, json!({ "text": ANTI_HALLUCINATION_PROMPT }));
                    return;
                }
            }
        }

        if let Some(contents) = body.get_mut("contents").and_then(|c| c.as_array_mut()) {
            for entry in contents.iter_mut() {
                let role = entry.get("role").and_then(|r| r.as_str()).unwrap_or("user");
                if role != "user" {
                    continue;
                }
                if let Some(parts) = entry.get_mut("parts").and_then(|p| p.as_array_mut()) {
                    parts.insert(0, json!({ "text": ANTI_HALLUCINATION_PROMPT }));
                    return;
                }
            }
        }

        body["systemInstruction"] = json!({ "parts": [{ "text": ANTI_HALLUCINATION_PROMPT }] });
    }
}

impl Default for GeminiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolAdapter for GeminiAdapter {
    fn backend_name(&self) -> &'static str {
        "gemini"
    }

    /// The listener path already carries `models/<model>:generateContent`;
    /// strip our `/v1` prefix and append to the configured base.
    fn upstream_url(&self, base_url: &str, path: &str) -> String {
        let base = base_url.trim_end_matches('/');
        let suffix = path.strip_prefix("/v1").unwrap_or(path);
        format!("{base}{suffix}")
    }

    fn apply_auth(
        &self,
        request: reqwest::RequestBuilder,
        api_key: &str,
    ) -> reqwest::RequestBuilder {
        // Header auth keeps the key out of URLs that might get logged.
        request.header("x-goog-api-key", api_key)
    }

    fn prepare_outbound(&self, body: &mut Value, needs_restoration: bool, _client_wants_stream: bool) {
        // generateContent is non-streaming by construction; there is no
        // stream flag to downgrade.
        if needs_restoration {
            Self::inject_instruction(body);
        }
    }

    /// Unreachable on the built-in routes (no streaming surface); kept total
    /// for the trait. One data frame, no terminator ceremony.
    fn encode_sse(&self, response: &Value) -> String {
        format!("data: {response}\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_into_existing_system_instruction() {
        let mut body = json!({
            "systemInstruction": { "parts": [{ "text": "persona" }] },
            "contents": [{ "role": "user", "parts": [{ "text": "hi" }] }]
        });
        GeminiAdapter::new().prepare_outbound(&mut body, true, false);
        let parts = body["systemInstruction"]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert!(parts[0]["text"].as_str().unwrap().starts_with("IMPORTANT"));
        assert_eq!(parts[1]["text"], "persona");
    }

    #[test]
    fn test_instruction_into_first_user_content() {
        let mut body = json!({
            "contents": [
                { "role": "model", "parts": [{ "text": "earlier" }] },
                { "role": "user", "parts": [{ "text": "[person_1]?" }] }
            ]
        });
        GeminiAdapter::new().prepare_outbound(&mut body, true, false);
        let parts = body["contents"][1]["parts"].as_array().unwrap();
        assert!(parts[0]["text"].as_str().unwrap().starts_with("IMPORTANT"));
        assert_eq!(parts[1]["text"], "[person_1]?");
    }

    #[test]
    fn test_no_injection_without_restoration() {
        let mut body = json!({ "contents": [{ "role": "user", "parts": [{ "text": "hi" }] }] });
        let before = body.clone();
        GeminiAdapter::new().prepare_outbound(&mut body, false, true);
        assert_eq!(body, before);
    }

    #[test]
    fn test_upstream_url_strips_v1_prefix() {
        let adapter = GeminiAdapter::new();
        assert_eq!(
            adapter.upstream_url(
                "https://generativelanguage.googleapis.com/v1beta",
                "/v1/models/gemini-1.5-pro:generateContent"
            ),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-pro:generateContent"
        );
    }
}
