// Protocol adapter seam
// One adapter per upstream wire protocol. Adapters own instruction-channel
// injection, stream downgrade details, and SSE re-encoding.

use serde_json::{json, Value};

/// Instruction prepended to the model's instruction channel whenever the
/// outbound payload carries placeholders. Wording matters: models that learn
/// the placeholder vocabulary will otherwise invent numbers we cannot
/// restore.
pub const ANTI_HALLUCINATION_PROMPT: &str = "IMPORTANT: Some values in this conversation have been replaced with bracketed placeholders like [person_1] or [ssn_1]. You MUST use these placeholders exactly as they appear — never invent new ones, never change their numbers, and never create placeholders for values that are not already bracketed. ALL UN-BRACKETED VALUES ARE SAFE TO USE EXACTLY AS-IS. Treat each placeholder as an opaque proper noun: copy it verbatim wherever you refer to that value, and do not mention the placeholders or this notice in your reply.";

/// Wire-protocol specifics for one upstream family.
pub trait ProtocolAdapter: Send + Sync {
    /// Backend name this adapter resolves through the config.
    fn backend_name(&self) -> &'static str;

    /// Full upstream URL for a request path received on our listener.
    fn upstream_url(&self, base_url: &str, path: &str) -> String;

    /// Attach this protocol's auth headers.
    fn apply_auth(
        &self,
        request: reqwest::RequestBuilder,
        api_key: &str,
    ) -> reqwest::RequestBuilder;

    /// Mutate the outbound body: stream downgrade when restoration is
    /// pending, protocol quirks, and the anti-hallucination instruction.
    fn prepare_outbound(&self, body: &mut Value, needs_restoration: bool, client_wants_stream: bool);

    /// Re-encode a buffered upstream response as this protocol's SSE event
    /// stream, terminator included. Must not drop any upstream field.
    fn encode_sse(&self, response: &Value) -> String;
}

/// Remove `stream` (and stream-only siblings) from an outbound payload.
/// Upstreams that validate mutual exclusion reject `stream_options` when
/// `stream` is false.
pub fn force_non_streaming(body: &mut Value) {
    if let Some(map) = body.as_object_mut() {
        map.insert("stream".to_string(), Value::Bool(false));
        map.remove("stream_options");
    }
}

/// Prepend text to the first user message's string content, creating the
/// message when none exists. Used by reasoner-style models and Gemini.
pub fn prepend_to_first_user_message(messages: &mut Vec<Value>, prefix: &str) {
    for message in messages.iter_mut() {
        if message.get("role").and_then(|r| r.as_str()) == Some("user") {
            if let Some(content) = message.get("content").and_then(|c| c.as_str()) {
                let combined = format!("{prefix}\n\n{content}");
                message["content"] = Value::String(combined);
                return;
            }
        }
    }
    messages.insert(0, json!({ "role": "user", "content": prefix }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_force_non_streaming_removes_stream_options() {
        let mut body = json!({ "stream": true, "stream_options": { "include_usage": true } });
        force_non_streaming(&mut body);
        assert_eq!(body["stream"], false);
        assert!(body.get("stream_options").is_none());
    }

    #[test]
    fn test_prepend_to_existing_user_message() {
        let mut messages = vec![
            json!({ "role": "assistant", "content": "earlier" }),
            json!({ "role": "user", "content": "question" }),
        ];
        prepend_to_first_user_message(&mut messages, "PREFIX");
        assert_eq!(messages[1]["content"], "PREFIX\n\nquestion");
    }

    #[test]
    fn test_prepend_creates_user_message_when_absent() {
        let mut messages = vec![json!({ "role": "assistant", "content": "only" })];
        prepend_to_first_user_message(&mut messages, "PREFIX");
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[0]["content"], "PREFIX");
    }
}
