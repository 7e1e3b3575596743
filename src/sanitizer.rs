// Sanitizer
// Walks JSON-shaped values, runs the detector over string leaves (skipping
// structural keys), and swaps detected values for vault-backed placeholders.

use crate::detector::EntityDetector;
use crate::types::{is_structural_key, Category};
use crate::vault::{MappingTable, TokenVault};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Where placeholders and counters live during one or more sanitize calls.
///
/// The vault-backed implementation makes every allocation durable; the local
/// one gives per-request isolation with no persistence.
pub trait SanitizeSession {
    /// Allocate (or reuse) the placeholder for `original`. Idempotent per
    /// original value within the session.
    fn allocate(&mut self, original: &str, category: Category) -> String;

    /// Snapshot of the current placeholder-to-original table.
    fn mapping(&self) -> MappingTable;

    /// Snapshot of the per-category counters.
    fn counters(&self) -> HashMap<Category, u32>;
}

/// Self-contained state for callers without a vault.
#[derive(Default)]
pub struct LocalSession {
    mapping: MappingTable,
    reverse: HashMap<String, String>,
    counters: HashMap<Category, u32>,
}

impl LocalSession {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SanitizeSession for LocalSession {
    fn allocate(&mut self, original: &str, category: Category) -> String {
        if let Some(existing) = self.reverse.get(original) {
            return existing.clone();
        }
        let counter = self.counters.entry(category).or_insert(0);
        *counter += 1;
        let token = category.placeholder(*counter);
        self.mapping.set(token.clone(), original);
        self.reverse.insert(original.to_string(), token.clone());
        token
    }

    fn mapping(&self) -> MappingTable {
        self.mapping.clone()
    }

    fn counters(&self) -> HashMap<Category, u32> {
        self.counters.clone()
    }
}

/// Vault-backed session state shared across the turns of one conversation.
pub struct VaultSession {
    vault: Arc<TokenVault>,
    session_id: Uuid,
}

impl VaultSession {
    pub fn new(vault: Arc<TokenVault>, session_id: Uuid) -> Self {
        VaultSession { vault, session_id }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }
}

impl SanitizeSession for VaultSession {
    fn allocate(&mut self, original: &str, category: Category) -> String {
        self.vault.allocate(self.session_id, original, category)
    }

    fn mapping(&self) -> MappingTable {
        self.vault.session_state(self.session_id).0
    }

    fn counters(&self) -> HashMap<Category, u32> {
        self.vault.session_state(self.session_id).1
    }
}

/// Result of one sanitize call.
#[derive(Debug, Clone)]
pub struct SanitizeOutcome {
    pub sanitized: Value,
    pub mapping: MappingTable,
    pub redaction_count: usize,
    pub redactions_by_category: HashMap<Category, u32>,
}

pub struct Sanitizer {
    detector: EntityDetector,
}

impl Sanitizer {
    pub fn new() -> Self {
        Sanitizer {
            detector: EntityDetector::new(),
        }
    }

    pub fn with_detector(detector: EntityDetector) -> Self {
        Sanitizer { detector }
    }

    /// Sanitize a JSON-shaped value. Only string leaves change; structural
    /// keys are copied through verbatim.
    pub fn sanitize(&self, value: &Value, session: &mut dyn SanitizeSession) -> SanitizeOutcome {
        let sanitized = self.sanitize_value(value, session);
        let mapping = session.mapping();
        let redaction_count = mapping.len();
        SanitizeOutcome {
            sanitized,
            mapping,
            redaction_count,
            redactions_by_category: session.counters(),
        }
    }

    fn sanitize_value(&self, value: &Value, session: &mut dyn SanitizeSession) -> Value {
        match value {
            Value::String(s) => Value::String(self.sanitize_text(s, session)),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.sanitize_value(item, session))
                    .collect(),
            ),
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (key, v) in map {
                    if is_structural_key(key) {
                        out.insert(key.clone(), v.clone());
                    } else {
                        out.insert(key.clone(), self.sanitize_value(v, session));
                    }
                }
                Value::Object(out)
            }
            other => other.clone(),
        }
    }

    /// The string transform: detect, dedupe by original, substitute longest
    /// first, allocating a counter only for matches that actually land.
    pub fn sanitize_text(&self, text: &str, session: &mut dyn SanitizeSession) -> String {
        let candidates = self.detector.detect(text);
        if candidates.is_empty() {
            return text.to_string();
        }

        // First occurrence wins per original value.
        let mut seen = std::collections::HashSet::new();
        let mut unique: Vec<_> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if seen.insert(candidate.text.clone()) {
                unique.push(candidate);
            }
        }

        // Longer originals substitute first so "Karen Wilson" wins over
        // "Karen". Stable sort keeps layer precedence for equal lengths.
        unique.sort_by(|a, b| b.text.len().cmp(&a.text.len()));

        let mut working = text.to_string();
        for candidate in unique {
            // A candidate consumed by a longer substitution gets no counter;
            // gaps in the numbering would invite the upstream model to invent
            // placeholders we cannot restore.
            if !working.contains(candidate.text.as_str()) {
                continue;
            }
            let token = session.allocate(&candidate.text, candidate.category);
            working = working.replace(candidate.text.as_str(), &token);
        }
        working
    }
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sanitize(value: Value) -> SanitizeOutcome {
        let sanitizer = Sanitizer::new();
        let mut session = LocalSession::new();
        sanitizer.sanitize(&value, &mut session)
    }

    #[test]
    fn test_ssn_and_name() {
        let outcome = sanitize(json!({
            "messages": [{ "role": "user", "content": "My SSN is 123-45-6789 and I am John Smith" }]
        }));
        let content = outcome.sanitized["messages"][0]["content"].as_str().unwrap();
        assert!(!content.contains("123-45-6789"));
        assert!(!content.contains("John Smith"));
        assert!(content.contains("[ssn_1]"));
        assert!(content.contains("[person_1]"));
        assert_eq!(outcome.mapping.get("[ssn_1]"), Some("123-45-6789"));
    }

    #[test]
    fn test_structural_keys_untouched() {
        let outcome = sanitize(json!({
            "messages": [{
                "role": "tool",
                "tool_call_id": "call_abc123def456xyz",
                "content": "SSN 987-65-4321"
            }]
        }));
        let msg = &outcome.sanitized["messages"][0];
        assert_eq!(msg["tool_call_id"], "call_abc123def456xyz");
        assert_eq!(msg["role"], "tool");
        assert!(!msg["content"].as_str().unwrap().contains("987-65-4321"));
    }

    #[test]
    fn test_structural_key_with_pii_shaped_value() {
        let outcome = sanitize(json!({ "id": "123-45-6789", "content": "hello" }));
        assert_eq!(outcome.sanitized["id"], "123-45-6789");
    }

    #[test]
    fn test_repeated_value_single_placeholder() {
        let outcome = sanitize(json!("SSN 123-45-6789 and again 123-45-6789"));
        let text = outcome.sanitized.as_str().unwrap();
        assert_eq!(text.matches("[ssn_1]").count(), 2);
        assert_eq!(outcome.redaction_count, 1);
    }

    #[test]
    fn test_longest_match_wins_no_counter_gap() {
        let outcome = sanitize(json!("Karen Wilson called. Karen left a note."));
        let text = outcome.sanitized.as_str().unwrap();
        // "Karen Wilson" is replaced first; the leftover standalone "Karen"
        // still gets its own placeholder because it appears on its own.
        assert!(text.contains("[person_1]"));
        assert!(text.contains("[person_2]"));
        assert!(!text.contains("Karen"));
        assert_eq!(outcome.mapping.get("[person_1]"), Some("Karen Wilson"));
        assert_eq!(outcome.mapping.get("[person_2]"), Some("Karen"));
    }

    #[test]
    fn test_consumed_match_allocates_nothing() {
        let outcome = sanitize(json!("Reach Karen Wilson today"));
        // "Karen" appears only inside "Karen Wilson"; once the bigram is
        // substituted the singleton is consumed and must not burn a counter.
        assert_eq!(
            outcome.redactions_by_category.get(&Category::Person),
            Some(&1)
        );
        assert_eq!(outcome.mapping.len(), 1);
    }

    #[test]
    fn test_itin_beats_ssn() {
        let outcome = sanitize(json!("ITIN: 912-34-5678"));
        assert_eq!(outcome.mapping.get("[itin_1]"), Some("912-34-5678"));
        assert!(outcome.mapping.get("[ssn_1]").is_none());
    }

    #[test]
    fn test_numbers_and_bools_pass_through() {
        let outcome = sanitize(json!({ "content": "fine", "count": 123456789, "flag": true, "nil": null }));
        assert_eq!(outcome.sanitized["count"], 123456789);
        assert_eq!(outcome.sanitized["flag"], true);
        assert_eq!(outcome.sanitized["nil"], Value::Null);
    }

    #[test]
    fn test_shared_session_consistency_across_calls() {
        let sanitizer = Sanitizer::new();
        let mut session = LocalSession::new();
        let first = sanitizer.sanitize(&json!("Email a@example.com"), &mut session);
        let second = sanitizer.sanitize(&json!("Again: a@example.com"), &mut session);
        assert_eq!(first.mapping.get("[email_1]"), Some("a@example.com"));
        assert_eq!(
            second.sanitized.as_str().unwrap(),
            "Again: [email_1]"
        );
        assert_eq!(second.redaction_count, 1);
    }

    #[test]
    fn test_sanitize_already_sanitized_is_stable() {
        let sanitizer = Sanitizer::new();
        let mut session = LocalSession::new();
        let first = sanitizer.sanitize(&json!("SSN 123-45-6789"), &mut session);
        let again = sanitizer.sanitize(&first.sanitized, &mut session);
        assert_eq!(first.sanitized, again.sanitized);
        assert_eq!(again.redaction_count, first.redaction_count);
    }

    #[test]
    fn test_counter_monotonic_across_calls() {
        let sanitizer = Sanitizer::new();
        let mut session = LocalSession::new();
        sanitizer.sanitize(&json!("first a@example.com"), &mut session);
        let before = session.counters().get(&Category::Email).copied().unwrap();
        sanitizer.sanitize(&json!("next b@example.com"), &mut session);
        let after = session.counters().get(&Category::Email).copied().unwrap();
        assert!(after > before);
    }

    #[tokio::test]
    async fn test_vault_backed_session() {
        let dir = tempfile::tempdir().unwrap();
        let vault = TokenVault::open(&dir.path().join("token-vault.json")).unwrap();
        let session_id = vault.create_session();
        let sanitizer = Sanitizer::new();

        let mut session = VaultSession::new(Arc::clone(&vault), session_id);
        let outcome = sanitizer.sanitize(&json!("mail me: a@example.com"), &mut session);
        assert_eq!(outcome.mapping.get("[email_1]"), Some("a@example.com"));
        assert_eq!(vault.resolve(session_id, "[email_1]").as_deref(), Some("a@example.com"));
        vault.close().await;
    }
}
