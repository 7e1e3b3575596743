// Restorer
// Puts original values back in place of placeholders: canonical bracketed
// forms first, then bracket-stripped variants, then a guard pass that lets
// fabricated placeholders through untouched rather than guessing.

use crate::types::{is_structural_key, Category};
use crate::vault::MappingTable;
use regex::Regex;
use serde_json::Value;

pub struct Restorer {
    /// `\[?(<category>)_\d+\]?` over every known category prefix.
    placeholder_family: Regex,
}

impl Restorer {
    pub fn new() -> Self {
        let prefixes: Vec<&str> = Category::ALL.iter().map(|c| c.prefix()).collect();
        let pattern = format!(r"\[?(?:{})_\d+\]?", prefixes.join("|"));
        Restorer {
            placeholder_family: Regex::new(&pattern).unwrap(),
        }
    }

    /// Restore a JSON-shaped value. Recursion mirrors the sanitizer:
    /// structural keys are copied through verbatim.
    pub fn restore(&self, value: &Value, mapping: &MappingTable) -> Value {
        match value {
            Value::String(s) => Value::String(self.restore_text(s, mapping)),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.restore(item, mapping))
                    .collect(),
            ),
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (key, v) in map {
                    if is_structural_key(key) {
                        out.insert(key.clone(), v.clone());
                    } else {
                        out.insert(key.clone(), self.restore(v, mapping));
                    }
                }
                Value::Object(out)
            }
            other => other.clone(),
        }
    }

    /// Three passes over one string.
    pub fn restore_text(&self, text: &str, mapping: &MappingTable) -> String {
        if mapping.is_empty() || text.is_empty() {
            return text.to_string();
        }

        // Longest placeholders first so "[person_1]" never clobbers the
        // prefix of "[person_10]".
        let mut tokens: Vec<(&str, &str)> = mapping.iter().collect();
        tokens.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        // Pass 1: canonical bracketed form, literal replacement.
        let mut working = text.to_string();
        for (token, original) in &tokens {
            if working.contains(token) {
                working = working.replace(token, original);
            }
        }

        // Pass 2: bracket-stripped form, word-bounded. Some upstreams eat
        // square brackets as markdown.
        for (token, original) in &tokens {
            let bare = token.trim_start_matches('[').trim_end_matches(']');
            working = replace_word_bounded(&working, bare, original);
        }

        // Pass 3: anything still shaped like a placeholder was fabricated by
        // the upstream. Pass it through as-is; a visible raw placeholder
        // beats a confidently wrong substitution.
        for m in self.placeholder_family.find_iter(&working) {
            let canonical = canonical_form(m.as_str());
            if !mapping.contains(&canonical) {
                tracing::warn!(token = %canonical, "fabricated placeholder passed through unrestored");
            }
        }

        working
    }

    /// Restore one SSE line. Strips the `data: ` prefix, keeps the `[DONE]`
    /// sentinel, restores the JSON payload when it parses, and re-emits the
    /// line with its prefix and newline.
    pub fn restore_sse_line(&self, line: &str, mapping: &MappingTable) -> String {
        let trimmed = line.strip_suffix('\n').unwrap_or(line);
        let Some(payload) = trimmed.strip_prefix("data: ") else {
            return format!("{trimmed}\n");
        };
        if payload == "[DONE]" {
            return "data: [DONE]\n".to_string();
        }

        match serde_json::from_str::<Value>(payload) {
            Ok(value) => {
                let restored = self.restore(&value, mapping);
                format!("data: {restored}\n")
            }
            Err(_) => {
                let restored = self.restore_text(payload, mapping);
                format!("data: {restored}\n")
            }
        }
    }
}

impl Default for Restorer {
    fn default() -> Self {
        Self::new()
    }
}

/// Bracketed canonical form of a possibly bracket-stripped placeholder.
fn canonical_form(token: &str) -> String {
    let bare = token.trim_start_matches('[').trim_end_matches(']');
    format!("[{bare}]")
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Replace whole-word occurrences of `needle`, where "word" is bounded by
/// non-alphanumeric, non-underscore bytes. Manual scan instead of a regex:
/// no escaping concerns and adjacent occurrences both match.
fn replace_word_bounded(text: &str, needle: &str, replacement: &str) -> String {
    if needle.is_empty() || !text.contains(needle) {
        return text.to_string();
    }
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    while let Some(found) = text[cursor..].find(needle) {
        let start = cursor + found;
        let end = start + needle.len();
        let left_ok = start == 0 || !is_word_byte(bytes[start - 1]);
        let right_ok = end == bytes.len() || !is_word_byte(bytes[end]);
        out.push_str(&text[cursor..start]);
        if left_ok && right_ok {
            out.push_str(replacement);
        } else {
            out.push_str(needle);
        }
        cursor = end;
    }
    out.push_str(&text[cursor..]);
    out
}
