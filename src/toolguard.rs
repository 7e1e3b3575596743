// Tool-call guard
// Classifies which tool invocations leave the machine, shields local
// auth-lookup flag values from the detector, and restores tool results.

use crate::restorer::Restorer;
use crate::sanitizer::{SanitizeOutcome, SanitizeSession, Sanitizer};
use crate::vault::MappingTable;
use regex::Regex;
use serde_json::Value;

/// Default auth-lookup flags. These select a local credential; their values
/// never travel outward, and redacting them breaks the tool.
pub const DEFAULT_AUTH_FLAGS: &[&str] = &["--account", "--client"];

const AUTH_MARKER_PREFIX: &str = "__MOLTGUARD_AUTH_";

/// Shield/unshield for auth-lookup flag values in shell commands.
pub struct AuthShield {
    flag_patterns: Vec<Regex>,
}

impl AuthShield {
    pub fn new(flags: &[&str]) -> Self {
        let flag_patterns = flags
            .iter()
            .map(|flag| {
                let escaped = regex::escape(flag);
                // --flag=value, --flag value, and both quoted forms.
                Regex::new(&format!(
                    r#"({escaped})(=|[ \t]+)("([^"]*)"|'([^']*)'|[^\s"']+)"#
                ))
                .unwrap()
            })
            .collect();
        AuthShield { flag_patterns }
    }

    /// Swap each auth-flag value for an inert marker, recording the original
    /// text (quotes included) for the swap back.
    pub fn shield(&self, command: &str) -> (String, Vec<(String, String)>) {
        let mut shielded = Vec::new();
        let mut working = command.to_string();
        for pattern in &self.flag_patterns {
            let found: Vec<(usize, usize, String, String, String)> = pattern
                .captures_iter(&working)
                .map(|caps| {
                    let whole = caps.get(0).unwrap();
                    (
                        whole.start(),
                        whole.end(),
                        caps[1].to_string(),
                        caps[2].to_string(),
                        caps[3].to_string(),
                    )
                })
                .collect();
            // Replace back-to-front so earlier offsets stay valid.
            for (start, end, flag, sep, value) in found.into_iter().rev() {
                let marker = format!("{}{}__", AUTH_MARKER_PREFIX, shielded.len());
                working.replace_range(start..end, &format!("{flag}{sep}{marker}"));
                shielded.push((marker, value));
            }
        }
        (working, shielded)
    }

    /// Swap markers back in literally.
    pub fn unshield(&self, text: &str, shielded: &[(String, String)]) -> String {
        let mut working = text.to_string();
        for (marker, original) in shielded {
            working = working.replace(marker, original);
        }
        working
    }
}

impl Default for AuthShield {
    fn default() -> Self {
        Self::new(DEFAULT_AUTH_FLAGS)
    }
}

/// Classifies tool invocations and runs the shield/sanitize/unshield cycle
/// around outbound ones.
pub struct ToolCallGuard {
    shield: AuthShield,
    network_command: Regex,
}

impl ToolCallGuard {
    pub fn new() -> Self {
        Self::with_shield(AuthShield::default())
    }

    pub fn with_shield(shield: AuthShield) -> Self {
        ToolCallGuard {
            shield,
            network_command: Regex::new(r"\b(?:curl|gog|wget|http|httpie|ssh|scp|sftp|rsync)\b")
                .unwrap(),
        }
    }

    /// A tool invocation is outbound when it is a shell command calling a
    /// network utility, or a web search/fetch tool.
    pub fn is_outbound(&self, tool_name: &str, input: &Value) -> bool {
        let normalized = tool_name.to_lowercase().replace('_', "");
        match normalized.as_str() {
            "bash" => input
                .get("command")
                .and_then(|c| c.as_str())
                .map(|c| self.network_command.is_match(c))
                .unwrap_or(false),
            "websearch" | "webfetch" => true,
            _ => false,
        }
    }

    /// Sanitize an outbound tool invocation's input. Shell commands get the
    /// auth shield around detection so local credential selectors survive.
    pub fn sanitize_invocation(
        &self,
        sanitizer: &Sanitizer,
        session: &mut dyn SanitizeSession,
        tool_name: &str,
        input: &Value,
    ) -> SanitizeOutcome {
        let normalized = tool_name.to_lowercase().replace('_', "");
        if normalized != "bash" {
            return sanitizer.sanitize(input, session);
        }

        let Some(command) = input.get("command").and_then(|c| c.as_str()) else {
            return sanitizer.sanitize(input, session);
        };

        let (shielded_command, shielded) = self.shield.shield(command);
        let mut prepared = input.clone();
        prepared["command"] = Value::String(shielded_command);

        let mut outcome = sanitizer.sanitize(&prepared, session);
        if let Some(sanitized_command) = outcome
            .sanitized
            .get("command")
            .and_then(|c| c.as_str())
            .map(|c| self.shield.unshield(c, &shielded))
        {
            outcome.sanitized["command"] = Value::String(sanitized_command);
        }
        outcome
    }

    /// Restore placeholders in a tool result before it reaches the host.
    /// Handles plain strings, text blocks, and nested tool_result content.
    pub fn restore_result(
        &self,
        restorer: &Restorer,
        mapping: &MappingTable,
        result: &Value,
    ) -> Value {
        if mapping.is_empty() {
            return result.clone();
        }
        restorer.restore(result, mapping)
    }
}

impl Default for ToolCallGuard {
    fn default() -> Self {
        Self::new()
    }
}
