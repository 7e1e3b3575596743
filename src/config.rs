// Gateway configuration
// Loaded from a JSON file (argv[1] or ~/.moltguard/gateway.json) with
// environment variables as a fallback source.

use crate::error::{GatewayError, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_PORT: u16 = 8900;
pub const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// One configured upstream.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    pub base_url: String,
    pub api_key: String,
}

/// Resolved gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub port: u16,
    pub max_body_bytes: usize,
    pub request_timeout_secs: u64,
    /// When set, each proxied request gets its own vault session that is
    /// destroyed after the response is written.
    pub ephemeral_sessions: bool,
    pub backends: HashMap<String, BackendConfig>,
    /// Path-prefix overrides, longest prefix first.
    pub routing: Vec<(String, String)>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            port: DEFAULT_PORT,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            ephemeral_sessions: false,
            backends: HashMap::new(),
            routing: Vec::new(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration for the gateway process.
    ///
    /// `explicit_path` is argv[1] when present; a missing explicit file is a
    /// startup error, while a missing default file just means env-only
    /// configuration.
    pub fn load(explicit_path: Option<&Path>) -> Result<GatewayConfig> {
        let mut config = match explicit_path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    GatewayError::Config(format!("cannot read {}: {}", path.display(), e))
                })?;
                let value: Value = serde_json::from_str(&raw).map_err(|e| {
                    GatewayError::Config(format!("invalid JSON in {}: {}", path.display(), e))
                })?;
                GatewayConfig::from_file_value(&value)?
            }
            None => match Self::default_path() {
                Some(path) if path.exists() => {
                    let raw = std::fs::read_to_string(&path).map_err(|e| {
                        GatewayError::Config(format!("cannot read {}: {}", path.display(), e))
                    })?;
                    let value: Value = serde_json::from_str(&raw).map_err(|e| {
                        GatewayError::Config(format!("invalid JSON in {}: {}", path.display(), e))
                    })?;
                    GatewayConfig::from_file_value(&value)?
                }
                _ => GatewayConfig::default(),
            },
        };

        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// `~/.moltguard/gateway.json`.
    pub fn default_path() -> Option<PathBuf> {
        std::env::var("HOME")
            .ok()
            .map(|home| PathBuf::from(home).join(".moltguard").join("gateway.json"))
    }

    /// Parse the config-file schema. Unknown top-level fields are ignored.
    pub fn from_file_value(value: &Value) -> Result<GatewayConfig> {
        let mut config = GatewayConfig::default();

        if let Some(port) = value.get("port") {
            let port = port
                .as_u64()
                .ok_or_else(|| GatewayError::Config("port must be a number".to_string()))?;
            if port == 0 || port > 65535 {
                return Err(GatewayError::Config(format!(
                    "port {} out of range [1, 65535]",
                    port
                )));
            }
            config.port = port as u16;
        }

        if let Some(max) = value.get("maxBodyBytes").and_then(|v| v.as_u64()) {
            config.max_body_bytes = max as usize;
        }
        if let Some(timeout) = value.get("requestTimeoutSecs").and_then(|v| v.as_u64()) {
            config.request_timeout_secs = timeout;
        }
        if let Some(ephemeral) = value.get("ephemeralSessions").and_then(|v| v.as_bool()) {
            config.ephemeral_sessions = ephemeral;
        }

        if let Some(backends) = value.get("backends") {
            let backends = backends
                .as_object()
                .ok_or_else(|| GatewayError::Config("backends must be an object".to_string()))?;
            for (name, raw) in backends {
                let backend: BackendConfig = serde_json::from_value(raw.clone()).map_err(|e| {
                    GatewayError::Config(format!("backend {name}: {e}"))
                })?;
                config.backends.insert(name.clone(), backend);
            }
        }

        if let Some(routing) = value.get("routing") {
            let routing = routing
                .as_object()
                .ok_or_else(|| GatewayError::Config("routing must be an object".to_string()))?;
            for (prefix, backend) in routing {
                let backend = backend.as_str().ok_or_else(|| {
                    GatewayError::Config(format!("routing {prefix}: backend name must be a string"))
                })?;
                config.routing.push((prefix.clone(), backend.to_string()));
            }
            // Longest prefix wins on lookup.
            config.routing.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        }

        Ok(config)
    }

    /// Fill gaps from environment variables. File values take precedence.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("MOLTGUARD_GATEWAY_PORT").and_then(|v| v.parse::<u16>().ok()) {
            if port > 0 && !self.port_from_file() {
                self.port = port;
            }
        }

        if !self.backends.contains_key("anthropic") {
            if let Some(key) = lookup("ANTHROPIC_API_KEY") {
                self.backends.insert(
                    "anthropic".to_string(),
                    BackendConfig {
                        base_url: lookup("ANTHROPIC_BASE_URL")
                            .unwrap_or_else(|| DEFAULT_ANTHROPIC_BASE_URL.to_string()),
                        api_key: key,
                    },
                );
            }
        }

        if !self.backends.contains_key("openai") {
            if let Some(key) = lookup("OPENAI_API_KEY") {
                self.backends.insert(
                    "openai".to_string(),
                    BackendConfig {
                        base_url: lookup("OPENAI_BASE_URL")
                            .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
                        api_key: key,
                    },
                );
            } else if let Some(key) = lookup("KIMI_API_KEY").or_else(|| lookup("MOONSHOT_API_KEY"))
            {
                // Kimi/Moonshot speaks the OpenAI-compatible protocol.
                if let Some(base_url) = lookup("KIMI_BASE_URL") {
                    self.backends.insert(
                        "openai".to_string(),
                        BackendConfig {
                            base_url,
                            api_key: key,
                        },
                    );
                }
            }
        }

        if !self.backends.contains_key("gemini") {
            if let Some(key) = lookup("GEMINI_API_KEY").or_else(|| lookup("GOOGLE_API_KEY")) {
                self.backends.insert(
                    "gemini".to_string(),
                    BackendConfig {
                        base_url: lookup("GEMINI_BASE_URL")
                            .unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string()),
                        api_key: key,
                    },
                );
            }
        }
    }

    fn port_from_file(&self) -> bool {
        self.port != DEFAULT_PORT
    }

    /// Startup validation. A missing backend is not an error here; its routes
    /// fail with 500 at request time instead.
    pub fn validate(&self) -> Result<()> {
        for (name, backend) in &self.backends {
            if backend.base_url.trim().is_empty() {
                return Err(GatewayError::Config(format!(
                    "backend {name} has an empty baseUrl"
                )));
            }
            if backend.api_key.trim().is_empty() {
                return Err(GatewayError::Config(format!(
                    "backend {name} has an empty apiKey"
                )));
            }
        }
        for (_, backend_name) in &self.routing {
            if !self.backends.contains_key(backend_name) {
                // Tolerated: the route 500s when hit, matching missing-backend
                // behavior for the built-in paths.
                tracing::warn!(backend = %backend_name, "routing override points at an unconfigured backend");
            }
        }
        Ok(())
    }

    /// Resolve the backend for a request path: configured overrides first
    /// (longest prefix), then the built-in path mapping.
    pub fn backend_for_path(&self, path: &str) -> Option<&str> {
        for (prefix, backend) in &self.routing {
            if path.starts_with(prefix.as_str()) {
                return Some(backend.as_str());
            }
        }
        if path.starts_with("/v1/messages") {
            Some("anthropic")
        } else if path.starts_with("/v1/chat/completions") || path.starts_with("/chat/completions")
        {
            Some("openai")
        } else if path.starts_with("/v1/models/") {
            Some("gemini")
        } else {
            None
        }
    }

    pub fn backend(&self, name: &str) -> Result<&BackendConfig> {
        self.backends
            .get(name)
            .ok_or_else(|| GatewayError::MissingBackend {
                name: name.to_string(),
            })
    }
}
