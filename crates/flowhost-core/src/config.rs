use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{FlowhostError, Result};

/// Top-level Flowhost configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub fallback_models: Vec<ModelConfig>,
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    #[serde(default)]
    pub gateway: Option<GatewayConfig>,
    #[serde(default)]
    pub web_search: Option<WebSearchConfig>,
    #[serde(default)]
    pub log: LogConfig,
}

/// Limits and locations used by the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding `<agent_id>.json` definitions.
    #[serde(default = "default_agents_dir")]
    pub agents_dir: String,
    #[serde(default = "default_max_delegation_depth")]
    pub max_delegation_depth: usize,
    /// Ceiling on node executions in a single flow run (guards back-jumps).
    #[serde(default = "default_max_node_executions")]
    pub max_node_executions: usize,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Turn limit for the single-shot tool loop.
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    /// Idle sessions older than this are dropped.
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
    /// Number of prior messages replayed into a single-shot prompt.
    #[serde(default = "default_session_history_limit")]
    pub session_history_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            agents_dir: default_agents_dir(),
            max_delegation_depth: default_max_delegation_depth(),
            max_node_executions: default_max_node_executions(),
            request_timeout_secs: default_request_timeout(),
            max_turns: default_max_turns(),
            session_ttl_secs: default_session_ttl(),
            session_history_limit: default_session_history_limit(),
        }
    }
}

fn default_agents_dir() -> String { "agents".to_string() }
fn default_max_delegation_depth() -> usize { 5 }
fn default_max_node_executions() -> usize { 50 }
fn default_request_timeout() -> u64 { 120 }
fn default_max_turns() -> usize { 10 }
fn default_session_ttl() -> u64 { 3600 }
fn default_session_history_limit() -> usize { 20 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model_id: default_model_id(),
            api_key: None,
            base_url: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            retry: None,
        }
    }
}

fn default_provider() -> String { "openai".to_string() }
fn default_model_id() -> String { "gpt-4".to_string() }
fn default_max_tokens() -> u32 { 4096 }
fn default_temperature() -> f32 { 0.0 }

/// Retry configuration for LLM requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

/// Credentials for one provider, applied when a definition names one of its models.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Web search provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSearchConfig {
    #[serde(default = "default_search_provider")]
    pub provider: String,
    pub api_key: String,
}

fn default_search_provider() -> String { "tavily".to_string() }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String { "127.0.0.1:8000".to_string() }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String { "info".to_string() }

/// Provider family implied by a model name.
pub fn provider_for_model(model: &str) -> Option<&'static str> {
    let lower = model.to_ascii_lowercase();
    if lower.starts_with("claude") {
        Some("anthropic")
    } else if lower.starts_with("gpt") || lower.starts_with("o1") || lower.starts_with("o3") {
        Some("openai")
    } else {
        None
    }
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| FlowhostError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| FlowhostError::Config(e.to_string()))
    }

    /// Resolve the agents directory (expand ~).
    pub fn agents_dir(&self) -> PathBuf {
        let dir = &self.engine.agents_dir;
        if let Some(rest) = dir.strip_prefix("~/") {
            if let Some(home) = dirs_home() {
                return home.join(rest);
            }
        }
        PathBuf::from(dir)
    }

    pub fn gateway_bind(&self) -> String {
        self.gateway
            .as_ref()
            .map(|g| g.bind.clone())
            .unwrap_or_else(default_bind)
    }

    /// Build the model config for a definition's `model` string.
    ///
    /// The provider is picked from the name. Names that match no known
    /// provider fall back to the default `[model]` section.
    pub fn model_for(&self, model: &str) -> ModelConfig {
        let model = model.trim();
        if model.is_empty() || model == self.model.model_id {
            return self.model.clone();
        }

        let Some(provider) = provider_for_model(model) else {
            warn!(model, fallback = %self.model.model_id, "Unknown model name, using default model");
            return self.model.clone();
        };

        let mut config = ModelConfig {
            provider: provider.to_string(),
            model_id: model.to_string(),
            max_tokens: self.model.max_tokens,
            temperature: self.model.temperature,
            retry: self.model.retry.clone(),
            ..ModelConfig::default()
        };

        if let Some(overrides) = self.providers.get(provider) {
            config.api_key = overrides.api_key.clone();
            config.base_url = overrides.base_url.clone();
        } else if self.model.provider == provider {
            config.api_key = self.model.api_key.clone();
            config.base_url = self.model.base_url.clone();
        }

        config
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_FLOWHOST_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_FLOWHOST_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_FLOWHOST_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_FLOWHOST_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_FLOWHOST_VAR}\"");
    }

    #[test]
    fn test_engine_defaults_from_empty_toml() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.engine.agents_dir, "agents");
        assert_eq!(config.engine.max_delegation_depth, 5);
        assert_eq!(config.engine.max_node_executions, 50);
        assert_eq!(config.engine.request_timeout_secs, 120);
        assert_eq!(config.engine.max_turns, 10);
        assert_eq!(config.engine.session_ttl_secs, 3600);
        assert_eq!(config.model.model_id, "gpt-4");
        assert_eq!(config.gateway_bind(), "127.0.0.1:8000");
        assert!(!config.log.json);
    }

    #[test]
    fn test_model_for_picks_provider_by_name() {
        let toml_str = r#"
[model]
provider = "openai"
model_id = "gpt-4o"
api_key = "sk-openai"

[providers.anthropic]
api_key = "sk-ant"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();

        let claude = config.model_for("claude-3-5-sonnet-20241022");
        assert_eq!(claude.provider, "anthropic");
        assert_eq!(claude.api_key.as_deref(), Some("sk-ant"));

        let gpt = config.model_for("gpt-4");
        assert_eq!(gpt.provider, "openai");
        assert_eq!(gpt.model_id, "gpt-4");
        assert_eq!(gpt.api_key.as_deref(), Some("sk-openai"));
    }

    #[test]
    fn test_model_for_unknown_name_falls_back() {
        let config = AppConfig::default();
        let m = config.model_for("llama-3-70b");
        assert_eq!(m.model_id, "gpt-4");
        assert_eq!(m.provider, "openai");
    }
}
