//! Application configuration loading and validation.
//!
//! Reads `config.yaml` and resolves environment variables. Location order:
//! `$MCP_AUTONOMY_SETTINGS`, then `<config_dir>/mcp-autonomy/config.yaml`,
//! then built-in defaults. A missing file is fine; a malformed one is an
//! error. `LLM_BASE_URL`, `LLM_MODEL` and `LLM_API_KEY` override the file.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::errors::InferenceError;
use super::retry::RetryPolicy;
use super::types::ProtocolVariant;

/// Env var naming an explicit settings file.
pub const SETTINGS_PATH_ENV: &str = "MCP_AUTONOMY_SETTINGS";

// ─── Public Types ────────────────────────────────────────────────────────────

/// Top-level configuration (mirrors `config.yaml`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub retry: RetryPolicy,
    pub orchestrator: OrchestratorSettings,
    /// How long a fetched model list stays fresh.
    pub model_cache_ttl_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            retry: RetryPolicy::default(),
            orchestrator: OrchestratorSettings::default(),
            model_cache_ttl_secs: 60,
        }
    }
}

/// The OpenAI-compatible model server.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL including the `/v1` prefix.
    pub base_url: String,
    pub api_key: Option<String>,
    /// Model used when a call names none; auto-selected when absent.
    pub default_model: Option<String>,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:1234/v1".into(),
            api_key: None,
            default_model: None,
            connect_timeout_secs: 5,
            request_timeout_secs: 180,
        }
    }
}

/// Round loop limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    pub max_rounds: u32,
    pub max_tokens: u32,
    pub protocol: ProtocolVariant,
    pub tool_call_timeout_ms: u64,
    pub round_timeout_secs: u64,
    pub max_tool_result_chars: usize,
    pub parallel_tool_calls: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_rounds: 10,
            max_tokens: 4096,
            protocol: ProtocolVariant::Stateless,
            tool_call_timeout_ms: 30_000,
            round_timeout_secs: 120,
            max_tool_result_chars: 8000,
            parallel_tool_calls: true,
        }
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load from the standard location and apply env overrides.
    pub fn load() -> Result<Self, InferenceError> {
        let mut config = match find_config_path() {
            Some(path) if path.exists() => load_app_config(&path)?,
            Some(path) => {
                tracing::debug!(path = %path.display(), "no settings file, using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `LLM_BASE_URL`, `LLM_MODEL` and `LLM_API_KEY`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty("LLM_BASE_URL") {
            self.backend.base_url = url;
        }
        if let Some(model) = non_empty("LLM_MODEL") {
            self.backend.default_model = Some(model);
        }
        if let Some(key) = non_empty("LLM_API_KEY") {
            self.backend.api_key = Some(key);
        }
    }

    pub fn validate(&self) -> Result<(), InferenceError> {
        if self.backend.base_url.trim().is_empty() {
            return Err(InferenceError::ConfigError {
                reason: "backend.base_url must not be empty".into(),
            });
        }
        if self.orchestrator.max_rounds == 0 {
            return Err(InferenceError::ConfigError {
                reason: "orchestrator.max_rounds must be at least 1".into(),
            });
        }
        if self.orchestrator.max_tokens == 0 {
            return Err(InferenceError::ConfigError {
                reason: "orchestrator.max_tokens must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// Where the settings file is expected.
///
/// `None` only when no config directory can be determined and the env var
/// is unset.
pub fn find_config_path() -> Option<PathBuf> {
    if let Ok(explicit) = std::env::var(SETTINGS_PATH_ENV) {
        if !explicit.is_empty() {
            return Some(PathBuf::from(expand_tilde(&explicit)));
        }
    }
    dirs::config_dir().map(|dir| dir.join("mcp-autonomy").join("config.yaml"))
}

/// Load and parse one settings file.
///
/// Performs environment-variable interpolation on string values matching
/// `${VAR_NAME}` or `${VAR_NAME:-default}`.
pub fn load_app_config(path: &Path) -> Result<AppConfig, InferenceError> {
    let raw = std::fs::read_to_string(path).map_err(|e| InferenceError::ConfigError {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;

    let interpolated = interpolate_env_vars(&raw);
    if interpolated.trim().is_empty() {
        return Ok(AppConfig::default());
    }

    let config: AppConfig =
        serde_yaml::from_str(&interpolated).map_err(|e| InferenceError::ConfigError {
            reason: format!("failed to parse {}: {e}", path.display()),
        })?;

    tracing::debug!(path = %path.display(), "loaded settings");
    Ok(config)
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve a variable expression like `VAR` or `VAR:-default`.
fn resolve_var_expr(expr: &str) -> String {
    if let Some((var_name, default)) = expr.split_once(":-") {
        std::env::var(var_name).unwrap_or_else(|_| expand_tilde(default))
    } else {
        std::env::var(expr).unwrap_or_default()
    }
}

/// Expand a leading `~` to the user's home directory.
pub(crate) fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
