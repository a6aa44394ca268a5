//! MCP client error types.

use thiserror::Error;

/// Errors that can occur while discovering, connecting to, or calling MCP servers.
#[derive(Debug, Error)]
pub enum McpError {
    /// The requested server is not present (or is disabled) in the discovery file.
    #[error("MCP server '{name}' not found (available: {})", available.join(", "))]
    ServerNotFound {
        name: String,
        available: Vec<String>,
    },

    /// No discovery file exists at any of the searched locations.
    #[error("no MCP discovery file found (searched: {})", searched.join(", "))]
    DiscoveryFileMissing { searched: Vec<String> },

    /// Configuration error (unreadable or malformed discovery file).
    #[error("config error: {reason}")]
    ConfigError { reason: String },

    /// A server process failed to start.
    #[error("failed to spawn server '{name}': {reason}")]
    SpawnFailed { name: String, reason: String },

    /// The initialization handshake failed.
    #[error("server '{name}' initialization failed: {reason}")]
    InitFailed { name: String, reason: String },

    /// JSON-RPC communication error (malformed message, I/O error).
    #[error("transport error for server '{server}': {reason}")]
    TransportError { server: String, reason: String },

    /// Server returned a JSON-RPC error response.
    #[error("server error [{code}]: {message}")]
    ServerError {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// No attached session exposes this tool.
    #[error("unknown tool: '{name}'{}", format_suggestions(suggestions))]
    UnknownTool {
        name: String,
        suggestions: Vec<String>,
    },

    /// Tool call arguments could not be decoded or failed schema checks.
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// A tool call timed out.
    #[error("tool call '{tool}' timed out after {timeout_ms}ms")]
    Timeout { tool: String, timeout_ms: u64 },

    /// Server process exited or its pipes closed mid-call.
    #[error("server '{name}' crashed: {reason}")]
    ServerCrashed { name: String, reason: String },
}

fn format_suggestions(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!(" (did you mean: {}?)", suggestions.join(", "))
    }
}

impl McpError {
    /// Whether this error comes from configuration rather than a live session.
    ///
    /// Configuration errors fail the whole orchestration call; session errors
    /// during a tool call are fed back to the model instead.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            McpError::ServerNotFound { .. }
                | McpError::DiscoveryFileMissing { .. }
                | McpError::ConfigError { .. }
        )
    }
}
