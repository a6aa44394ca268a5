//! Translation between MCP tool descriptors and backend function tools.
//!
//! Pure functions, no I/O. The backend form is `{name, description,
//! parameters}`; how it is wrapped on the wire depends on the endpoint:
//!
//! - Chat Completions: `{"type": "function", "function": {name, description, parameters}}`
//! - Responses: `{"type": "function", name, description, parameters}` (flattened)
//!
//! Sending the nested form to `/responses` is rejected by at least one real
//! backend, so the wire shape is chosen per [`ToolFormat`] and never mixed.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::mcp_client::types::{empty_object_schema, McpToolDefinition};

/// Backend function-calling descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendTool {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Wire shape expected by the target endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolFormat {
    /// Nested under `function`, for `/chat/completions`.
    Chat,
    /// Flattened, for `/responses`.
    Responses,
}

/// MCP descriptor → backend descriptor.
///
/// The schema is carried through untouched.
pub fn to_backend_format(tool: &McpToolDefinition) -> BackendTool {
    BackendTool {
        name: tool.name.clone(),
        description: tool.description.clone(),
        parameters: tool.input_schema.clone(),
    }
}

/// Backend descriptor → MCP descriptor.
pub fn from_backend_format(tool: &BackendTool) -> McpToolDefinition {
    McpToolDefinition {
        name: tool.name.clone(),
        description: tool.description.clone(),
        input_schema: tool.parameters.clone(),
    }
}

impl BackendTool {
    /// Render in the wire shape for `format`.
    pub fn to_wire(&self, format: ToolFormat) -> Value {
        match format {
            ToolFormat::Chat => json!({
                "type": "function",
                "function": {
                    "name": self.name,
                    "description": self.description,
                    "parameters": self.parameters,
                }
            }),
            ToolFormat::Responses => json!({
                "type": "function",
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }),
        }
    }

    /// Parse either wire shape back into a descriptor.
    pub fn from_wire(value: &Value) -> Option<Self> {
        let body = value.get("function").unwrap_or(value);
        Some(Self {
            name: body.get("name")?.as_str()?.to_string(),
            description: body
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            parameters: body
                .get("parameters")
                .cloned()
                .unwrap_or_else(empty_object_schema),
        })
    }
}

/// Render a tool list for one endpoint.
pub fn render_tools(tools: &[BackendTool], format: ToolFormat) -> Vec<Value> {
    tools.iter().map(|t| t.to_wire(format)).collect()
}

// ─── Tool Choice ─────────────────────────────────────────────────────────────

/// How the model may pick tools.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ToolChoice {
    #[default]
    Auto,
    /// The model must call at least one tool.
    Required,
    /// The model must call this function.
    Named(String),
}

impl ToolChoice {
    pub fn to_wire(&self, format: ToolFormat) -> Value {
        match (self, format) {
            (ToolChoice::Auto, _) => json!("auto"),
            (ToolChoice::Required, _) => json!("required"),
            (ToolChoice::Named(name), ToolFormat::Chat) => {
                json!({"type": "function", "function": {"name": name}})
            }
            (ToolChoice::Named(name), ToolFormat::Responses) => {
                json!({"type": "function", "name": name})
            }
        }
    }
}

impl FromStr for ToolChoice {
    type Err = String;

    /// `auto`, `required`, or any other string as a function name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" => Err("tool choice must not be empty".to_string()),
            "auto" => Ok(ToolChoice::Auto),
            "required" => Ok(ToolChoice::Required),
            name => Ok(ToolChoice::Named(name.to_string())),
        }
    }
}

impl fmt::Display for ToolChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolChoice::Auto => f.write_str("auto"),
            ToolChoice::Required => f.write_str("required"),
            ToolChoice::Named(name) => f.write_str(name),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
