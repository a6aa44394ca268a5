//! Shared types for the MCP client.
//!
//! JSON-RPC 2.0 message types, the discovery-file schema, and the MCP
//! protocol structures exchanged during `initialize`, `tools/list` and
//! `tools/call`.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 notification (no `id`, no response expected).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    pub fn new(method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.to_string(),
            params,
        }
    }
}

/// Any JSON-RPC message read from a server's stdout.
///
/// Responses carry an `id` and a `result` or `error`. Server-initiated
/// notifications carry a `method` and no `id`; those are skipped by the
/// transport.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

// ─── Discovery File ─────────────────────────────────────────────────────────

/// One entry of the `mcpServers` map in the discovery file.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryEntry {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Optional working directory for the server process.
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub disabled: bool,
}

/// Top-level discovery file: `{ "mcpServers": { "<name>": { ... } } }`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscoveryFile {
    #[serde(rename = "mcpServers", default)]
    pub mcp_servers: BTreeMap<String, DiscoveryEntry>,
}

/// Connection parameters for one named MCP server.
///
/// Built fresh from the discovery file on every lookup; there is no identity
/// across reloads beyond the name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDescriptor {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<String>,
}

impl ServerDescriptor {
    pub fn from_entry(name: &str, entry: &DiscoveryEntry) -> Self {
        Self {
            name: name.to_string(),
            command: entry.command.clone(),
            args: entry.args.clone(),
            env: entry.env.clone(),
            cwd: entry.cwd.clone(),
        }
    }
}

// ─── MCP Protocol Types ──────────────────────────────────────────────────────

/// MCP tool descriptor as returned by `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default = "empty_object_schema")]
    pub input_schema: serde_json::Value,
}

/// Schema used when a server omits `inputSchema` entirely.
pub fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// `initialize` response payload.
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion", default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: serde_json::Value,
    #[serde(rename = "serverInfo", default)]
    pub server_info: Option<ServerInfo>,
}

/// Server info returned in the initialize response.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: Option<String>,
    pub version: Option<String>,
}

/// `tools/list` response payload (one page).
#[derive(Debug, Clone, Deserialize)]
pub struct ListToolsResult {
    #[serde(default)]
    pub tools: Vec<McpToolDefinition>,
    #[serde(rename = "nextCursor", default)]
    pub next_cursor: Option<String>,
}

/// `tools/call` response payload.
#[derive(Debug, Clone, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(rename = "structuredContent", default)]
    pub structured_content: Option<serde_json::Value>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

/// A single content block inside a `tools/call` result.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        #[serde(rename = "mimeType", default)]
        mime_type: Option<String>,
    },
    Audio {
        #[serde(rename = "mimeType", default)]
        mime_type: Option<String>,
    },
    Resource {
        resource: EmbeddedResource,
    },
    ResourceLink {
        uri: String,
        #[serde(default)]
        name: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

/// Resource embedded in a content block.
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddedResource {
    pub uri: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(rename = "mimeType", default)]
    pub mime_type: Option<String>,
}

// ─── Standard MCP Error Codes ────────────────────────────────────────────────

/// Well-known JSON-RPC error codes.
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_rpc_request_omits_missing_params() {
        let req = JsonRpcRequest::new(1, "tools/list", None);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"id\":1"));
        assert!(!json.contains("params"));
    }

    #[test]
    fn test_notification_has_no_id() {
        let note = JsonRpcNotification::new("notifications/initialized", None);
        let json = serde_json::to_value(&note).unwrap();
        assert!(json.get("id").is_none());
        assert_eq!(json["method"], "notifications/initialized");
    }

    #[test]
    fn test_server_notification_parses_without_id() {
        let json = r#"{"jsonrpc":"2.0","method":"notifications/message","params":{"level":"info"}}"#;
        let msg: JsonRpcResponse = serde_json::from_str(json).unwrap();
        assert!(msg.id.is_none());
        assert_eq!(msg.method.as_deref(), Some("notifications/message"));
    }

    #[test]
    fn test_json_rpc_error_response() {
        let json = r#"{"jsonrpc":"2.0","id":2,"error":{"code":-32601,"message":"Method not found"}}"#;
        let resp: JsonRpcResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.id, Some(2));
        assert_eq!(resp.error.unwrap().code, error_codes::METHOD_NOT_FOUND);
    }

    #[test]
    fn test_discovery_file_parses_disabled_and_defaults() {
        let json = r#"{
            "mcpServers": {
                "filesystem": {"command": "npx", "args": ["-y", "@modelcontextprotocol/server-filesystem", "/tmp"]},
                "memory": {"command": "npx", "disabled": true}
            }
        }"#;
        let file: DiscoveryFile = serde_json::from_str(json).unwrap();
        assert_eq!(file.mcp_servers.len(), 2);
        assert!(!file.mcp_servers["filesystem"].disabled);
        assert!(file.mcp_servers["memory"].disabled);
        assert!(file.mcp_servers["memory"].args.is_empty());
        assert!(file.mcp_servers["memory"].env.is_empty());
    }

    #[test]
    fn test_tool_definition_missing_schema_defaults_to_object() {
        let json = r#"{"name": "ping"}"#;
        let tool: McpToolDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(tool.description, "");
        assert_eq!(tool.input_schema["type"], "object");
    }

    #[test]
    fn test_call_tool_result_content_blocks() {
        let json = r#"{
            "content": [
                {"type": "text", "text": "hello"},
                {"type": "image", "data": "AAAA", "mimeType": "image/png"},
                {"type": "resource", "resource": {"uri": "file:///a.txt", "text": "body"}},
                {"type": "something_new", "x": 1}
            ],
            "isError": false
        }"#;
        let result: CallToolResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.content.len(), 4);
        assert!(matches!(result.content[0], ContentBlock::Text { .. }));
        assert!(matches!(result.content[3], ContentBlock::Unknown));
        assert!(!result.is_error);
    }
}
