//! MCP Client — JSON-RPC over stdio transport for MCP servers.
//!
//! This module handles:
//! - Locating servers through the hot-reloaded discovery file
//! - Spawning server processes and the `initialize` handshake
//! - Newline-delimited JSON-RPC 2.0 over process stdio
//! - Paginated `tools/list` and `tools/call`
//!
//! Sessions are opened per orchestration call by the agent core and closed
//! when the call returns.

pub mod discovery;
pub mod errors;
pub mod session;
pub mod transport;
pub mod types;

pub use discovery::McpDiscovery;
pub use errors::McpError;
pub use session::McpSession;
pub use types::{CallToolResult, ContentBlock, McpToolDefinition, ServerDescriptor};
