//! Agent Core — the autonomous tool loop.
//!
//! Submodules:
//! - `tool_executor`: Dispatches model tool calls to MCP-backed and local tools
//! - `conversation`: Per-call history for the stateless and stateful protocols
//! - `orchestrator`: Round loop, server attachment, model resolution
//! - `types`: Requests, tool results, transcript and outcome
//! - `errors`: Agent-level error types

pub mod conversation;
pub mod errors;
pub mod orchestrator;
pub mod tool_executor;
pub mod types;

// Re-exports for convenience
pub use conversation::ConversationState;
pub use errors::AgentError;
pub use orchestrator::Orchestrator;
pub use tool_executor::{FnTool, McpTool, ToolExecutor, ToolInvoker, ToolOutput};
pub use types::{
    ExecutionRound, OrchestrationOutcome, OrchestrationRequest, ProtocolVariant, ToolResult,
};
