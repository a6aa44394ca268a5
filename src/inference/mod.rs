//! Inference Client — OpenAI-compatible API client for local LLM inference.
//!
//! This module handles all communication with the model server:
//! - Stateless chat completions and stateful Responses calls
//! - MCP tool descriptor translation to backend function tools
//! - Model listing, validation and default selection with a TTL cache
//! - Retry with exponential backoff and the backend error taxonomy
//! - Settings loading from `config.yaml`
//!
//! Everything above the HTTP layer talks to [`CompletionBackend`], so the
//! round loop can be driven by a test double.

pub mod backend;
pub mod client;
pub mod config;
pub mod errors;
pub mod model_validator;
pub mod retry;
pub mod tool_schema;
pub mod types;

pub use backend::CompletionBackend;
pub use client::InferenceClient;
pub use config::AppConfig;
pub use errors::InferenceError;
pub use model_validator::ModelValidator;
pub use retry::{retry_with_backoff, RetryPolicy};
pub use tool_schema::{BackendTool, ToolChoice, ToolFormat};
pub use types::{CompletionTurn, ProtocolVariant, ToolCall};
