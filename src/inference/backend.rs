//! Completion backend port.
//!
//! The orchestrator and model validator talk to the model server only
//! through [`CompletionBackend`]. [`InferenceClient`](super::InferenceClient)
//! is the HTTP implementation.

use async_trait::async_trait;

use super::errors::InferenceError;
use super::types::{
    ChatCompletionRequest, ChatCompletionResponse, ModelEntry, ResponsesRequest,
    ResponsesResponse,
};

/// An OpenAI-compatible model server.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// `POST /chat/completions` (stateless).
    async fn chat_completion(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, InferenceError>;

    /// `POST /responses` (stateful, keyed by `previous_response_id`).
    async fn create_response(
        &self,
        request: &ResponsesRequest,
    ) -> Result<ResponsesResponse, InferenceError>;

    /// `GET /models`.
    async fn list_models(&self) -> Result<Vec<ModelEntry>, InferenceError>;
}
