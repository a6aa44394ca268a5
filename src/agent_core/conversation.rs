//! ConversationState — per-call history for the two protocol variants.
//!
//! The round loop does not care how history reaches the backend:
//!
//! - **Stateless** keeps the full message list locally and resends it every
//!   round (`/chat/completions`).
//! - **Stateful** keeps only the continuation id of the last response plus
//!   the input for the next request (`/responses`). Tool results travel as
//!   `function_call_output` items keyed by the call id.
//!
//! Both variants must make every tool result of round N visible in the
//! request of round N+1.

use crate::inference::backend::CompletionBackend;
use crate::inference::errors::InferenceError;
use crate::inference::tool_schema::{render_tools, BackendTool, ToolChoice};
use crate::inference::types::{
    ChatCompletionRequest, ChatMessage, CompletionTurn, ProtocolVariant, ResponseInputItem,
    ResponsesInput, ResponsesRequest, Role, ToolCall,
};

use super::types::ToolResult;

/// Per-round request parameters that do not depend on history.
#[derive(Debug, Clone, Copy)]
pub struct TurnParams<'a> {
    pub model: &'a str,
    pub tools: &'a [BackendTool],
    pub tool_choice: &'a ToolChoice,
    pub max_tokens: u32,
}

/// History for one orchestration call.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationState {
    Stateless {
        messages: Vec<ChatMessage>,
    },
    Stateful {
        previous_response_id: Option<String>,
        next_input: ResponsesInput,
    },
}

impl ConversationState {
    /// Seed a conversation with the caller's task.
    pub fn new(protocol: ProtocolVariant, task: &str, system_prompt: Option<&str>) -> Self {
        match protocol {
            ProtocolVariant::Stateless => {
                let mut messages = Vec::with_capacity(2);
                if let Some(prompt) = system_prompt {
                    messages.push(ChatMessage::system(prompt));
                }
                messages.push(ChatMessage::user(task));
                ConversationState::Stateless { messages }
            }
            ProtocolVariant::Stateful => {
                let next_input = match system_prompt {
                    None => ResponsesInput::Text(task.to_string()),
                    Some(prompt) => ResponsesInput::Items(vec![
                        ResponseInputItem::Message {
                            role: Role::System,
                            content: prompt.to_string(),
                        },
                        ResponseInputItem::Message {
                            role: Role::User,
                            content: task.to_string(),
                        },
                    ]),
                };
                ConversationState::Stateful {
                    previous_response_id: None,
                    next_input,
                }
            }
        }
    }

    pub fn protocol(&self) -> ProtocolVariant {
        match self {
            ConversationState::Stateless { .. } => ProtocolVariant::Stateless,
            ConversationState::Stateful { .. } => ProtocolVariant::Stateful,
        }
    }

    /// Continuation id the next stateful request will carry.
    pub fn previous_response_id(&self) -> Option<&str> {
        match self {
            ConversationState::Stateful {
                previous_response_id,
                ..
            } => previous_response_id.as_deref(),
            ConversationState::Stateless { .. } => None,
        }
    }

    /// Issue one backend call for the current history.
    ///
    /// Does not mutate the state, so a failed call can be retried as-is.
    pub async fn request_turn(
        &self,
        backend: &dyn CompletionBackend,
        params: TurnParams<'_>,
    ) -> Result<CompletionTurn, InferenceError> {
        let format = self.protocol().tool_format();
        let (tools, tool_choice) = if params.tools.is_empty() {
            (None, None)
        } else {
            (
                Some(render_tools(params.tools, format)),
                Some(params.tool_choice.to_wire(format)),
            )
        };

        match self {
            ConversationState::Stateless { messages } => {
                let request = ChatCompletionRequest {
                    model: params.model.to_string(),
                    messages: messages.clone(),
                    tools,
                    tool_choice,
                    max_tokens: params.max_tokens,
                    stream: false,
                };
                backend.chat_completion(&request).await?.into_turn()
            }
            ConversationState::Stateful {
                previous_response_id,
                next_input,
            } => {
                let request = ResponsesRequest {
                    model: params.model.to_string(),
                    input: next_input.clone(),
                    tools,
                    tool_choice,
                    previous_response_id: previous_response_id.clone(),
                    max_output_tokens: params.max_tokens,
                };
                Ok(backend.create_response(&request).await?.into_turn())
            }
        }
    }

    /// Thread a round's tool results into the history for the next call.
    pub fn record_tool_round(
        &mut self,
        turn: &CompletionTurn,
        calls: &[ToolCall],
        results: &[ToolResult],
    ) {
        match self {
            ConversationState::Stateless { messages } => {
                messages.push(ChatMessage::assistant_tool_calls(calls));
                messages.extend(
                    results
                        .iter()
                        .map(|r| ChatMessage::tool_result(&r.call_id, &r.content)),
                );
            }
            ConversationState::Stateful {
                previous_response_id,
                next_input,
            } => {
                if turn.response_id.is_some() {
                    previous_response_id.clone_from(&turn.response_id);
                } else {
                    tracing::warn!("stateful response carried no id, continuation may lose context");
                }
                *next_input = ResponsesInput::Items(
                    results
                        .iter()
                        .map(|r| ResponseInputItem::FunctionCallOutput {
                            call_id: r.call_id.clone(),
                            output: r.content.clone(),
                        })
                        .collect(),
                );
            }
        }
    }

    /// Number of locally held messages (always 0 for stateful).
    pub fn message_count(&self) -> usize {
        match self {
            ConversationState::Stateless { messages } => messages.len(),
            ConversationState::Stateful { .. } => 0,
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
