//! Shared types for the inference client.
//!
//! Two request/response families are modelled: the stateless Chat
//! Completions API (`POST /chat/completions`) and the stateful Responses API
//! (`POST /responses`, threaded by `previous_response_id`). Both are reduced
//! to a [`CompletionTurn`] for the orchestrator.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::InferenceError;
use super::tool_schema::ToolFormat;

/// Which completion endpoint drives the round loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVariant {
    /// `/chat/completions`; the full message list is resent every round.
    #[default]
    Stateless,
    /// `/responses`; history lives server-side behind `previous_response_id`.
    Stateful,
}

impl ProtocolVariant {
    pub fn tool_format(self) -> ToolFormat {
        match self {
            ProtocolVariant::Stateless => ToolFormat::Chat,
            ProtocolVariant::Stateful => ToolFormat::Responses,
        }
    }
}

impl std::fmt::Display for ProtocolVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolVariant::Stateless => f.write_str("stateless"),
            ProtocolVariant::Stateful => f.write_str("stateful"),
        }
    }
}

// ─── Chat Completions: Request ───────────────────────────────────────────────

/// A single message in the conversation.
///
/// Serialization notes for OpenAI-compatible local models:
/// - `content` must be `""` (not `null`) for assistant messages with tool calls.
///   Many local runtimes misinterpret `null` content and fail to recognize the
///   tool call round-trip pattern.
/// - `tool_call_id` and `tool_calls` are skipped when `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(serialize_with = "serialize_content", default)]
    pub content: Option<String>,
    /// Tool call results are sent back as `tool` role messages.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tool_call_id: Option<String>,
    /// Assistant messages may contain tool calls.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tool_calls: Option<Vec<ToolCallResponse>>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    /// The assistant turn that requested `calls`, echoed back verbatim.
    ///
    /// Narration text is dropped; only the tool calls drive continuation.
    pub fn assistant_tool_calls(calls: &[ToolCall]) -> Self {
        Self {
            role: Role::Assistant,
            content: None,
            tool_call_id: None,
            tool_calls: Some(calls.iter().map(ToolCallResponse::from).collect()),
        }
    }

    /// A `tool` role message carrying one tool result.
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_call_id: Some(call_id.into()),
            tool_calls: None,
        }
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_call_id: None,
            tool_calls: None,
        }
    }
}

/// Emit `""` instead of `null` when `content` is `None`.
fn serialize_content<S>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match value {
        Some(s) => serializer.serialize_str(s),
        None => serializer.serialize_str(""),
    }
}

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Request body for `POST /chat/completions`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// Tools in the nested `{type, function: {...}}` form.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<serde_json::Value>,
    pub max_tokens: u32,
    pub stream: bool,
}

// ─── Chat Completions: Response ──────────────────────────────────────────────

/// Tool call as returned in the OpenAI response format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default = "function_type")]
    pub r#type: String,
    pub function: FunctionCallResponse,
}

fn function_type() -> String {
    "function".to_string()
}

/// Function call details in a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallResponse {
    pub name: String,
    /// JSON-encoded argument object. Some runtimes send an object instead of
    /// a string; both are accepted.
    #[serde(deserialize_with = "deserialize_arguments", default)]
    pub arguments: String,
}

fn deserialize_arguments<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

impl From<&ToolCall> for ToolCallResponse {
    fn from(call: &ToolCall) -> Self {
        Self {
            id: call.id.clone(),
            r#type: function_type(),
            function: FunctionCallResponse {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            },
        }
    }
}

/// Response body for `POST /chat/completions`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    pub message: ChatResponseMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallResponse>>,
}

impl ChatCompletionResponse {
    /// Reduce the first choice to a [`CompletionTurn`].
    pub fn into_turn(self) -> Result<CompletionTurn, InferenceError> {
        let choice =
            self.choices
                .into_iter()
                .next()
                .ok_or_else(|| InferenceError::MalformedResponse {
                    reason: "chat completion response has no choices".into(),
                })?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCall::new(tc.id, tc.function.name, tc.function.arguments))
            .collect();

        Ok(CompletionTurn {
            response_id: self.id,
            content: choice.message.content.filter(|c| !c.is_empty()),
            tool_calls,
        })
    }
}

// ─── Responses API ───────────────────────────────────────────────────────────

/// `input` of a Responses request: the seed task, or follow-up items.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponsesInput {
    Text(String),
    Items(Vec<ResponseInputItem>),
}

/// One follow-up input item.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseInputItem {
    /// Result of a `function_call` from the previous response.
    FunctionCallOutput { call_id: String, output: String },
    Message { role: Role, content: String },
}

/// Request body for `POST /responses`.
#[derive(Debug, Clone, Serialize)]
pub struct ResponsesRequest {
    pub model: String,
    pub input: ResponsesInput,
    /// Tools in the flattened `{type, name, description, parameters}` form.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
    pub max_output_tokens: u32,
}

/// Response body for `POST /responses`.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponsesResponse {
    pub id: String,
    #[serde(default)]
    pub output: Vec<ResponseOutputItem>,
}

/// One item of a Responses `output` array.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseOutputItem {
    Message {
        #[serde(default)]
        content: Vec<OutputContent>,
    },
    FunctionCall {
        call_id: String,
        name: String,
        #[serde(deserialize_with = "deserialize_arguments", default)]
        arguments: String,
    },
    /// Reasoning traces and anything newer.
    #[serde(other)]
    Other,
}

/// A content part of an output message (`output_text` and friends).
#[derive(Debug, Clone, Deserialize)]
pub struct OutputContent {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

impl ResponsesResponse {
    /// Reduce the output items to a [`CompletionTurn`].
    pub fn into_turn(self) -> CompletionTurn {
        let mut texts = Vec::new();
        let mut tool_calls = Vec::new();

        for item in self.output {
            match item {
                ResponseOutputItem::Message { content } => {
                    texts.extend(content.into_iter().filter_map(|part| part.text));
                }
                ResponseOutputItem::FunctionCall {
                    call_id,
                    name,
                    arguments,
                } => tool_calls.push(ToolCall::new(call_id, name, arguments)),
                ResponseOutputItem::Other => {}
            }
        }

        let content = texts.join("");
        CompletionTurn {
            response_id: Some(self.id),
            content: (!content.is_empty()).then_some(content),
            tool_calls,
        }
    }
}

// ─── Normalized Turn ─────────────────────────────────────────────────────────

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Opaque call id; generated when the backend omits it.
    pub id: String,
    /// Tool name exactly as the model emitted it.
    pub name: String,
    /// JSON-encoded argument string, decoded before dispatch.
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            id: if id.is_empty() {
                format!("call_{}", Uuid::new_v4().simple())
            } else {
                id
            },
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// One backend reply, independent of the protocol variant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionTurn {
    /// Continuation id (Responses API) or completion id.
    pub response_id: Option<String>,
    /// Text content; final answer when `tool_calls` is empty, else narration.
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

// ─── Models ──────────────────────────────────────────────────────────────────

/// Response body for `GET /models`.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelList {
    #[serde(default)]
    pub data: Vec<ModelEntry>,
}

/// One model advertised by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl ModelEntry {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            object: None,
            kind: None,
        }
    }

    /// Embedding-only models cannot drive the tool loop.
    pub fn is_embedding(&self) -> bool {
        let says_embeddings = |field: &Option<String>| {
            field
                .as_deref()
                .is_some_and(|v| v.to_ascii_lowercase().contains("embedding"))
        };
        self.id.to_ascii_lowercase().contains("embed")
            || says_embeddings(&self.kind)
            || says_embeddings(&self.object)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_assistant_tool_call_content_is_empty_string() {
        let msg = ChatMessage::assistant_tool_calls(&[ToolCall::new(
            "call_1",
            "list_directory",
            r#"{"path":"/tmp"}"#,
        )]);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["content"], "");
        assert_eq!(json["tool_calls"][0]["type"], "function");
        assert_eq!(json["tool_calls"][0]["function"]["arguments"], r#"{"path":"/tmp"}"#);
        assert!(json.get("tool_call_id").is_none());
    }

    #[test]
    fn test_tool_result_message() {
        let json = serde_json::to_value(ChatMessage::tool_result("call_1", "a.txt")).unwrap();
        assert_eq!(json["role"], "tool");
        assert_eq!(json["tool_call_id"], "call_1");
        assert_eq!(json["content"], "a.txt");
    }

    #[test]
    fn test_chat_response_into_turn_with_tool_calls() {
        let resp: ChatCompletionResponse = serde_json::from_value(json!({
            "id": "chatcmpl-1",
            "choices": [{
                "message": {
                    "content": "Let me look.",
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {"name": "list_directory", "arguments": "{\"path\": \"/tmp\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }))
        .unwrap();

        let turn = resp.into_turn().unwrap();
        assert_eq!(turn.content.as_deref(), Some("Let me look."));
        assert_eq!(turn.tool_calls.len(), 1);
        assert_eq!(turn.tool_calls[0].id, "call_abc");
        assert_eq!(turn.tool_calls[0].arguments, "{\"path\": \"/tmp\"}");
    }

    #[test]
    fn test_chat_response_object_arguments_and_missing_id() {
        let resp: ChatCompletionResponse = serde_json::from_value(json!({
            "choices": [{"message": {"content": null, "tool_calls": [
                {"function": {"name": "read_file", "arguments": {"path": "/etc/hosts"}}}
            ]}}]
        }))
        .unwrap();

        let turn = resp.into_turn().unwrap();
        let call = &turn.tool_calls[0];
        assert!(call.id.starts_with("call_"));
        let parsed: serde_json::Value = serde_json::from_str(&call.arguments).unwrap();
        assert_eq!(parsed["path"], "/etc/hosts");
        assert!(turn.content.is_none());
    }

    #[test]
    fn test_chat_response_without_choices_is_malformed() {
        let resp: ChatCompletionResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(matches!(
            resp.into_turn(),
            Err(InferenceError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn test_responses_output_items() {
        let resp: ResponsesResponse = serde_json::from_value(json!({
            "id": "resp_1",
            "output": [
                {"type": "reasoning", "summary": []},
                {"type": "function_call", "id": "fc_1", "call_id": "call_1",
                 "name": "list_directory", "arguments": "{\"path\":\"/tmp\"}"},
                {"type": "message", "role": "assistant",
                 "content": [{"type": "output_text", "text": "Checking"}]}
            ]
        }))
        .unwrap();

        let turn = resp.into_turn();
        assert_eq!(turn.response_id.as_deref(), Some("resp_1"));
        assert_eq!(turn.content.as_deref(), Some("Checking"));
        assert_eq!(turn.tool_calls[0].id, "call_1");
        assert_eq!(turn.tool_calls[0].name, "list_directory");
    }

    #[test]
    fn test_responses_input_serialization() {
        let text = serde_json::to_value(ResponsesInput::Text("hi".into())).unwrap();
        assert_eq!(text, json!("hi"));

        let items = serde_json::to_value(ResponsesInput::Items(vec![
            ResponseInputItem::FunctionCallOutput {
                call_id: "call_1".into(),
                output: "a.txt\nb.txt".into(),
            },
        ]))
        .unwrap();
        assert_eq!(
            items,
            json!([{"type": "function_call_output", "call_id": "call_1", "output": "a.txt\nb.txt"}])
        );
    }

    #[test]
    fn test_responses_request_omits_absent_continuation() {
        let req = ResponsesRequest {
            model: "qwen3-8b".into(),
            input: ResponsesInput::Text("task".into()),
            tools: None,
            tool_choice: None,
            previous_response_id: None,
            max_output_tokens: 512,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("previous_response_id").is_none());
        assert!(json.get("tools").is_none());
    }

    #[test]
    fn test_embedding_classification() {
        assert!(ModelEntry::new("text-embedding-nomic-embed-text-v1.5").is_embedding());
        assert!(!ModelEntry::new("qwen3-8b").is_embedding());

        let typed: ModelEntry =
            serde_json::from_value(json!({"id": "bge-m3", "type": "embeddings"})).unwrap();
        assert!(typed.is_embedding());

        let llm: ModelEntry =
            serde_json::from_value(json!({"id": "llama-3.2-3b", "object": "model", "type": "llm"}))
                .unwrap();
        assert!(!llm.is_embedding());
    }
}
