//! Shared types for the agent core.
//!
//! The orchestration request, per-round transcript entries, tool results
//! and the outcome returned to the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::inference::config::OrchestratorSettings;
use crate::inference::tool_schema::ToolChoice;
use crate::inference::types::ToolCall;

pub use crate::inference::types::ProtocolVariant;

// ─── Tool Results ───────────────────────────────────────────────────────────

/// Outcome of one tool call, threaded back to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Id of the [`ToolCall`] this answers.
    pub call_id: String,
    /// Tool name as the model emitted it.
    pub tool_name: String,
    /// Plain-text content the model will read.
    pub content: String,
    /// Set for dispatch failures and MCP `isError` results.
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(call: &ToolCall, content: impl Into<String>) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            content: content.into(),
            is_error: false,
        }
    }

    /// An error description the model can read and react to.
    pub fn error(call: &ToolCall, message: impl std::fmt::Display) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            content: format!("Error: {message}"),
            is_error: true,
        }
    }
}

// ─── Transcript ─────────────────────────────────────────────────────────────

/// One request/response cycle of the round loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRound {
    /// 1-based.
    pub round_number: u32,
    pub tool_calls: Vec<ToolCall>,
    /// Same order as `tool_calls`.
    pub results: Vec<ToolResult>,
    /// Text the model emitted alongside its tool calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub narration: Option<String>,
    /// No further rounds follow this one.
    pub terminal: bool,
}

// ─── Request ────────────────────────────────────────────────────────────────

/// Everything one orchestration call needs.
#[derive(Debug, Clone)]
pub struct OrchestrationRequest {
    pub task: String,
    /// MCP servers to attach, by discovery-file name.
    pub servers: Vec<String>,
    /// `None` or `"default"` resolve through the model validator.
    pub model: Option<String>,
    pub max_rounds: u32,
    pub max_tokens: u32,
    pub protocol: ProtocolVariant,
    pub tool_choice: ToolChoice,
    pub system_prompt: Option<String>,
}

impl OrchestrationRequest {
    /// A request using the configured limits.
    pub fn new(
        task: impl Into<String>,
        servers: Vec<String>,
        settings: &OrchestratorSettings,
    ) -> Self {
        Self {
            task: task.into(),
            servers,
            model: None,
            max_rounds: settings.max_rounds,
            max_tokens: settings.max_tokens,
            protocol: settings.protocol,
            tool_choice: ToolChoice::Auto,
            system_prompt: None,
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_protocol(mut self, protocol: ProtocolVariant) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.tool_choice = tool_choice;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

// ─── Outcome ────────────────────────────────────────────────────────────────

/// What an orchestration call produced.
///
/// `incomplete` distinguishes "the model finished" from "the loop gave up";
/// `rounds_used` is always set.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestrationOutcome {
    pub incomplete: bool,
    /// Final answer, or the last narration when incomplete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub rounds_used: u32,
    pub model: String,
    pub protocol: ProtocolVariant,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub transcript: Vec<ExecutionRound>,
}

impl OrchestrationOutcome {
    pub fn is_complete(&self) -> bool {
        !self.incomplete
    }

    /// The answer when the model finished.
    pub fn final_answer(&self) -> Option<&str> {
        if self.incomplete {
            None
        } else {
            self.answer.as_deref()
        }
    }

    /// One line for the caller: the answer, or a tagged incomplete notice.
    pub fn summary(&self) -> String {
        if self.incomplete {
            format!(
                "[incomplete after {} round{}] {}",
                self.rounds_used,
                if self.rounds_used == 1 { "" } else { "s" },
                self.reason.as_deref().unwrap_or("no final answer")
            )
        } else {
            self.answer.clone().unwrap_or_default()
        }
    }

    /// Every tool result across all rounds, in order.
    pub fn tool_results(&self) -> impl Iterator<Item = &ToolResult> {
        self.transcript.iter().flat_map(|r| r.results.iter())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
