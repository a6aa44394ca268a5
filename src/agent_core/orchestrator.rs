//! Autonomous orchestrator — the model-driven tool loop.
//!
//! One call runs:
//!
//! 1. Look up every requested server in the discovery file (read fresh).
//!    Unknown or disabled names fail here, before anything is spawned.
//! 2. Spawn and initialize one MCP session per server and list its tools.
//! 3. Resolve the model once through the [`ModelValidator`].
//! 4. Loop: send history plus tools, execute any tool calls, thread every
//!    result into the next request. A reply with no tool calls is the
//!    answer. Reaching `max_rounds` with calls still pending yields an
//!    incomplete outcome, never an error.
//! 5. Shut every session down.
//!
//! Each backend call is bounded by the round timeout and retried per the
//! [`RetryPolicy`]. Tool failures never abort the loop; the model reads
//! them as error results.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::inference::backend::CompletionBackend;
use crate::inference::config::{AppConfig, OrchestratorSettings};
use crate::inference::errors::InferenceError;
use crate::inference::model_validator::ModelValidator;
use crate::inference::retry::{retry_with_backoff, RetryPolicy};
use crate::inference::tool_schema::ToolChoice;
use crate::inference::types::CompletionTurn;
use crate::inference::InferenceClient;
use crate::mcp_client::discovery::McpDiscovery;
use crate::mcp_client::session::McpSession;
use crate::mcp_client::types::ServerDescriptor;

use super::conversation::{ConversationState, TurnParams};
use super::errors::AgentError;
use super::tool_executor::{McpTool, ToolExecutor};
use super::types::{ExecutionRound, OrchestrationOutcome, OrchestrationRequest};

/// Drives orchestration calls. Cheap to share; holds no per-call state.
pub struct Orchestrator {
    backend: Arc<dyn CompletionBackend>,
    validator: Arc<ModelValidator>,
    discovery: McpDiscovery,
    settings: OrchestratorSettings,
    retry: RetryPolicy,
    round_timeout: Duration,
    default_model: Option<String>,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        discovery: McpDiscovery,
        config: &AppConfig,
    ) -> Self {
        let validator = Arc::new(ModelValidator::new(
            backend.clone(),
            Duration::from_secs(config.model_cache_ttl_secs),
        ));
        Self {
            backend,
            validator,
            discovery,
            settings: config.orchestrator.clone(),
            retry: config.retry,
            round_timeout: Duration::from_secs(config.orchestrator.round_timeout_secs),
            default_model: config.backend.default_model.clone(),
        }
    }

    /// HTTP backend and standard discovery search order.
    pub fn from_config(config: &AppConfig) -> Result<Self, AgentError> {
        let client = InferenceClient::from_config(&config.backend)?;
        Ok(Self::new(
            Arc::new(client),
            McpDiscovery::from_env(),
            config,
        ))
    }

    /// Share a validator (and its cache) with other orchestrators.
    pub fn with_validator(mut self, validator: Arc<ModelValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_round_timeout(mut self, timeout: Duration) -> Self {
        self.round_timeout = timeout;
        self
    }

    pub fn validator(&self) -> &Arc<ModelValidator> {
        &self.validator
    }

    pub fn discovery(&self) -> &McpDiscovery {
        &self.discovery
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// A request pre-filled with the configured limits.
    pub fn request(&self, task: impl Into<String>, servers: Vec<String>) -> OrchestrationRequest {
        OrchestrationRequest::new(task, servers, &self.settings)
    }

    /// Run one orchestration call end to end.
    pub async fn run(
        &self,
        request: OrchestrationRequest,
    ) -> Result<OrchestrationOutcome, AgentError> {
        validate_request(&request)?;

        let descriptors = self.lookup_servers(&request.servers)?;
        let model = self
            .validator
            .resolve(request.model.as_deref(), self.default_model.as_deref())
            .await?;

        let sessions = self.connect(&descriptors).await?;
        let outcome = match self.build_executor(&sessions).await {
            Ok(executor) => self.run_loop(&executor, &request, model).await,
            Err(e) => Err(e),
        };

        futures::future::join_all(sessions.iter().map(|s| s.shutdown())).await;
        outcome
    }

    /// Run the loop against an already-built executor.
    ///
    /// The model is resolved the same way as in [`run`](Self::run).
    pub async fn run_with_executor(
        &self,
        executor: &ToolExecutor,
        request: OrchestrationRequest,
    ) -> Result<OrchestrationOutcome, AgentError> {
        validate_request(&request)?;
        let model = self
            .validator
            .resolve(request.model.as_deref(), self.default_model.as_deref())
            .await?;
        self.run_loop(executor, &request, model).await
    }

    // ─── Setup ──────────────────────────────────────────────────────────────

    fn lookup_servers(&self, names: &[String]) -> Result<Vec<ServerDescriptor>, AgentError> {
        let mut seen = std::collections::HashSet::new();
        names
            .iter()
            .filter(|name| seen.insert(name.as_str()))
            .map(|name| {
                self.discovery
                    .get_connection_params(name)
                    .map_err(AgentError::from)
            })
            .collect()
    }

    async fn connect(
        &self,
        descriptors: &[ServerDescriptor],
    ) -> Result<Vec<Arc<McpSession>>, AgentError> {
        let call_timeout = Duration::from_millis(self.settings.tool_call_timeout_ms);
        let mut sessions = Vec::with_capacity(descriptors.len());

        for descriptor in descriptors {
            match McpSession::spawn(descriptor, call_timeout).await {
                Ok(session) => sessions.push(Arc::new(session)),
                Err(e) => {
                    tracing::error!(server = %descriptor.name, error = %e, "MCP server failed to start");
                    futures::future::join_all(sessions.iter().map(|s| s.shutdown())).await;
                    return Err(e.into());
                }
            }
        }
        Ok(sessions)
    }

    async fn build_executor(&self, sessions: &[Arc<McpSession>]) -> Result<ToolExecutor, AgentError> {
        let mut builder = ToolExecutor::builder()
            .max_result_chars(self.settings.max_tool_result_chars)
            .parallel(self.settings.parallel_tool_calls);

        for session in sessions {
            let tools = McpTool::list(session).await?;
            tracing::info!(server = %session.name(), tools = tools.len(), "tools listed");
            builder = builder.server(session.name(), tools);
        }
        Ok(builder.build())
    }

    // ─── Round Loop ─────────────────────────────────────────────────────────

    async fn run_loop(
        &self,
        executor: &ToolExecutor,
        request: &OrchestrationRequest,
        model: String,
    ) -> Result<OrchestrationOutcome, AgentError> {
        let tools = executor.backend_tools();
        let mut state = ConversationState::new(
            request.protocol,
            &request.task,
            request.system_prompt.as_deref(),
        );
        let mut transcript: Vec<ExecutionRound> = Vec::new();
        let mut last_narration: Option<String> = None;
        let started = Instant::now();
        let started_at = chrono::Utc::now();

        tracing::info!(
            model = %model,
            protocol = %request.protocol,
            tools = tools.len(),
            max_rounds = request.max_rounds,
            "orchestration started"
        );

        for round in 1..=request.max_rounds {
            // Forced choices apply to round 1 only.
            let tool_choice = if round == 1 {
                request.tool_choice.clone()
            } else {
                ToolChoice::Auto
            };
            let params = TurnParams {
                model: &model,
                tools: &tools,
                tool_choice: &tool_choice,
                max_tokens: request.max_tokens,
            };

            let turn = self.call_backend(&state, params, round).await?;

            if turn.tool_calls.is_empty() {
                let answer = turn.content.unwrap_or_default();
                transcript.push(ExecutionRound {
                    round_number: round,
                    tool_calls: vec![],
                    results: vec![],
                    narration: None,
                    terminal: true,
                });
                tracing::info!(
                    rounds = round,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "orchestration complete"
                );
                return Ok(OrchestrationOutcome {
                    incomplete: false,
                    answer: Some(answer),
                    reason: None,
                    rounds_used: round,
                    model,
                    protocol: request.protocol,
                    started_at,
                    duration_ms: started.elapsed().as_millis() as u64,
                    transcript,
                });
            }

            if turn.content.is_some() {
                last_narration.clone_from(&turn.content);
            }

            if round == request.max_rounds {
                tracing::warn!(
                    rounds = round,
                    pending_calls = turn.tool_calls.len(),
                    "round limit reached with tool calls pending"
                );
                let pending = turn.tool_calls.len();
                transcript.push(ExecutionRound {
                    round_number: round,
                    tool_calls: turn.tool_calls,
                    results: vec![],
                    narration: turn.content,
                    terminal: true,
                });
                return Ok(OrchestrationOutcome {
                    incomplete: true,
                    answer: last_narration,
                    reason: Some(format!(
                        "round limit of {} reached with {pending} tool call{} still pending",
                        request.max_rounds,
                        if pending == 1 { "" } else { "s" }
                    )),
                    rounds_used: round,
                    model,
                    protocol: request.protocol,
                    started_at,
                    duration_ms: started.elapsed().as_millis() as u64,
                    transcript,
                });
            }

            tracing::info!(
                round,
                calls = turn.tool_calls.len(),
                tools = ?turn.tool_calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
                "executing tool calls"
            );
            let results = executor.execute_round(&turn.tool_calls).await;
            state.record_tool_round(&turn, &turn.tool_calls, &results);

            transcript.push(ExecutionRound {
                round_number: round,
                tool_calls: turn.tool_calls,
                results,
                narration: turn.content,
                terminal: false,
            });
        }

        // max_rounds >= 1 is checked up front, so the loop always returns.
        Err(AgentError::InvalidRequest {
            reason: "max_rounds must be at least 1".into(),
        })
    }

    /// One backend call under the round timeout, retried per policy.
    async fn call_backend(
        &self,
        state: &ConversationState,
        params: TurnParams<'_>,
        round: u32,
    ) -> Result<CompletionTurn, AgentError> {
        let backend = self.backend.as_ref();
        let timeout = self.round_timeout;

        let attempt = move || async move {
            match tokio::time::timeout(timeout, state.request_turn(backend, params)).await {
                Ok(result) => result,
                Err(_) => Err(InferenceError::Timeout {
                    duration_secs: timeout.as_secs(),
                }),
            }
        };

        let started = Instant::now();
        let turn = retry_with_backoff(&self.retry, "completion", attempt)
            .await
            .map_err(|source| {
                tracing::error!(round, error = %source, "backend call failed");
                AgentError::RoundFailed { round, source }
            })?;

        tracing::debug!(
            round,
            duration_ms = started.elapsed().as_millis() as u64,
            tool_calls = turn.tool_calls.len(),
            has_content = turn.content.is_some(),
            "backend turn received"
        );
        Ok(turn)
    }
}

fn validate_request(request: &OrchestrationRequest) -> Result<(), AgentError> {
    if request.task.trim().is_empty() {
        return Err(AgentError::InvalidRequest {
            reason: "task must not be empty".into(),
        });
    }
    if request.max_rounds == 0 {
        return Err(AgentError::InvalidRequest {
            reason: "max_rounds must be at least 1".into(),
        });
    }
    if request.max_tokens == 0 {
        return Err(AgentError::InvalidRequest {
            reason: "max_tokens must be at least 1".into(),
        });
    }
    Ok(())
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::tool_executor::{FnTool, ToolInvoker};
    use crate::inference::backend::scripted::{Recorded, ScriptedBackend};
    use crate::inference::types::{
        ChatCompletionRequest, ChatCompletionResponse, ModelEntry, ProtocolVariant,
        ResponsesRequest, ResponsesResponse,
    };
    use crate::mcp_client::errors::McpError;
    use crate::mcp_client::types::McpToolDefinition;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.retry = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        };
        config
    }

    fn orchestrator(backend: &Arc<ScriptedBackend>) -> Orchestrator {
        backend.set_models(&["qwen3-8b"]);
        let discovery = McpDiscovery::with_candidates(vec![]);
        Orchestrator::new(backend.clone(), discovery, &config())
    }

    /// `list_directory` that records the arguments it receives.
    fn list_directory(seen: Arc<Mutex<Vec<Value>>>) -> Arc<dyn ToolInvoker> {
        let def = McpToolDefinition {
            name: "list_directory".into(),
            description: "List the entries of a directory".into(),
            input_schema: json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "required": ["path"]
            }),
        };
        Arc::new(FnTool::new(def, move |args| {
            seen.lock().unwrap().push(args.clone());
            match args["path"].as_str() {
                Some("/tmp") => Ok(json!(["a.txt", "b.txt"])),
                Some(other) => Err(format!("ENOENT: no such directory '{other}'")),
                None => Err("path must be a string".into()),
            }
        }))
    }

    fn executor(seen: Arc<Mutex<Vec<Value>>>) -> ToolExecutor {
        ToolExecutor::builder()
            .server("filesystem", vec![list_directory(seen)])
            .build()
    }

    fn chat_tool_call(id: &str, args: &str) -> Value {
        json!({
            "id": "chatcmpl-1",
            "choices": [{"message": {
                "content": null,
                "tool_calls": [{
                    "id": id,
                    "type": "function",
                    "function": {"name": "list_directory", "arguments": args}
                }]
            }}]
        })
    }

    fn chat_answer(text: &str) -> Value {
        json!({"choices": [{"message": {"content": text}}]})
    }

    fn stateful_tool_call(resp_id: &str, call_id: &str) -> Value {
        json!({
            "id": resp_id,
            "output": [{
                "type": "function_call",
                "call_id": call_id,
                "name": "list_directory",
                "arguments": "{\"path\":\"/tmp\"}"
            }]
        })
    }

    #[tokio::test]
    async fn test_list_tmp_scenario_stateless() {
        let backend = Arc::new(ScriptedBackend::new());
        backend
            .push_chat(chat_tool_call("call_1", r#"{"path": "/tmp"}"#))
            .push_chat(chat_answer("Found 2 files: a.txt, b.txt"));
        let orch = orchestrator(&backend);
        let seen = Arc::new(Mutex::new(vec![]));

        let request = orch.request("list files in /tmp", vec!["filesystem".into()]);
        let outcome = orch
            .run_with_executor(&executor(seen.clone()), request)
            .await
            .unwrap();

        assert!(!outcome.incomplete);
        assert_eq!(outcome.final_answer(), Some("Found 2 files: a.txt, b.txt"));
        assert_eq!(outcome.rounds_used, 2);
        assert_eq!(outcome.model, "qwen3-8b");
        assert_eq!(seen.lock().unwrap()[0], json!({"path": "/tmp"}));

        // Round 2 must carry the listing back to the model.
        let recorded = backend.recorded();
        assert_eq!(recorded.len(), 2);
        let messages = recorded[1].body()["messages"].as_array().unwrap().clone();
        let tool_msg = messages.iter().find(|m| m["role"] == "tool").unwrap();
        assert_eq!(tool_msg["tool_call_id"], "call_1");
        assert!(tool_msg["content"].as_str().unwrap().contains("a.txt"));
        assert!(tool_msg["content"].as_str().unwrap().contains("b.txt"));
        assert_eq!(messages[1]["tool_calls"][0]["id"], "call_1");
    }

    #[tokio::test]
    async fn test_tool_result_visible_in_stateful_follow_up() {
        let backend = Arc::new(ScriptedBackend::new());
        backend
            .push_response(stateful_tool_call("resp_1", "call_fs_1"))
            .push_response(json!({
                "id": "resp_2",
                "output": [{"type": "message", "role": "assistant",
                            "content": [{"type": "output_text", "text": "Found 2 files: a.txt, b.txt"}]}]
            }));
        let orch = orchestrator(&backend);

        let request = orch
            .request("list files in /tmp", vec![])
            .with_protocol(ProtocolVariant::Stateful);
        let outcome = orch
            .run_with_executor(&executor(Arc::new(Mutex::new(vec![]))), request)
            .await
            .unwrap();
        assert_eq!(outcome.final_answer(), Some("Found 2 files: a.txt, b.txt"));
        assert_eq!(outcome.protocol, ProtocolVariant::Stateful);

        let recorded = backend.recorded();
        assert!(matches!(recorded[0], Recorded::Responses(_)));
        let first = recorded[0].body();
        assert_eq!(first["input"], "list files in /tmp");
        assert!(first.get("previous_response_id").is_none());
        assert_eq!(first["tools"][0]["name"], "list_directory");
        assert!(first["tools"][0].get("function").is_none());

        // The continuation id alone is not enough: the output must be resent.
        let second = recorded[1].body();
        assert_eq!(second["previous_response_id"], "resp_1");
        let items = second["input"].as_array().unwrap();
        assert_eq!(items[0]["type"], "function_call_output");
        assert_eq!(items[0]["call_id"], "call_fs_1");
        let output = items[0]["output"].as_str().unwrap();
        assert!(output.contains("a.txt") && output.contains("b.txt"));
    }

    #[tokio::test]
    async fn test_round_ceiling_returns_incomplete() {
        let backend = Arc::new(ScriptedBackend::new());
        for i in 0..5 {
            backend.push_chat(chat_tool_call(&format!("call_{i}"), r#"{"path":"/tmp"}"#));
        }
        let orch = orchestrator(&backend);
        let seen = Arc::new(Mutex::new(vec![]));

        let request = orch.request("loop forever", vec![]).with_max_rounds(3);
        let outcome = orch
            .run_with_executor(&executor(seen.clone()), request)
            .await
            .unwrap();

        assert!(outcome.incomplete);
        assert_eq!(outcome.rounds_used, 3);
        assert_eq!(backend.recorded().len(), 3);
        assert!(outcome.final_answer().is_none());
        assert!(outcome.summary().starts_with("[incomplete after 3 rounds]"));
        assert!(outcome.reason.unwrap().contains("still pending"));
        // Calls of the final round are left pending.
        assert_eq!(seen.lock().unwrap().len(), 2);
        assert!(outcome.transcript.last().unwrap().terminal);
    }

    #[tokio::test]
    async fn test_tool_error_fed_back_not_raised() {
        let backend = Arc::new(ScriptedBackend::new());
        backend
            .push_chat(chat_tool_call("call_1", r#"{"path":"/missing"}"#))
            .push_chat(chat_answer("The directory does not exist."));
        let orch = orchestrator(&backend);

        let outcome = orch
            .run_with_executor(
                &executor(Arc::new(Mutex::new(vec![]))),
                orch.request("list /missing", vec![]),
            )
            .await
            .unwrap();

        assert!(outcome.is_complete());
        let result = outcome.tool_results().next().unwrap();
        assert!(result.is_error);
        assert!(result.content.contains("ENOENT"));

        let second = backend.recorded()[1].body().clone();
        let tool_msg = &second["messages"][2];
        assert_eq!(tool_msg["role"], "tool");
        assert!(tool_msg["content"].as_str().unwrap().starts_with("Error: ENOENT"));
    }

    #[tokio::test]
    async fn test_unknown_tool_becomes_error_result() {
        let backend = Arc::new(ScriptedBackend::new());
        backend
            .push_chat(json!({"choices": [{"message": {"tool_calls": [{
                "id": "call_1", "type": "function",
                "function": {"name": "list_dir", "arguments": "{}"}
            }]}}]}))
            .push_chat(chat_answer("ok"));
        let orch = orchestrator(&backend);

        let outcome = orch
            .run_with_executor(
                &executor(Arc::new(Mutex::new(vec![]))),
                orch.request("list", vec![]),
            )
            .await
            .unwrap();
        let result = outcome.tool_results().next().unwrap();
        assert!(result.is_error);
        assert!(result.content.contains("list_directory"), "{}", result.content);
    }

    #[tokio::test]
    async fn test_transient_error_is_retried() {
        let backend = Arc::new(ScriptedBackend::new());
        backend
            .push_chat_error(InferenceError::HttpError {
                status: 503,
                body: "model loading".into(),
            })
            .push_chat(chat_answer("hello"));
        let orch = orchestrator(&backend);

        let outcome = orch
            .run_with_executor(&executor(Arc::new(Mutex::new(vec![]))), orch.request("hi", vec![]))
            .await
            .unwrap();
        assert_eq!(outcome.final_answer(), Some("hello"));
        assert_eq!(backend.recorded().len(), 2);
    }

    #[tokio::test]
    async fn test_permanent_error_surfaces_as_round_failure() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_chat_error(InferenceError::HttpError {
            status: 400,
            body: "bad request".into(),
        });
        let orch = orchestrator(&backend);

        let err = orch
            .run_with_executor(&executor(Arc::new(Mutex::new(vec![]))), orch.request("hi", vec![]))
            .await
            .unwrap_err();
        match err {
            AgentError::RoundFailed { round, source } => {
                assert_eq!(round, 1);
                assert!(matches!(source, InferenceError::HttpError { status: 400, .. }));
            }
            other => panic!("expected RoundFailed, got {other:?}"),
        }
        assert_eq!(backend.recorded().len(), 1);
    }

    #[tokio::test]
    async fn test_named_tool_choice_only_forces_first_round() {
        let backend = Arc::new(ScriptedBackend::new());
        backend
            .push_chat(chat_tool_call("call_1", r#"{"path":"/tmp"}"#))
            .push_chat(chat_answer("done"));
        let orch = orchestrator(&backend);

        let request = orch
            .request("list /tmp", vec![])
            .with_tool_choice(ToolChoice::Named("list_directory".into()));
        orch.run_with_executor(&executor(Arc::new(Mutex::new(vec![]))), request)
            .await
            .unwrap();

        let recorded = backend.recorded();
        assert_eq!(
            recorded[0].body()["tool_choice"],
            json!({"type": "function", "function": {"name": "list_directory"}})
        );
        assert_eq!(recorded[1].body()["tool_choice"], "auto");
    }

    #[tokio::test]
    async fn test_unknown_model_fails_before_first_round() {
        let backend = Arc::new(ScriptedBackend::new());
        let orch = orchestrator(&backend);

        let request = orch
            .request("hi", vec![])
            .with_model(Some("nonexistent-model".into()));
        let err = orch
            .run_with_executor(&executor(Arc::new(Mutex::new(vec![]))), request)
            .await
            .unwrap_err();
        assert!(err.is_config_error());
        assert!(err.to_string().contains("qwen3-8b"));
        assert!(backend.recorded().is_empty());
    }

    #[tokio::test]
    async fn test_mixed_content_kept_as_narration() {
        let backend = Arc::new(ScriptedBackend::new());
        let mut first = chat_tool_call("call_1", r#"{"path":"/tmp"}"#);
        first["choices"][0]["message"]["content"] = json!("Let me check /tmp.");
        backend.push_chat(first).push_chat(chat_answer("Two files."));
        let orch = orchestrator(&backend);

        let outcome = orch
            .run_with_executor(&executor(Arc::new(Mutex::new(vec![]))), orch.request("list", vec![]))
            .await
            .unwrap();
        assert_eq!(outcome.transcript[0].narration.as_deref(), Some("Let me check /tmp."));
        assert_eq!(outcome.final_answer(), Some("Two files."));

        // Narration is not threaded back into the history.
        let second = backend.recorded()[1].body().clone();
        assert_eq!(second["messages"][1]["content"], "");
    }

    #[tokio::test]
    async fn test_unknown_server_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp.json");
        std::fs::write(
            &path,
            r#"{"mcpServers": {"filesystem": {"command": "npx", "args": []},
                               "github": {"command": "gh-mcp", "disabled": true}}}"#,
        )
        .unwrap();

        let backend = Arc::new(ScriptedBackend::new());
        backend.set_models(&["qwen3-8b"]);
        let orch = Orchestrator::new(backend.clone(), McpDiscovery::with_path(&path), &config());

        for name in ["brave-search", "github"] {
            let err = orch
                .run(orch.request("search", vec![name.into()]))
                .await
                .unwrap_err();
            assert!(matches!(err, AgentError::Mcp(McpError::ServerNotFound { .. })));
            assert!(err.is_config_error());
        }
        assert!(backend.recorded().is_empty());
    }

    #[tokio::test]
    async fn test_empty_task_rejected() {
        let backend = Arc::new(ScriptedBackend::new());
        let orch = orchestrator(&backend);
        let err = orch
            .run_with_executor(&executor(Arc::new(Mutex::new(vec![]))), orch.request("  ", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidRequest { .. }));
    }

    /// Backend that never answers.
    struct StalledBackend;

    #[async_trait]
    impl CompletionBackend for StalledBackend {
        async fn chat_completion(
            &self,
            _request: &ChatCompletionRequest,
        ) -> Result<ChatCompletionResponse, InferenceError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Err(InferenceError::MalformedResponse { reason: "unreachable".into() })
        }

        async fn create_response(
            &self,
            _request: &ResponsesRequest,
        ) -> Result<ResponsesResponse, InferenceError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Err(InferenceError::MalformedResponse { reason: "unreachable".into() })
        }

        async fn list_models(&self) -> Result<Vec<ModelEntry>, InferenceError> {
            Ok(vec![ModelEntry::new("qwen3-8b")])
        }
    }

    #[tokio::test]
    async fn test_round_timeout_surfaces_after_retries() {
        let orch = Orchestrator::new(
            Arc::new(StalledBackend),
            McpDiscovery::with_candidates(vec![]),
            &config(),
        )
        .with_round_timeout(Duration::from_millis(20));

        let started = Instant::now();
        let err = orch
            .run_with_executor(&executor(Arc::new(Mutex::new(vec![]))), orch.request("hi", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AgentError::RoundFailed { round: 1, source: InferenceError::Timeout { .. } }
        ));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
