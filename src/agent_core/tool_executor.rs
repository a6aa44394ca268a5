//! ToolExecutor — dispatches model tool calls to attached tools.
//!
//! Every tool sits behind [`ToolInvoker`]: MCP-backed tools ([`McpTool`]) and
//! plain synchronous closures ([`FnTool`]) are called the same way. The
//! executor owns a lookup table built once per orchestration call:
//!
//! - Tool names unique across attached servers are exposed as-is.
//! - A name offered by more than one server is exposed as `server::tool`
//!   for each of them.
//!
//! Dispatch decodes the model's JSON argument string, checks required
//! fields, invokes the tool, normalizes the MCP content blocks to text and
//! truncates oversized output. Any failure becomes an error [`ToolResult`]
//! rather than an `Err`, so the model can read it and adapt.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;

use crate::inference::tool_schema::{to_backend_format, BackendTool};
use crate::inference::types::ToolCall;
use crate::mcp_client::errors::McpError;
use crate::mcp_client::session::McpSession;
use crate::mcp_client::types::{CallToolResult, ContentBlock, McpToolDefinition};

use super::types::ToolResult;

/// Separator between server and tool in namespaced names.
pub const NAMESPACE_SEPARATOR: &str = "::";

/// Default cap on the characters of one tool result.
pub const DEFAULT_MAX_RESULT_CHARS: usize = 8000;

/// Minimum similarity for a "did you mean" suggestion.
const SUGGESTION_FLOOR: f64 = 0.3;

// ─── Invoker Interface ──────────────────────────────────────────────────────

/// Normalized tool output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }
}

/// A callable tool.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Name, description and input schema as the tool declares them.
    fn definition(&self) -> &McpToolDefinition;

    /// Call the tool with a decoded argument object.
    async fn invoke(&self, arguments: Value) -> Result<ToolOutput, McpError>;

    fn name(&self) -> &str {
        &self.definition().name
    }
}

/// A tool served by a live MCP session.
pub struct McpTool {
    session: Arc<McpSession>,
    definition: McpToolDefinition,
}

impl McpTool {
    pub fn new(session: Arc<McpSession>, definition: McpToolDefinition) -> Self {
        Self {
            session,
            definition,
        }
    }

    /// Wrap every tool the session lists.
    pub async fn list(session: &Arc<McpSession>) -> Result<Vec<Arc<dyn ToolInvoker>>, McpError> {
        let tools = session.list_tools().await?;
        Ok(tools
            .into_iter()
            .map(|def| Arc::new(McpTool::new(session.clone(), def)) as Arc<dyn ToolInvoker>)
            .collect())
    }
}

#[async_trait]
impl ToolInvoker for McpTool {
    fn definition(&self) -> &McpToolDefinition {
        &self.definition
    }

    async fn invoke(&self, arguments: Value) -> Result<ToolOutput, McpError> {
        let result = self
            .session
            .call_tool(&self.definition.name, arguments)
            .await?;
        Ok(normalize_call_result(&result))
    }
}

type SyncToolFn = dyn Fn(Value) -> Result<Value, String> + Send + Sync;

/// A tool backed by a synchronous closure.
///
/// A returned JSON string becomes the text as-is; other values are
/// serialized. `Err` becomes an error output.
pub struct FnTool {
    definition: McpToolDefinition,
    func: Box<SyncToolFn>,
}

impl FnTool {
    pub fn new<F>(definition: McpToolDefinition, func: F) -> Self
    where
        F: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            definition,
            func: Box::new(func),
        }
    }
}

#[async_trait]
impl ToolInvoker for FnTool {
    fn definition(&self) -> &McpToolDefinition {
        &self.definition
    }

    async fn invoke(&self, arguments: Value) -> Result<ToolOutput, McpError> {
        Ok(match (self.func)(arguments) {
            Ok(Value::String(s)) => ToolOutput::text(s),
            Ok(other) => ToolOutput::text(other.to_string()),
            Err(message) => ToolOutput {
                content: message,
                is_error: true,
            },
        })
    }
}

// ─── Result Normalization ───────────────────────────────────────────────────

/// Flatten an MCP `tools/call` result to text.
///
/// Text blocks are joined with newlines. Embedded resources contribute
/// their text. Binary blocks become placeholders. `structuredContent` is
/// used only when no block carried text.
pub fn normalize_call_result(result: &CallToolResult) -> ToolOutput {
    let mut parts: Vec<String> = Vec::new();
    let mut has_text = false;

    for block in &result.content {
        match block {
            ContentBlock::Text { text } => {
                has_text = true;
                parts.push(text.clone());
            }
            ContentBlock::Resource { resource } => match &resource.text {
                Some(text) => {
                    has_text = true;
                    parts.push(text.clone());
                }
                None => parts.push(format!("[resource: {}]", resource.uri)),
            },
            ContentBlock::ResourceLink { uri, name } => {
                parts.push(format!("[resource link: {}]", name.as_deref().unwrap_or(uri)));
            }
            ContentBlock::Image { mime_type } => {
                parts.push(format!("[image: {}]", mime_type.as_deref().unwrap_or("unknown")));
            }
            ContentBlock::Audio { mime_type } => {
                parts.push(format!("[audio: {}]", mime_type.as_deref().unwrap_or("unknown")));
            }
            ContentBlock::Unknown => {}
        }
    }

    if !has_text {
        if let Some(structured) = &result.structured_content {
            parts.insert(0, structured.to_string());
        }
    }

    let content = if parts.is_empty() {
        "No result returned.".to_string()
    } else {
        parts.join("\n")
    };

    ToolOutput {
        content,
        is_error: result.is_error,
    }
}

/// Cut `content` to at most `max_chars` characters, with a notice.
pub fn truncate_tool_result(content: &str, max_chars: usize, tool_name: &str) -> String {
    let total = content.chars().count();
    if total <= max_chars {
        return content.to_string();
    }

    let cut = content
        .char_indices()
        .nth(max_chars)
        .map(|(idx, _)| idx)
        .unwrap_or(content.len());

    tracing::warn!(
        tool = %tool_name,
        original_chars = total,
        truncated_to = max_chars,
        "tool result truncated"
    );
    format!(
        "{}\n\n[... truncated: showing first {max_chars} of {total} chars]",
        &content[..cut]
    )
}

// ─── ToolExecutor ───────────────────────────────────────────────────────────

/// Collects tools per server before names are assigned.
#[derive(Default)]
pub struct ToolSetBuilder {
    servers: Vec<(String, Vec<Arc<dyn ToolInvoker>>)>,
    max_result_chars: Option<usize>,
    parallel: bool,
}

impl ToolSetBuilder {
    pub fn server(mut self, name: impl Into<String>, tools: Vec<Arc<dyn ToolInvoker>>) -> Self {
        self.servers.push((name.into(), tools));
        self
    }

    pub fn max_result_chars(mut self, max: usize) -> Self {
        self.max_result_chars = Some(max);
        self
    }

    /// Run the calls of one round concurrently.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Assign exposed names; namespace only names offered by several servers.
    pub fn build(self) -> ToolExecutor {
        let mut owners: HashMap<String, usize> = HashMap::new();
        for (_, tools) in &self.servers {
            let mut seen_here = std::collections::HashSet::new();
            for tool in tools {
                if seen_here.insert(tool.name().to_string()) {
                    *owners.entry(tool.name().to_string()).or_default() += 1;
                }
            }
        }

        let mut tools = BTreeMap::new();
        let mut order = Vec::new();
        for (server, server_tools) in self.servers {
            for tool in server_tools {
                let exposed = if owners.get(tool.name()).copied().unwrap_or(0) > 1 {
                    format!("{server}{NAMESPACE_SEPARATOR}{}", tool.name())
                } else {
                    tool.name().to_string()
                };
                if tools.contains_key(&exposed) {
                    tracing::warn!(server = %server, tool = %exposed, "duplicate tool name, keeping first");
                    continue;
                }
                order.push(exposed.clone());
                tools.insert(
                    exposed,
                    RegisteredTool {
                        server: server.clone(),
                        invoker: tool,
                    },
                );
            }
        }

        ToolExecutor {
            tools,
            order,
            max_result_chars: self.max_result_chars.unwrap_or(DEFAULT_MAX_RESULT_CHARS),
            parallel: self.parallel,
        }
    }
}

struct RegisteredTool {
    server: String,
    invoker: Arc<dyn ToolInvoker>,
}

/// Name → tool table for one orchestration call.
pub struct ToolExecutor {
    tools: BTreeMap<String, RegisteredTool>,
    /// Exposed names in registration order.
    order: Vec<String>,
    max_result_chars: usize,
    parallel: bool,
}

impl ToolExecutor {
    pub fn builder() -> ToolSetBuilder {
        ToolSetBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Exposed names, in registration order.
    pub fn tool_names(&self) -> &[String] {
        &self.order
    }

    /// Server that owns an exposed name.
    pub fn server_for(&self, exposed: &str) -> Option<&str> {
        self.tools.get(exposed).map(|t| t.server.as_str())
    }

    /// Backend descriptors under the exposed names.
    pub fn backend_tools(&self) -> Vec<BackendTool> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name).map(|t| (name, t)))
            .map(|(name, t)| {
                let mut tool = to_backend_format(t.invoker.definition());
                tool.name = name.clone();
                tool
            })
            .collect()
    }

    /// Map a model-emitted name to an exposed name.
    ///
    /// Exact match first; then a bare name matching exactly one namespaced
    /// tool. Otherwise `UnknownTool` with up to three suggestions.
    pub fn resolve(&self, name: &str) -> Result<&str, McpError> {
        if let Some((exposed, _)) = self.tools.get_key_value(name) {
            return Ok(exposed.as_str());
        }

        if !name.contains(NAMESPACE_SEPARATOR) {
            let suffix = format!("{NAMESPACE_SEPARATOR}{name}");
            let mut matches = self.tools.keys().filter(|k| k.ends_with(&suffix));
            if let (Some(only), None) = (matches.next(), matches.next()) {
                return Ok(only.as_str());
            }
        }

        Err(McpError::UnknownTool {
            name: name.to_string(),
            suggestions: self.find_similar(name, 3),
        })
    }

    /// Run one tool with a decoded argument object.
    pub async fn execute(&self, name: &str, arguments: Value) -> Result<ToolOutput, McpError> {
        let exposed = self.resolve(name)?;
        let Some(tool) = self.tools.get(exposed) else {
            return Err(McpError::UnknownTool {
                name: name.to_string(),
                suggestions: vec![],
            });
        };

        validate_arguments(exposed, tool.invoker.definition(), &arguments)?;

        let started = Instant::now();
        let mut output = tool.invoker.invoke(arguments).await?;
        output.content = truncate_tool_result(&output.content, self.max_result_chars, exposed);

        tracing::info!(
            tool = %exposed,
            server = %tool.server,
            is_error = output.is_error,
            duration_ms = started.elapsed().as_millis() as u64,
            result_chars = output.content.len(),
            "tool executed"
        );
        Ok(output)
    }

    /// Decode the call's argument string, run it, and fold any failure into
    /// an error result.
    pub async fn execute_call(&self, call: &ToolCall) -> ToolResult {
        let arguments = match parse_arguments(call) {
            Ok(args) => args,
            Err(e) => {
                tracing::warn!(tool = %call.name, error = %e, "undecodable tool arguments");
                return ToolResult::error(call, e);
            }
        };

        match self.execute(&call.name, arguments).await {
            Ok(output) if output.is_error => ToolResult::error(call, output.content),
            Ok(output) => ToolResult::success(call, output.content),
            Err(e) => {
                tracing::warn!(tool = %call.name, error = %e, "tool call failed");
                ToolResult::error(call, e)
            }
        }
    }

    /// Run all calls of one round. Results keep the calls' order.
    pub async fn execute_round(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        if self.parallel && calls.len() > 1 {
            futures::future::join_all(calls.iter().map(|c| self.execute_call(c))).await
        } else {
            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                results.push(self.execute_call(call).await);
            }
            results
        }
    }

    /// Up to `max_results` exposed names most similar to `name`.
    pub fn find_similar(&self, name: &str, max_results: usize) -> Vec<String> {
        let query = bare_name(name);
        let mut scored: Vec<(&String, f64)> = self
            .tools
            .keys()
            .map(|exposed| (exposed, similarity(query, bare_name(exposed))))
            .filter(|(_, score)| *score > SUGGESTION_FLOOR)
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(max_results);
        scored.into_iter().map(|(n, _)| n.clone()).collect()
    }
}

// ─── Argument Handling ──────────────────────────────────────────────────────

/// Decode the JSON argument string into an object.
///
/// An empty string or `null` means no arguments.
pub fn parse_arguments(call: &ToolCall) -> Result<Value, McpError> {
    let raw = call.arguments.trim();
    if raw.is_empty() {
        return Ok(Value::Object(Default::default()));
    }

    let value: Value = serde_json::from_str(raw).map_err(|e| McpError::InvalidArguments {
        tool: call.name.clone(),
        reason: format!("arguments are not valid JSON ({e}): {raw}"),
    })?;

    match value {
        Value::Object(_) => Ok(value),
        Value::Null => Ok(Value::Object(Default::default())),
        other => Err(McpError::InvalidArguments {
            tool: call.name.clone(),
            reason: format!("arguments must be a JSON object, got {other}"),
        }),
    }
}

/// Required fields named by the tool's input schema must be present.
fn validate_arguments(
    tool_name: &str,
    definition: &McpToolDefinition,
    arguments: &Value,
) -> Result<(), McpError> {
    let Some(required) = definition
        .input_schema
        .get("required")
        .and_then(Value::as_array)
    else {
        return Ok(());
    };

    let args = arguments.as_object();
    for field in required.iter().filter_map(Value::as_str) {
        if !args.is_some_and(|obj| obj.contains_key(field)) {
            return Err(McpError::InvalidArguments {
                tool: tool_name.to_string(),
                reason: format!("missing required field: '{field}'"),
            });
        }
    }
    Ok(())
}

// ─── Edit Distance ──────────────────────────────────────────────────────────

fn bare_name(name: &str) -> &str {
    name.rsplit(NAMESPACE_SEPARATOR).next().unwrap_or(name)
}

/// Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();
    let n = b_bytes.len();

    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr = vec![0usize; n + 1];

    for (i, &ca) in a_bytes.iter().enumerate() {
        curr[0] = i + 1;
        for j in 1..=n {
            let cost = usize::from(ca != b_bytes[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}

/// Normalized similarity (0.0 = completely different, 1.0 = identical).
fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.len().max(b.len());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - (levenshtein(a, b) as f64 / max_len as f64)
}

// ─── Tests ──────────────────────────────────────────────────────────────────
