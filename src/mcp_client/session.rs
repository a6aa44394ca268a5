//! MCP server sessions.
//!
//! A session owns one server process (or, in tests, an in-memory pipe),
//! performs the `initialize` handshake, and exposes `tools/list` and
//! `tools/call`. Sessions are opened per orchestration call and shut down
//! when the call finishes.

use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use super::errors::McpError;
use super::transport::{extract_result, StdioTransport};
use super::types::{
    CallToolResult, InitializeResult, ListToolsResult, McpToolDefinition, ServerDescriptor,
    ServerInfo,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// MCP protocol revision sent in `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Timeout for the initialize handshake.
///
/// `npx`-launched servers may download their package on first start.
const INIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for graceful shutdown before force-killing.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

/// Default timeout for a single `tools/call`.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on `tools/list` pages, in case a server keeps returning a cursor.
const MAX_TOOL_PAGES: usize = 50;

// ─── McpSession ──────────────────────────────────────────────────────────────

/// A live, initialized connection to one MCP server.
pub struct McpSession {
    name: String,
    transport: StdioTransport,
    process: Mutex<Option<Child>>,
    server_info: Option<ServerInfo>,
    call_timeout: Duration,
}

impl McpSession {
    /// Spawn the server described by `descriptor` and initialize it.
    pub async fn spawn(
        descriptor: &ServerDescriptor,
        call_timeout: Duration,
    ) -> Result<Self, McpError> {
        let name = descriptor.name.as_str();
        let mut cmd = Command::new(&descriptor.command);
        cmd.args(&descriptor.args)
            .envs(&descriptor.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &descriptor.cwd {
            cmd.current_dir(dir);
        }

        #[cfg(target_os = "windows")]
        {
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
            name: name.to_string(),
            reason: format!("{} {}: {e}", descriptor.command, descriptor.args.join(" ")),
        })?;

        let stdin = child.stdin.take().ok_or(McpError::SpawnFailed {
            name: name.to_string(),
            reason: "failed to capture stdin".into(),
        })?;
        let stdout = child.stdout.take().ok_or(McpError::SpawnFailed {
            name: name.to_string(),
            reason: "failed to capture stdout".into(),
        })?;
        let stderr = child.stderr.take();

        tracing::debug!(
            server = name,
            command = %descriptor.command,
            pid = ?child.id(),
            "spawned MCP server"
        );

        let transport = StdioTransport::new(name, stdin, stdout);
        match Self::initialize(name, transport, Some(child), call_timeout).await {
            Ok(session) => {
                if let Some(stderr) = stderr {
                    tokio::spawn(drain_stderr(name.to_string(), stderr));
                }
                Ok(session)
            }
            Err(e) => {
                let stderr_ctx = read_stderr_on_failure(stderr).await;
                if !stderr_ctx.is_empty() {
                    tracing::warn!(server = name, stderr = %stderr_ctx, "server stderr on failed start");
                }
                Err(McpError::InitFailed {
                    name: name.to_string(),
                    reason: format!("{e}{}", format_stderr_suffix(&stderr_ctx)),
                })
            }
        }
    }

    /// Initialize a session over an already-connected transport.
    ///
    /// `process` is the owning child, if any; it is killed on shutdown.
    pub async fn initialize(
        name: &str,
        transport: StdioTransport,
        process: Option<Child>,
        call_timeout: Duration,
    ) -> Result<Self, McpError> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
        });

        let response = tokio::time::timeout(
            INIT_TIMEOUT,
            transport.request("initialize", Some(params)),
        )
        .await
        .map_err(|_| McpError::InitFailed {
            name: name.to_string(),
            reason: format!("initialization timed out after {}s", INIT_TIMEOUT.as_secs()),
        })??;

        let init: InitializeResult =
            serde_json::from_value(extract_result(response)?).map_err(|e| {
                McpError::InitFailed {
                    name: name.to_string(),
                    reason: format!("failed to parse initialize response: {e}"),
                }
            })?;

        transport.notify("notifications/initialized", None).await?;

        tracing::info!(
            server = name,
            protocol = ?init.protocol_version,
            server_name = ?init.server_info.as_ref().and_then(|i| i.name.as_deref()),
            "MCP session initialized"
        );

        Ok(Self {
            name: name.to_string(),
            transport,
            process: Mutex::new(process),
            server_info: init.server_info,
            call_timeout,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    /// List every tool the server exposes, following `nextCursor` pagination.
    pub async fn list_tools(&self) -> Result<Vec<McpToolDefinition>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_TOOL_PAGES {
            let params = cursor
                .as_ref()
                .map(|c| serde_json::json!({ "cursor": c }));
            let response = self.transport.request("tools/list", params).await?;
            let page: ListToolsResult =
                serde_json::from_value(extract_result(response)?).map_err(|e| {
                    McpError::TransportError {
                        server: self.name.clone(),
                        reason: format!("failed to parse tools/list response: {e}"),
                    }
                })?;

            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(tools),
            }
        }

        tracing::warn!(server = %self.name, pages = MAX_TOOL_PAGES, "tools/list pagination cut off");
        Ok(tools)
    }

    /// Invoke one tool. `arguments` must already be a structured JSON object.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<CallToolResult, McpError> {
        let params = serde_json::json!({
            "name": tool_name,
            "arguments": arguments,
        });

        let response = tokio::time::timeout(
            self.call_timeout,
            self.transport.request("tools/call", Some(params)),
        )
        .await
        .map_err(|_| McpError::Timeout {
            tool: tool_name.to_string(),
            timeout_ms: self.call_timeout.as_millis() as u64,
        })??;

        serde_json::from_value(extract_result(response)?).map_err(|e| McpError::TransportError {
            server: self.name.clone(),
            reason: format!("failed to parse tools/call response for '{tool_name}': {e}"),
        })
    }

    /// Stop the server process, waiting briefly before force-killing it.
    pub async fn shutdown(&self) {
        let Some(mut child) = self.process.lock().await.take() else {
            return;
        };

        let _ = child.start_kill();
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, child.wait())
            .await
            .is_err()
        {
            tracing::warn!(server = %self.name, "MCP server did not exit after kill");
        }
        tracing::debug!(server = %self.name, "MCP session closed");
    }
}

/// Forward a running server's stderr to the log until the pipe closes.
///
/// The read end must stay open for the life of the process: servers that log
/// per request would otherwise die on a broken pipe.
async fn drain_stderr(server: String, stderr: tokio::process::ChildStderr) {
    use tokio::io::AsyncBufReadExt;

    let mut lines = tokio::io::BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::debug!(server = %server, line = %line, "server stderr"),
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(server = %server, error = %e, "stopped reading server stderr");
                break;
            }
        }
    }
}

/// Read whatever a failed server wrote to stderr, truncated for logging.
async fn read_stderr_on_failure(stderr_handle: Option<tokio::process::ChildStderr>) -> String {
    use tokio::io::AsyncReadExt;

    let Some(mut stderr) = stderr_handle else {
        return String::new();
    };

    let mut buf = Vec::new();
    let _ = tokio::time::timeout(Duration::from_millis(500), stderr.read_to_end(&mut buf)).await;
    let mut text = String::from_utf8_lossy(&buf).into_owned();
    if text.len() > 2000 {
        let mut cut = 2000;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str("...(truncated)");
    }
    text
}

fn format_stderr_suffix(stderr: &str) -> String {
    if stderr.trim().is_empty() {
        String::new()
    } else {
        format!(" | stderr: {}", stderr.trim())
    }
}

// ─── Test Support ────────────────────────────────────────────────────────────


// ─── Tests ───────────────────────────────────────────────────────────────────
