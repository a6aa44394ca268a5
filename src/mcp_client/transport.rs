//! Newline-delimited JSON-RPC transport.
//!
//! One JSON object per line in each direction. The transport is generic over
//! the byte streams so the same code drives a child process's stdio and an
//! in-memory duplex pipe.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use super::errors::McpError;
use super::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

// ─── Request ID Generator ────────────────────────────────────────────────────

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-wide unique request id.
pub fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type BoxedReader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;

// ─── Transport ───────────────────────────────────────────────────────────────

/// Bi-directional JSON-RPC transport for a single MCP server.
///
/// Requests are serialized: the reader lock is held from write until the
/// matching response arrives, so concurrent callers on one session queue up.
pub struct StdioTransport {
    server_name: String,
    writer: Mutex<BoxedWriter>,
    reader: Mutex<BoxedReader>,
}

impl StdioTransport {
    pub fn new<W, R>(server_name: &str, writer: W, reader: R) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            server_name: server_name.to_string(),
            writer: Mutex::new(Box::new(writer)),
            reader: Mutex::new(BufReader::new(Box::new(reader))),
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Send a request and wait for the response carrying the same `id`.
    ///
    /// Lines that are not JSON (server log noise), server notifications and
    /// responses for other ids are skipped.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        let id = next_request_id();
        let mut reader = self.reader.lock().await;

        self.write_line(&JsonRpcRequest::new(id, method, params))
            .await?;

        let mut line_buf = String::new();
        loop {
            line_buf.clear();
            let bytes_read = reader
                .read_line(&mut line_buf)
                .await
                .map_err(|e| self.transport_error(format!("failed to read response: {e}")))?;

            if bytes_read == 0 {
                return Err(McpError::ServerCrashed {
                    name: self.server_name.clone(),
                    reason: "stdout closed (process may have exited)".into(),
                });
            }

            let trimmed = line_buf.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                Ok(resp) if resp.id == Some(id) && resp.method.is_none() => return Ok(resp),
                Ok(resp) => {
                    tracing::trace!(
                        server = %self.server_name,
                        method = ?resp.method,
                        id = ?resp.id,
                        "skipping unrelated JSON-RPC message"
                    );
                }
                Err(_) => {
                    tracing::debug!(
                        server = %self.server_name,
                        line = %trimmed,
                        "skipping non JSON-RPC output"
                    );
                }
            }
        }
    }

    /// Send a notification; no response is read.
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        self.write_line(&JsonRpcNotification::new(method, params))
            .await
    }

    async fn write_line<T: Serialize>(&self, message: &T) -> Result<(), McpError> {
        let mut json = serde_json::to_string(message)
            .map_err(|e| self.transport_error(format!("failed to serialize message: {e}")))?;
        json.push('\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(json.as_bytes())
            .await
            .map_err(|e| self.transport_error(format!("failed to write: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| self.transport_error(format!("failed to flush: {e}")))
    }

    fn transport_error(&self, reason: String) -> McpError {
        McpError::TransportError {
            server: self.server_name.clone(),
            reason,
        }
    }
}

// ─── Response Helpers ────────────────────────────────────────────────────────

/// Extract the result from a JSON-RPC response, converting errors to `McpError`.
pub fn extract_result(response: JsonRpcResponse) -> Result<serde_json::Value, McpError> {
    if let Some(err) = response.error {
        return Err(McpError::ServerError {
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }

    response.result.ok_or(McpError::ServerError {
        code: super::types::error_codes::INTERNAL_ERROR,
        message: "response missing both result and error".into(),
        data: None,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, split, AsyncBufReadExt, AsyncWriteExt, BufReader};

    #[test]
    fn test_next_request_id_is_monotonic() {
        let id1 = next_request_id();
        let id2 = next_request_id();
        assert!(id2 > id1);
    }

    #[test]
    fn test_extract_result_error() {
        let resp = JsonRpcResponse {
            id: Some(1),
            method: None,
            result: None,
            error: Some(super::super::types::JsonRpcError {
                code: -32601,
                message: "Method not found".into(),
                data: None,
            }),
        };
        match extract_result(resp).unwrap_err() {
            McpError::ServerError { code, message, .. } => {
                assert_eq!(code, -32601);
                assert_eq!(message, "Method not found");
            }
            other => panic!("expected ServerError, got {other:?}"),
        }
    }

    #[test]
    fn test_extract_result_missing_both() {
        let resp = JsonRpcResponse {
            id: Some(1),
            method: None,
            result: None,
            error: None,
        };
        assert!(matches!(
            extract_result(resp),
            Err(McpError::ServerError { .. })
        ));
    }

    #[tokio::test]
    async fn test_request_skips_noise_and_notifications() {
        let (client_end, server_end) = duplex(4096);
        let (client_read, client_write) = split(client_end);
        let (server_read, mut server_write) = split(server_end);
        let transport = StdioTransport::new("fake", client_write, client_read);

        let server = tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            let req: serde_json::Value = serde_json::from_str(&line).unwrap();
            let id = req["id"].as_u64().unwrap();
            let reply = format!(
                "server starting up...\n\
                 {{\"jsonrpc\":\"2.0\",\"method\":\"notifications/message\",\"params\":{{}}}}\n\
                 {{\"jsonrpc\":\"2.0\",\"id\":{},\"result\":{{\"stale\":true}}}}\n\
                 {{\"jsonrpc\":\"2.0\",\"id\":{id},\"result\":{{\"ok\":true}}}}\n",
                id + 1_000_000
            );
            server_write.write_all(reply.as_bytes()).await.unwrap();
            req
        });

        let resp = transport.request("ping", None).await.unwrap();
        assert_eq!(extract_result(resp).unwrap()["ok"], true);
        let sent = server.await.unwrap();
        assert_eq!(sent["method"], "ping");
    }

    #[tokio::test]
    async fn test_request_reports_closed_stdout() {
        let (client_end, server_end) = duplex(1024);
        let (client_read, client_write) = split(client_end);
        drop(server_end);
        let transport = StdioTransport::new("gone", client_write, client_read);

        let err = transport.request("ping", None).await.unwrap_err();
        assert!(matches!(
            err,
            McpError::ServerCrashed { .. } | McpError::TransportError { .. }
        ));
    }
}
