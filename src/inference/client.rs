//! OpenAI-compatible inference client.
//!
//! Sends single requests to the model server over HTTP. Retrying and the
//! per-round time budget are applied by the caller through
//! [`retry_with_backoff`](super::retry::retry_with_backoff).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client as HttpClient, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use super::backend::CompletionBackend;
use super::config::BackendConfig;
use super::errors::InferenceError;
use super::types::{
    ChatCompletionRequest, ChatCompletionResponse, ModelEntry, ModelList, ResponsesRequest,
    ResponsesResponse,
};

/// Timeout for `GET /models`; listing must never stall validation.
const MODELS_TIMEOUT: Duration = Duration::from_secs(10);

// ─── InferenceClient ─────────────────────────────────────────────────────────

/// HTTP client for the model server.
pub struct InferenceClient {
    http: HttpClient,
    base_url: String,
    api_key: Option<String>,
    request_timeout: Duration,
}

impl InferenceClient {
    /// Create a client from backend settings.
    ///
    /// Does NOT check connectivity; that happens on the first request.
    pub fn from_config(config: &BackendConfig) -> Result<Self, InferenceError> {
        let request_timeout = Duration::from_secs(config.request_timeout_secs);
        let http = HttpClient::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(request_timeout)
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: config.base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn send(&self, url: &str, builder: RequestBuilder) -> Result<Response, InferenceError> {
        let response = self
            .authorize(builder)
            .send()
            .await
            .map_err(|e| map_send_error(&e, url, self.request_timeout))?;
        check_status(response, url).await
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, InferenceError>
    where
        B: serde::Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.endpoint(path);
        let response = self.send(&url, self.http.post(&url).json(body)).await?;
        decode_body(response).await
    }
}

#[async_trait]
impl CompletionBackend for InferenceClient {
    async fn chat_completion(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, InferenceError> {
        tracing::info!(
            model = %request.model,
            message_count = request.messages.len(),
            tool_count = request.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            max_tokens = request.max_tokens,
            "=== LLM REQUEST (chat) ==="
        );
        self.post_json("chat/completions", request).await
    }

    async fn create_response(
        &self,
        request: &ResponsesRequest,
    ) -> Result<ResponsesResponse, InferenceError> {
        tracing::info!(
            model = %request.model,
            previous_response_id = ?request.previous_response_id,
            tool_count = request.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            max_output_tokens = request.max_output_tokens,
            "=== LLM REQUEST (responses) ==="
        );
        self.post_json("responses", request).await
    }

    async fn list_models(&self) -> Result<Vec<ModelEntry>, InferenceError> {
        let url = self.endpoint("models");
        let response = self
            .send(&url, self.http.get(&url).timeout(MODELS_TIMEOUT))
            .await?;
        let list: ModelList = decode_body(response).await?;
        Ok(list.data)
    }
}

// ─── Error Mapping ───────────────────────────────────────────────────────────

fn map_send_error(e: &reqwest::Error, url: &str, timeout: Duration) -> InferenceError {
    if e.is_timeout() {
        InferenceError::Timeout {
            duration_secs: timeout.as_secs(),
        }
    } else {
        InferenceError::ConnectionFailed {
            endpoint: url.to_string(),
            reason: e.to_string(),
        }
    }
}

async fn check_status(response: Response, url: &str) -> Result<Response, InferenceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, url, body))
}

/// Map a non-2xx status to the error taxonomy.
fn status_error(status: StatusCode, url: &str, body: String) -> InferenceError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        InferenceError::RateLimited {
            endpoint: url.to_string(),
            body,
        }
    } else {
        InferenceError::HttpError {
            status: status.as_u16(),
            body,
        }
    }
}

async fn decode_body<T: DeserializeOwned>(response: Response) -> Result<T, InferenceError> {
    let text = response
        .text()
        .await
        .map_err(|e| InferenceError::MalformedResponse {
            reason: format!("failed to read response body: {e}"),
        })?;
    decode_text(&text)
}

fn decode_text<T: DeserializeOwned>(text: &str) -> Result<T, InferenceError> {
    serde_json::from_str(text).map_err(|e| {
        let preview: String = text.chars().take(200).collect();
        InferenceError::MalformedResponse {
            reason: format!("{e} (body: {preview})"),
        }
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
