//! Inference error types.
//!
//! All errors implement `std::error::Error` via `thiserror`. Structured logging
//! is the caller's responsibility; these types carry the context needed to build
//! meaningful log entries.
//!
//! The variants form the backend error taxonomy: transport-level failures
//! (`Timeout`, `ConnectionFailed`, `RateLimited`), response failures
//! (`HttpError`, `MalformedResponse`) and caller errors (`Validation`,
//! `ModelNotFound`).

use thiserror::Error;

/// HTTP statuses treated as transient.
const RETRYABLE_STATUSES: [u16; 4] = [500, 502, 503, 504];

/// Errors that can occur during inference operations.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// The model endpoint did not respond within the configured timeout.
    #[error("inference timeout after {duration_secs}s")]
    Timeout { duration_secs: u64 },

    /// TCP/HTTP connection to the model endpoint failed.
    #[error(
        "connection failed to {endpoint}: {reason} (is the model server running and is LLM_BASE_URL correct?)"
    )]
    ConnectionFailed { endpoint: String, reason: String },

    /// HTTP 429 from the model endpoint.
    #[error("rate limited by {endpoint} (reduce request rate or wait before retrying): {body}")]
    RateLimited { endpoint: String, body: String },

    /// Non-2xx HTTP response from the model endpoint.
    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    /// A 2xx response whose body does not have the expected shape.
    #[error("malformed response: {reason}")]
    MalformedResponse { reason: String },

    /// The request was rejected before it was sent.
    #[error("invalid request: {reason}")]
    Validation { reason: String },

    /// The requested model is not loaded in the backend.
    #[error("model '{model}' not found (available: {})", available.join(", "))]
    ModelNotFound {
        model: String,
        available: Vec<String>,
    },

    /// Configuration loading or validation error.
    #[error("config error: {reason}")]
    ConfigError { reason: String },
}

impl InferenceError {
    /// Transient errors worth retrying with backoff.
    ///
    /// Only timeouts and 500/502/503/504 qualify. Connection refusal and
    /// rate limits surface immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            InferenceError::Timeout { .. } => true,
            InferenceError::HttpError { status, .. } => RETRYABLE_STATUSES.contains(status),
            _ => false,
        }
    }

    /// `Validation` and its specialization `ModelNotFound`.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            InferenceError::Validation { .. } | InferenceError::ModelNotFound { .. }
        )
    }

    /// Valid alternatives carried by `ModelNotFound`.
    pub fn available_models(&self) -> Option<&[String]> {
        match self {
            InferenceError::ModelNotFound { available, .. } => Some(available),
            _ => None,
        }
    }

    /// Extract the error body text, if this is an `HttpError`.
    pub fn error_body(&self) -> Option<&str> {
        match self {
            InferenceError::HttpError { body, .. } => Some(body),
            InferenceError::RateLimited { body, .. } => Some(body),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16) -> InferenceError {
        InferenceError::HttpError {
            status,
            body: "boom".to_string(),
        }
    }

    #[test]
    fn test_retryable_statuses() {
        for status in [500, 502, 503, 504] {
            assert!(http(status).is_retryable(), "{status} should retry");
        }
        for status in [400, 401, 404, 422, 501] {
            assert!(!http(status).is_retryable(), "{status} should not retry");
        }
    }

    #[test]
    fn test_timeout_retryable_connection_and_rate_limit_not() {
        assert!(InferenceError::Timeout { duration_secs: 5 }.is_retryable());
        assert!(!InferenceError::ConnectionFailed {
            endpoint: "http://localhost:1234/v1".into(),
            reason: "refused".into(),
        }
        .is_retryable());
        assert!(!InferenceError::RateLimited {
            endpoint: "http://localhost:1234/v1".into(),
            body: String::new(),
        }
        .is_retryable());
    }

    #[test]
    fn test_connection_message_is_actionable() {
        let err = InferenceError::ConnectionFailed {
            endpoint: "http://localhost:1234/v1".into(),
            reason: "connection refused".into(),
        };
        assert!(err.to_string().contains("LLM_BASE_URL"));
    }

    #[test]
    fn test_model_not_found_is_validation_with_alternatives() {
        let err = InferenceError::ModelNotFound {
            model: "nonexistent-model".into(),
            available: vec!["qwen3-8b".into(), "llama-3.2-3b".into()],
        };
        assert!(err.is_validation());
        assert!(!err.is_retryable());
        assert_eq!(err.available_models().unwrap().len(), 2);
        assert!(err.to_string().contains("qwen3-8b, llama-3.2-3b"));
    }

    #[test]
    fn test_error_body_non_http() {
        let err = InferenceError::Timeout { duration_secs: 5 };
        assert!(err.error_body().is_none());
        assert_eq!(http(500).error_body(), Some("boom"));
    }
}
