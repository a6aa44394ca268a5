//! Agent Core error types.
//!
//! Only configuration problems and exhausted backend calls surface as
//! `AgentError`. Tool failures inside the loop become error results that the
//! model sees; running out of rounds is an incomplete outcome, not an error.

use thiserror::Error;

use crate::inference::errors::InferenceError;
use crate::mcp_client::errors::McpError;

/// Errors that end an orchestration call.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Discovery, spawn or handshake failure for a requested server.
    #[error(transparent)]
    Mcp(#[from] McpError),

    /// Backend failure after retries, or a rejected model.
    #[error(transparent)]
    Inference(#[from] InferenceError),

    /// The request itself is unusable.
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// A backend call failed mid-loop.
    #[error("round {round} failed: {source}")]
    RoundFailed {
        round: u32,
        #[source]
        source: InferenceError,
    },
}

impl AgentError {
    /// Configuration errors: unknown server, malformed discovery file, bad model name.
    pub fn is_config_error(&self) -> bool {
        match self {
            AgentError::Mcp(e) => e.is_config_error(),
            AgentError::Inference(e) => {
                e.is_validation() || matches!(e, InferenceError::ConfigError { .. })
            }
            AgentError::InvalidRequest { .. } => true,
            AgentError::RoundFailed { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_classification() {
        let not_found: AgentError = McpError::ServerNotFound {
            name: "github".into(),
            available: vec![],
        }
        .into();
        assert!(not_found.is_config_error());

        let bad_model: AgentError = InferenceError::ModelNotFound {
            model: "x".into(),
            available: vec!["y".into()],
        }
        .into();
        assert!(bad_model.is_config_error());

        let round = AgentError::RoundFailed {
            round: 2,
            source: InferenceError::Timeout { duration_secs: 120 },
        };
        assert!(!round.is_config_error());
        assert_eq!(round.to_string(), "round 2 failed: inference timeout after 120s");
    }
}
