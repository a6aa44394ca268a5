//! Retry with exponential backoff for backend calls.
//!
//! Delay before retry `n` (0-based) is `min(base_delay * 2^n, max_delay)`.
//! Which errors are retried is decided by a predicate; the default is
//! [`InferenceError::is_retryable`].

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::InferenceError;

/// Retry parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt; `0` disables retrying.
    pub max_retries: u32,
    #[serde(rename = "base_delay_ms", with = "millis")]
    pub base_delay: Duration,
    #[serde(rename = "max_delay_ms", with = "millis")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// retry budget is spent.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    op: F,
) -> Result<T, InferenceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, InferenceError>>,
{
    retry_with_backoff_if(policy, operation, InferenceError::is_retryable, op).await
}

/// [`retry_with_backoff`] with a caller-supplied retryability predicate.
pub async fn retry_with_backoff_if<T, F, Fut, P>(
    policy: &RetryPolicy,
    operation: &str,
    is_retryable: P,
    mut op: F,
) -> Result<T, InferenceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, InferenceError>>,
    P: Fn(&InferenceError) -> bool,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(operation, attempts = attempt + 1, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if attempt < policy.max_retries && is_retryable(&e) => {
                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    operation,
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient backend error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if attempt > 0 {
                    tracing::error!(operation, attempts = attempt + 1, error = %e, "giving up");
                }
                return Err(e);
            }
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
