//! Retry policy for transient LLM failures.

use std::future::Future;
use std::time::Duration;

use sqlscout_config::constants::generation;

use crate::LlmError;

/// Exponential backoff policy: `initial`, doubling per attempt, capped.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub backoff_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: generation::MAX_RETRIES,
            initial_backoff: Duration::from_millis(generation::BACKOFF_INITIAL_MS),
            backoff_cap: Duration::from_millis(generation::BACKOFF_CAP_MS),
        }
    }
}

impl RetryPolicy {
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        (self.initial_backoff * factor).min(self.backoff_cap)
    }
}

/// Run `operation` with retries on transient errors.
pub async fn with_retries<T, F, Fut>(policy: RetryPolicy, mut operation: F) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_retries => {
                let backoff = policy.backoff_for(attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    max = policy.max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "Transient LLM error, retrying"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
