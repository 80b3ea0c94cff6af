//! Timeout plus bounded exponential backoff around a single store call.

use crate::config::StoreConfig;
use crate::store::StoreError;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Deadline for each individual attempt
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            timeout: config.request_timeout(),
        }
    }

    /// No retries and no backoff; each attempt still carries the timeout.
    pub fn once(timeout: Duration) -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            timeout,
        }
    }

    /// Delay before retry number `attempt` (1-based): base, 2*base, 4*base, ...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&StoreConfig::default())
    }
}

/// Run `op` until it succeeds, fails permanently, or exhausts the retry budget.
///
/// `op` is invoked once per attempt. Only timeouts and transient errors are retried.
pub async fn attempt<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut last_error = StoreError::Timeout;
    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let delay = policy.delay_for(attempt);
            debug!(label, attempt, delay_ms = delay.as_millis() as u64, "Retrying store call");
            tokio::time::sleep(delay).await;
        }

        let outcome = match tokio::time::timeout(policy.timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() => last_error = err,
            Err(err) => return Err(err),
        }
    }

    warn!(label, retries = policy.max_retries, error = %last_error, "Store call failed after retries");
    Err(last_error)
}
