//! Bounded timeout and retry for calls into external collaborators.
//!
//! Every call into the embedding index or the attribute synthesizer goes
//! through [`CollaboratorPolicy::call`], so an unresponsive backend costs at
//! most `(max_retries + 1) * timeout` plus backoff, never an unbounded wait.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Timeout and retry budget for one collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollaboratorPolicy {
    /// Deadline for a single attempt in milliseconds
    pub timeout_ms: u64,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry in milliseconds; doubles per retry
    pub backoff_ms: u64,
    /// Upper bound on a single backoff delay
    pub max_backoff_ms: u64,
}

impl Default for CollaboratorPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_retries: 2,
            backoff_ms: 200,
            max_backoff_ms: 5_000,
        }
    }
}

impl CollaboratorPolicy {
    /// Single attempt, no backoff.
    pub fn no_retry(timeout_ms: u64) -> Self {
        Self {
            timeout_ms,
            max_retries: 0,
            backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff_ms(mut self, backoff_ms: u64) -> Self {
        self.backoff_ms = backoff_ms;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.saturating_sub(1).min(16);
        let delay = self.backoff_ms.saturating_mul(factor).min(self.max_backoff_ms);
        Duration::from_millis(delay)
    }

    /// Run `op` under this policy.
    ///
    /// Each attempt is bounded by `timeout_ms`. Retryable failures
    /// (collaborator errors and timeouts) are retried up to `max_retries`
    /// times with exponential backoff; any other error returns at once.
    pub async fn call<T, F, Fut>(&self, collaborator: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let outcome = match tokio::time::timeout(self.timeout(), op()).await {
                Ok(result) => result,
                Err(_) => Err(Error::collaborator_timeout(collaborator, self.timeout_ms)),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.backoff_for(attempt);
                    debug!(
                        collaborator,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying collaborator call"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if e.is_retryable() {
                        warn!(collaborator, attempts = attempt + 1, error = %e, "Collaborator call failed");
                    }
                    return Err(e);
                }
            }
        }
    }
}
