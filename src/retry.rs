//! Retry orchestration for measurement points
//!
//! Benchmark points fail for transient reasons (remote OOM, deadlock, stalled
//! output) far more often than for permanent ones, and each attempt is cheap
//! relative to operator time. The default policy therefore retries without
//! bound; a cap can be injected for unattended runs.

use crate::error::Result;

/// How many attempts a point is allowed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Retry until the point succeeds or fails non-retryably.
    #[default]
    Unbounded,
    /// Allow at most this many attempts in total.
    Capped(usize),
}

impl RetryPolicy {
    /// Whether another attempt may follow `attempts_made` completed attempts.
    pub fn allows_another(&self, attempts_made: usize) -> bool {
        match self {
            RetryPolicy::Unbounded => true,
            RetryPolicy::Capped(max) => attempts_made < *max,
        }
    }
}

/// Runs a fallible operation to completion under a retry policy
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryOrchestrator {
    policy: RetryPolicy,
}

impl RetryOrchestrator {
    /// Create an orchestrator with the given policy.
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Run `attempt` until it succeeds or the policy is exhausted.
    ///
    /// Retryable errors are logged and retried; non-retryable errors
    /// propagate immediately regardless of the policy.
    pub fn run<T>(&self, label: &str, mut attempt: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempts = 0usize;
        loop {
            attempts += 1;
            match attempt() {
                Ok(value) => {
                    if attempts > 1 {
                        tracing::info!(point = %label, attempts, "point succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && self.policy.allows_another(attempts) => {
                    tracing::warn!(point = %label, attempt = attempts, error = %err, "attempt failed, retrying");
                }
                Err(err) => return Err(err),
            }
        }
    }
}
