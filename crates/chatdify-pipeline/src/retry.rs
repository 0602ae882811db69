// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Exponential backoff for queue retries and per-mutation retries.

use std::future::Future;
use std::time::Duration;

use chatdify_config::model::{PipelineConfig, QueueConfig};
use chatdify_core::BridgeError;
use tracing::warn;

/// Bounded exponential backoff: `base * 2^(attempt - 1)`, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_queue(config: &QueueConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    pub fn for_mutations(config: &PipelineConfig) -> Self {
        let base_delay = Duration::from_millis(config.mutation_base_delay_ms);
        Self {
            max_attempts: config.mutation_attempts.max(1),
            base_delay,
            max_delay: base_delay.saturating_mul(8),
        }
    }

    /// Delay to wait after the `attempt`-th failure (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. Returns the last error on exhaustion.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, BridgeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BridgeError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(operation, attempt, error = %e, delay_ms = delay.as_millis() as u64, "transient failure, will retry");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
