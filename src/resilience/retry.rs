// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bounded retry with exponential backoff.
//!
//! Used around every source fetch and every sink send. The caller supplies a
//! predicate deciding which errors are worth another attempt; anything else
//! is returned immediately.
//!
//! # Example
//!
//! ```
//! use sync_pipeline::RetryConfig;
//! use std::time::Duration;
//!
//! let source = RetryConfig::source();
//! assert_eq!(source.max_attempts, 3);
//! assert_eq!(source.delay_before(2), Duration::from_secs(2));
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::PipelineConfig;

/// Retry policy: `max_attempts` total tries, sleeping
/// `initial_delay * factor^(n-1)` (capped at `max_delay`) after the n-th failure.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::source()
    }
}

impl RetryConfig {
    /// Source fetches: 3 attempts, 1s then 2s.
    #[must_use]
    pub fn source() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            factor: 2.0,
        }
    }

    /// Sink sends: same shape as the source policy.
    #[must_use]
    pub fn sink() -> Self {
        Self::source()
    }

    /// Policy described by the pipeline configuration.
    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_attempts: config.retry_max_attempts,
            initial_delay: Duration::from_millis(config.retry_initial_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
            factor: config.retry_multiplier,
        }
    }

    /// Retry with no sleeping, for tests that count attempts.
    #[must_use]
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            factor: 1.0,
        }
    }

    /// Sleep taken after failed attempt number `attempt` (1-based).
    pub fn delay_before(&self, attempt: usize) -> Duration {
        let mut delay = self.initial_delay;
        for _ in 1..attempt {
            delay = delay.mul_f64(self.factor).min(self.max_delay);
        }
        delay
    }

    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        }
    }
}

/// Run `operation` until it succeeds, returns a non-retryable error, or
/// `max_attempts` is reached. The last error is returned on exhaustion.
pub async fn retry<F, Fut, T, E, P>(
    operation_name: &str,
    config: &RetryConfig,
    is_retryable: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut delay = config.initial_delay;
    let mut attempts = 0;

    loop {
        match operation().await {
            Ok(val) => {
                if attempts > 0 {
                    info!("Operation '{}' succeeded after {} retries", operation_name, attempts);
                }
                return Ok(val);
            }
            Err(err) => {
                attempts += 1;

                if !is_retryable(&err) {
                    warn!(
                        "Operation '{}' failed with non-retryable error (attempt {}): {}",
                        operation_name, attempts, err
                    );
                    return Err(err);
                }

                if attempts >= max_attempts {
                    warn!(
                        "Operation '{}' giving up after {} attempts: {}",
                        operation_name, attempts, err
                    );
                    crate::metrics::record_retry_exhausted(operation_name);
                    return Err(err);
                }

                warn!(
                    "Operation '{}' failed (attempt {}/{}): {}. Retrying in {:?}...",
                    operation_name, attempts, max_attempts, err, delay
                );
                crate::metrics::record_retry(operation_name);

                sleep(delay).await;
                delay = delay.mul_f64(config.factor).min(config.max_delay);
            }
        }
    }
}
