// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Retry logic for chat API calls with exponential backoff

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::config::settings::ResilienceConfig;
use crate::error::{ApiError, ParleyError, Result};
use crate::llm::cancel::CancelScope;

/// Retry configuration with smart defaults
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt (3 means 4 attempts total)
    pub max_retries: u32,
    /// Delay before the first retry; doubles for each further retry
    pub base_delay_ms: u64,
    /// Hard cap on any single delay
    pub max_delay_ms: u64,
    /// Fraction of the exponential delay added as random jitter (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&ResilienceConfig::default())
    }
}

impl From<&ResilienceConfig> for RetryConfig {
    fn from(config: &ResilienceConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
            jitter: config.jitter.clamp(0.0, 1.0),
        }
    }
}

impl RetryConfig {
    /// A config that makes exactly one attempt
    pub fn single_attempt() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Total attempts including the first
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (1-based).
    ///
    /// `base * 2^(retry-1)` plus non-negative jitter, raised to any
    /// server-supplied `Retry-After`, then capped at `max_delay_ms`.
    pub fn calculate_delay(&self, retry: u32, retry_after_secs: Option<u64>) -> Duration {
        let exponent = retry.saturating_sub(1).min(32);
        let exponential_ms = self.base_delay_ms.saturating_mul(1u64 << exponent);

        let jitter_range = (exponential_ms as f64 * self.jitter) as u64;
        let jitter_ms = if jitter_range > 0 {
            rand::rng().random_range(0..=jitter_range)
        } else {
            0
        };

        let floor_ms = retry_after_secs.unwrap_or(0).saturating_mul(1000);
        let delay_ms = exponential_ms
            .saturating_add(jitter_ms)
            .max(floor_ms)
            .min(self.max_delay_ms);

        Duration::from_millis(delay_ms)
    }
}

fn retry_after_hint(error: &ParleyError) -> Option<u64> {
    match error.api_error() {
        Some(ApiError::RateLimited {
            retry_after_secs, ..
        }) => *retry_after_secs,
        _ => None,
    }
}

/// Run `operation` with exponential backoff
///
/// # Arguments
/// * `operation` - Called with the 1-based attempt number; each call must
///   issue a fresh request
/// * `config` - Retry ceiling and delay parameters
/// * `scope` - Checked before every dispatch and every sleep; sleeps and
///   in-flight attempts are aborted when it fires
/// * `operation_name` - Name of the operation for logging
///
/// Non-retryable errors and cancellations return immediately. Exhausting the
/// ceiling returns [`ParleyError::RetriesExhausted`] wrapping the last cause.
pub async fn with_retry<F, Fut, T>(
    mut operation: F,
    config: &RetryConfig,
    scope: &CancelScope,
    operation_name: &str,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.max_attempts();
    let mut attempt = 1;

    loop {
        scope.check()?;

        let error = match scope.run(operation(attempt)).await? {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(
                        target: "parley.llm.retry",
                        operation = operation_name,
                        attempt,
                        "succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(error) => error,
        };

        if error.is_cancelled() {
            return Err(error);
        }

        if !error.is_retryable() {
            tracing::debug!(
                target: "parley.llm.retry",
                operation = operation_name,
                attempt,
                error = %error,
                "non-retryable failure"
            );
            return Err(error);
        }

        if attempt >= max_attempts {
            tracing::warn!(
                target: "parley.llm.retry",
                operation = operation_name,
                attempts = attempt,
                error = %error,
                "retries exhausted"
            );
            return Err(ParleyError::RetriesExhausted {
                attempts: attempt,
                last: Box::new(error),
            });
        }

        let delay = config.calculate_delay(attempt, retry_after_hint(&error));
        tracing::warn!(
            target: "parley.llm.retry",
            operation = operation_name,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "attempt failed, backing off"
        );

        scope.check()?;
        scope.sleep(delay).await?;
        attempt += 1;
    }
}
