// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Cancellation scope carried by every outbound operation
//!
//! A scope pairs a [`CancellationToken`] (user aborts) with an optional
//! deadline (model-aware request timeout). Network dispatch, stream reads and
//! retry sleeps all race their work against [`CancelScope::cancelled`].

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{CancelReason, ParleyError, Result};

#[derive(Debug, Clone, Default)]
pub struct CancelScope {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl CancelScope {
    /// A scope with a fresh token and no deadline
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a scope from a caller token, expiring `timeout` from now
    pub fn with_timeout(token: CancellationToken, timeout: Duration) -> Self {
        Self {
            token,
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Same token, new deadline `timeout` from now
    pub fn deadline_in(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancel every operation sharing this scope's token
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Non-blocking check, used before dispatch, before sleeps and before
    /// each stream line read.
    pub fn check(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(ParleyError::Cancelled(CancelReason::User));
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(ParleyError::Cancelled(CancelReason::DeadlineExceeded));
        }
        Ok(())
    }

    /// Resolves once the token fires or the deadline passes.
    pub async fn cancelled(&self) -> CancelReason {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => CancelReason::User,
                    _ = tokio::time::sleep_until(deadline) => CancelReason::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                CancelReason::User
            }
        }
    }

    /// Run `future` unless the scope is cancelled first; the future is
    /// dropped (aborting any in-flight I/O) on cancellation.
    pub async fn run<F>(&self, future: F) -> Result<F::Output>
    where
        F: Future,
    {
        self.check()?;
        tokio::select! {
            biased;
            reason = self.cancelled() => Err(ParleyError::Cancelled(reason)),
            output = future => Ok(output),
        }
    }

    /// Sleep for `delay`, waking early with an error on cancellation
    pub async fn sleep(&self, delay: Duration) -> Result<()> {
        self.run(tokio::time::sleep(delay)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_scope_is_not_cancelled() {
        let scope = CancelScope::new();
        assert!(scope.check().is_ok());
        assert!(scope.deadline().is_none());
    }

    #[tokio::test]
    async fn test_with_timeout_shares_caller_token() {
        let token = CancellationToken::new();
        let scope = CancelScope::with_timeout(token.clone(), Duration::from_secs(60));
        assert!(scope.deadline().is_some_and(|d| d > Instant::now()));

        token.cancel();
        assert!(scope.token().is_cancelled());
        assert!(matches!(
            scope.check(),
            Err(ParleyError::Cancelled(CancelReason::User))
        ));
    }

    #[test]
    fn test_token_cancel_reports_user_reason() {
        let scope = CancelScope::new();
        scope.cancel();
        assert!(matches!(
            scope.check(),
            Err(ParleyError::Cancelled(CancelReason::User))
        ));
    }

    #[tokio::test]
    async fn test_elapsed_deadline_reports_deadline_reason() {
        let scope = CancelScope::with_timeout(CancellationToken::new(), Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matches!(
            scope.check(),
            Err(ParleyError::Cancelled(CancelReason::DeadlineExceeded))
        ));
    }

    #[tokio::test]
    async fn test_run_aborts_pending_future() {
        let scope = CancelScope::new();
        let canceller = scope.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let result = scope.run(futures::future::pending::<()>()).await;
        assert!(matches!(
            result,
            Err(ParleyError::Cancelled(CancelReason::User))
        ));
    }

    #[tokio::test]
    async fn test_sleep_is_interrupted_by_deadline() {
        let scope = CancelScope::new().deadline_in(Duration::from_millis(10));
        let started = std::time::Instant::now();
        let result = scope.sleep(Duration::from_secs(30)).await;
        assert!(matches!(
            result,
            Err(ParleyError::Cancelled(CancelReason::DeadlineExceeded))
        ));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_run_returns_output_when_not_cancelled() {
        let scope = CancelScope::new();
        assert_eq!(scope.run(async { 7 }).await.unwrap(), 7);
    }
}
