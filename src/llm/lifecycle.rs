// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Connection lifecycle management
//!
//! [`TransportPool`] owns the shared HTTP client and the last-activity
//! timestamp. [`ConnectionManager`] runs a background check that drops idle
//! pooled connections after a period of inactivity. reqwest has no way to
//! evict idle sockets in place, so closing means swapping in a fresh client;
//! the old pool is dropped once in-flight requests release it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::settings::default_check_interval_secs;
use crate::config::ConnectionConfig;
use crate::error::Result;
use crate::llm::cancel::CancelScope;
use crate::llm::client::ChatClient;
use crate::llm::message::Message;
use crate::llm::wire::ChatRequest;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared HTTP transport with activity tracking
#[derive(Debug)]
pub struct TransportPool {
    client: RwLock<reqwest::Client>,
    last_activity: Mutex<Instant>,
    idle_closed: AtomicBool,
    resets: AtomicU64,
}

impl TransportPool {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: RwLock::new(Self::build_client()?),
            last_activity: Mutex::new(Instant::now()),
            idle_closed: AtomicBool::new(false),
            resets: AtomicU64::new(0),
        })
    }

    fn build_client() -> Result<reqwest::Client> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(client)
    }

    /// Handle to the current pooled client
    pub fn client(&self) -> reqwest::Client {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Record outbound activity
    pub fn touch(&self) {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
        self.idle_closed.store(false, Ordering::Release);
    }

    /// Time since the last recorded activity
    pub fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    /// Drop idle pooled connections by replacing the client
    pub fn close_idle(&self) -> Result<()> {
        let fresh = Self::build_client()?;
        *self.client.write().unwrap_or_else(PoisonError::into_inner) = fresh;
        self.idle_closed.store(true, Ordering::Release);
        self.resets.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Whether idle connections were closed since the last activity
    pub fn is_idle_closed(&self) -> bool {
        self.idle_closed.load(Ordering::Acquire)
    }

    /// How many times the pool has been reset
    pub fn reset_count(&self) -> u64 {
        self.resets.load(Ordering::Acquire)
    }
}

/// Owns the background idle-check task
#[derive(Debug)]
pub struct ConnectionManager {
    pool: Arc<TransportPool>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
    shut_down: bool,
}

impl ConnectionManager {
    /// A manager with no background task running yet
    pub fn new(pool: Arc<TransportPool>) -> Self {
        Self {
            pool,
            cancel: CancellationToken::new(),
            handle: None,
            shut_down: false,
        }
    }

    /// Start the idle check using the configured interval and threshold
    pub fn start_with_config(&mut self, config: &ConnectionConfig) {
        self.start(
            Duration::from_secs(config.check_interval_secs),
            Duration::from_secs(config.idle_timeout_secs),
        );
    }

    /// Spawn the background check. Must be called within a tokio runtime.
    /// Starting twice, or after shutdown, does nothing. A zero interval
    /// falls back to the default.
    pub fn start(&mut self, check_interval: Duration, idle_threshold: Duration) {
        if self.handle.is_some() || self.shut_down {
            return;
        }
        let check_interval = if check_interval.is_zero() {
            Duration::from_secs(default_check_interval_secs())
        } else {
            check_interval
        };

        let pool = Arc::clone(&self.pool);
        let cancel = self.cancel.clone();

        self.handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(check_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let idle = pool.idle_for();
                        if idle <= idle_threshold || pool.is_idle_closed() {
                            continue;
                        }
                        match pool.close_idle() {
                            Ok(()) => tracing::debug!(
                                target: "parley.llm.lifecycle",
                                idle_secs = idle.as_secs(),
                                "closed idle connections"
                            ),
                            Err(err) => tracing::warn!(
                                target: "parley.llm.lifecycle",
                                error = %err,
                                "failed to reset connection pool"
                            ),
                        }
                    }
                }
            }
            tracing::debug!(target: "parley.llm.lifecycle", "idle check stopped");
        }));
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    pub fn pool(&self) -> &Arc<TransportPool> {
        &self.pool
    }

    /// Stop the background task and force-close idle connections.
    /// Safe to call when never started and safe to call again.
    pub async fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.cancel.cancel();

        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                tracing::warn!(target: "parley.llm.lifecycle", error = %err, "idle check task failed");
            }
        }

        if let Err(err) = self.pool.close_idle() {
            tracing::warn!(target: "parley.llm.lifecycle", error = %err, "failed to close idle connections");
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Send a minimal request so the first real turn finds a warm connection.
///
/// Failures are advisory: they are logged and returned, never retried.
pub async fn warm_up(client: &ChatClient, model: &str, scope: &CancelScope) -> Result<()> {
    let request = ChatRequest::new(model, &[Message::user("ping")], 1);

    match client.complete_once(&request, scope).await {
        Ok(_) => {
            tracing::debug!(target: "parley.llm.lifecycle", model, "warm-up succeeded");
            Ok(())
        }
        Err(err) => {
            tracing::warn!(
                target: "parley.llm.lifecycle",
                model,
                error = %err,
                "warm-up failed"
            );
            Err(err)
        }
    }
}
