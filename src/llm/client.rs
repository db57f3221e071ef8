// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! HTTP client for OpenAI-compatible chat-completions endpoints

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION, CACHE_CONTROL, CONNECTION, CONTENT_TYPE};

use crate::config::Settings;
use crate::error::{ApiError, ParleyError, Result};
use crate::llm::backend::{ChatBackend, Completion};
use crate::llm::cancel::CancelScope;
use crate::llm::classify::{classify_status, classify_transport};
use crate::llm::lifecycle::TransportPool;
use crate::llm::retry::{with_retry, RetryConfig};
use crate::llm::stream::{ChunkSource, SseDecoder};
use crate::llm::wire::{ChatRequest, ChatResponse};

/// Join a base URL and an endpoint path without doubling slashes
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        endpoint.trim_start_matches('/')
    )
}

/// Chat-completions client over a shared [`TransportPool`]
#[derive(Clone)]
pub struct ChatClient {
    pool: Arc<TransportPool>,
    endpoint: String,
    api_key: String,
    retry: RetryConfig,
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .field("retry", &self.retry)
            .finish()
    }
}

impl ChatClient {
    pub fn new(
        pool: Arc<TransportPool>,
        base_url: &str,
        api_key: impl Into<String>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            pool,
            endpoint: construct_api_url(base_url, "chat/completions"),
            api_key: api_key.into(),
            retry,
        }
    }

    /// Build a client from settings; the key must already be resolved
    pub fn from_settings(pool: Arc<TransportPool>, settings: &Settings, api_key: String) -> Self {
        Self::new(
            pool,
            &settings.api.base_url,
            api_key,
            RetryConfig::from(&settings.resilience),
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn pool(&self) -> &Arc<TransportPool> {
        &self.pool
    }

    /// Dispatch one attempt and check its status
    async fn send(&self, request: &ChatRequest, attempt: u32) -> Result<reqwest::Response> {
        self.pool.touch();

        tracing::debug!(
            target: "parley.llm.client",
            model = %request.model,
            messages = request.messages.len(),
            stream = request.is_streaming(),
            attempt,
            "dispatching chat request"
        );

        let mut builder = self
            .pool
            .client()
            .post(&self.endpoint)
            .header(AUTHORIZATION, format!("Bearer {}", &self.api_key))
            .header(CONTENT_TYPE, "application/json");

        if request.is_streaming() {
            builder = builder
                .header(ACCEPT, "text/event-stream")
                .header(CACHE_CONTROL, "no-cache")
                .header(CONNECTION, "keep-alive");
        }

        let response = builder
            .json(request)
            .send()
            .await
            .map_err(|err| ParleyError::Api(classify_transport(&err)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        let error = classify_status(status, &headers, &body);
        tracing::debug!(
            target: "parley.llm.client",
            status = status.as_u16(),
            error = %error,
            "chat request rejected"
        );
        Err(ParleyError::Api(error))
    }

    async fn complete_attempt(&self, request: &ChatRequest, attempt: u32) -> Result<Completion> {
        let response = self.send(request, attempt).await?;
        let body = response
            .text()
            .await
            .map_err(|err| ParleyError::Api(classify_transport(&err)))?;

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|err| ParleyError::Api(ApiError::Decode(err.to_string())))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or(ParleyError::Api(ApiError::EmptyResponse))?;

        Ok(Completion {
            text: choice.message.content.unwrap_or_default(),
            tool_calls: choice
                .message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(Into::into)
                .collect(),
            finish_reason: choice.finish_reason,
        })
    }

    /// A single attempt with no retries, still bound to `scope`
    pub async fn complete_once(&self, request: &ChatRequest, scope: &CancelScope) -> Result<Completion> {
        scope.run(self.complete_attempt(request, 1)).await?
    }
}

#[async_trait]
impl ChatBackend for ChatClient {
    async fn complete(&self, request: &ChatRequest, scope: &CancelScope) -> Result<Completion> {
        with_retry(
            |attempt| self.complete_attempt(request, attempt),
            &self.retry,
            scope,
            "chat completion",
        )
        .await
    }

    async fn open_stream(
        &self,
        request: &ChatRequest,
        scope: &CancelScope,
    ) -> Result<Box<dyn ChunkSource>> {
        let streaming;
        let request = if request.is_streaming() {
            request
        } else {
            streaming = request.clone().streaming(true);
            &streaming
        };

        let response = with_retry(
            |attempt| self.send(request, attempt),
            &self.retry,
            scope,
            "chat stream",
        )
        .await?;

        let body = response
            .bytes_stream()
            .map(|item| item.map(|bytes| bytes.to_vec()).map_err(ParleyError::from));

        Ok(Box::new(SseDecoder::new(Box::pin(body), scope.clone())))
    }
}
