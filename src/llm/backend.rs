// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Chat backend trait
//!
//! The seam between the conversation service and the wire. [`ChatClient`]
//! talks HTTP; [`MockBackend`] replays scripted outcomes in tests.
//!
//! [`ChatClient`]: crate::llm::client::ChatClient
//! [`MockBackend`]: crate::llm::mock_backend::MockBackend

use async_trait::async_trait;

use crate::error::Result;
use crate::llm::cancel::CancelScope;
use crate::llm::message::ToolCall;
use crate::llm::stream::ChunkSource;
use crate::llm::wire::ChatRequest;

/// Result of a non-streaming completion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<String>,
}

impl Completion {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
            finish_reason: Some("stop".to_string()),
        }
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            text: String::new(),
            tool_calls: calls,
            finish_reason: Some("tool_calls".to_string()),
        }
    }
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Issue one logical non-streaming request, retrying as configured
    async fn complete(&self, request: &ChatRequest, scope: &CancelScope) -> Result<Completion>;

    /// Dispatch a streaming request and hand back its chunk source once the
    /// server has accepted it. Only the dispatch is retried.
    async fn open_stream(
        &self,
        request: &ChatRequest,
        scope: &CancelScope,
    ) -> Result<Box<dyn ChunkSource>>;
}
