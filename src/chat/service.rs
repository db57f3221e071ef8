// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Conversation service
//!
//! Assembles the message list for a turn, gates it on the context budget,
//! and drives the backend in streaming or non-streaming mode.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::chat::turn::{PhaseCell, TurnOutcome, TurnPhase, TurnStream};
use crate::config::{ApiConfig, ConnectionConfig, Settings};
use crate::error::Result;
use crate::llm::backend::ChatBackend;
use crate::llm::budget::{history_window, trim_history, BudgetReport, ContextBudget};
use crate::llm::cancel::CancelScope;
use crate::llm::message::{Message, ToolChoice, ToolDefinition};
use crate::llm::model::ModelProfile;
use crate::llm::tool_calls::is_tool_finish;
use crate::llm::wire::ChatRequest;

/// The caller-supplied parts of a turn's prompt
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptParts {
    /// Loaded file context, sent as a system-role message
    pub context: Option<String>,
    /// The user turn; omitted from the request when blank
    pub user: String,
}

impl PromptParts {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            context: None,
            user: user.into(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        let context = context.into();
        self.context = (!context.trim().is_empty()).then_some(context);
        self
    }
}

/// Orchestrates one turn at a time against a [`ChatBackend`]
pub struct ConversationService {
    backend: Arc<dyn ChatBackend>,
    api: ApiConfig,
    connection: ConnectionConfig,
    budget: ContextBudget,
    history_window: usize,
    phase: PhaseCell,
}

impl ConversationService {
    pub fn new(backend: Arc<dyn ChatBackend>, settings: &Settings) -> Self {
        Self {
            backend,
            api: settings.api.clone(),
            connection: settings.connection.clone(),
            budget: ContextBudget::from_config(&settings.conversation),
            history_window: history_window(&settings.conversation),
            phase: PhaseCell::default(),
        }
    }

    /// Use `model` instead of the configured default
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.api.model = model.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.api.model
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase.get()
    }

    pub fn profile(&self) -> ModelProfile {
        ModelProfile::for_model(&self.api.model, &self.api)
    }

    /// Cancellation scope for a request dispatched now, bounded by the
    /// model's deadline
    pub fn scope_for_dispatch(&self, token: &CancellationToken) -> CancelScope {
        CancelScope::with_timeout(token.clone(), self.profile().timeout(&self.connection))
    }

    /// Check the combined prompt against the budget without sending anything
    pub fn check_budget(&self, parts: &PromptParts) -> Result<BudgetReport> {
        let mut prompt = self.api.system_prompt.clone();
        if let Some(context) = &parts.context {
            prompt.push_str(context);
        }
        self.budget.check(&prompt, &parts.user)
    }

    /// System instruction, windowed history, optional context, user turn
    pub fn build_messages(&self, history: &[Message], parts: &PromptParts) -> Vec<Message> {
        let window = trim_history(history, self.history_window);
        let mut messages = Vec::with_capacity(window.len() + 3);

        messages.push(Message::system(self.api.system_prompt.clone()));
        messages.extend(window.iter().cloned());
        if let Some(context) = &parts.context {
            messages.push(Message::system(context.clone()));
        }
        if !parts.user.trim().is_empty() {
            messages.push(Message::user(parts.user.clone()));
        }
        messages
    }

    fn prepare(
        &self,
        history: &[Message],
        parts: &PromptParts,
        tools: &[ToolDefinition],
        tool_choice: Option<ToolChoice>,
        stream: bool,
    ) -> Result<ChatRequest> {
        let report = self.check_budget(parts)?;
        let messages = self.build_messages(history, parts);
        let profile = self.profile();

        tracing::debug!(
            target: "parley.chat.service",
            model = %self.api.model,
            messages = messages.len(),
            tools = tools.len(),
            chars = report.chars,
            tokens = report.tokens,
            stream,
            "prepared turn"
        );

        Ok(
            ChatRequest::new(&self.api.model, &messages, self.api.max_output_tokens)
                .with_temperature(profile.temperature(self.api.temperature))
                .with_tools(tools, tool_choice)
                .streaming(stream),
        )
    }

    /// Run a non-streaming turn.
    ///
    /// Tool calls in the response are returned instead of plain text. The
    /// budget is checked before any request is made.
    pub async fn send_turn(
        &self,
        history: &[Message],
        parts: &PromptParts,
        tools: &[ToolDefinition],
        tool_choice: Option<ToolChoice>,
        token: &CancellationToken,
    ) -> Result<TurnOutcome> {
        let guard = self.phase.begin()?;
        let request = self.prepare(history, parts, tools, tool_choice, false)?;
        let scope = self.scope_for_dispatch(token);

        let completion = self.backend.complete(&request, &scope).await?;
        guard.set(TurnPhase::Completed);

        if !completion.tool_calls.is_empty() || is_tool_finish(completion.finish_reason.as_deref())
        {
            return Ok(TurnOutcome::ToolCalls {
                text: completion.text,
                calls: completion.tool_calls,
            });
        }

        Ok(TurnOutcome::Text {
            text: completion.text,
            finish_reason: completion.finish_reason,
        })
    }

    /// Start a streaming turn. Events are read from the returned
    /// [`TurnStream`]; the service stays busy until its terminal event.
    pub async fn stream_turn(
        &self,
        history: &[Message],
        parts: &PromptParts,
        tools: &[ToolDefinition],
        tool_choice: Option<ToolChoice>,
        token: &CancellationToken,
    ) -> Result<TurnStream> {
        let guard = self.phase.begin()?;
        let request = self.prepare(history, parts, tools, tool_choice, true)?;
        let scope = self.scope_for_dispatch(token);

        let source = self.backend.open_stream(&request, &scope).await?;
        Ok(TurnStream::new(source, Some(guard)))
    }
}
