// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Turn state and streaming turn consumption
//!
//! A turn moves `Idle -> Sending -> Streaming -> Finalizing -> Completed`
//! and back to `Idle` when its guard drops, on every exit path.
//! [`TurnStream`] is consumed one chunk at a time through
//! [`TurnStream::next_event`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{ParleyError, Result};
use crate::llm::message::ToolCall;
use crate::llm::stream::ChunkSource;
use crate::llm::tool_calls::{is_tool_finish, ToolCallAccumulator};

/// Phase of the turn currently owned by a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnPhase {
    #[default]
    Idle,
    Sending,
    Streaming,
    Finalizing,
    Completed,
}

/// Shared phase cell; one turn at a time may hold it
#[derive(Debug, Clone, Default)]
pub struct PhaseCell(Arc<Mutex<TurnPhase>>);

impl PhaseCell {
    pub fn get(&self) -> TurnPhase {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the cell for a new turn
    pub(crate) fn begin(&self) -> Result<PhaseGuard> {
        let mut phase = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if *phase != TurnPhase::Idle {
            return Err(ParleyError::InvalidInput(
                "turn already in progress".to_string(),
            ));
        }
        *phase = TurnPhase::Sending;
        Ok(PhaseGuard { cell: self.clone() })
    }

    fn set(&self, next: TurnPhase) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }
}

/// Returns the cell to `Idle` on drop
#[derive(Debug)]
pub struct PhaseGuard {
    cell: PhaseCell,
}

impl PhaseGuard {
    pub fn set(&self, phase: TurnPhase) {
        tracing::trace!(target: "parley.chat.service", ?phase, "turn phase");
        self.cell.set(phase);
    }
}

impl Drop for PhaseGuard {
    fn drop(&mut self) {
        self.cell.set(TurnPhase::Idle);
    }
}

/// Final result of a turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Plain assistant text
    Text {
        text: String,
        finish_reason: Option<String>,
    },
    /// The model asked for tools; `calls` may be empty when the server
    /// declared tool use without sending any fragments
    ToolCalls { text: String, calls: Vec<ToolCall> },
}

impl TurnOutcome {
    pub fn text(&self) -> &str {
        match self {
            TurnOutcome::Text { text, .. } | TurnOutcome::ToolCalls { text, .. } => text,
        }
    }
}

/// Incremental event from a streaming turn
#[derive(Debug)]
pub enum TurnEvent {
    /// A text delta, in arrival order
    Text(String),
    /// Terminal: the turn ended with tool calls
    ToolCalls { text: String, calls: Vec<ToolCall> },
    /// Terminal: the turn ended with plain text
    Finished {
        text: String,
        finish_reason: Option<String>,
    },
    /// Terminal: the stream failed; whatever arrived is kept
    Failed {
        error: ParleyError,
        partial_text: String,
        partial_tool_calls: Vec<ToolCall>,
    },
}

impl TurnEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TurnEvent::Text(_))
    }
}

/// A streaming turn in progress
pub struct TurnStream {
    source: Box<dyn ChunkSource>,
    text: String,
    tool_calls: ToolCallAccumulator,
    finish_reason: Option<String>,
    pending: VecDeque<TurnEvent>,
    guard: Option<PhaseGuard>,
    done: bool,
}

impl TurnStream {
    pub(crate) fn new(source: Box<dyn ChunkSource>, guard: Option<PhaseGuard>) -> Self {
        if let Some(guard) = &guard {
            guard.set(TurnPhase::Streaming);
        }
        Self {
            source,
            text: String::new(),
            tool_calls: ToolCallAccumulator::new(),
            finish_reason: None,
            pending: VecDeque::new(),
            guard,
            done: false,
        }
    }

    /// Wrap a chunk source outside any service; used by tests and tools
    pub fn from_source(source: Box<dyn ChunkSource>) -> Self {
        Self::new(source, None)
    }

    /// Text received so far
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Next event, or `None` once the terminal event has been returned
    pub async fn next_event(&mut self) -> Option<TurnEvent> {
        if let Some(event) = self.pending.pop_front() {
            return Some(event);
        }
        if self.done {
            return None;
        }

        loop {
            match self.source.recv().await {
                Ok(Some(chunk)) => {
                    if !chunk.tool_calls.is_empty() {
                        self.tool_calls.apply(&chunk.tool_calls);
                    }

                    if let Some(delta) = chunk.text.filter(|t| !t.is_empty()) {
                        self.text.push_str(&delta);
                        self.pending.push_back(TurnEvent::Text(delta));
                    }

                    if is_tool_finish(chunk.finish_reason.as_deref()) {
                        tracing::debug!(
                            target: "parley.chat.service",
                            calls = self.tool_calls.calls().len(),
                            "tool calls declared complete"
                        );
                        self.source.close();
                        let event = self.tool_call_event();
                        self.finish(event);
                    } else if let Some(reason) = chunk.finish_reason {
                        self.finish_reason = Some(reason);
                    }

                    if let Some(event) = self.pending.pop_front() {
                        return Some(event);
                    }
                }
                Ok(None) => {
                    let event = if self.tool_calls.is_empty() {
                        TurnEvent::Finished {
                            text: self.text.clone(),
                            finish_reason: self.finish_reason.clone(),
                        }
                    } else {
                        // Tool calls with no finish reason still count as complete.
                        tracing::debug!(
                            target: "parley.chat.service",
                            "stream ended without finish reason; surfacing accumulated tool calls"
                        );
                        self.tool_call_event()
                    };
                    self.finish(event);
                    return self.pending.pop_front();
                }
                Err(error) => {
                    self.source.close();
                    if !error.is_user_cancellation() {
                        tracing::warn!(
                            target: "parley.chat.service",
                            error = %error,
                            partial_chars = self.text.len(),
                            "stream failed"
                        );
                    }
                    let event = TurnEvent::Failed {
                        error,
                        partial_text: self.text.clone(),
                        partial_tool_calls: self.tool_calls.calls().to_vec(),
                    };
                    self.finish(event);
                    return self.pending.pop_front();
                }
            }
        }
    }

    fn tool_call_event(&mut self) -> TurnEvent {
        TurnEvent::ToolCalls {
            text: self.text.clone(),
            calls: std::mem::take(&mut self.tool_calls).into_calls(),
        }
    }

    fn finish(&mut self, event: TurnEvent) {
        if let Some(guard) = &self.guard {
            guard.set(TurnPhase::Finalizing);
        }
        self.pending.push_back(event);
        self.done = true;
        if let Some(guard) = self.guard.take() {
            guard.set(TurnPhase::Completed);
        }
    }

    /// Drain the stream and return the terminal result
    pub async fn into_outcome(mut self) -> Result<TurnOutcome> {
        while let Some(event) = self.next_event().await {
            match event {
                TurnEvent::Text(_) => {}
                TurnEvent::ToolCalls { text, calls } => {
                    return Ok(TurnOutcome::ToolCalls { text, calls })
                }
                TurnEvent::Finished {
                    text,
                    finish_reason,
                } => return Ok(TurnOutcome::Text {
                    text,
                    finish_reason,
                }),
                TurnEvent::Failed { error, .. } => return Err(error),
            }
        }
        Err(ParleyError::InvalidInput("turn already consumed".to_string()))
    }
}

impl Drop for TurnStream {
    fn drop(&mut self) {
        self.source.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ApiError, CancelReason};
    use crate::llm::cancel::CancelScope;
    use crate::llm::stream::{ReplaySource, StreamChunk};
    use crate::llm::tool_calls::ToolCallFragment;

    fn stream(chunks: Vec<StreamChunk>) -> TurnStream {
        TurnStream::from_source(Box::new(ReplaySource::new(chunks)))
    }

    #[tokio::test]
    async fn test_text_events_then_finished() {
        let mut turn = stream(vec![
            StreamChunk::text("Hel"),
            StreamChunk::text("lo"),
            StreamChunk::finish("stop"),
        ]);

        assert!(matches!(turn.next_event().await, Some(TurnEvent::Text(t)) if t == "Hel"));
        assert!(matches!(turn.next_event().await, Some(TurnEvent::Text(t)) if t == "lo"));
        match turn.next_event().await {
            Some(TurnEvent::Finished {
                text,
                finish_reason,
            }) => {
                assert_eq!(text, "Hello");
                assert_eq!(finish_reason.as_deref(), Some("stop"));
            }
            other => panic!("expected Finished, got {other:?}"),
        }
        assert!(turn.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_tool_finish_without_fragments_is_empty_declared_completion() {
        let mut turn = stream(vec![StreamChunk::finish("tool_calls")]);
        match turn.next_event().await {
            Some(TurnEvent::ToolCalls { text, calls }) => {
                assert!(text.is_empty());
                assert!(calls.is_empty());
            }
            other => panic!("expected ToolCalls, got {other:?}"),
        }
        assert!(turn.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_tool_finish_stops_reading() {
        let mut turn = stream(vec![
            StreamChunk::tool_calls(vec![ToolCallFragment::with_id("a", Some("f"), "{}")]),
            StreamChunk::finish("tool_calls"),
            StreamChunk::text("ignored"),
        ]);
        let outcome = {
            let mut last = None;
            while let Some(event) = turn.next_event().await {
                last = Some(event);
            }
            last
        };
        match outcome {
            Some(TurnEvent::ToolCalls { calls, .. }) => {
                assert_eq!(calls, vec![ToolCall::new("a", "f", "{}")]);
            }
            other => panic!("expected ToolCalls, got {other:?}"),
        }
        assert_eq!(turn.text(), "");
    }

    #[tokio::test]
    async fn test_lenient_end_of_stream_surfaces_accumulated_calls() {
        // No finish reason at all: accumulated calls still count as complete.
        let turn = stream(vec![
            StreamChunk::tool_calls(vec![ToolCallFragment::with_id("a", Some("f"), "{\"x\":")]),
            StreamChunk::tool_calls(vec![ToolCallFragment::with_id("a", None, "1}")]),
        ]);
        match turn.into_outcome().await.unwrap() {
            TurnOutcome::ToolCalls { calls, .. } => {
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].arguments, "{\"x\":1}");
            }
            other => panic!("expected ToolCalls, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failure_keeps_partial_text_and_calls() {
        let source = ReplaySource::new(vec![
            StreamChunk::text("partial"),
            StreamChunk::tool_calls(vec![ToolCallFragment::with_id("a", Some("f"), "{")]),
        ])
        .failing_with(ParleyError::Api(ApiError::Transport("reset".to_string())));
        let mut turn = TurnStream::from_source(Box::new(source));

        assert!(matches!(turn.next_event().await, Some(TurnEvent::Text(_))));
        match turn.next_event().await {
            Some(TurnEvent::Failed {
                error,
                partial_text,
                partial_tool_calls,
            }) => {
                assert!(error.is_retryable());
                assert_eq!(partial_text, "partial");
                assert_eq!(partial_tool_calls.len(), 1);
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancellation_surfaces_as_failed_event() {
        let scope = CancelScope::new();
        let source = ReplaySource::new(vec![StreamChunk::text("a"), StreamChunk::text("b")])
            .with_scope(scope.clone());
        let mut turn = TurnStream::from_source(Box::new(source));

        assert!(matches!(turn.next_event().await, Some(TurnEvent::Text(_))));
        scope.cancel();
        match turn.next_event().await {
            Some(TurnEvent::Failed {
                error,
                partial_text,
                ..
            }) => {
                assert!(matches!(error, ParleyError::Cancelled(CancelReason::User)));
                assert_eq!(partial_text, "a");
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn test_phase_guard_returns_to_idle() {
        let cell = PhaseCell::default();
        {
            let guard = cell.begin().unwrap();
            assert_eq!(cell.get(), TurnPhase::Sending);
            assert!(cell.begin().is_err());
            guard.set(TurnPhase::Completed);
        }
        assert_eq!(cell.get(), TurnPhase::Idle);
        assert!(cell.begin().is_ok());
    }

    #[tokio::test]
    async fn test_streaming_turn_releases_phase_after_terminal_event() {
        let cell = PhaseCell::default();
        let guard = cell.begin().unwrap();
        let mut turn = TurnStream::new(
            Box::new(ReplaySource::new(vec![StreamChunk::text("x")])),
            Some(guard),
        );
        assert_eq!(cell.get(), TurnPhase::Streaming);

        while turn.next_event().await.is_some() {}
        assert_eq!(cell.get(), TurnPhase::Idle);
    }
}
