// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Background turn dispatch
//!
//! Runs turns on their own tasks and reports `(stream_id, event)` pairs over
//! an unbounded channel, so a UI loop can keep drawing while a turn runs.
//! Stale ids let the UI drop events from turns it has abandoned.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::chat::service::{ConversationService, PromptParts};
use crate::chat::turn::{TurnEvent, TurnOutcome};
use crate::llm::message::{Message, ToolChoice, ToolDefinition};

/// Everything a turn needs, owned so it can move onto a task
#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    pub history: Vec<Message>,
    pub parts: PromptParts,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: Option<ToolChoice>,
}

impl TurnRequest {
    pub fn new(history: Vec<Message>, parts: PromptParts) -> Self {
        Self {
            history,
            parts,
            ..Self::default()
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>, tool_choice: Option<ToolChoice>) -> Self {
        self.tools = tools;
        self.tool_choice = tool_choice;
        self
    }
}

pub type DispatchReceiver = mpsc::UnboundedReceiver<(u64, TurnEvent)>;

pub struct StreamDispatcher {
    tx: mpsc::UnboundedSender<(u64, TurnEvent)>,
    next_id: AtomicU64,
}

impl StreamDispatcher {
    pub fn new() -> (Self, DispatchReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                next_id: AtomicU64::new(1),
            },
            rx,
        )
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Spawn a streaming turn; returns its stream id
    pub fn spawn_stream(
        &self,
        service: Arc<ConversationService>,
        request: TurnRequest,
        token: CancellationToken,
    ) -> u64 {
        let stream_id = self.allocate_id();
        let tx = self.tx.clone();

        tokio::spawn(async move {
            let opened = service
                .stream_turn(
                    &request.history,
                    &request.parts,
                    &request.tools,
                    request.tool_choice,
                    &token,
                )
                .await;

            let mut turn = match opened {
                Ok(turn) => turn,
                Err(error) => {
                    let _ = tx.send((stream_id, failed(error)));
                    return;
                }
            };

            while let Some(event) = turn.next_event().await {
                if tx.send((stream_id, event)).is_err() {
                    tracing::debug!(
                        target: "parley.chat.service",
                        stream_id,
                        "event receiver dropped; abandoning stream"
                    );
                    break;
                }
            }
        });

        stream_id
    }

    /// Spawn a non-streaming turn; its single terminal event carries the
    /// whole response
    pub fn spawn_send(
        &self,
        service: Arc<ConversationService>,
        request: TurnRequest,
        token: CancellationToken,
    ) -> u64 {
        let stream_id = self.allocate_id();
        let tx = self.tx.clone();

        tokio::spawn(async move {
            let result = service
                .send_turn(
                    &request.history,
                    &request.parts,
                    &request.tools,
                    request.tool_choice,
                    &token,
                )
                .await;

            let event = match result {
                Ok(TurnOutcome::Text {
                    text,
                    finish_reason,
                }) => TurnEvent::Finished {
                    text,
                    finish_reason,
                },
                Ok(TurnOutcome::ToolCalls { text, calls }) => TurnEvent::ToolCalls { text, calls },
                Err(error) => failed(error),
            };
            let _ = tx.send((stream_id, event));
        });

        stream_id
    }
}

fn failed(error: crate::error::ParleyError) -> TurnEvent {
    TurnEvent::Failed {
        error,
        partial_text: String::new(),
        partial_tool_calls: Vec::new(),
    }
}
