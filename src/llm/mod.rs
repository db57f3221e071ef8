// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! LLM module for Parley
//!
//! The resilient chat-completions protocol client: request execution with
//! retries, SSE decoding, tool-call reconstruction, context budgeting and
//! connection lifecycle.

pub mod backend;
pub mod budget;
pub mod cancel;
pub mod classify;
pub mod client;
pub mod lifecycle;
pub mod message;
pub mod mock_backend;
pub mod model;
pub mod retry;
pub mod stream;
pub mod tool_calls;
pub mod wire;

pub use backend::{ChatBackend, Completion};
pub use budget::{trim_history, ContextBudget, DEFAULT_HISTORY_WINDOW};
pub use cancel::CancelScope;
pub use client::ChatClient;
pub use lifecycle::{ConnectionManager, TransportPool};
pub use message::*;
pub use stream::{ChunkSource, ReplaySource, SseDecoder, StreamChunk};
pub use tool_calls::{merge_tool_calls, ToolCallAccumulator, ToolCallFragment};
