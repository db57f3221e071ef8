// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Conversation orchestration
//!
//! Builds each turn's request, enforces one turn at a time, and exposes the
//! streaming turn as an event sequence.

pub mod dispatch;
pub mod service;
pub mod turn;

pub use dispatch::{StreamDispatcher, TurnRequest};
pub use service::{ConversationService, PromptParts};
pub use turn::{TurnEvent, TurnOutcome, TurnPhase, TurnStream};
