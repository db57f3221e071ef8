// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Parley - resilient streaming chat client for OpenAI-compatible APIs.
//!
//! Architecture highlights:
//! - `llm`: request execution with retries, SSE decoding, tool-call
//!   reconstruction, context budgeting, connection lifecycle
//! - `chat`: per-turn message assembly and the streaming turn state machine
//! - `config`: settings with defaults, loaded from `~/.parley/settings.json`
//! - `cli`, `logging`: the thin `parley` binary's argument parsing and tracing setup

pub mod chat;
pub mod cli;
pub mod config;
pub mod error;
pub mod llm;
pub mod logging;

pub use error::{ParleyError, Result};
