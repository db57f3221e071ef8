// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Context window governor
//!
//! Gates every turn before any network I/O: the combined prompt must fit
//! both the character budget and the token budget derived from it.

use crate::config::settings::{
    default_chars_per_token, default_context_budget_chars, ConversationConfig,
};
use crate::error::{ParleyError, Result};
use crate::llm::message::Message;

/// Default number of history messages sent with each request
pub const DEFAULT_HISTORY_WINDOW: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextBudget {
    max_chars: usize,
    chars_per_token: usize,
}

/// Measured size of an accepted prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetReport {
    pub chars: usize,
    pub tokens: usize,
    pub max_chars: usize,
    pub max_tokens: usize,
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self::new(default_context_budget_chars())
    }
}

impl ContextBudget {
    /// Budget of `max_chars` characters; 0 falls back to the default.
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars: if max_chars == 0 {
                default_context_budget_chars()
            } else {
                max_chars
            },
            chars_per_token: default_chars_per_token(),
        }
    }

    pub fn from_config(config: &ConversationConfig) -> Self {
        let mut budget = Self::new(config.context_budget_chars);
        if config.chars_per_token > 0 {
            budget.chars_per_token = config.chars_per_token;
        }
        budget
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    pub fn max_tokens(&self) -> usize {
        self.estimate_tokens(self.max_chars)
    }

    /// Tokens for `chars` characters, rounded up
    pub fn estimate_tokens(&self, chars: usize) -> usize {
        chars.div_ceil(self.chars_per_token)
    }

    /// Check the combined prompt (system instruction plus loaded context)
    /// and the user turn against the budget.
    pub fn check(&self, prompt: &str, user: &str) -> Result<BudgetReport> {
        let chars = prompt.chars().count() + user.chars().count();
        let tokens = self.estimate_tokens(chars);
        let max_tokens = self.max_tokens();

        if chars > self.max_chars || tokens > max_tokens {
            return Err(ParleyError::ContextTooLarge {
                chars,
                max_chars: self.max_chars,
                tokens,
                max_tokens,
            });
        }

        Ok(BudgetReport {
            chars,
            tokens,
            max_chars: self.max_chars,
            max_tokens,
        })
    }
}

/// Configured history window; 0 falls back to [`DEFAULT_HISTORY_WINDOW`]
pub fn history_window(config: &ConversationConfig) -> usize {
    match config.max_history_messages {
        0 => DEFAULT_HISTORY_WINDOW,
        window => window,
    }
}

/// The most recent `max_messages` of `history`, in original order.
///
/// Returns a view; the caller's history is never modified.
pub fn trim_history(history: &[Message], max_messages: usize) -> &[Message] {
    if history.len() <= max_messages {
        return history;
    }
    &history[history.len() - max_messages..]
}
