// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tool-call reconstruction from streamed fragments
//!
//! Servers stream a tool call as a series of fragments: the first carries
//! the call id and function name, later ones carry slices of the JSON
//! argument text. Fragments are merged in arrival order. A call's argument
//! text only ever grows.

use std::collections::HashMap;

use crate::llm::message::ToolCall;

/// One partial tool call from a single stream chunk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallFragment {
    /// Position of the call within the turn, when the server sends one
    pub index: Option<usize>,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

impl ToolCallFragment {
    /// Fragment keyed by call id
    pub fn with_id(id: impl Into<String>, name: Option<&str>, arguments: &str) -> Self {
        Self {
            index: None,
            id: Some(id.into()),
            name: name.map(str::to_owned),
            arguments: Some(arguments.to_string()),
        }
    }

    /// Continuation fragment keyed only by index
    pub fn at_index(index: usize, arguments: &str) -> Self {
        Self {
            index: Some(index),
            id: None,
            name: None,
            arguments: Some(arguments.to_string()),
        }
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }
}

/// Finish reasons that declare the turn's tool calls complete
pub fn is_tool_finish(finish_reason: Option<&str>) -> bool {
    matches!(finish_reason, Some("tool_calls") | Some("function_call"))
}

/// Merge `fragments` into `accumulated`.
///
/// An unknown id appends a new call; a known id extends its arguments and a
/// non-empty name fragment replaces the name. Fragments without an id are
/// attributed by index (a call's index is its position), falling back to
/// the most recent call.
pub fn merge_tool_calls(accumulated: Vec<ToolCall>, fragments: &[ToolCallFragment]) -> Vec<ToolCall> {
    let mut accumulator = ToolCallAccumulator::from_calls(accumulated);
    accumulator.apply(fragments);
    accumulator.into_calls()
}

/// Stateful reconstructor for one streaming turn
#[derive(Debug, Default, Clone)]
pub struct ToolCallAccumulator {
    calls: Vec<ToolCall>,
    by_index: HashMap<usize, usize>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from calls already reconstructed, assuming positional indices
    pub fn from_calls(calls: Vec<ToolCall>) -> Self {
        let by_index = (0..calls.len()).map(|position| (position, position)).collect();
        Self { calls, by_index }
    }

    pub fn apply(&mut self, fragments: &[ToolCallFragment]) {
        for fragment in fragments {
            self.apply_one(fragment);
        }
    }

    fn apply_one(&mut self, fragment: &ToolCallFragment) {
        let position = match fragment.id() {
            Some(id) => match self.calls.iter().position(|call| call.id == id) {
                Some(position) => position,
                None => self.push_new(id.to_string(), fragment.index),
            },
            None => {
                let known = match fragment.index {
                    Some(index) => self.by_index.get(&index).copied(),
                    None => self.calls.len().checked_sub(1),
                };
                match known {
                    Some(position) => position,
                    None => {
                        let index = fragment.index.unwrap_or(self.calls.len());
                        self.push_new(format!("call_{index}"), fragment.index)
                    }
                }
            }
        };

        let call = &mut self.calls[position];
        if let Some(name) = fragment.name.as_deref().filter(|name| !name.is_empty()) {
            call.name = name.to_string();
        }
        if let Some(arguments) = fragment.arguments.as_deref() {
            call.arguments.push_str(arguments);
        }

        tracing::trace!(
            target: "parley.llm.tool_calls",
            id = %call.id,
            name = %call.name,
            arguments_len = call.arguments.len(),
            "merged tool call fragment"
        );
    }

    fn push_new(&mut self, id: String, index: Option<usize>) -> usize {
        let position = self.calls.len();
        self.calls.push(ToolCall::new(id, String::new(), String::new()));
        if let Some(index) = index {
            self.by_index.insert(index, position);
        }
        position
    }

    pub fn calls(&self) -> &[ToolCall] {
        &self.calls
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn into_calls(self) -> Vec<ToolCall> {
        self.calls
    }
}
