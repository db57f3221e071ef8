// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Model capability profile
//!
//! Reasoning-class models reject `temperature` and need a longer deadline.
//! Detection is by model id, with per-setting overrides.

use std::time::Duration;

use crate::config::{ApiConfig, ConnectionConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelProfile {
    pub supports_temperature: bool,
    pub extended_reasoning: bool,
}

impl ModelProfile {
    /// Profile for `model`, honouring any overrides in `api`
    pub fn for_model(model: &str, api: &ApiConfig) -> Self {
        let detected = Self::detect(model);
        Self {
            supports_temperature: api
                .supports_temperature
                .unwrap_or(detected.supports_temperature),
            extended_reasoning: api
                .extended_reasoning
                .unwrap_or(detected.extended_reasoning),
        }
    }

    /// Heuristic detection from the model id alone
    pub fn detect(model: &str) -> Self {
        let id = model.rsplit('/').next().unwrap_or(model).to_lowercase();

        let openai_reasoning = ["o1", "o3", "o4", "gpt-5"]
            .iter()
            .any(|prefix| {
                id.strip_prefix(*prefix)
                    .is_some_and(|rest| rest.is_empty() || rest.starts_with(['-', '.']))
            });
        let other_reasoning = id.contains("reasoner") || id.contains("-r1") || id.starts_with("r1");

        Self {
            supports_temperature: !openai_reasoning,
            extended_reasoning: openai_reasoning || other_reasoning,
        }
    }

    /// Temperature to send, or `None` when the model rejects the field
    pub fn temperature(&self, configured: f32) -> Option<f32> {
        self.supports_temperature.then_some(configured)
    }

    /// Per-request deadline for this model
    pub fn timeout(&self, connection: &ConnectionConfig) -> Duration {
        if self.extended_reasoning {
            Duration::from_secs(connection.reasoning_timeout_secs)
        } else {
            Duration::from_secs(connection.request_timeout_secs)
        }
    }
}
