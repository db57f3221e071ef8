// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Settings management for Parley
//!
//! Handles loading and saving settings from ~/.parley/settings.json

use serde::{Deserialize, Serialize};

use crate::error::{ParleyError, Result};

mod io;

/// Main settings structure, stored in ~/.parley/settings.json
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Chat API endpoint, credentials and model defaults
    #[serde(default)]
    pub api: ApiConfig,

    /// Retry and resilience settings for API calls
    #[serde(default)]
    pub resilience: ResilienceConfig,

    /// History window and context budget
    #[serde(default)]
    pub conversation: ConversationConfig,

    /// Connection pool hygiene and request timeouts
    #[serde(default)]
    pub connection: ConnectionConfig,
}

/// Chat API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL; `/chat/completions` is appended
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// API key (if stored directly, not recommended)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable name for API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model identifier sent with every request
    #[serde(default = "default_model")]
    pub model: String,

    /// Output token cap sent as `max_tokens`
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    /// Sampling temperature (omitted for models that reject it)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Fixed system instruction placed first in every request
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Override the model's temperature capability detection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supports_temperature: Option<bool>,

    /// Override the model's extended-reasoning detection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_reasoning: Option<bool>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            api_key_env: default_api_key_env(),
            model: default_model(),
            max_output_tokens: default_max_output_tokens(),
            temperature: default_temperature(),
            system_prompt: default_system_prompt(),
            supports_temperature: None,
            extended_reasoning: None,
        }
    }
}

/// Retry and resilience configuration for API calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Maximum number of retry attempts
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay in milliseconds for exponential backoff
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds (cap for backoff)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Jitter fraction (0.0 to 1.0) added on top of the backoff delay
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

/// Conversation and context budget configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Most recent history messages sent with each request (0 = default)
    #[serde(default = "default_max_history_messages")]
    pub max_history_messages: usize,

    /// Character budget for the combined prompt (0 = default)
    #[serde(default = "default_context_budget_chars")]
    pub context_budget_chars: usize,

    /// Estimated characters per token for calculations
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_history_messages: default_max_history_messages(),
            context_budget_chars: default_context_budget_chars(),
            chars_per_token: default_chars_per_token(),
        }
    }
}

/// Connection lifecycle and timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Close idle pooled connections after this much inactivity
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// How often the lifecycle task checks for inactivity (0 = default)
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,

    /// Deadline for ordinary models
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Deadline for extended-reasoning models
    #[serde(default = "default_reasoning_timeout_secs")]
    pub reasoning_timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
            check_interval_secs: default_check_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            reasoning_timeout_secs: default_reasoning_timeout_secs(),
        }
    }
}

impl Settings {
    /// Resolve the API key: inline value first, then the configured env var.
    pub fn resolve_api_key(&self) -> Result<String> {
        if let Some(key) = self.api.api_key.as_ref().filter(|k| !k.trim().is_empty()) {
            return Ok(key.clone());
        }

        match std::env::var(&self.api.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(ParleyError::Config(format!(
                "no API key found; set {} or api.api_key in {}",
                self.api.api_key_env,
                Self::default_path().display()
            ))),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_output_tokens() -> u32 {
    8192
}

fn default_temperature() -> f32 {
    0.7
}

fn default_system_prompt() -> String {
    "You are a helpful assistant running in a terminal. Answer concisely and use Markdown for code."
        .to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter() -> f64 {
    0.25
}

fn default_max_history_messages() -> usize {
    30
}

pub(crate) fn default_context_budget_chars() -> usize {
    100_000
}

pub(crate) fn default_chars_per_token() -> usize {
    4
}

fn default_idle_timeout_secs() -> u64 {
    600
}

pub(crate) fn default_check_interval_secs() -> u64 {
    30
}

fn default_request_timeout_secs() -> u64 {
    180
}

fn default_reasoning_timeout_secs() -> u64 {
    300
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_default() {
        let settings = Settings::default();
        assert_eq!(settings.api.base_url, "https://api.openai.com/v1");
        assert_eq!(settings.api.api_key_env, "OPENAI_API_KEY");
        assert_eq!(settings.api.max_output_tokens, 8192);
        assert_eq!(settings.resilience.max_retries, 3);
        assert_eq!(settings.resilience.max_delay_ms, 30_000);
        assert_eq!(settings.conversation.max_history_messages, 30);
        assert_eq!(settings.conversation.context_budget_chars, 100_000);
        assert_eq!(settings.connection.idle_timeout_secs, 600);
        assert_eq!(settings.connection.check_interval_secs, 30);
        assert_eq!(settings.connection.request_timeout_secs, 180);
        assert_eq!(settings.connection.reasoning_timeout_secs, 300);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let json = r#"{"api": {"model": "o3-mini"}, "resilience": {"max_retries": 1}}"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.api.model, "o3-mini");
        assert_eq!(settings.api.base_url, "https://api.openai.com/v1");
        assert_eq!(settings.resilience.max_retries, 1);
        assert_eq!(settings.resilience.base_delay_ms, 1000);
        assert_eq!(settings.conversation.chars_per_token, 4);
    }

    #[test]
    fn test_resolve_api_key_prefers_inline_key() {
        let mut settings = Settings::default();
        settings.api.api_key = Some("inline-key".to_string());
        settings.api.api_key_env = "PARLEY_TEST_UNSET_KEY_VAR".to_string();
        assert_eq!(settings.resolve_api_key().unwrap(), "inline-key");
    }

    #[test]
    fn test_resolve_api_key_missing_is_config_error() {
        let mut settings = Settings::default();
        settings.api.api_key = None;
        settings.api.api_key_env = "PARLEY_TEST_DEFINITELY_UNSET_VAR".to_string();
        match settings.resolve_api_key() {
            Err(ParleyError::Config(message)) => {
                assert!(message.contains("PARLEY_TEST_DEFINITELY_UNSET_VAR"))
            }
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn test_capability_overrides_skip_when_unset() {
        let json = serde_json::to_value(Settings::default()).unwrap();
        assert!(json["api"].get("supports_temperature").is_none());
        assert!(json["api"].get("api_key").is_none());
    }
}
