// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Error classification for chat API outcomes
//!
//! Maps HTTP statuses, transport failures and anomalous 200 bodies onto
//! [`ApiError`] variants; retryability follows from the variant.

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde_json::Value;

use crate::error::ApiError;

const MAX_ERROR_BODY_CHARS: usize = 500;

/// Classify a non-success HTTP response.
pub fn classify_status(status: StatusCode, headers: &HeaderMap, body: &str) -> ApiError {
    let message = summarize_error_body(body);

    match status.as_u16() {
        400 => ApiError::MalformedRequest(message),
        401 => ApiError::Unauthorized(message),
        403 => ApiError::Forbidden(message),
        429 => ApiError::RateLimited {
            retry_after_secs: parse_retry_after_seconds(headers),
            message,
        },
        code @ 500..=599 => ApiError::ServerError {
            status: code,
            message,
        },
        code => ApiError::UnexpectedStatus {
            status: code,
            message,
        },
    }
}

/// Classify a failure raised by the HTTP client itself.
pub fn classify_transport(err: &reqwest::Error) -> ApiError {
    if err.is_decode() {
        return ApiError::Decode(err.to_string());
    }
    ApiError::Transport(err.to_string())
}

/// Parse numeric Retry-After header (seconds).
pub(crate) fn parse_retry_after_seconds(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
}

/// Pull a one-line summary out of an error body.
///
/// Understands `{"error":{"message":..}}`, `{"error":".."}` and
/// `{"message":..}`; anything else is returned trimmed and truncated.
pub fn summarize_error_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty body>".to_string();
    }

    let summary = serde_json::from_str::<Value>(trimmed)
        .ok()
        .and_then(|value| extract_error_summary(&value));

    match summary {
        Some(text) if !text.is_empty() => text,
        _ => truncate(trimmed, MAX_ERROR_BODY_CHARS),
    }
}

fn extract_error_summary(value: &Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .or_else(|| {
            value
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_owned)
        })
        .or_else(|| value.get("message").and_then(Value::as_str).map(str::to_owned));

    summary.map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}
