// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Error types for Parley
//!
//! Every error surfaced by the chat core carries two renderings: the
//! `Display` text (technical, meant for logs) and [`ParleyError::user_message`]
//! (short and actionable, meant for the status line).

use thiserror::Error;

/// Main error type for Parley operations
#[derive(Error, Debug)]
pub enum ParleyError {
    /// API-related errors
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// The operation was cancelled before it completed
    #[error("Request cancelled: {0}")]
    Cancelled(CancelReason),

    /// The prompt does not fit the configured context budget
    #[error(
        "Context too large: {chars} chars (limit {max_chars}), ~{tokens} tokens (limit {max_tokens})"
    )]
    ContextTooLarge {
        chars: usize,
        max_chars: usize,
        tokens: usize,
        max_tokens: usize,
    },

    /// Every attempt failed; wraps the last underlying cause
    #[error("Request failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<ParleyError>,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// API-specific error types
#[derive(Error, Debug)]
pub enum ApiError {
    /// Connection, TLS or body transfer failure
    #[error("Network error: {0}")]
    Transport(String),

    /// Missing or invalid credential (401)
    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    /// Credential accepted but access denied (403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The server rejected the request body (400)
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// Rate limited by the API (429)
    #[error("Rate limited: {message}")]
    RateLimited {
        retry_after_secs: Option<u64>,
        message: String,
    },

    /// 5xx from the API
    #[error("API error ({status}): {message}")]
    ServerError { status: u16, message: String },

    /// Any other non-success status
    #[error("Unexpected status ({status}): {message}")]
    UnexpectedStatus { status: u16, message: String },

    /// A 200 response without any choices
    #[error("Invalid API response: no choices returned")]
    EmptyResponse,

    /// A 200 response whose body could not be decoded
    #[error("Invalid API response: {0}")]
    Decode(String),
}

/// Why an operation was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The caller cancelled explicitly (e.g. the user pressed Esc)
    User,
    /// The per-request deadline elapsed
    DeadlineExceeded,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelReason::User => write!(f, "cancelled by caller"),
            CancelReason::DeadlineExceeded => write!(f, "deadline exceeded"),
        }
    }
}

/// Result type alias for Parley operations
pub type Result<T> = std::result::Result<T, ParleyError>;

impl From<reqwest::Error> for ParleyError {
    fn from(err: reqwest::Error) -> Self {
        ParleyError::Api(crate::llm::classify::classify_transport(&err))
    }
}

impl ApiError {
    /// Whether a fresh attempt of the same request may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Transport(_) => true,
            ApiError::RateLimited { .. } => true,
            ApiError::ServerError { status, .. } => matches!(status, 500 | 502 | 503 | 504),
            ApiError::EmptyResponse => true,
            ApiError::Decode(_) => true,

            ApiError::Unauthorized(_) => false,
            ApiError::Forbidden(_) => false,
            ApiError::MalformedRequest(_) => false,
            ApiError::UnexpectedStatus { .. } => false,
        }
    }

    fn user_message(&self) -> String {
        match self {
            ApiError::Transport(_) => {
                "Could not reach the chat API. Check your network connection.".to_string()
            }
            ApiError::Unauthorized(_) => {
                "The API key was rejected. Check your API key configuration.".to_string()
            }
            ApiError::Forbidden(_) => {
                "This API key is not allowed to use the selected model.".to_string()
            }
            ApiError::MalformedRequest(message) => format!("The API rejected the request: {message}"),
            ApiError::RateLimited { .. } => {
                "Rate limited by the API. Wait a moment and try again.".to_string()
            }
            ApiError::ServerError { status, .. } => {
                format!("The chat API is having trouble (HTTP {status}). Try again shortly.")
            }
            ApiError::UnexpectedStatus { status, message } => {
                format!("The chat API returned HTTP {status}: {message}")
            }
            ApiError::EmptyResponse => "The API returned an empty response.".to_string(),
            ApiError::Decode(_) => "The API returned a response Parley could not read.".to_string(),
        }
    }
}

impl ParleyError {
    /// Whether the executor may retry the request that produced this error
    pub fn is_retryable(&self) -> bool {
        is_retryable(self)
    }

    /// True for any cancellation, user-initiated or deadline
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ParleyError::Cancelled(_))
    }

    /// True only for cancellations the user asked for; callers suppress
    /// error banners for these.
    pub fn is_user_cancellation(&self) -> bool {
        matches!(self, ParleyError::Cancelled(CancelReason::User))
    }

    /// The innermost API error, looking through retry aggregation
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            ParleyError::Api(api) => Some(api),
            ParleyError::RetriesExhausted { last, .. } => last.api_error(),
            _ => None,
        }
    }

    /// Short, actionable message for display
    pub fn user_message(&self) -> String {
        match self {
            ParleyError::Api(api) => api.user_message(),
            ParleyError::Cancelled(CancelReason::User) => "Request cancelled.".to_string(),
            ParleyError::Cancelled(CancelReason::DeadlineExceeded) => {
                "The request timed out.".to_string()
            }
            ParleyError::ContextTooLarge {
                chars, max_chars, ..
            } => format!(
                "Prompt is too large ({chars} of {max_chars} characters). Reduce the loaded context and try again."
            ),
            ParleyError::RetriesExhausted { attempts, last } => {
                format!("{} (gave up after {attempts} attempts)", last.user_message())
            }
            ParleyError::Config(message) => format!("Configuration problem: {message}"),
            ParleyError::Io(err) => format!("File error: {err}"),
            ParleyError::Json(_) => "Could not encode or decode JSON.".to_string(),
            ParleyError::InvalidInput(message) => message.clone(),
        }
    }
}

/// Determine if an error is retryable
pub fn is_retryable(error: &ParleyError) -> bool {
    match error {
        ParleyError::Api(api_error) => api_error.is_retryable(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_is_retryable() {
        let err = ParleyError::Api(ApiError::Transport("connection reset".to_string()));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("Network error"));
    }

    #[test]
    fn test_listed_server_statuses_are_retryable() {
        for status in [500u16, 502, 503, 504] {
            let err = ApiError::ServerError {
                status,
                message: "boom".to_string(),
            };
            assert!(err.is_retryable(), "status {status} should retry");
        }
    }

    #[test]
    fn test_unlisted_server_statuses_are_not_retryable() {
        for status in [501u16, 505] {
            let err = ApiError::ServerError {
                status,
                message: "nope".to_string(),
            };
            assert!(!err.is_retryable(), "status {status} should not retry");
        }
    }

    #[test]
    fn test_client_errors_are_not_retryable() {
        assert!(!ApiError::Unauthorized("bad key".to_string()).is_retryable());
        assert!(!ApiError::Forbidden("no access".to_string()).is_retryable());
        assert!(!ApiError::MalformedRequest("bad body".to_string()).is_retryable());
        assert!(!ApiError::UnexpectedStatus {
            status: 404,
            message: "missing".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_anomalies_are_retryable() {
        assert!(ApiError::EmptyResponse.is_retryable());
        assert!(ApiError::Decode("eof".to_string()).is_retryable());
        assert!(ApiError::RateLimited {
            retry_after_secs: Some(2),
            message: "slow down".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_non_api_errors_are_not_retryable() {
        assert!(!is_retryable(&ParleyError::Cancelled(CancelReason::User)));
        assert!(!is_retryable(&ParleyError::Config("x".to_string())));
        assert!(!is_retryable(&ParleyError::ContextTooLarge {
            chars: 2,
            max_chars: 1,
            tokens: 1,
            max_tokens: 1,
        }));
    }

    #[test]
    fn test_cancellation_flags() {
        let user = ParleyError::Cancelled(CancelReason::User);
        let deadline = ParleyError::Cancelled(CancelReason::DeadlineExceeded);
        assert!(user.is_cancelled());
        assert!(user.is_user_cancellation());
        assert!(deadline.is_cancelled());
        assert!(!deadline.is_user_cancellation());
        assert_eq!(deadline.user_message(), "The request timed out.");
    }

    #[test]
    fn test_context_too_large_carries_figures() {
        let err = ParleyError::ContextTooLarge {
            chars: 100_001,
            max_chars: 100_000,
            tokens: 25_001,
            max_tokens: 25_000,
        };
        let technical = err.to_string();
        assert!(technical.contains("100001"));
        assert!(technical.contains("25000"));
        assert!(err.user_message().contains("Reduce the loaded context"));
    }

    #[test]
    fn test_retries_exhausted_wraps_last_cause() {
        let err = ParleyError::RetriesExhausted {
            attempts: 4,
            last: Box::new(ParleyError::Api(ApiError::ServerError {
                status: 503,
                message: "overloaded".to_string(),
            })),
        };
        assert!(err.to_string().contains("4 attempts"));
        assert!(err.to_string().contains("overloaded"));
        assert!(matches!(
            err.api_error(),
            Some(ApiError::ServerError { status: 503, .. })
        ));
        assert!(err.user_message().contains("gave up after 4 attempts"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ParleyError = io_err.into();
        assert!(err.to_string().contains("IO error"));
    }

    #[test]
    fn test_from_api_error() {
        let err: ParleyError = ApiError::EmptyResponse.into();
        assert!(err.to_string().starts_with("API error"));
    }
}
