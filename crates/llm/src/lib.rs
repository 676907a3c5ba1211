//! Streaming chat-completion client
//!
//! Talks to the backend's SSE generation endpoint:
//! - Token-by-token delta streaming over an mpsc channel
//! - First-token deadline so a stalled model never hangs a turn
//! - Mid-stream cancellation by dropping the delta receiver
//! - Rolling conversation context with a turn cap

pub mod client;
pub mod context;

pub use client::{ChatConfig, SseChatClient};
pub use context::ConversationContext;

use thiserror::Error;
use voice_call_core::CallError;

/// Chat client errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("No token within {0}ms")]
    FirstTokenTimeout(u64),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        LlmError::Network(err.to_string())
    }
}

impl From<LlmError> for CallError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::FirstTokenTimeout(ms) => CallError::Timeout {
                service: "chat",
                timeout_ms: ms,
            },
            LlmError::Network(msg) => CallError::Network(msg),
            LlmError::RateLimited(msg) => CallError::RateLimited(msg),
            LlmError::Api(msg) | LlmError::InvalidResponse(msg) => {
                CallError::ServiceUnavailable(msg)
            },
            LlmError::Configuration(msg) => CallError::ServiceUnavailable(msg),
        }
    }
}
