//! Error types for the bot
//!
//! Each layer owns its error enum; `BotError` wraps them for the engine and
//! the binary. Messages that leave the process (status API, stored failure
//! notes) go through [`sanitize_error_message`].

use crate::forum::ForumError;
use crate::llm::provider::LlmError;
use crate::store::StoreError;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Main error type for bot operations
#[derive(Debug, Error)]
pub enum BotError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Forum error: {0}")]
    Forum(#[from] ForumError),

    #[error("LLM provider error: {0}")]
    Llm(#[from] LlmError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Reply rejected: {message}")]
    ReplyRejected { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl BotError {
    /// Create a reply rejection error
    pub fn reply_rejected<S: Into<String>>(message: S) -> Self {
        Self::ReplyRejected {
            message: message.into(),
        }
    }

    /// Create internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Error text safe to expose outside the process
    pub fn public_message(&self) -> String {
        sanitize_error_message(&self.to_string())
    }
}

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").expect("secret pattern is valid")
});

static BEARER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)bearer\s+\S+").expect("bearer pattern is valid"));

const MAX_MESSAGE_LEN: usize = 500;

/// Redact credentials and bound the length of an error message
pub fn sanitize_error_message(message: &str) -> String {
    let sanitized = SECRET_PATTERN.replace_all(message, "${1}=***");
    let mut sanitized = BEARER_PATTERN
        .replace_all(&sanitized, "Bearer ***")
        .to_string();

    if sanitized.len() > MAX_MESSAGE_LEN {
        let truncate_suffix = "...[truncated]";
        let mut cut = MAX_MESSAGE_LEN - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(truncate_suffix);
    }

    sanitized
}

/// Result type for bot operations
pub type BotResult<T> = Result<T, BotError>;
