//! Error types for Reply Relay.

use std::time::Duration;

/// Top-level error type for the relay.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Draft error: {0}")]
    Draft(#[from] DraftError),

    #[error("Conversation error: {0}")]
    Conversation(#[from] ConversationError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Chat channel errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed to send response on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Channel {name} call timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Reply generation timed out after {0:?}")]
    Timeout(Duration),
}

/// Draft persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum DraftError {
    #[error("Draft store not configured")]
    NotConfigured,

    #[error("Failed to build draft message: {0}")]
    Build(String),

    #[error("IMAP error: {0}")]
    Imap(String),

    #[error("Draft creation timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Conversation registration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConversationError {
    #[error("Session id must not be empty")]
    MissingSession,

    #[error("At least one question is required")]
    NoQuestions,
}

/// Result type alias for the relay.
pub type Result<T> = std::result::Result<T, Error>;
