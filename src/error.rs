//! Error types for the mail agent.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Prompt error: {0}")]
    Prompt(#[from] PromptError),

    #[error("Document error: {0}")]
    Document(#[from] DocumentError),

    #[error("Sub-agent error: {0}")]
    SubAgent(#[from] SubAgentError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Mailbox channel errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed to fetch from channel {name}: {reason}")]
    FetchFailed { name: String, reason: String },

    #[error("Failed to send response on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Failed to dispose of message {uid} on channel {name}: {reason}")]
    DisposeFailed {
        name: String,
        uid: String,
        reason: String,
    },
}

/// LLM provider errors. Every variant is fatal to the session that hit it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Provider {provider} timed out after {after:?}")]
    Timeout { provider: String, after: Duration },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },
}

/// Prompt template lookup errors.
#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("Prompt not found: {0}")]
    NotFound(String),

    #[error("IO error reading prompt {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Reference document retrieval errors.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("Document not found: {category}/{name}")]
    NotFound { category: String, name: String },

    #[error("Failed to read document {category}/{name}: {reason}")]
    Unavailable {
        category: String,
        name: String,
        reason: String,
    },
}

/// Failures raised by a delegated sub-agent.
#[derive(Debug, thiserror::Error)]
pub enum SubAgentError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Prompt error: {0}")]
    Prompt(#[from] PromptError),

    #[error("Document error: {0}")]
    Document(#[from] DocumentError),
}

/// The model's reply could not be decoded into an intent.
///
/// `description` is written for the model: it becomes the body of the
/// corrective turn sent on retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unparseable response: {description}")]
pub struct ParseError {
    pub description: String,
}

impl ParseError {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
        }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
