//! What a session hands back to the mailbox adapter.

use std::fmt;

use crate::error::{LlmError, PromptError};

/// Terminal result of one session.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Send this text back to the sender.
    Reply(String),
    /// Mark processed without replying.
    NoResponse,
    /// Leave the message for a later retry.
    Fatal(FatalReason),
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Reply(_) => "reply",
            Outcome::NoResponse => "no_response",
            Outcome::Fatal(_) => "fatal",
        }
    }

    /// Reply and NoResponse both consume the inbound message.
    pub fn consumes_message(&self) -> bool {
        !matches!(self, Outcome::Fatal(_))
    }
}

/// Why a session ended without an answer.
#[derive(Debug, Clone)]
pub enum FatalReason {
    BreakerTripped { max: u32 },
    UnparseableResponse { description: String },
    Provider(LlmError),
    SubAgentFailure { agent: String, reason: String },
    /// A prompt the session needed could not be loaded.
    MissingPrompt(String),
}

impl FatalReason {
    /// Stable short code for logs and callers.
    pub fn code(&self) -> &'static str {
        match self {
            FatalReason::BreakerTripped { .. } => "breaker-tripped",
            FatalReason::UnparseableResponse { .. } => "unparseable-response",
            FatalReason::Provider(_) => "provider-error",
            FatalReason::SubAgentFailure { .. } => "sub-agent-failure",
            FatalReason::MissingPrompt(_) => "missing-prompt",
        }
    }
}

// Compared by code only; error payloads carry no identity.
impl PartialEq for FatalReason {
    fn eq(&self, other: &Self) -> bool {
        self.code() == other.code()
    }
}

impl fmt::Display for FatalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalReason::BreakerTripped { max } => {
                write!(f, "breaker-tripped (limit {max} LLM calls)")
            }
            FatalReason::UnparseableResponse { description } => {
                write!(f, "unparseable-response: {description}")
            }
            FatalReason::Provider(e) => write!(f, "provider-error: {e}"),
            FatalReason::SubAgentFailure { agent, reason } => {
                write!(f, "sub-agent-failure ({agent}): {reason}")
            }
            FatalReason::MissingPrompt(reason) => write!(f, "missing-prompt: {reason}"),
        }
    }
}

impl From<LlmError> for FatalReason {
    fn from(e: LlmError) -> Self {
        FatalReason::Provider(e)
    }
}

impl From<PromptError> for FatalReason {
    fn from(e: PromptError) -> Self {
        FatalReason::MissingPrompt(e.to_string())
    }
}
