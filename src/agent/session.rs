//! Session state: transcript, call budget, usage, and the write-once outcome.

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::agent::breaker::CircuitBreaker;
use crate::agent::outcome::Outcome;
use crate::llm::{ChatMessage, CompletionResponse, costs};

/// Append-only record of turns exchanged with the model.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    turns: Vec<ChatMessage>,
}

impl Transcript {
    /// Start with a system turn and the first user turn.
    pub fn seeded(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            turns: vec![ChatMessage::system(system), ChatMessage::user(user)],
        }
    }

    pub fn push(&mut self, turn: ChatMessage) {
        self.turns.push(turn);
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(ChatMessage::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.push(ChatMessage::assistant(content));
    }

    pub fn turns(&self) -> &[ChatMessage] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.turns.last()
    }
}

/// Token and cost totals across every call a session made.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Running totals for LLM usage, shared by the outer loop and nested flows.
#[derive(Debug, Clone, Default)]
pub struct UsageMeter {
    pub calls: u32,
    pub usage: TokenUsage,
    pub cost: Decimal,
}

impl UsageMeter {
    pub fn record(&mut self, response: &CompletionResponse, cost_per_token: (Decimal, Decimal)) {
        self.calls += 1;
        self.usage.input_tokens += u64::from(response.input_tokens);
        self.usage.output_tokens += u64::from(response.output_tokens);
        self.cost += costs::estimate(cost_per_token, response.input_tokens, response.output_tokens);
    }
}

/// One inbound message's conversation.
#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    pub transcript: Transcript,
    pub breaker: CircuitBreaker,
    pub meter: UsageMeter,
    outcome: Option<Outcome>,
}

impl Session {
    pub fn new(transcript: Transcript, max_calls: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            transcript,
            breaker: CircuitBreaker::new(max_calls),
            meter: UsageMeter::default(),
            outcome: None,
        }
    }

    /// Record the terminal outcome. Only the first call has any effect.
    pub fn finish(&mut self, outcome: Outcome) -> &Outcome {
        if self.outcome.is_some() {
            tracing::warn!(session_id = %self.id, "Outcome already recorded, ignoring");
        }
        self.outcome.get_or_insert(outcome)
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    pub fn take_outcome(&mut self) -> Option<Outcome> {
        self.outcome.take()
    }
}
