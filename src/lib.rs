//! Mail Agent: answers inbound email through an LLM coordinator that can
//! consult research sub-agents and a nested feedback-note flow.

pub mod agent;
pub mod app;
pub mod channels;
pub mod config;
pub mod documents;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod prompts;
pub mod subagents;
