//! Conversation engine: intents, parsing, the call budget, and the loops.

pub mod breaker;
pub mod coordinator;
pub mod exchange;
pub mod intent;
pub mod nested;
pub mod outcome;
pub mod parser;
pub mod session;

pub use breaker::{BreakerTripped, CircuitBreaker};
pub use coordinator::{Coordinator, SessionReport};
pub use exchange::{Exchange, ModelSettings};
pub use intent::{Intent, ResearchRequest};
pub use nested::{FeedbackNoteConfig, FeedbackNoteFlow, GeneratedNote, NestedOutcome};
pub use outcome::{FatalReason, Outcome};
pub use parser::ResponseParser;
pub use session::{Session, TokenUsage, Transcript};
