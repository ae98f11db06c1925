//! Feedback-note generation as a nested conversation loop.
//!
//! The writer model first settles which rank's competencies apply (either
//! preselected by the coordinator or asked for with `<rank>`), receives the
//! competency and example documents, and then writes the note. The flow has
//! its own transcript and a smaller call budget than the outer session.

use std::sync::Arc;

use crate::agent::breaker::CircuitBreaker;
use crate::agent::exchange::{Exchange, ExchangeError};
use crate::agent::intent::Intent;
use crate::agent::session::{Transcript, UsageMeter};
use crate::documents::DocumentRetriever;
use crate::error::{LlmError, PromptError};
use crate::prompts::{self, PromptRepository};

/// Ranks with a competency document.
pub const KNOWN_RANKS: &[&str] = &["cpl", "mcpl", "sgt", "wo"];

/// Settings for the nested flow.
#[derive(Debug, Clone)]
pub struct FeedbackNoteConfig {
    pub max_calls: u32,
    /// Rank used when the requested one has no competency document.
    pub default_rank: String,
    /// Document category holding `<rank>.md` and `examples.md`.
    pub category: String,
}

impl Default for FeedbackNoteConfig {
    fn default() -> Self {
        Self {
            max_calls: 3,
            default_rank: "cpl".to_string(),
            category: "pace_note".to_string(),
        }
    }
}

/// What the coordinator asked the writer for.
#[derive(Debug, Clone)]
pub struct NoteRequest {
    /// The inbound message context the session was seeded with.
    pub context: String,
    /// What the coordinator wants written.
    pub instructions: String,
    /// Rank already known to the coordinator, if any.
    pub rank: Option<String>,
}

/// A written note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedNote {
    pub body: String,
    /// Rank whose competencies were supplied, if any were.
    pub rank: Option<String>,
    /// The rank the model asked for when it had no competency document.
    pub unsupported_rank: Option<String>,
}

/// Failures scoped to the flow. The outer session continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NestedFailure {
    BreakerTripped { max: u32 },
    Unparseable { description: String },
}

/// Result of one nested run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NestedOutcome {
    Note(GeneratedNote),
    Declined,
    Failed(NestedFailure),
}

impl NestedOutcome {
    /// User turn fed back to the coordinator.
    pub fn into_turn(self) -> String {
        match self {
            NestedOutcome::Note(note) => {
                let rank_attr = note
                    .rank
                    .as_deref()
                    .map(|r| format!(" rank=\"{r}\""))
                    .unwrap_or_default();
                let mut turn = format!(
                    "<feedback_note_result{rank_attr}>\n{}\n</feedback_note_result>",
                    note.body
                );
                if let Some(requested) = note.unsupported_rank {
                    let used = note.rank.as_deref().unwrap_or("default").to_uppercase();
                    turn.push_str(&format!(
                        "\n\nNote: the requested rank '{requested}' is not supported. \
                         The feedback note was written using {used} competencies. \
                         Let the sender know in your reply."
                    ));
                }
                turn
            }
            NestedOutcome::Declined => "<feedback_note_result>\n\
                 The feedback note writer did not produce a note for this request.\n\
                 </feedback_note_result>"
                .to_string(),
            NestedOutcome::Failed(NestedFailure::BreakerTripped { max }) => format!(
                "<feedback_note_result error=\"breaker-tripped\">\n\
                 Feedback note generation stopped after {max} attempts without producing a note.\n\
                 </feedback_note_result>"
            ),
            NestedOutcome::Failed(NestedFailure::Unparseable { description }) => format!(
                "<feedback_note_result error=\"unparseable-response\">\n\
                 Feedback note generation failed: {description}\n\
                 </feedback_note_result>"
            ),
        }
    }
}

/// Failures that end the whole session.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error(transparent)]
    Provider(#[from] LlmError),

    #[error(transparent)]
    Prompt(#[from] PromptError),
}

/// The nested feedback-note loop.
pub struct FeedbackNoteFlow {
    exchange: Exchange,
    prompts: Arc<dyn PromptRepository>,
    documents: Arc<dyn DocumentRetriever>,
    config: FeedbackNoteConfig,
}

impl FeedbackNoteFlow {
    pub fn new(
        exchange: Exchange,
        prompts: Arc<dyn PromptRepository>,
        documents: Arc<dyn DocumentRetriever>,
        config: FeedbackNoteConfig,
    ) -> Self {
        Self {
            exchange,
            prompts,
            documents,
            config,
        }
    }

    pub fn config(&self) -> &FeedbackNoteConfig {
        &self.config
    }

    /// Run the flow to a note, a decline, or a scoped failure.
    ///
    /// Usage is added to `meter`, which belongs to the calling session.
    pub async fn run(&self, request: &NoteRequest, meter: &mut UsageMeter) -> Result<NestedOutcome, FlowError> {
        let system = self.prompts.get(prompts::names::FEEDBACK_NOTE).await?;
        let mut transcript = Transcript::seeded(system, seed_turn(request));
        let mut breaker = CircuitBreaker::new(self.config.max_calls);

        let mut rank: Option<String> = None;
        let mut unsupported_rank: Option<String> = None;

        if let Some(ref preselected) = request.rank {
            let reference = self.reference_for(preselected).await;
            transcript.push_user(reference.turn);
            rank = Some(reference.rank);
            unsupported_rank = reference.unsupported;
        }

        loop {
            let intent = match self
                .exchange
                .next_intent(&mut transcript, &mut breaker, meter)
                .await
            {
                Ok(intent) => intent,
                Err(ExchangeError::Breaker(tripped)) => {
                    tracing::warn!(max = tripped.max, "Feedback note flow hit its call limit");
                    return Ok(NestedOutcome::Failed(NestedFailure::BreakerTripped { max: tripped.max }));
                }
                Err(ExchangeError::Unparseable(e)) => {
                    return Ok(NestedOutcome::Failed(NestedFailure::Unparseable {
                        description: e.description,
                    }));
                }
                Err(ExchangeError::Provider(e)) => return Err(e.into()),
            };

            tracing::debug!(intent = intent.label(), llm_calls = breaker.count(), "Feedback note step");

            match intent {
                Intent::Reply { body } => {
                    return Ok(NestedOutcome::Note(GeneratedNote {
                        body,
                        rank,
                        unsupported_rank,
                    }));
                }
                Intent::NoResponse => return Ok(NestedOutcome::Declined),
                Intent::RankRequest { rank: requested } => {
                    let reference = self.reference_for(&requested).await;
                    transcript.push_user(reference.turn);
                    rank = Some(reference.rank);
                    unsupported_rank = reference.unsupported;
                }
                other => {
                    tracing::warn!(intent = other.label(), "Unexpected intent in feedback note flow");
                    transcript.push_user(format!(
                        "<{}> is not available while writing a feedback note. \
                         Respond with <rank>...</rank> to request competencies, \
                         <reply><body>...</body></reply> with the note, or <no_response/>.",
                        other.label()
                    ));
                }
            }
        }
    }

    /// Resolve a rank to its reference material, falling back to the default rank.
    async fn reference_for(&self, requested: &str) -> RankReference {
        let requested = requested.trim().to_lowercase();
        let (rank, unsupported) = if KNOWN_RANKS.contains(&requested.as_str()) {
            (requested, None)
        } else {
            tracing::warn!(
                rank = %requested,
                default = %self.config.default_rank,
                "Unsupported rank, using default competencies"
            );
            (self.config.default_rank.clone(), Some(requested))
        };

        let competencies = self
            .load(&format!("{rank}.md"), "Competencies not available at this time.")
            .await;
        let examples = self
            .load("examples.md", "Examples not available at this time.")
            .await;

        let mut turn = String::new();
        if let Some(ref requested) = unsupported {
            turn.push_str(&format!(
                "The rank '{requested}' is not supported. Using {} competencies instead.\n\n",
                rank.to_uppercase()
            ));
        }
        turn.push_str(&format!(
            "Here are the competencies and examples for {}. Now please generate the feedback note.\n\n\
             <competencies>\n{competencies}\n</competencies>\n\n<examples>\n{examples}\n</examples>",
            rank.to_uppercase()
        ));

        RankReference {
            rank,
            unsupported,
            turn,
        }
    }

    async fn load(&self, name: &str, fallback: &str) -> String {
        match self.documents.get(&self.config.category, name).await {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(document = %name, error = %e, "Reference document unavailable");
                fallback.to_string()
            }
        }
    }
}

struct RankReference {
    rank: String,
    unsupported: Option<String>,
    turn: String,
}

fn seed_turn(request: &NoteRequest) -> String {
    format!(
        "{}\n\n<feedback_request>\n{}\n</feedback_request>",
        request.context, request.instructions
    )
}
