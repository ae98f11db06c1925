//! The outer conversation loop for one inbound message.
//!
//! Each iteration asks the model for its next intent and either finishes
//! (reply / no response), delegates research to a sub-agent, or hands the
//! request to the feedback-note flow. Every iteration spends at least one
//! unit of the session's call budget, so the loop always ends.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::Instrument;
use uuid::Uuid;

use crate::agent::exchange::{Exchange, ExchangeError};
use crate::agent::intent::Intent;
use crate::agent::nested::{FeedbackNoteFlow, FlowError, NoteRequest};
use crate::agent::outcome::{FatalReason, Outcome};
use crate::agent::session::{Session, TokenUsage, Transcript};
use crate::subagents::{DispatchError, SubAgentRouter, unknown_agent_turn};

/// Instructions used when the model asks for a rank without saying what to write.
const RANK_ONLY_INSTRUCTIONS: &str = "Write the feedback note requested in the message above.";

/// Summary of a finished session.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub outcome: Outcome,
    /// Calls made by the coordinator and the feedback-note flow. Sub-agents
    /// call their own models and are not counted here or in `usage`/`cost`.
    pub llm_calls: u32,
    /// Units of the outer call budget spent.
    pub budget_used: u32,
    pub usage: TokenUsage,
    pub cost: Decimal,
}

/// Drives sessions from an initial context to an `Outcome`.
pub struct Coordinator {
    exchange: Exchange,
    instructions: String,
    router: Arc<SubAgentRouter>,
    feedback_notes: Option<Arc<FeedbackNoteFlow>>,
    max_calls: u32,
}

impl Coordinator {
    /// `instructions` become the system turn of every session.
    pub fn new(exchange: Exchange, instructions: impl Into<String>, router: Arc<SubAgentRouter>, max_calls: u32) -> Self {
        Self {
            exchange,
            instructions: instructions.into(),
            router,
            feedback_notes: None,
            max_calls,
        }
    }

    pub fn with_feedback_notes(mut self, flow: Arc<FeedbackNoteFlow>) -> Self {
        self.feedback_notes = Some(flow);
        self
    }

    pub fn max_calls(&self) -> u32 {
        self.max_calls
    }

    /// Run one session and return its outcome.
    pub async fn run(&self, context: &str) -> Outcome {
        self.run_session(context).await.outcome
    }

    /// Run one session and return its outcome with usage totals.
    pub async fn run_session(&self, context: &str) -> SessionReport {
        let mut session = Session::new(
            Transcript::seeded(self.instructions.clone(), context),
            self.max_calls,
        );
        let span = tracing::info_span!("session", session_id = %session.id);

        async {
            tracing::info!(max_calls = self.max_calls, "Session started");
            let outcome = self.drive(&mut session, context).await;
            let outcome = session.finish(outcome).clone();

            match &outcome {
                Outcome::Fatal(reason) => tracing::error!(
                    reason = %reason,
                    llm_calls = session.meter.calls,
                    "Session failed"
                ),
                _ => tracing::info!(
                    outcome = outcome.label(),
                    llm_calls = session.meter.calls,
                    input_tokens = session.meter.usage.input_tokens,
                    output_tokens = session.meter.usage.output_tokens,
                    cost_usd = %session.meter.cost.round_dp(6),
                    "Session finished"
                ),
            }

            SessionReport {
                session_id: session.id,
                outcome,
                llm_calls: session.meter.calls,
                budget_used: session.breaker.count(),
                usage: session.meter.usage,
                cost: session.meter.cost,
            }
        }
        .instrument(span)
        .await
    }

    async fn drive(&self, session: &mut Session, context: &str) -> Outcome {
        loop {
            let intent = match self
                .exchange
                .next_intent(&mut session.transcript, &mut session.breaker, &mut session.meter)
                .await
            {
                Ok(intent) => intent,
                Err(ExchangeError::Breaker(tripped)) => {
                    return Outcome::Fatal(FatalReason::BreakerTripped { max: tripped.max });
                }
                Err(ExchangeError::Unparseable(e)) => {
                    return Outcome::Fatal(FatalReason::UnparseableResponse {
                        description: e.description,
                    });
                }
                Err(ExchangeError::Provider(e)) => return Outcome::Fatal(e.into()),
            };

            tracing::debug!(
                intent = intent.label(),
                llm_calls = session.breaker.count(),
                "Coordinator step"
            );

            match intent {
                Intent::Reply { body } => return Outcome::Reply(body),
                Intent::NoResponse => return Outcome::NoResponse,
                Intent::Research(request) => match self.router.dispatch(&request).await {
                    Ok(results) => session.transcript.push_user(results),
                    Err(DispatchError::UnknownAgent { name, available }) => {
                        tracing::warn!(agent = %name, "Model requested unknown sub-agent");
                        session.transcript.push_user(unknown_agent_turn(&name, &available));
                    }
                    Err(DispatchError::Failed { agent, source }) => {
                        return Outcome::Fatal(FatalReason::SubAgentFailure {
                            agent,
                            reason: source.to_string(),
                        });
                    }
                },
                Intent::RankRequest { rank } => {
                    let request = NoteRequest {
                        context: context.to_string(),
                        instructions: RANK_ONLY_INSTRUCTIONS.to_string(),
                        rank: Some(rank),
                    };
                    if let Some(fatal) = self.delegate(session, request).await {
                        return fatal;
                    }
                }
                Intent::FeedbackNote { rank, context: instructions } => {
                    let request = NoteRequest {
                        context: context.to_string(),
                        instructions,
                        rank,
                    };
                    if let Some(fatal) = self.delegate(session, request).await {
                        return fatal;
                    }
                }
            }
        }
    }

    /// Hand a note request to the nested flow and feed its result back.
    ///
    /// Spends one unit of the outer budget. Returns an outcome only when
    /// the session must end.
    async fn delegate(&self, session: &mut Session, request: NoteRequest) -> Option<Outcome> {
        let Some(flow) = self.feedback_notes.as_ref() else {
            tracing::warn!("Feedback note requested but no writer is configured");
            session.transcript.push_user(
                "Feedback note generation is not available. Reply to the sender without it.",
            );
            return None;
        };

        if let Err(tripped) = session.breaker.try_acquire() {
            return Some(Outcome::Fatal(FatalReason::BreakerTripped { max: tripped.max }));
        }

        tracing::info!(rank = ?request.rank, "Delegating to feedback note flow");
        match flow.run(&request, &mut session.meter).await {
            Ok(nested) => {
                session.transcript.push_user(nested.into_turn());
                None
            }
            Err(FlowError::Provider(e)) => Some(Outcome::Fatal(e.into())),
            Err(FlowError::Prompt(e)) => Some(Outcome::Fatal(e.into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::*;
    use crate::agent::exchange::ModelSettings;
    use crate::agent::nested::FeedbackNoteConfig;
    use crate::agent::parser::ResponseParser;
    use crate::documents::StaticDocumentRetriever;
    use crate::error::{LlmError, SubAgentError};
    use crate::llm::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};
    use crate::prompts::StaticPromptRepository;
    use crate::subagents::{FailurePolicy, SubAgent};

    struct ScriptedLlm {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedLlm {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().map(|s| Ok(s.to_string())).collect()),
                seen: Mutex::new(Vec::new()),
            })
        }

        async fn calls(&self) -> usize {
            self.seen.lock().await.len()
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        fn model_name(&self) -> &str {
            "scripted"
        }
        fn cost_per_token(&self) -> (Decimal, Decimal) {
            (Decimal::new(1, 6), Decimal::new(2, 6))
        }
        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            self.seen.lock().await.push(request);
            let content = self
                .replies
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Ok("<no_response/>".to_string()))?;
            Ok(CompletionResponse {
                content,
                input_tokens: 100,
                output_tokens: 10,
                finish_reason: FinishReason::Stop,
                response_id: None,
            })
        }
    }

    struct Upper;

    #[async_trait]
    impl SubAgent for Upper {
        fn name(&self) -> &str {
            "upper"
        }
        fn description(&self) -> &str {
            "Uppercases the query"
        }
        async fn research(&self, query: &str) -> Result<String, SubAgentError> {
            Ok(query.to_uppercase())
        }
    }

    struct Failing;

    #[async_trait]
    impl SubAgent for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        async fn research(&self, _query: &str) -> Result<String, SubAgentError> {
            Err(SubAgentError::Llm(LlmError::RequestFailed {
                provider: "test".into(),
                reason: "boom".into(),
            }))
        }
    }

    fn coordinator(llm: Arc<ScriptedLlm>, max_calls: u32) -> Coordinator {
        let mut router = SubAgentRouter::new();
        router.register(Arc::new(Upper), FailurePolicy::Degrade);
        router.register(Arc::new(Failing), FailurePolicy::Propagate);

        let parser = Arc::new(ResponseParser::new());
        let flow = FeedbackNoteFlow::new(
            Exchange::new(llm.clone(), parser.clone(), ModelSettings::new(None, 0.2)),
            Arc::new(StaticPromptRepository::new().with("feedback_note", "Write notes.")),
            Arc::new(StaticDocumentRetriever::new().with("pace_note", "cpl.md", "CPL comps")),
            FeedbackNoteConfig::default(),
        );

        Coordinator::new(
            Exchange::new(llm, parser, ModelSettings::new(None, 0.2)),
            "You are the coordinator.",
            Arc::new(router),
            max_calls,
        )
        .with_feedback_notes(Arc::new(flow))
    }

    #[tokio::test]
    async fn research_results_are_fed_back() {
        let llm = ScriptedLlm::new(&[
            r#"<research><sub_agent name="upper"><query>leave</query><query>pay</query></sub_agent></research>"#,
            "<reply><body>Done</body></reply>",
        ]);
        let report = coordinator(llm.clone(), 6).run_session("Subject: q").await;

        assert_eq!(report.outcome, Outcome::Reply("Done".into()));
        assert_eq!(report.llm_calls, 2);
        let seen = llm.seen.lock().await;
        let results = &seen[1].messages.last().unwrap().content;
        assert!(results.starts_with("<research_results agent=\"upper\">"));
        assert!(results.contains("Query: leave\nResponse: LEAVE"));
        assert!(results.contains("Query: pay\nResponse: PAY"));
    }

    #[tokio::test]
    async fn propagating_sub_agent_failure_is_fatal() {
        let llm = ScriptedLlm::new(&[
            r#"<research><sub_agent name="failing"><query>q</query></sub_agent></research>"#,
        ]);
        let outcome = coordinator(llm.clone(), 6).run("ctx").await;
        assert!(matches!(
            outcome,
            Outcome::Fatal(FatalReason::SubAgentFailure { ref agent, .. }) if agent == "failing"
        ));
        assert_eq!(llm.calls().await, 1);
    }

    #[tokio::test]
    async fn provider_error_is_surfaced() {
        let llm = Arc::new(ScriptedLlm {
            replies: Mutex::new(VecDeque::from([Err(LlmError::RateLimited {
                provider: "scripted".into(),
                retry_after: None,
            })])),
            seen: Mutex::new(Vec::new()),
        });
        let outcome = coordinator(llm, 6).run("ctx").await;
        match outcome {
            Outcome::Fatal(FatalReason::Provider(LlmError::RateLimited { .. })) => {}
            other => panic!("Expected RateLimited, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn feedback_note_is_delegated_and_returned() {
        let llm = ScriptedLlm::new(&[
            "<feedback_note rank=\"cpl\">Cpl Smith ran the range</feedback_note>",
            // nested flow: rank is preselected, so it writes straight away
            "<reply><body>Cpl Smith demonstrated leadership.</body></reply>",
            "<reply><body>Here is your note: Cpl Smith demonstrated leadership.</body></reply>",
        ]);
        let report = coordinator(llm.clone(), 6).run_session("Subject: note").await;

        assert_eq!(
            report.outcome,
            Outcome::Reply("Here is your note: Cpl Smith demonstrated leadership.".into())
        );
        assert_eq!(report.llm_calls, 3);
        // outer call, delegation, outer call
        assert_eq!(report.budget_used, 3);

        let seen = llm.seen.lock().await;
        let fed_back = &seen[2].messages.last().unwrap().content;
        assert!(fed_back.contains("<feedback_note_result rank=\"cpl\">"));
        assert!(fed_back.contains("Cpl Smith demonstrated leadership."));
    }

    #[tokio::test]
    async fn delegation_spends_outer_budget() {
        // Two outer calls plus one delegation fill a budget of 3.
        let llm = ScriptedLlm::new(&[
            "<rank>sgt</rank>",
            "<reply><body>note</body></reply>",
            "<rank>sgt</rank>",
        ]);
        let report = coordinator(llm.clone(), 3).run_session("ctx").await;
        assert_eq!(
            report.outcome,
            Outcome::Fatal(FatalReason::BreakerTripped { max: 3 })
        );
        assert_eq!(report.budget_used, 3);
        assert_eq!(llm.calls().await, 3);
    }

    /// Answers by calling the model itself.
    struct Consulting {
        llm: Arc<ScriptedLlm>,
    }

    #[async_trait]
    impl SubAgent for Consulting {
        fn name(&self) -> &str {
            "consulting"
        }
        fn description(&self) -> &str {
            "Asks its own model"
        }
        async fn research(&self, query: &str) -> Result<String, SubAgentError> {
            let request = CompletionRequest::new(vec![crate::llm::ChatMessage::user(query)]);
            Ok(self.llm.complete(request).await?.content)
        }
    }

    #[tokio::test]
    async fn sub_agent_calls_are_not_metered() {
        let llm = ScriptedLlm::new(&[
            r#"<research><sub_agent name="consulting"><query>leave</query></sub_agent></research>"#,
            "Twenty days",
            "<reply><body>Done</body></reply>",
        ]);
        let mut router = SubAgentRouter::new();
        router.register(Arc::new(Consulting { llm: llm.clone() }), FailurePolicy::Degrade);
        let coordinator = Coordinator::new(
            Exchange::new(llm.clone(), Arc::new(ResponseParser::new()), ModelSettings::new(None, 0.2)),
            "You are the coordinator.",
            Arc::new(router),
            6,
        );

        let report = coordinator.run_session("Subject: q").await;

        assert_eq!(report.outcome, Outcome::Reply("Done".into()));
        assert_eq!(llm.calls().await, 3);
        assert_eq!(report.llm_calls, 2);
        assert_eq!(report.budget_used, 2);
        assert_eq!(report.usage.input_tokens, 200);
    }

    #[tokio::test]
    async fn usage_is_accumulated() {
        let llm = ScriptedLlm::new(&["garbage", "<no_response/>"]);
        let report = coordinator(llm, 6).run_session("ctx").await;
        assert_eq!(report.outcome, Outcome::NoResponse);
        assert_eq!(report.usage.input_tokens, 200);
        assert_eq!(report.usage.output_tokens, 20);
        assert_eq!(report.cost, Decimal::new(240, 6));
    }
}
