//! One model turn: call, record, parse, and at most one corrective retry.
//!
//! Shared by the coordinator and the nested feedback-note flow so both
//! loops apply the same breaker and retry rules.

use std::sync::Arc;

use crate::agent::breaker::{BreakerTripped, CircuitBreaker};
use crate::agent::intent::Intent;
use crate::agent::parser::ResponseParser;
use crate::agent::session::{Transcript, UsageMeter};
use crate::error::{LlmError, ParseError};
use crate::llm::{CompletionRequest, LlmProvider};

/// Model and sampling settings for one loop.
#[derive(Debug, Clone)]
pub struct ModelSettings {
    /// `None` uses the provider's default model.
    pub model: Option<String>,
    pub temperature: f32,
}

impl ModelSettings {
    pub fn new(model: Option<String>, temperature: f32) -> Self {
        Self { model, temperature }
    }
}

/// Why an exchange produced no intent.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error(transparent)]
    Breaker(#[from] BreakerTripped),

    #[error(transparent)]
    Provider(#[from] LlmError),

    /// The retry was also unparseable.
    #[error(transparent)]
    Unparseable(ParseError),
}

/// Calls the model over a transcript and decodes the reply.
pub struct Exchange {
    llm: Arc<dyn LlmProvider>,
    parser: Arc<ResponseParser>,
    settings: ModelSettings,
}

impl Exchange {
    pub fn new(llm: Arc<dyn LlmProvider>, parser: Arc<ResponseParser>, settings: ModelSettings) -> Self {
        Self {
            llm,
            parser,
            settings,
        }
    }

    pub fn settings(&self) -> &ModelSettings {
        &self.settings
    }

    /// Produce the next intent, retrying once on a parse failure.
    ///
    /// Every call (including the retry) is reserved on `breaker` first.
    pub async fn next_intent(
        &self,
        transcript: &mut Transcript,
        breaker: &mut CircuitBreaker,
        meter: &mut UsageMeter,
    ) -> Result<Intent, ExchangeError> {
        let first = self.call(transcript, breaker, meter).await?;
        let error = match self.parser.parse(&first) {
            Ok(intent) => return Ok(intent),
            Err(e) => e,
        };

        tracing::warn!(
            error = %error.description,
            llm_calls = breaker.count(),
            "Model response unparseable, asking for a corrected reply"
        );
        transcript.push_user(correction_turn(&error));

        let second = self.call(transcript, breaker, meter).await?;
        self.parser.parse(&second).map_err(|e| {
            tracing::warn!(error = %e.description, "Retry also unparseable");
            ExchangeError::Unparseable(e)
        })
    }

    async fn call(
        &self,
        transcript: &mut Transcript,
        breaker: &mut CircuitBreaker,
        meter: &mut UsageMeter,
    ) -> Result<String, ExchangeError> {
        breaker.try_acquire()?;

        let mut request = CompletionRequest::new(transcript.turns().to_vec())
            .with_temperature(self.settings.temperature);
        if let Some(ref model) = self.settings.model {
            request = request.with_model(model.clone());
        }

        let response = self.llm.complete(request).await?;
        meter.record(&response, self.llm.cost_per_token());
        tracing::debug!(
            llm_calls = breaker.count(),
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            "LLM call complete"
        );

        transcript.push_assistant(response.content.clone());
        Ok(response.content)
    }
}

fn correction_turn(error: &ParseError) -> String {
    format!(
        "Your previous response could not be processed: {}.\n\
         Respond again with exactly one of the allowed XML elements and nothing else.",
        error.description
    )
}
