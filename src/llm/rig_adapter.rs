//! Bridges a rig-core completion client to our `LlmProvider` trait.
//!
//! One `complete()` call is one rig request. Failures are mapped to
//! `LlmError` and returned; nothing is retried here.

use std::error::Error as StdError;
use std::time::Duration;

use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::{AssistantContent, CompletionError, CompletionModel};
use rig::message::Message;
use rust_decimal::Decimal;

use crate::error::LlmError;
use crate::llm::costs;
use crate::llm::provider::{ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Role};

/// `LlmProvider` backed by any rig client.
///
/// The client is kept rather than a single model so a request can name a
/// different model than the default.
pub struct RigAdapter<C> {
    client: C,
    provider: &'static str,
    model: String,
    timeout: Duration,
}

impl<C> RigAdapter<C> {
    /// `timeout` bounds each request, including reading the response.
    pub fn new(client: C, provider: &'static str, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            provider,
            model: model.into(),
            timeout,
        }
    }

    fn map_error(&self, error: CompletionError) -> LlmError {
        let provider = self.provider.to_string();
        let chain = std::iter::successors(Some(&error as &(dyn StdError + 'static)), |e| (*e).source());
        for cause in chain {
            if let Some(http) = cause.downcast_ref::<reqwest::Error>() {
                if http.is_timeout() {
                    return LlmError::Timeout {
                        provider,
                        after: self.timeout,
                    };
                }
                if let Some(status) = http.status() {
                    return classify_status(status.as_u16(), provider, &error.to_string());
                }
            }
        }

        if matches!(error, CompletionError::JsonError(_) | CompletionError::ResponseError(_)) {
            return LlmError::InvalidResponse {
                provider,
                reason: error.to_string(),
            };
        }
        classify_message(provider, &error.to_string(), self.timeout)
    }
}

/// Split a transcript into rig's preamble, history and final prompt.
///
/// System turns are joined into the preamble. The last non-system turn is
/// the prompt; an empty transcript has none.
fn split_transcript(messages: &[ChatMessage]) -> (Option<String>, Vec<&ChatMessage>, Option<&ChatMessage>) {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();
    let preamble = (!system.is_empty()).then(|| system.join("\n\n"));

    let mut turns: Vec<&ChatMessage> = messages.iter().filter(|m| m.role != Role::System).collect();
    let prompt = turns.pop();
    (preamble, turns, prompt)
}

fn to_rig(message: &ChatMessage) -> Message {
    match message.role {
        Role::Assistant => Message::assistant(message.content.clone()),
        Role::User | Role::System => Message::user(message.content.clone()),
    }
}

fn classify_status(status: u16, provider: String, detail: &str) -> LlmError {
    match status {
        429 => LlmError::RateLimited {
            provider,
            retry_after: None,
        },
        401 | 403 => LlmError::AuthFailed { provider },
        _ => LlmError::RequestFailed {
            provider,
            reason: format!("HTTP {status}: {}", truncate(detail)),
        },
    }
}

/// Providers report HTTP failures as text; recover the kind from it.
fn classify_message(provider: String, message: &str, timeout: Duration) -> LlmError {
    let lower = message.to_lowercase();
    if lower.contains("429") || lower.contains("rate limit") || lower.contains("too many requests") {
        LlmError::RateLimited {
            provider,
            retry_after: None,
        }
    } else if lower.contains("401") || lower.contains("unauthorized") || lower.contains("invalid api key") {
        LlmError::AuthFailed { provider }
    } else if lower.contains("timed out") || lower.contains("timeout") {
        LlmError::Timeout {
            provider,
            after: timeout,
        }
    } else {
        LlmError::RequestFailed {
            provider,
            reason: truncate(message),
        }
    }
}

fn truncate(text: &str) -> String {
    text.chars().take(300).collect()
}

#[async_trait]
impl<C> LlmProvider for RigAdapter<C>
where
    C: CompletionClient + Send + Sync + 'static,
{
    fn model_name(&self) -> &str {
        &self.model
    }

    fn cost_per_token(&self) -> (Decimal, Decimal) {
        costs::model_cost(&self.model).unwrap_or_else(costs::default_cost)
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let model_id = request.model.as_deref().unwrap_or(&self.model);
        let (preamble, history, prompt) = split_transcript(&request.messages);
        let Some(prompt) = prompt else {
            return Err(LlmError::RequestFailed {
                provider: self.provider.to_string(),
                reason: "transcript has no user or assistant turn".to_string(),
            });
        };

        tracing::debug!(model = model_id, turns = request.messages.len(), "Calling {}", self.provider);

        let model = self.client.completion_model(model_id);
        let mut builder = model
            .completion_request(to_rig(prompt))
            .messages(history.into_iter().map(to_rig).collect());
        if let Some(preamble) = preamble {
            builder = builder.preamble(preamble);
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(f64::from(temperature));
        }
        if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(u64::from(max_tokens));
        }

        let response = tokio::time::timeout(self.timeout, builder.send())
            .await
            .map_err(|_| LlmError::Timeout {
                provider: self.provider.to_string(),
                after: self.timeout,
            })?
            .map_err(|e| self.map_error(e))?;

        let content: String = response
            .choice
            .iter()
            .filter_map(|c| match c {
                AssistantContent::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");
        if content.is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: self.provider.to_string(),
                reason: "response contained no text".to_string(),
            });
        }

        Ok(CompletionResponse {
            content,
            input_tokens: u32::try_from(response.usage.input_tokens).unwrap_or(u32::MAX),
            output_tokens: u32::try_from(response.usage.output_tokens).unwrap_or(u32::MAX),
            finish_reason: FinishReason::Stop,
            response_id: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_splits_into_preamble_history_and_prompt() {
        let messages = vec![
            ChatMessage::system("sys"),
            ChatMessage::user("question"),
            ChatMessage::assistant("garbage"),
            ChatMessage::user("Respond again"),
        ];
        let (preamble, history, prompt) = split_transcript(&messages);
        assert_eq!(preamble.as_deref(), Some("sys"));
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(prompt.map(|m| m.content.as_str()), Some("Respond again"));
    }

    #[test]
    fn system_only_transcript_has_no_prompt() {
        let messages = vec![ChatMessage::system("sys")];
        let (preamble, history, prompt) = split_transcript(&messages);
        assert!(preamble.is_some());
        assert!(history.is_empty());
        assert!(prompt.is_none());
    }

    #[test]
    fn status_codes_map_to_error_kinds() {
        assert!(matches!(
            classify_status(429, "p".into(), ""),
            LlmError::RateLimited { retry_after: None, .. }
        ));
        assert!(matches!(classify_status(401, "p".into(), ""), LlmError::AuthFailed { .. }));
        assert!(matches!(classify_status(403, "p".into(), ""), LlmError::AuthFailed { .. }));
        match classify_status(502, "p".into(), "bad gateway") {
            LlmError::RequestFailed { reason, .. } => assert!(reason.contains("502")),
            other => panic!("Expected RequestFailed, got {:?}", other),
        }
    }

    #[test]
    fn provider_messages_map_to_error_kinds() {
        let timeout = Duration::from_secs(60);
        assert!(matches!(
            classify_message("p".into(), "ProviderError: 429 Too Many Requests", timeout),
            LlmError::RateLimited { .. }
        ));
        assert!(matches!(
            classify_message("p".into(), "ProviderError: 401 Unauthorized", timeout),
            LlmError::AuthFailed { .. }
        ));
        assert!(matches!(
            classify_message("p".into(), "operation timed out", timeout),
            LlmError::Timeout { .. }
        ));
        assert!(matches!(
            classify_message("p".into(), "connection refused", timeout),
            LlmError::RequestFailed { .. }
        ));
    }

    #[test]
    fn long_failure_text_is_truncated() {
        match classify_message("p".into(), &"x".repeat(1000), Duration::from_secs(1)) {
            LlmError::RequestFailed { reason, .. } => assert_eq!(reason.len(), 300),
            other => panic!("Expected RequestFailed, got {:?}", other),
        }
    }
}
