//! Leave policy lookups.

use std::sync::Arc;

use async_trait::async_trait;

use crate::documents::DocumentRetriever;
use crate::error::SubAgentError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::prompts::{self, PromptRepository};
use crate::subagents::SubAgent;

const DOCUMENT_CATEGORY: &str = "leave_policy";
const DOCUMENT_NAME: &str = "leave_policy.md";
const TEMPERATURE: f32 = 0.3;

/// Answers leave questions from the leave policy document in one LLM call.
pub struct LeavePolicyAgent {
    llm: Arc<dyn LlmProvider>,
    prompts: Arc<dyn PromptRepository>,
    documents: Arc<dyn DocumentRetriever>,
    model: Option<String>,
}

impl LeavePolicyAgent {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        prompts: Arc<dyn PromptRepository>,
        documents: Arc<dyn DocumentRetriever>,
        model: Option<String>,
    ) -> Self {
        Self {
            llm,
            prompts,
            documents,
            model,
        }
    }
}

#[async_trait]
impl SubAgent for LeavePolicyAgent {
    fn name(&self) -> &str {
        "leave_policy"
    }

    fn description(&self) -> &str {
        "Answers questions about leave entitlements and procedures"
    }

    async fn research(&self, query: &str) -> Result<String, SubAgentError> {
        let policy = self.documents.get(DOCUMENT_CATEGORY, DOCUMENT_NAME).await?;
        tracing::debug!(chars = policy.len(), "Loaded leave policy");

        let template = self.prompts.get(prompts::names::LEAVE_POLICY).await?;
        let system = prompts::render(&template, &[("leave_policy", policy.as_str())]);

        let mut request = CompletionRequest::new(vec![ChatMessage::system(system), ChatMessage::user(query)])
            .with_temperature(TEMPERATURE);
        if let Some(ref model) = self.model {
            request = request.with_model(model.clone());
        }

        let response = self.llm.complete(request).await?;
        Ok(response.content.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use tokio::sync::Mutex;

    use super::*;
    use crate::documents::StaticDocumentRetriever;
    use crate::error::{DocumentError, LlmError};
    use crate::llm::{CompletionResponse, FinishReason};
    use crate::prompts::StaticPromptRepository;

    /// Records the last request and answers with a fixed string.
    struct RecordingLlm {
        last: Mutex<Option<CompletionRequest>>,
    }

    #[async_trait]
    impl LlmProvider for RecordingLlm {
        fn model_name(&self) -> &str {
            "recording"
        }
        fn cost_per_token(&self) -> (Decimal, Decimal) {
            (Decimal::ZERO, Decimal::ZERO)
        }
        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            *self.last.lock().await = Some(request);
            Ok(CompletionResponse {
                content: " You get 20 days. ".into(),
                input_tokens: 0,
                output_tokens: 0,
                finish_reason: FinishReason::Stop,
                response_id: None,
            })
        }
    }

    #[tokio::test]
    async fn injects_policy_into_system_prompt() {
        let llm = Arc::new(RecordingLlm {
            last: Mutex::new(None),
        });
        let agent = LeavePolicyAgent::new(
            llm.clone(),
            Arc::new(StaticPromptRepository::new().with("leave_policy", "Policy:\n{{leave_policy}}")),
            Arc::new(StaticDocumentRetriever::new().with("leave_policy", "leave_policy.md", "Annual leave: 20 days")),
            Some("openai/gpt-4o-mini".into()),
        );

        let answer = agent.research("How much annual leave?").await.unwrap();
        assert_eq!(answer, "You get 20 days.");

        let request = llm.last.lock().await.take().unwrap();
        assert_eq!(request.messages[0].content, "Policy:\nAnnual leave: 20 days");
        assert_eq!(request.messages[1].content, "How much annual leave?");
        assert_eq!(request.temperature, Some(0.3));
        assert_eq!(request.model.as_deref(), Some("openai/gpt-4o-mini"));
    }

    #[tokio::test]
    async fn missing_policy_is_error() {
        let agent = LeavePolicyAgent::new(
            Arc::new(RecordingLlm {
                last: Mutex::new(None),
            }),
            Arc::new(StaticPromptRepository::new().with("leave_policy", "{{leave_policy}}")),
            Arc::new(StaticDocumentRetriever::new()),
            None,
        );
        assert!(matches!(
            agent.research("q").await,
            Err(SubAgentError::Document(DocumentError::NotFound { .. }))
        ));
    }
}
