//! DOAD (Defence Administrative Orders and Directives) lookups.
//!
//! Two calls per query: a selector call picks up to three DOAD numbers
//! from the index table, then an answer call reads those documents.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;

use crate::documents::DocumentRetriever;
use crate::error::{DocumentError, SubAgentError};
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::prompts::{self, PromptRepository};
use crate::subagents::SubAgent;

/// Most DOADs loaded for one query.
const MAX_DOAD_FILES: usize = 3;
const DOCUMENT_CATEGORY: &str = "doad";
const TEMPERATURE: f32 = 0.3;

pub struct DoadPolicyAgent {
    llm: Arc<dyn LlmProvider>,
    prompts: Arc<dyn PromptRepository>,
    documents: Arc<dyn DocumentRetriever>,
    model: Option<String>,
    numbers_tag: Regex,
}

impl DoadPolicyAgent {
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
            numbers_tag: Regex::new(r"(?s)<doad_numbers>(.+?)</doad_numbers>")
                .expect("valid doad_numbers regex"),
        }
    }

    async fn call(&self, system: String, query: &str) -> Result<String, SubAgentError> {
        let mut request = CompletionRequest::new(vec![ChatMessage::system(system), ChatMessage::user(query)])
            .with_temperature(TEMPERATURE);
        if let Some(ref model) = self.model {
            request = request.with_model(model.clone());
        }
        Ok(self.llm.complete(request).await?.content)
    }

    /// Pull the DOAD numbers out of a selector response.
    fn parse_numbers(&self, response: &str) -> Vec<String> {
        let Some(raw) = self.numbers_tag.captures(response).and_then(|c| c.get(1)) else {
            tracing::warn!(
                response = %response.chars().take(200).collect::<String>(),
                "No <doad_numbers> tag in selector response"
            );
            return Vec::new();
        };
        raw.as_str()
            .split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            // Numbers become file names.
            .filter(|n| n.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.'))
            .take(MAX_DOAD_FILES)
            .map(str::to_string)
            .collect()
    }

    /// Load each selected DOAD, skipping any that are missing.
    async fn load(&self, numbers: &[String]) -> Result<String, SubAgentError> {
        let mut loaded = Vec::new();
        for number in numbers {
            match self.documents.get(DOCUMENT_CATEGORY, &format!("{number}.md")).await {
                Ok(doc) => loaded.push(format!("<DOAD_{number}>\n{doc}\n</DOAD_{number}>")),
                Err(DocumentError::NotFound { .. }) => {
                    tracing::warn!(doad = %number, "Selected DOAD not found");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(loaded.join("\n\n"))
    }
}

#[async_trait]
impl SubAgent for DoadPolicyAgent {
    fn name(&self) -> &str {
        "doad_policy"
    }

    fn description(&self) -> &str {
        "Answers questions from Defence Administrative Orders and Directives"
    }

    async fn research(&self, query: &str) -> Result<String, SubAgentError> {
        let table = self.prompts.get(prompts::names::DOAD_TABLE).await?;
        let selector = self.prompts.get(prompts::names::DOAD_SELECTOR).await?;
        let selection = self
            .call(prompts::render(&selector, &[("doad_table", table.as_str())]), query)
            .await?;

        let numbers = self.parse_numbers(&selection);
        if numbers.is_empty() {
            return Ok("I couldn't identify relevant DOAD documents for this question.".to_string());
        }
        tracing::debug!(doads = ?numbers, "Selected DOADs");

        let content = self.load(&numbers).await?;
        if content.is_empty() {
            return Ok("No relevant DOAD files found for this question.".to_string());
        }

        let answer = self.prompts.get(prompts::names::DOAD_ANSWER).await?;
        let response = self
            .call(prompts::render(&answer, &[("doad_content", content.as_str())]), query)
            .await?;
        Ok(response.trim().to_string())
    }
}
