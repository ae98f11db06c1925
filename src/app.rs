//! Wiring: builds the coordinator and its collaborators from configuration.

use std::sync::Arc;

use crate::agent::{Coordinator, Exchange, FeedbackNoteFlow, ModelSettings, ResponseParser};
use crate::config::AppConfig;
use crate::documents::{DocumentRetriever, FsDocumentRetriever, HttpDocumentRetriever};
use crate::error::Result;
use crate::llm::{LlmProvider, create_provider};
use crate::prompts::{self, FsPromptRepository, PromptRepository};
use crate::subagents::{DoadPolicyAgent, FailurePolicy, LeavePolicyAgent, SubAgentRouter};

/// Shared collaborators every component is built from.
pub struct Services {
    pub llm: Arc<dyn LlmProvider>,
    pub prompts: Arc<dyn PromptRepository>,
    pub documents: Arc<dyn DocumentRetriever>,
}

impl Services {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let llm = create_provider(&config.llm.provider_config())?;
        let prompts: Arc<dyn PromptRepository> = Arc::new(FsPromptRepository::new(&config.storage.prompts_dir));
        let documents: Arc<dyn DocumentRetriever> = match &config.storage.documents_base_url {
            Some(url) => {
                tracing::info!(base_url = %url, "Documents served over HTTP");
                Arc::new(HttpDocumentRetriever::new(url.clone(), config.llm.timeout)?)
            }
            None => {
                tracing::info!(dir = %config.storage.documents_dir.display(), "Documents served from disk");
                Arc::new(FsDocumentRetriever::new(&config.storage.documents_dir))
            }
        };
        Ok(Self { llm, prompts, documents })
    }
}

/// Register the built-in research capabilities.
pub fn build_router(services: &Services, config: &AppConfig) -> SubAgentRouter {
    let model = config.llm.sub_agent_model.clone();
    let mut router = SubAgentRouter::new();
    router.register(
        Arc::new(LeavePolicyAgent::new(
            Arc::clone(&services.llm),
            Arc::clone(&services.prompts),
            Arc::clone(&services.documents),
            model.clone(),
        )),
        FailurePolicy::Degrade,
    );
    router.register(
        Arc::new(DoadPolicyAgent::new(
            Arc::clone(&services.llm),
            Arc::clone(&services.prompts),
            Arc::clone(&services.documents),
            model,
        )),
        FailurePolicy::Degrade,
    );
    router
}

/// Build the coordinator with its router and feedback-note flow.
///
/// The coordinator prompt is loaded once here; `{{sub_agents}}` lists the
/// registered capabilities.
pub async fn build_coordinator(services: &Services, config: &AppConfig) -> Result<Coordinator> {
    let parser = Arc::new(ResponseParser::new());
    let router = Arc::new(build_router(services, config));

    let template = services.prompts.get(prompts::names::COORDINATOR).await?;
    let instructions = prompts::render(&template, &[("sub_agents", router.describe().as_str())]);

    let flow = FeedbackNoteFlow::new(
        Exchange::new(
            Arc::clone(&services.llm),
            Arc::clone(&parser),
            ModelSettings::new(config.llm.feedback_note_model.clone(), config.llm.temperature),
        ),
        Arc::clone(&services.prompts),
        Arc::clone(&services.documents),
        config.coordinator.feedback_note.clone(),
    );

    let exchange = Exchange::new(
        Arc::clone(&services.llm),
        parser,
        ModelSettings::new(config.llm.coordinator_model.clone(), config.llm.temperature),
    );

    tracing::info!(
        sub_agents = ?router.names(),
        max_calls = config.coordinator.max_calls,
        "Coordinator ready"
    );

    Ok(Coordinator::new(exchange, instructions, router, config.coordinator.max_calls)
        .with_feedback_notes(Arc::new(flow)))
}
