//! Stateless research helpers the coordinator can delegate to.
//!
//! A sub-agent answers one query at a time. It may run its own LLM calls
//! and read documents, but it keeps no state between calls and never
//! touches the coordinator's transcript.

pub mod doad;
pub mod leave_policy;

pub use doad::DoadPolicyAgent;
pub use leave_policy::LeavePolicyAgent;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::intent::ResearchRequest;
use crate::error::SubAgentError;

/// A delegated research capability.
#[async_trait]
pub trait SubAgent: Send + Sync {
    /// Name the model uses in `<sub_agent name="...">`.
    fn name(&self) -> &str;

    /// One-line description for logs and prompt listings.
    fn description(&self) -> &str;

    /// Answer one query.
    async fn research(&self, query: &str) -> Result<String, SubAgentError>;
}

/// What to do when a sub-agent call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Substitute an apologetic result and keep the session going.
    #[default]
    Degrade,
    /// End the session.
    Propagate,
}

/// Why a research request could not be answered.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("unknown sub-agent '{name}'")]
    UnknownAgent { name: String, available: Vec<String> },

    #[error("sub-agent '{agent}' failed: {source}")]
    Failed {
        agent: String,
        #[source]
        source: SubAgentError,
    },
}

struct Registration {
    agent: Arc<dyn SubAgent>,
    policy: FailurePolicy,
}

/// Name → sub-agent mapping, built once at startup.
#[derive(Default)]
pub struct SubAgentRouter {
    agents: HashMap<String, Registration>,
}

impl SubAgentRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sub-agent. A later registration with the same name replaces the earlier one.
    pub fn register(&mut self, agent: Arc<dyn SubAgent>, policy: FailurePolicy) {
        let name = agent.name().to_string();
        if self.agents.contains_key(&name) {
            tracing::warn!(agent = %name, "Replacing existing sub-agent registration");
        }
        tracing::debug!(agent = %name, ?policy, "Registered sub-agent");
        self.agents.insert(name, Registration { agent, policy });
    }

    pub fn has(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.keys().cloned().collect();
        names.sort();
        names
    }

    /// `- name: description` lines for the coordinator prompt.
    pub fn describe(&self) -> String {
        self.names()
            .iter()
            .filter_map(|name| self.agents.get(name))
            .map(|r| format!("- {}: {}", r.agent.name(), r.agent.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Run every query against the named sub-agent, in order.
    ///
    /// Returns the formatted `<research_results>` block for the transcript.
    pub async fn dispatch(&self, request: &ResearchRequest) -> Result<String, DispatchError> {
        let Some(registration) = self.agents.get(&request.sub_agent) else {
            return Err(DispatchError::UnknownAgent {
                name: request.sub_agent.clone(),
                available: self.names(),
            });
        };

        let mut sections = Vec::with_capacity(request.queries.len());
        for query in &request.queries {
            let response = match registration.agent.research(query).await {
                Ok(text) => text,
                Err(e) => match registration.policy {
                    FailurePolicy::Degrade => {
                        tracing::warn!(
                            agent = %request.sub_agent,
                            error = %e,
                            "Sub-agent failed, degrading to apology"
                        );
                        degraded_result(&request.sub_agent)
                    }
                    FailurePolicy::Propagate => {
                        tracing::error!(agent = %request.sub_agent, error = %e, "Sub-agent failed");
                        return Err(DispatchError::Failed {
                            agent: request.sub_agent.clone(),
                            source: e,
                        });
                    }
                },
            };
            sections.push(format!("Query: {query}\nResponse: {response}"));
        }

        Ok(format!(
            "<research_results agent=\"{}\">\n{}\n</research_results>",
            request.sub_agent,
            sections.join("\n\n---\n\n")
        ))
    }
}

fn degraded_result(agent: &str) -> String {
    format!(
        "I'm sorry, but the {agent} research service couldn't retrieve this information at this time. \
         No information was found for this query."
    )
}

/// Correction turn for a research request naming an unregistered sub-agent.
pub fn unknown_agent_turn(name: &str, available: &[String]) -> String {
    format!(
        "Error: '{name}' is not a valid sub-agent. Available sub-agents: {}. \
         Use one of these names or answer with the information you already have.",
        if available.is_empty() {
            "none".to_string()
        } else {
            available.join(", ")
        }
    )
}
