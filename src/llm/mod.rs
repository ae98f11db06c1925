//! LLM integration.
//!
//! The engine only sees the `LlmProvider` trait. The shipped backend is
//! OpenRouter, which fronts every model the agents route to. Transport is
//! rig-core; `RigAdapter` bridges rig's completion client to `LlmProvider`.

pub mod costs;
pub mod provider;
mod rig_adapter;

pub use provider::*;
pub use rig_adapter::RigAdapter;

use std::sync::Arc;
use std::time::Duration;

use secrecy::ExposeSecret;

use crate::error::LlmError;

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: secrecy::SecretString,
    /// Default model for requests that don't name one.
    pub model: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Alternative OpenRouter-compatible API base, e.g. `http://localhost:8080/api/v1`.
    pub base_url: Option<String>,
}

/// The OpenRouter-backed provider.
pub type OpenRouterProvider = RigAdapter<rig::providers::openrouter::Client>;

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::openrouter;

    let key = config.api_key.expose_secret();
    let client: openrouter::Client = match config.base_url {
        Some(ref url) => openrouter::Client::builder().api_key(key).base_url(url).build(),
        None => openrouter::Client::new(key),
    }
    .map_err(|e| LlmError::RequestFailed {
        provider: "openrouter".to_string(),
        reason: format!("Failed to create OpenRouter client: {}", e),
    })?;

    tracing::info!("Using OpenRouter (model: {})", config.model);
    let provider: OpenRouterProvider =
        RigAdapter::new(client, "openrouter", &config.model, config.timeout);
    Ok(Arc::new(provider))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_provider_constructs_without_network() {
        // The key is only checked when a request is made.
        let config = LlmConfig {
            api_key: secrecy::SecretString::from("test-key"),
            model: "anthropic/claude-3.5-sonnet".to_string(),
            timeout: Duration::from_secs(30),
            base_url: None,
        };
        let provider = create_provider(&config);
        assert!(provider.is_ok());
        assert_eq!(provider.unwrap().model_name(), "anthropic/claude-3.5-sonnet");
    }

    #[test]
    fn test_create_provider_with_custom_endpoint() {
        let config = LlmConfig {
            api_key: secrecy::SecretString::from("sk-test"),
            model: "openai/gpt-4o".to_string(),
            timeout: Duration::from_secs(30),
            base_url: Some("http://localhost:8080/api/v1".to_string()),
        };
        let provider = create_provider(&config);
        assert!(provider.is_ok());
        assert_eq!(provider.unwrap().model_name(), "openai/gpt-4o");
    }
}
