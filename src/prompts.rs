//! Prompt templates.
//!
//! Templates are markdown files named `<name>.md` under a prompts
//! directory. Placeholders use `{{key}}` and are filled by the caller with
//! [`render`] before the text goes into a transcript.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::RwLock;

use crate::error::PromptError;

/// Well-known prompt names.
pub mod names {
    pub const COORDINATOR: &str = "coordinator";
    pub const FEEDBACK_NOTE: &str = "feedback_note";
    pub const LEAVE_POLICY: &str = "leave_policy";
    pub const DOAD_SELECTOR: &str = "doad_selector";
    pub const DOAD_ANSWER: &str = "doad_answer";
    pub const DOAD_TABLE: &str = "doad_table";
}

/// Read-only source of prompt templates.
#[async_trait]
pub trait PromptRepository: Send + Sync {
    async fn get(&self, name: &str) -> Result<String, PromptError>;
}

/// Loads `<dir>/<name>.md` and caches the trimmed text.
pub struct FsPromptRepository {
    dir: PathBuf,
    cache: RwLock<HashMap<String, String>>,
}

impl FsPromptRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl PromptRepository for FsPromptRepository {
    async fn get(&self, name: &str) -> Result<String, PromptError> {
        if let Some(cached) = self.cache.read().await.get(name) {
            return Ok(cached.clone());
        }

        let path = self.dir.join(format!("{name}.md"));
        let text = match fs::read_to_string(&path).await {
            Ok(text) => text.trim().to_string(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "Prompt file not found");
                return Err(PromptError::NotFound(name.to_string()));
            }
            Err(e) => {
                return Err(PromptError::Io {
                    name: name.to_string(),
                    source: e,
                });
            }
        };

        self.cache
            .write()
            .await
            .insert(name.to_string(), text.clone());
        Ok(text)
    }
}

/// In-memory prompts, for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct StaticPromptRepository {
    prompts: HashMap<String, String>,
}

impl StaticPromptRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.prompts.insert(name.into(), text.into());
        self
    }
}

#[async_trait]
impl PromptRepository for StaticPromptRepository {
    async fn get(&self, name: &str) -> Result<String, PromptError> {
        self.prompts
            .get(name)
            .cloned()
            .ok_or_else(|| PromptError::NotFound(name.to_string()))
    }
}

/// Substitute `{{key}}` placeholders. Unknown placeholders are left as is.
pub fn render(template: &str, values: &[(&str, &str)]) -> String {
    values.iter().fold(template.to_string(), |text, (key, value)| {
        text.replace(&format!("{{{{{key}}}}}"), value)
    })
}
