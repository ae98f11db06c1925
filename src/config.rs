//! Configuration, read from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::agent::nested::FeedbackNoteConfig;
use crate::channels::email::EmailConfig;
use crate::error::ConfigError;
use crate::llm::LlmConfig;

/// Read an optional variable, treating empty values as unset.
pub(crate) fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse an optional variable, falling back to `default` when unset.
pub(crate) fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_opt(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{raw}': {e}"),
        }),
    }
}

/// LLM access and per-role model choices.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub api_key: SecretString,
    pub model: String,
    pub temperature: f32,
    pub timeout: Duration,
    pub base_url: Option<String>,
    pub coordinator_model: Option<String>,
    pub feedback_note_model: Option<String>,
    pub sub_agent_model: Option<String>,
}

impl LlmSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = env_opt("OPENROUTER_API_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("OPENROUTER_API_KEY".to_string()))?;

        let temperature: f32 = env_parse("LLM_TEMPERATURE", 0.2)?;
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::InvalidValue {
                key: "LLM_TEMPERATURE".to_string(),
                message: format!("{temperature} is outside 0.0..=2.0"),
            });
        }

        Ok(Self {
            api_key: SecretString::from(api_key),
            model: env_opt("LLM_MODEL").unwrap_or_else(|| "anthropic/claude-3.5-sonnet".to_string()),
            temperature,
            timeout: Duration::from_secs(env_parse("LLM_TIMEOUT_SECS", 60)?),
            base_url: env_opt("LLM_BASE_URL"),
            coordinator_model: env_opt("COORDINATOR_MODEL"),
            feedback_note_model: env_opt("FEEDBACK_NOTE_MODEL"),
            sub_agent_model: env_opt("SUB_AGENT_MODEL"),
        })
    }

    pub fn provider_config(&self) -> LlmConfig {
        LlmConfig {
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            timeout: self.timeout,
            base_url: self.base_url.clone(),
        }
    }
}

/// Call budgets and reply decoration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub max_calls: u32,
    pub feedback_note: FeedbackNoteConfig,
    pub reply_signature: Option<String>,
}

impl CoordinatorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let max_calls = env_parse("COORDINATOR_MAX_CALLS", 6)?;
        let feedback_max = env_parse("FEEDBACK_NOTE_MAX_CALLS", 3)?;
        for (key, value) in [("COORDINATOR_MAX_CALLS", max_calls), ("FEEDBACK_NOTE_MAX_CALLS", feedback_max)] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "must be at least 1".to_string(),
                });
            }
        }

        let defaults = FeedbackNoteConfig::default();
        Ok(Self {
            max_calls,
            feedback_note: FeedbackNoteConfig {
                max_calls: feedback_max,
                default_rank: env_opt("FEEDBACK_NOTE_DEFAULT_RANK")
                    .map(|r| r.to_lowercase())
                    .unwrap_or(defaults.default_rank),
                category: defaults.category,
            },
            reply_signature: env_opt("REPLY_SIGNATURE").map(|s| s.replace("\\n", "\n")),
        })
    }
}

/// Where prompts and reference documents live.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub prompts_dir: PathBuf,
    pub documents_dir: PathBuf,
    /// When set, documents are fetched over HTTP instead of from `documents_dir`.
    pub documents_base_url: Option<String>,
}

impl StorageConfig {
    pub fn from_env() -> Self {
        Self {
            prompts_dir: env_opt("PROMPTS_DIR").map_or_else(|| PathBuf::from("./prompts"), PathBuf::from),
            documents_dir: env_opt("DOCUMENTS_DIR").map_or_else(|| PathBuf::from("./documents"), PathBuf::from),
            documents_base_url: env_opt("DOCUMENTS_BASE_URL"),
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub json: bool,
    /// Directory for a daily rolling log file, in addition to stderr.
    pub dir: Option<PathBuf>,
}

impl LogConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            json: env_parse("LOG_JSON", false)?,
            dir: env_opt("LOG_DIR").map(PathBuf::from),
        })
    }
}

/// Everything the binary needs.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub llm: LlmSettings,
    pub coordinator: CoordinatorConfig,
    pub storage: StorageConfig,
    pub log: LogConfig,
    /// `None` when `EMAIL_IMAP_HOST` is unset.
    pub email: Option<EmailConfig>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            llm: LlmSettings::from_env()?,
            coordinator: CoordinatorConfig::from_env()?,
            storage: StorageConfig::from_env(),
            log: LogConfig::from_env()?,
            email: EmailConfig::from_env()?,
        })
    }
}
