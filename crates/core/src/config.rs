//! # Workflow Configuration
//!
//! Tunables for the orchestrator, the task bridge and the LLM-backed skills.
//! Defaults can be overridden from `PROMPTSMITH_*` environment variables,
//! with a `.env` file loaded first if present.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{WorkflowError, WorkflowResult};
use crate::models::{LlmProvider, ModelConfig, CLAUDE_HAIKU, CLAUDE_SONNET, GPT_4O_MINI};

const ENV_PREFIX: &str = "PROMPTSMITH_";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowConfig {
    /// Automatic refine passes inside one approval
    pub max_critic_retries: u32,
    /// Default cap on user-requested refinements per project
    pub max_refinements: u32,
    /// SQLite database file
    pub database_path: PathBuf,
    /// Capacity of event channels and hub rooms
    pub event_buffer: usize,
    /// Attempts per LLM call before giving up
    pub llm_max_retries: u32,
    pub elicitor: ModelConfig,
    pub architect: ModelConfig,
    pub synthesizer: ModelConfig,
    pub critic: ModelConfig,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_critic_retries: 1,
            max_refinements: 3,
            database_path: PathBuf::from(".promptsmith/promptsmith.db"),
            event_buffer: 64,
            llm_max_retries: 3,
            elicitor: ModelConfig::new(CLAUDE_HAIKU),
            architect: ModelConfig::new(CLAUDE_SONNET),
            synthesizer: ModelConfig::new(CLAUDE_SONNET),
            critic: ModelConfig::new(GPT_4O_MINI).with_temperature(0.3),
        }
    }
}

impl WorkflowConfig {
    /// Defaults overridden by `.env` and the process environment.
    pub fn from_env() -> WorkflowResult<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "Loaded .env");
        }
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> WorkflowResult<Self> {
        let var = |name: &str| {
            lookup(&format!("{}{}", ENV_PREFIX, name))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = Self::default();

        if let Some(v) = var("MAX_CRITIC_RETRIES") {
            config.max_critic_retries = parse_var("MAX_CRITIC_RETRIES", &v)?;
        }
        if let Some(v) = var("MAX_REFINEMENTS") {
            config.max_refinements = parse_var("MAX_REFINEMENTS", &v)?;
        }
        if let Some(v) = var("DATABASE_PATH") {
            config.database_path = PathBuf::from(v);
        }
        if let Some(v) = var("EVENT_BUFFER") {
            config.event_buffer = parse_var("EVENT_BUFFER", &v)?;
            if config.event_buffer == 0 {
                return Err(WorkflowError::Config(format!(
                    "{}EVENT_BUFFER must be at least 1",
                    ENV_PREFIX
                )));
            }
        }
        if let Some(v) = var("LLM_MAX_RETRIES") {
            config.llm_max_retries = parse_var("LLM_MAX_RETRIES", &v)?;
        }

        for (name, model) in [
            ("ELICITOR", &mut config.elicitor),
            ("ARCHITECT", &mut config.architect),
            ("SYNTHESIZER", &mut config.synthesizer),
            ("CRITIC", &mut config.critic),
        ] {
            if let Some(v) = var(&format!("{}_MODEL", name)) {
                override_model(model, &format!("{}_MODEL", name), v)?;
            }
            if let Some(v) = var(&format!("{}_BASE_URL", name)) {
                model.base_url = Some(v);
            }
        }

        Ok(config)
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> WorkflowResult<T>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| {
        WorkflowError::Config(format!("{}{}='{}': {}", ENV_PREFIX, name, value, e))
    })
}

/// Swap the model id, keeping temperature and base URL.
fn override_model(model: &mut ModelConfig, name: &str, id: String) -> WorkflowResult<()> {
    let provider = LlmProvider::for_model(&id).ok_or_else(|| {
        WorkflowError::Config(format!(
            "{}{}='{}': cannot infer provider from model id",
            ENV_PREFIX, name, id
        ))
    })?;
    model.provider = provider;
    model.model = id;
    Ok(())
}
