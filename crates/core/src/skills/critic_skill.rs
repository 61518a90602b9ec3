//! # Critic Skill
//!
//! Audits the prompt package against spec.md and returns a structured
//! verdict. Runs on a model from a different vendor than the synthesizer.
//!
//! Unparsable output becomes a synthetic `major` report so the refinement
//! loop treats it as needing another pass.

use async_trait::async_trait;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};

use crate::models::{ModelConfig, GPT_4O_MINI};
use crate::skills::llm_client::{complete_with_usage, LlmBackend, LlmRequest};
use crate::skills::prompts;
use crate::skills::{CritiqueRequest, Specialist, SpecialistOutput, SpecialistRole};
use crate::state::{CriticIssue, CritiqueReport, Severity};

const MAX_TOKENS: u32 = 2048;
const TEMPERATURE: f32 = 0.3;

static JSON_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*\n(.*?)\n\s*```").expect("json fence regex")
});

/// Critic prompt with the response schema appended
static SYSTEM_PROMPT: LazyLock<String> = LazyLock::new(|| {
    let schema = schemars::schema_for!(CriticResponse);
    let schema = serde_json::to_string_pretty(&schema).unwrap_or_default();
    format!("{}\nThe JSON object must match this schema:\n\n{}\n", prompts::CRITIC, schema)
});

/// A single issue as the model reports it
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CriticResponseIssue {
    /// Number of the affected prompt, 0 when it applies to the whole package
    #[serde(default)]
    pub prompt_number: u32,
    /// completeness, ordering, ambiguity, scope or verifiability
    #[serde(default = "unknown_category")]
    pub category: String,
    /// minor, major or critical
    #[serde(default = "minor_label")]
    pub severity: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub suggestion: String,
}

/// Response shape requested from the model
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CriticResponse {
    #[serde(default)]
    pub issues_found: bool,
    /// Highest issue severity: none, minor, major or critical
    #[serde(default = "none_label")]
    pub severity: String,
    #[serde(default)]
    pub issues: Vec<CriticResponseIssue>,
    #[serde(default)]
    pub overall_assessment: String,
}

fn unknown_category() -> String {
    "unknown".to_string()
}

fn minor_label() -> String {
    "minor".to_string()
}

fn none_label() -> String {
    "none".to_string()
}

impl From<CriticResponse> for CritiqueReport {
    fn from(response: CriticResponse) -> Self {
        CritiqueReport {
            issues_found: response.issues_found,
            severity: Severity::parse_or(&response.severity, Severity::None),
            issues: response
                .issues
                .into_iter()
                .map(|issue| CriticIssue {
                    prompt_number: issue.prompt_number,
                    category: issue.category,
                    severity: Severity::parse_or(&issue.severity, Severity::Minor),
                    description: issue.description,
                    suggestion: issue.suggestion,
                })
                .collect(),
            overall_assessment: response.overall_assessment,
        }
    }
}

pub struct CriticSkill {
    config: ModelConfig,
    llm: Arc<dyn LlmBackend>,
}

impl CriticSkill {
    pub fn new(config: ModelConfig, llm: Arc<dyn LlmBackend>) -> Self {
        Self { config, llm }
    }

    pub fn with_default_model(llm: Arc<dyn LlmBackend>) -> Self {
        Self::new(ModelConfig::new(GPT_4O_MINI).with_temperature(TEMPERATURE), llm)
    }
}

#[async_trait]
impl Specialist for CriticSkill {
    type Input = CritiqueRequest;
    type Output = CritiqueReport;

    fn role(&self) -> SpecialistRole {
        SpecialistRole::Critic
    }

    async fn execute(&self, input: CritiqueRequest) -> anyhow::Result<SpecialistOutput<CritiqueReport>> {
        let user_message = format!(
            "## Original spec.md\n\n{}\n\n---\n\n## Generated Prompts to Audit\n\n{}",
            input.spec_md, input.prompts_markdown
        );

        let request = LlmRequest::new(SYSTEM_PROMPT.as_str(), user_message, MAX_TOKENS);
        let completion = complete_with_usage(self.llm.as_ref(), &self.config, &request, "critic").await?;

        let report = match parse_critic_response(&completion.content) {
            Ok(response) => CritiqueReport::from(response),
            Err(e) => {
                let preview: String = completion.content.chars().take(500).collect();
                tracing::warn!(error = %e, raw = %preview, "Failed to parse critic JSON");
                unparsable_report(&e)
            }
        };

        Ok(SpecialistOutput::new(report, completion.usage))
    }
}

/// Extract the JSON object from the response, inside a code fence or bare.
pub fn parse_critic_response(raw: &str) -> Result<CriticResponse, serde_json::Error> {
    let text = raw.trim();
    let json = JSON_FENCE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .unwrap_or(text);
    serde_json::from_str(json)
}

fn unparsable_report(err: &serde_json::Error) -> CritiqueReport {
    CritiqueReport {
        issues_found: true,
        severity: Severity::Major,
        issues: vec![CriticIssue {
            prompt_number: 0,
            category: "parse_error".to_string(),
            severity: Severity::Major,
            description: format!("Critic response was not valid JSON: {}", err),
            suggestion: "Re-run the critic audit.".to_string(),
        }],
        overall_assessment: "Critic output could not be parsed.".to_string(),
    }
}
