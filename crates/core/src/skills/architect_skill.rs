//! # Architect Skill
//!
//! Writes spec.md from the idea and the user's answers, then pulls the tech
//! stack out of it and checks the required sections are present.
//!
//! A spec with missing sections is still returned; the gap is only logged.

use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use crate::models::{ModelConfig, CLAUDE_SONNET};
use crate::skills::elicitor_skill::context_header;
use crate::skills::llm_client::{complete_with_usage, LlmBackend, LlmRequest};
use crate::skills::markdown::strip_fences;
use crate::skills::prompts;
use crate::skills::{ArchitectRequest, SpecDocument, Specialist, SpecialistOutput, SpecialistRole};
use crate::state::ProjectType;

const MAX_TOKENS: u32 = 4096;

/// Required `##` sections for new applications
pub const REQUIRED_SECTIONS_BUILD: &[&str] = &[
    "What You're Building",
    "Who It's For",
    "Core Features",
    "How It Will Look & Feel",
    "Recommended Tech Stack",
    "How Your Data Works",
    "Build Stages",
];

/// Required `##` sections for work on an existing codebase
pub const REQUIRED_SECTIONS_OTHER: &[&str] = &[
    "Current State & Goal",
    "Core Features",
    "Implementation Stages",
    "Affected Areas",
];

static SUBSECTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"###[ \t]+(.+)").expect("subsection regex"));
static BOLD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*(.+?)\*\*").expect("bold regex"));

pub fn required_sections(project_type: ProjectType) -> &'static [&'static str] {
    match project_type {
        ProjectType::Build => REQUIRED_SECTIONS_BUILD,
        _ => REQUIRED_SECTIONS_OTHER,
    }
}

pub struct ArchitectSkill {
    config: ModelConfig,
    llm: Arc<dyn LlmBackend>,
}

impl ArchitectSkill {
    pub fn new(config: ModelConfig, llm: Arc<dyn LlmBackend>) -> Self {
        Self { config, llm }
    }

    pub fn with_default_model(llm: Arc<dyn LlmBackend>) -> Self {
        Self::new(ModelConfig::new(CLAUDE_SONNET), llm)
    }
}

#[async_trait]
impl Specialist for ArchitectSkill {
    type Input = ArchitectRequest;
    type Output = SpecDocument;

    fn role(&self) -> SpecialistRole {
        SpecialistRole::Architect
    }

    async fn execute(&self, input: ArchitectRequest) -> anyhow::Result<SpecialistOutput<SpecDocument>> {
        let mut user_message = context_header(input.project_type, input.codebase_context.as_deref());
        user_message.push_str(&format!(
            "## Original Idea\n{}\n\n## User's Answers to Clarifying Questions\n{}",
            input.idea, input.questions_and_answers
        ));

        let request = LlmRequest::new(prompts::ARCHITECT, user_message, MAX_TOKENS);
        let completion = complete_with_usage(self.llm.as_ref(), &self.config, &request, "architect").await?;

        let spec_md = strip_fences(&completion.content);
        let tech_stack = parse_tech_stack(&spec_md);
        let missing_sections = validate_sections(&spec_md, input.project_type);
        if !missing_sections.is_empty() {
            tracing::warn!(missing = ?missing_sections, "Architect spec is missing sections");
        }

        Ok(SpecialistOutput::new(
            SpecDocument {
                spec_md,
                tech_stack,
                missing_sections,
            },
            completion.usage,
        ))
    }
}

fn stack_key(header: &str) -> Option<&'static str> {
    match header {
        "frontend" => Some("frontend"),
        "backend" => Some("backend"),
        "database" => Some("database"),
        "styling" | "styling/ui" => Some("styling"),
        _ => None,
    }
}

/// Extract frontend/backend/database/styling choices from `###` subsections.
///
/// Takes the first `**bold**` text in the subsection, or else its first line.
/// All four keys are always present.
pub fn parse_tech_stack(spec_md: &str) -> BTreeMap<String, String> {
    let mut stack: BTreeMap<String, String> = ["frontend", "backend", "database", "styling"]
        .into_iter()
        .map(|k| (k.to_string(), String::new()))
        .collect();

    for caps in SUBSECTION.captures_iter(spec_md) {
        let (Some(whole), Some(header)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let header = header.as_str().trim().to_lowercase();
        let Some(key) = stack_key(header.trim_end_matches(':')) else {
            continue;
        };

        let rest = &spec_md[whole.end()..];
        let block = match rest.find("\n##") {
            Some(end) => &rest[..end],
            None => rest,
        }
        .trim();

        let choice = match BOLD.captures(block).and_then(|c| c.get(1)) {
            Some(bold) => bold.as_str().trim().to_string(),
            None => block
                .lines()
                .next()
                .unwrap_or_default()
                .trim()
                .trim_matches('*')
                .trim()
                .to_string(),
        };
        if !choice.is_empty() {
            stack.insert(key.to_string(), choice);
        }
    }

    stack
}

/// Required section names missing from spec.md, case-insensitive.
pub fn validate_sections(spec_md: &str, project_type: ProjectType) -> Vec<String> {
    let lower = normalize_apostrophes(&spec_md.to_lowercase());
    required_sections(project_type)
        .iter()
        .filter(|section| {
            let pattern = format!(r"##\s+{}", regex::escape(&section.to_lowercase()));
            !Regex::new(&pattern)
                .map(|re| re.is_match(&lower))
                .unwrap_or(false)
        })
        .map(|section| section.to_string())
        .collect()
}

fn normalize_apostrophes(text: &str) -> String {
    text.replace('\u{2019}', "'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::llm_client::LlmResponse;

    const BUILD_SPEC: &str = "\
# Habit Tracker

## What You're Building
A tracker.

## Who It\u{2019}s For
Busy people.

## Core Features
- Streaks

## How It Will Look & Feel
Calm.

## Recommended Tech Stack

### Frontend
**Next.js** because it is popular.

### Backend:
FastAPI on a small VM

### Database
We will use **PostgreSQL** for durability.

### Styling/UI
**Tailwind CSS**

## How Your Data Works
Rows.

## Build Stages
1. Setup
";

    struct FencedBackend;

    #[async_trait]
    impl LlmBackend for FencedBackend {
        async fn complete(&self, config: &ModelConfig, _request: &LlmRequest) -> anyhow::Result<LlmResponse> {
            Ok(LlmResponse {
                content: format!("```markdown\n{}\n```", BUILD_SPEC),
                model: config.model.clone(),
                input_tokens: 1_000,
                output_tokens: 2_000,
                latency_ms: 40.0,
            })
        }
    }

    #[test]
    fn test_parse_tech_stack() {
        let stack = parse_tech_stack(BUILD_SPEC);
        assert_eq!(stack["frontend"], "Next.js");
        assert_eq!(stack["backend"], "FastAPI on a small VM");
        assert_eq!(stack["database"], "PostgreSQL");
        assert_eq!(stack["styling"], "Tailwind CSS");
    }

    #[test]
    fn test_parse_tech_stack_defaults_to_empty() {
        let stack = parse_tech_stack("## Core Features\nnothing here");
        assert_eq!(stack.len(), 4);
        assert!(stack.values().all(String::is_empty));
    }

    #[test]
    fn test_validate_sections_accepts_curly_apostrophe() {
        assert!(validate_sections(BUILD_SPEC, ProjectType::Build).is_empty());
    }

    #[test]
    fn test_validate_sections_reports_missing() {
        let missing = validate_sections("## Core Features\n## Affected Areas", ProjectType::Refactor);
        assert_eq!(missing, vec!["Current State & Goal", "Implementation Stages"]);
    }

    #[tokio::test]
    async fn test_execute_strips_fences() {
        let skill = ArchitectSkill::with_default_model(Arc::new(FencedBackend));
        let output = skill
            .execute(ArchitectRequest {
                idea: "habit tracker".to_string(),
                questions_and_answers: "Web, solo users".to_string(),
                project_type: ProjectType::Build,
                codebase_context: None,
            })
            .await
            .unwrap();

        assert!(output.payload.spec_md.starts_with("# Habit Tracker"));
        assert!(output.payload.is_complete());
        assert_eq!(output.payload.tech_stack["frontend"], "Next.js");
        // 1k in at $3/M + 2k out at $15/M
        assert_eq!(output.usage.cost_usd, 0.033);
    }
}
