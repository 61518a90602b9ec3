//! # Elicitor Skill
//!
//! Asks up to three clarifying questions about the idea. Runs on a small,
//! fast model since the output is short.

use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, LazyLock};

use crate::models::{ModelConfig, CLAUDE_HAIKU};
use crate::skills::llm_client::{complete_with_usage, LlmBackend, LlmRequest};
use crate::skills::markdown::numbered_blocks;
use crate::skills::prompts;
use crate::skills::{ElicitationRequest, Questionnaire, Specialist, SpecialistOutput, SpecialistRole};
use crate::state::{ProjectType, Question};

const MAX_TOKENS: u32 = 1024;
/// Questions beyond this are dropped
pub const MAX_QUESTIONS: usize = 3;

static QUESTION_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"##\s*Question\s+(\d+)\s*:\s*(.+)").expect("question header regex")
});

pub struct ElicitorSkill {
    config: ModelConfig,
    llm: Arc<dyn LlmBackend>,
}

impl ElicitorSkill {
    pub fn new(config: ModelConfig, llm: Arc<dyn LlmBackend>) -> Self {
        Self { config, llm }
    }

    pub fn with_default_model(llm: Arc<dyn LlmBackend>) -> Self {
        Self::new(ModelConfig::new(CLAUDE_HAIKU), llm)
    }
}

#[async_trait]
impl Specialist for ElicitorSkill {
    type Input = ElicitationRequest;
    type Output = Questionnaire;

    fn role(&self) -> SpecialistRole {
        SpecialistRole::Elicitor
    }

    async fn execute(&self, input: ElicitationRequest) -> anyhow::Result<SpecialistOutput<Questionnaire>> {
        let mut user_message = context_header(input.project_type, input.codebase_context.as_deref());
        user_message.push_str(&format!("User's idea: {}", input.idea));

        let request = LlmRequest::new(prompts::ELICITOR, user_message, MAX_TOKENS);
        let completion = complete_with_usage(self.llm.as_ref(), &self.config, &request, "elicitor").await?;

        let mut questions = parse_questions(&completion.content);
        if questions.is_empty() {
            tracing::warn!(raw = %completion.content, "Elicitor returned no parseable questions");
        }
        questions.truncate(MAX_QUESTIONS);

        Ok(SpecialistOutput::new(
            Questionnaire {
                questions,
                raw_markdown: completion.content,
            },
            completion.usage,
        ))
    }
}

/// `[Project Type: ...]` and optional `[Codebase Context: ...]` preamble
pub(crate) fn context_header(project_type: ProjectType, codebase_context: Option<&str>) -> String {
    let mut header = format!("[Project Type: {}]\n\n", project_type);
    if let Some(context) = codebase_context.filter(|c| !c.is_empty()) {
        header.push_str(&format!("[Codebase Context: {}]\n\n", context));
    }
    header
}

/// Parse `## Question N: Topic` blocks.
///
/// Lines starting with `- ` are options. Other lines before the first option
/// form the question text.
pub fn parse_questions(markdown: &str) -> Vec<Question> {
    numbered_blocks(markdown, &QUESTION_HEADER)
        .into_iter()
        .map(|block| {
            let mut text_lines = Vec::new();
            let mut options = Vec::new();

            for line in block.body.lines().map(str::trim).filter(|l| !l.is_empty()) {
                if let Some(option) = line.strip_prefix("- ") {
                    options.push(option.trim().to_string());
                } else if options.is_empty() {
                    text_lines.push(line);
                }
            }

            Question {
                number: block.number,
                topic: block.title,
                text: text_lines.join(" "),
                options,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::llm_client::LlmResponse;
    use std::sync::Mutex;

    struct RecordingBackend {
        reply: String,
        seen: Mutex<Vec<LlmRequest>>,
    }

    #[async_trait]
    impl LlmBackend for RecordingBackend {
        async fn complete(&self, config: &ModelConfig, request: &LlmRequest) -> anyhow::Result<LlmResponse> {
            self.seen.lock().unwrap().push(request.clone());
            Ok(LlmResponse {
                content: self.reply.clone(),
                model: config.model.clone(),
                input_tokens: 200,
                output_tokens: 80,
                latency_ms: 5.0,
            })
        }
    }

    const FOUR_QUESTIONS: &str = "\
## Question 1: Platform
Where should this run?
It matters for the stack.
- Web
- Mobile
## Question 2: Users
Who is it for?
## Question 3: Data
- Local only
- Cloud sync
trailing text after options
## Question 4: Extra
Should be dropped.";

    #[test]
    fn test_parse_questions() {
        let questions = parse_questions(FOUR_QUESTIONS);
        assert_eq!(questions.len(), 4);

        assert_eq!(questions[0].number, 1);
        assert_eq!(questions[0].topic, "Platform");
        assert_eq!(questions[0].text, "Where should this run? It matters for the stack.");
        assert_eq!(questions[0].options, vec!["Web", "Mobile"]);

        assert!(questions[1].options.is_empty());
        assert_eq!(questions[2].text, "");
        assert_eq!(questions[2].options, vec!["Local only", "Cloud sync"]);
    }

    #[test]
    fn test_parse_questions_without_headers() {
        assert!(parse_questions("What platform do you want?").is_empty());
    }

    #[test]
    fn test_context_header() {
        assert_eq!(context_header(ProjectType::Build, None), "[Project Type: build]\n\n");
        assert_eq!(
            context_header(ProjectType::Debug, Some("axum service")),
            "[Project Type: debug]\n\n[Codebase Context: axum service]\n\n"
        );
    }

    #[tokio::test]
    async fn test_execute_caps_questions_and_reports_usage() {
        let backend = Arc::new(RecordingBackend {
            reply: FOUR_QUESTIONS.to_string(),
            seen: Mutex::new(Vec::new()),
        });
        let skill = ElicitorSkill::with_default_model(backend.clone());

        let output = skill
            .execute(ElicitationRequest {
                idea: "habit tracker".to_string(),
                project_type: ProjectType::Build,
                codebase_context: None,
            })
            .await
            .unwrap();

        assert_eq!(output.payload.questions.len(), MAX_QUESTIONS);
        assert_eq!(output.usage.total_tokens, 280);
        assert_eq!(output.usage.model, CLAUDE_HAIKU);

        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen[0].max_tokens, MAX_TOKENS);
        assert!(seen[0].user_message.ends_with("User's idea: habit tracker"));
    }
}
