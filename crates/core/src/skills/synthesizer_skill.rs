//! # Synthesizer Skill
//!
//! Turns an approved spec.md into an ordered prompt package, and refines an
//! existing package from feedback.

use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, LazyLock};

use crate::models::{ModelConfig, CLAUDE_SONNET};
use crate::skills::elicitor_skill::context_header;
use crate::skills::llm_client::{complete_with_usage, Completion, LlmBackend, LlmRequest};
use crate::skills::markdown::{numbered_blocks, strip_fences};
use crate::skills::prompts;
use crate::skills::{
    BilledFailure, PromptPackage, RefineRequest, Specialist, SpecialistOutput, SpecialistRole,
    SynthesisRequest, Synthesizer, Usage, REFINE_ALL_FLAGGED,
};
use crate::state::{ParsedPrompt, ProjectType};

const REFINE_MAX_TOKENS: u32 = 8192;

/// Trailing sections that are not part of the last prompt
const BLOCK_SENTINELS: &[&str] = &["## Final Notes", "## Instructions for Use"];

static PROMPT_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"##\s*Prompt\s+(\d+)\s*:\s*(.+)").expect("prompt header regex"));

/// Output budget per project type
pub fn max_tokens_for(project_type: ProjectType) -> u32 {
    match project_type {
        ProjectType::Build => 8192,
        ProjectType::Enhance => 4096,
        ProjectType::Refactor => 3072,
        ProjectType::Debug => 2048,
    }
}

pub struct SynthesizerSkill {
    config: ModelConfig,
    llm: Arc<dyn LlmBackend>,
}

impl SynthesizerSkill {
    pub fn new(config: ModelConfig, llm: Arc<dyn LlmBackend>) -> Self {
        Self { config, llm }
    }

    pub fn with_default_model(llm: Arc<dyn LlmBackend>) -> Self {
        Self::new(ModelConfig::new(CLAUDE_SONNET), llm)
    }

    fn package(completion: Completion) -> (PromptPackage, Usage) {
        let raw_markdown = strip_fences(&completion.content);
        let prompts = parse_prompts(&raw_markdown);
        (
            PromptPackage {
                prompts,
                raw_markdown,
            },
            completion.usage,
        )
    }
}

#[async_trait]
impl Specialist for SynthesizerSkill {
    type Input = SynthesisRequest;
    type Output = PromptPackage;

    fn role(&self) -> SpecialistRole {
        SpecialistRole::Synthesizer
    }

    async fn execute(&self, input: SynthesisRequest) -> anyhow::Result<SpecialistOutput<PromptPackage>> {
        let mut user_message = context_header(input.project_type, input.codebase_context.as_deref());
        user_message.push_str(&format!("## Approved spec.md\n\n{}", input.spec_md));

        let request = LlmRequest::new(
            prompts::SYNTHESIZER,
            user_message,
            max_tokens_for(input.project_type),
        );
        let completion =
            complete_with_usage(self.llm.as_ref(), &self.config, &request, "synthesizer").await?;

        let (package, usage) = Self::package(completion);
        if package.prompts.is_empty() {
            let preview: String = package.raw_markdown.chars().take(500).collect();
            tracing::warn!(raw = %preview, "Synthesizer returned no parseable prompts");
        }

        Ok(SpecialistOutput::new(package, usage))
    }
}

#[async_trait]
impl Synthesizer for SynthesizerSkill {
    async fn refine(&self, input: RefineRequest) -> anyhow::Result<SpecialistOutput<PromptPackage>> {
        let request = LlmRequest::new(prompts::SYNTHESIZER, refine_message(&input), REFINE_MAX_TOKENS);
        let completion =
            complete_with_usage(self.llm.as_ref(), &self.config, &request, "synthesizer").await?;

        let (package, usage) = Self::package(completion);
        if package.prompts.is_empty() {
            return Err(BilledFailure::new("refined output contained no prompts", usage).into());
        }

        Ok(SpecialistOutput::new(package, usage))
    }
}

fn refine_message(input: &RefineRequest) -> String {
    let scope = if input.target == REFINE_ALL_FLAGGED {
        "every prompt named in this feedback".to_string()
    } else {
        format!("**Prompt {}**", input.target)
    };
    let keep = if input.target == REFINE_ALL_FLAGGED {
        "Only modify the prompts named above".to_string()
    } else {
        format!("Only modify Prompt {}", input.target)
    };

    format!(
        "## Original spec.md\n\n{}\n\n\
         ## Current Prompt Package\n\n{}\n\n\
         ## Refinement Request\n\n\
         Please update {} based on this feedback:\n\n{}\n\n\
         Return the COMPLETE updated prompt package with all prompts. \
         {} and keep all other prompts unchanged.",
        input.spec_md, input.current_output, scope, input.feedback, keep
    )
}

/// Split the package on `## Prompt N: Title` headers.
///
/// A block stops early at `## Final Notes` or `## Instructions for Use`.
pub fn parse_prompts(markdown: &str) -> Vec<ParsedPrompt> {
    numbered_blocks(markdown, &PROMPT_HEADER)
        .into_iter()
        .map(|block| {
            let end = BLOCK_SENTINELS
                .iter()
                .filter_map(|sentinel| block.body.find(sentinel))
                .min()
                .unwrap_or(block.body.len());
            ParsedPrompt {
                number: block.number,
                title: block.title,
                content: block.body[..end].trim().to_string(),
            }
        })
        .collect()
}
