//! # Specialist Contract
//!
//! The uniform operation every specialist role implements, and the typed
//! request/payload pairs for each role.
//!
//! ```text
//! Specialist::execute(Input) -> SpecialistOutput { payload, usage }
//!     ├── Elicitor     ElicitationRequest -> Questionnaire
//!     ├── Architect    ArchitectRequest   -> SpecDocument
//!     ├── Synthesizer  SynthesisRequest   -> PromptPackage   (+ refine)
//!     └── Critic       CritiqueRequest    -> CritiqueReport
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::state::{CritiqueReport, ParsedPrompt, ProjectType, Question};

/// Target value meaning "refine every flagged section"
pub const REFINE_ALL_FLAGGED: u32 = 0;

/// The four specialist roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialistRole {
    Elicitor,
    Architect,
    Synthesizer,
    Critic,
}

impl SpecialistRole {
    /// Lowercase id used in log entries
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Elicitor => "elicitor",
            Self::Architect => "architect",
            Self::Synthesizer => "synthesizer",
            Self::Critic => "critic",
        }
    }
}

impl fmt::Display for SpecialistRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Elicitor => "Elicitor",
            Self::Architect => "Architect",
            Self::Synthesizer => "Synthesizer",
            Self::Critic => "Critic",
        };
        f.write_str(name)
    }
}

/// Token usage and cost reported by one specialist call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cost_usd: f64,
    pub model: String,
    pub latency_ms: f64,
}

impl Usage {
    pub fn new(model: impl Into<String>, input_tokens: u64, output_tokens: u64, cost_usd: f64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
            cost_usd,
            model: model.into(),
            latency_ms: 0.0,
        }
    }
}

/// Result of a successful specialist call
#[derive(Debug, Clone, PartialEq)]
pub struct SpecialistOutput<T> {
    pub payload: T,
    pub usage: Usage,
}

impl<T> SpecialistOutput<T> {
    pub fn new(payload: T, usage: Usage) -> Self {
        Self { payload, usage }
    }
}

/// A failed call that still consumed tokens.
///
/// Specialists wrap this in `anyhow::Error` when the provider answered but the
/// answer was unusable. The orchestrator charges `usage` before discarding it.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct BilledFailure {
    pub message: String,
    pub usage: Usage,
}

impl BilledFailure {
    pub fn new(message: impl Into<String>, usage: Usage) -> Self {
        Self {
            message: message.into(),
            usage,
        }
    }
}

/// Uniform contract for one stage-specific LLM invocation
#[async_trait]
pub trait Specialist: Send + Sync {
    type Input: Send + 'static;
    type Output: Send + 'static;

    fn role(&self) -> SpecialistRole;

    async fn execute(&self, input: Self::Input) -> anyhow::Result<SpecialistOutput<Self::Output>>;
}

// --- Elicitor ---------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ElicitationRequest {
    pub idea: String,
    pub project_type: ProjectType,
    pub codebase_context: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Questionnaire {
    pub questions: Vec<Question>,
    pub raw_markdown: String,
}

pub trait Elicitor: Specialist<Input = ElicitationRequest, Output = Questionnaire> {}

impl<T> Elicitor for T where T: Specialist<Input = ElicitationRequest, Output = Questionnaire> {}

// --- Architect --------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ArchitectRequest {
    pub idea: String,
    pub questions_and_answers: String,
    pub project_type: ProjectType,
    pub codebase_context: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpecDocument {
    pub spec_md: String,
    /// frontend / backend / database / styling
    pub tech_stack: BTreeMap<String, String>,
    /// Required `##` sections spec.md did not contain
    pub missing_sections: Vec<String>,
}

impl SpecDocument {
    pub fn is_complete(&self) -> bool {
        self.missing_sections.is_empty()
    }
}

pub trait Architect: Specialist<Input = ArchitectRequest, Output = SpecDocument> {}

impl<T> Architect for T where T: Specialist<Input = ArchitectRequest, Output = SpecDocument> {}

// --- Synthesizer ------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    pub spec_md: String,
    pub project_type: ProjectType,
    pub codebase_context: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefineRequest {
    pub spec_md: String,
    /// Full raw markdown of the current prompt package
    pub current_output: String,
    /// Prompt number to refine, or [`REFINE_ALL_FLAGGED`]
    pub target: u32,
    pub feedback: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PromptPackage {
    pub prompts: Vec<ParsedPrompt>,
    pub raw_markdown: String,
}

/// The synthesizer also refines an existing package in place.
///
/// `refine` returns the complete package; unrelated sections are expected to
/// come back verbatim.
#[async_trait]
pub trait Synthesizer: Specialist<Input = SynthesisRequest, Output = PromptPackage> {
    async fn refine(&self, input: RefineRequest) -> anyhow::Result<SpecialistOutput<PromptPackage>>;
}

// --- Critic -----------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct CritiqueRequest {
    pub spec_md: String,
    pub prompts_markdown: String,
}

pub trait Critic: Specialist<Input = CritiqueRequest, Output = CritiqueReport> {}

impl<T> Critic for T where T: Specialist<Input = CritiqueRequest, Output = CritiqueReport> {}

/// The four specialists a workflow needs
#[derive(Clone)]
pub struct Specialists {
    pub elicitor: Arc<dyn Elicitor>,
    pub architect: Arc<dyn Architect>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub critic: Arc<dyn Critic>,
}

impl Specialists {
    pub fn new(
        elicitor: Arc<dyn Elicitor>,
        architect: Arc<dyn Architect>,
        synthesizer: Arc<dyn Synthesizer>,
        critic: Arc<dyn Critic>,
    ) -> Self {
        Self {
            elicitor,
            architect,
            synthesizer,
            critic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_totals() {
        let usage = Usage::new("claude-haiku-4-5-20251001", 120, 30, 0.0002);
        assert_eq!(usage.total_tokens, 150);
    }

    #[test]
    fn test_role_names() {
        assert_eq!(SpecialistRole::Synthesizer.as_str(), "synthesizer");
        assert_eq!(SpecialistRole::Synthesizer.to_string(), "Synthesizer");
        assert_eq!(
            serde_json::to_string(&SpecialistRole::Critic).unwrap(),
            "\"critic\""
        );
    }

    #[test]
    fn test_billed_failure_downcast() {
        let err: anyhow::Error =
            BilledFailure::new("no prompts in output", Usage::new("m", 10, 10, 0.01)).into();
        let billed = err.downcast_ref::<BilledFailure>().unwrap();
        assert_eq!(billed.usage.total_tokens, 20);
        assert_eq!(err.to_string(), "no prompts in output");
    }
}
