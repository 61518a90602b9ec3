//! # Promptsmith Skills
//!
//! The specialist contract and its LLM-backed implementations.
//!
//! ## Architecture
//!
//! ```text
//! Orchestrator
//!   └── Specialists (Elicitor / Architect / Synthesizer / Critic traits)
//!         └── *Skill structs
//!               └── LlmBackend (HttpLlmClient)
//! ```
//!
//! ## Skills
//!
//! - `ElicitorSkill` - Ask up to three clarifying questions
//! - `ArchitectSkill` - Write spec.md and extract the tech stack
//! - `SynthesizerSkill` - Turn spec.md into a prompt package, refine it
//! - `CriticSkill` - Audit the prompt package

pub mod llm_client;
pub mod markdown;
pub mod prompts;
pub mod specialist;

pub mod architect_skill;
pub mod critic_skill;
pub mod elicitor_skill;
pub mod synthesizer_skill;

pub use specialist::{
    Architect, ArchitectRequest, BilledFailure, Critic, CritiqueRequest, ElicitationRequest,
    Elicitor, PromptPackage, Questionnaire, RefineRequest, SpecDocument, Specialist,
    SpecialistOutput, SpecialistRole, Specialists, SynthesisRequest, Synthesizer, Usage,
    REFINE_ALL_FLAGGED,
};

pub use architect_skill::ArchitectSkill;
pub use critic_skill::CriticSkill;
pub use elicitor_skill::ElicitorSkill;
pub use llm_client::{HttpLlmClient, LlmBackend, LlmRequest, LlmResponse};
pub use synthesizer_skill::SynthesizerSkill;

use std::sync::Arc;

use crate::config::WorkflowConfig;

/// Build the four LLM-backed specialists from one backend and the configured models.
pub fn llm_specialists(config: &WorkflowConfig, llm: Arc<dyn LlmBackend>) -> Specialists {
    Specialists::new(
        Arc::new(ElicitorSkill::new(config.elicitor.clone(), llm.clone())),
        Arc::new(ArchitectSkill::new(config.architect.clone(), llm.clone())),
        Arc::new(SynthesizerSkill::new(config.synthesizer.clone(), llm.clone())),
        Arc::new(CriticSkill::new(config.critic.clone(), llm)),
    )
}
