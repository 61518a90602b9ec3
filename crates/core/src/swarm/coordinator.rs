//! # Orchestrator
//!
//! Sequences specialist calls for one workflow run.
//!
//! ```text
//! start_workflow    ELICITING ─▶ AWAITING_ANSWERS
//! submit_answers    AWAITING_ANSWERS ─▶ PLANNING ─▶ AWAITING_APPROVAL
//! approve_spec      AWAITING_APPROVAL ─▶ SYNTHESIZING ─▶ CRITIQUING ⟷ REFINING ─▶ COMPLETED
//! request_refinement COMPLETED ─▶ REFINING ─▶ COMPLETED
//! ```
//!
//! The orchestrator holds no per-run state. Every operation takes the current
//! [`WorkflowState`] by value and returns the next one; failures are folded
//! into that state and never returned as errors.

use serde_json::json;

use super::events::{Emitter, WorkflowEventKind};
use super::pipeline::{RefineBudget, WorkflowStatus};
use crate::error::WorkflowError;
use crate::models::round_to;
use crate::skills::{
    ArchitectRequest, BilledFailure, CritiqueRequest, ElicitationRequest, RefineRequest,
    SpecialistRole, Specialists, SynthesisRequest, REFINE_ALL_FLAGGED,
};
use crate::state::{CritiqueReport, ProjectType, RefinementRecord, WorkflowState};

/// Default number of automatic refinements inside one approval
pub const DEFAULT_MAX_CRITIC_RETRIES: u32 = 1;

const REVIEW_FEEDBACK_HEADER: &str = "Quality review feedback — please address these issues:";

/// Stateless workflow coordinator
#[derive(Clone)]
pub struct Orchestrator {
    specialists: Specialists,
    emitter: Emitter,
    max_critic_retries: u32,
}

impl Orchestrator {
    pub fn new(specialists: Specialists, emitter: Emitter) -> Self {
        Self {
            specialists,
            emitter,
            max_critic_retries: DEFAULT_MAX_CRITIC_RETRIES,
        }
    }

    pub fn with_max_critic_retries(mut self, retries: u32) -> Self {
        self.max_critic_retries = retries;
        self
    }

    /// Build a fresh state and ask the elicitor for clarifying questions.
    pub async fn start_workflow(
        &self,
        idea: &str,
        project_type: ProjectType,
        codebase_context: Option<String>,
    ) -> WorkflowState {
        self.start_from(WorkflowState::new(idea, project_type, codebase_context))
            .await
    }

    /// Run the elicitor on a pre-built state, which must be ELICITING.
    pub async fn start_from(&self, mut state: WorkflowState) -> WorkflowState {
        if state.status != WorkflowStatus::Eliciting {
            return self.reject("start workflow", state);
        }

        self.progress("eliciting", "Analyzing your request and preparing questions...");

        let request = ElicitationRequest {
            idea: state.idea.clone(),
            project_type: state.project_type,
            codebase_context: state.codebase_context.clone(),
        };
        let output = match self.specialists.elicitor.execute(request).await {
            Ok(output) => output,
            Err(e) => return self.specialist_failed(state, SpecialistRole::Elicitor, e),
        };

        state.questions = output.payload.questions;
        state.record_usage(&output.usage);
        state.enter(WorkflowStatus::AwaitingAnswers);

        self.emitter.emit(
            WorkflowEventKind::QuestionsReady,
            json!({
                "questions": state.questions,
                "message": "Questions ready — waiting for your answers.",
            }),
        );
        state
    }

    /// Record the answers and have the architect write spec.md.
    pub async fn submit_answers(&self, mut state: WorkflowState, answers: &str) -> WorkflowState {
        if state.status != WorkflowStatus::AwaitingAnswers {
            return self.reject("submit answers", state);
        }

        state.user_answers = answers.to_string();
        state.enter(WorkflowStatus::Planning);
        self.progress("planning", "Planning your app's architecture...");

        let request = ArchitectRequest {
            idea: state.idea.clone(),
            questions_and_answers: state.user_answers.clone(),
            project_type: state.project_type,
            codebase_context: state.codebase_context.clone(),
        };
        let output = match self.specialists.architect.execute(request).await {
            Ok(output) => output,
            Err(e) => return self.specialist_failed(state, SpecialistRole::Architect, e),
        };

        let spec = output.payload;
        if !spec.is_complete() {
            tracing::warn!(
                missing = ?spec.missing_sections,
                "Spec missing sections (proceeding anyway)"
            );
        }
        state.spec_md = spec.spec_md;
        state.tech_stack = spec.tech_stack;
        state.record_usage(&output.usage);
        state.enter(WorkflowStatus::AwaitingApproval);

        self.emitter.emit(
            WorkflowEventKind::SpecReady,
            json!({
                "spec_md": state.spec_md,
                "tech_stack": state.tech_stack,
                "message": "Spec ready — please review and approve.",
            }),
        );
        state
    }

    /// Approve spec.md, synthesize the prompt package and run the critic loop.
    pub async fn approve_spec(&self, mut state: WorkflowState) -> WorkflowState {
        if state.status != WorkflowStatus::AwaitingApproval {
            return self.reject("approve spec", state);
        }

        state.spec_approved = true;

        let state = self.run_synthesizer(state).await;
        if state.is_failed() {
            return state;
        }
        self.run_critic_loop(state).await
    }

    /// Refine one prompt (or all flagged ones with target 0) on user request.
    ///
    /// The caller enforces any cap on `refinement_count`. A failed refine keeps
    /// the previous prompt package and returns to COMPLETED with the error set.
    pub async fn request_refinement(
        &self,
        mut state: WorkflowState,
        target: u32,
        feedback: &str,
    ) -> WorkflowState {
        if state.status != WorkflowStatus::Completed {
            return self.reject("refine", state);
        }

        state.refinement_count += 1;
        state.enter(WorkflowStatus::Refining);
        self.progress("refining", &format!("Refining Prompt {}...", target));

        let request = RefineRequest {
            spec_md: state.spec_md.clone(),
            current_output: state.raw_prompts.clone(),
            target,
            feedback: feedback.to_string(),
        };
        let output = match self.specialists.synthesizer.refine(request).await {
            Ok(output) => output,
            Err(e) => {
                charge_failed_call(&mut state, &e);
                let error = WorkflowError::Refinement(format!("{:#}", e)).to_string();
                tracing::warn!(prompt = target, "{}", error);

                state.enter(WorkflowStatus::Completed);
                state.error = Some(error.clone());
                self.emitter.emit(
                    WorkflowEventKind::WorkflowFailed,
                    json!({ "error": error, "message": format!("Error: {}", error) }),
                );
                return state;
            }
        };

        state.set_prompts(output.payload.raw_markdown, output.payload.prompts);
        state.refinement_history.push(RefinementRecord {
            target,
            feedback: feedback.to_string(),
            tokens: output.usage.total_tokens,
            cost: output.usage.cost_usd,
        });
        state.record_usage(&output.usage);
        state.error = None;
        state.enter(WorkflowStatus::Completed);

        self.emitter.emit(
            WorkflowEventKind::RefinementCompleted,
            json!({
                "section": target,
                "message": format!("Prompt {} refined successfully.", target),
            }),
        );
        state
    }

    async fn run_synthesizer(&self, mut state: WorkflowState) -> WorkflowState {
        state.enter(WorkflowStatus::Synthesizing);
        self.progress("synthesizing", "Writing optimized prompts...");

        let request = SynthesisRequest {
            spec_md: state.spec_md.clone(),
            project_type: state.project_type,
            codebase_context: state.codebase_context.clone(),
        };
        match self.specialists.synthesizer.execute(request).await {
            Ok(output) => {
                state.set_prompts(output.payload.raw_markdown, output.payload.prompts);
                state.record_usage(&output.usage);
                state
            }
            Err(e) => self.specialist_failed(state, SpecialistRole::Synthesizer, e),
        }
    }

    /// Critique, then auto-refine while blocking issues remain and the budget lasts.
    async fn run_critic_loop(&self, mut state: WorkflowState) -> WorkflowState {
        let mut budget = RefineBudget::new(self.max_critic_retries);

        loop {
            state.enter(WorkflowStatus::Critiquing);
            self.progress("critiquing", "Evaluating prompt quality...");

            let request = CritiqueRequest {
                spec_md: state.spec_md.clone(),
                prompts_markdown: state.raw_prompts.clone(),
            };
            let output = match self.specialists.critic.execute(request).await {
                Ok(output) => output,
                Err(e) => return self.specialist_failed(state, SpecialistRole::Critic, e),
            };
            state.record_usage(&output.usage);

            let report = output.payload;
            let needs_refinement = report.needs_refinement();
            let feedback = review_feedback(&report);
            let severity = report.severity;
            state.critique_results = Some(report);

            if !needs_refinement {
                break;
            }
            if !budget.try_consume() {
                tracing::info!(severity = severity.as_str(), "Critic retry budget exhausted");
                break;
            }

            tracing::info!(
                severity = severity.as_str(),
                attempt = budget.used,
                "Critic found blocking issues, auto-refining"
            );
            state.enter(WorkflowStatus::Refining);
            self.progress("refining", "Auto-refining prompts based on quality review...");

            let request = RefineRequest {
                spec_md: state.spec_md.clone(),
                current_output: state.raw_prompts.clone(),
                target: REFINE_ALL_FLAGGED,
                feedback,
            };
            match self.specialists.synthesizer.refine(request).await {
                Ok(output) => {
                    state.set_prompts(output.payload.raw_markdown, output.payload.prompts);
                    state.record_usage(&output.usage);
                }
                Err(e) => {
                    charge_failed_call(&mut state, &e);
                    tracing::warn!(
                        "Auto-refinement failed: {:#} (proceeding with current prompts)",
                        e
                    );
                    break;
                }
            }
        }

        state.enter(WorkflowStatus::Completed);

        let count = state.parsed_prompts.len();
        self.emitter.emit(
            WorkflowEventKind::PromptsGenerated,
            json!({
                "count": count,
                "message": format!("Generated {} prompts.", count),
            }),
        );
        self.emitter.emit(
            WorkflowEventKind::WorkflowCompleted,
            json!({
                "status": WorkflowStatus::Completed.as_str(),
                "total_tokens": state.total_tokens,
                "total_cost": round_to(state.total_cost, 4),
                "message": "Workflow complete — your prompts are ready!",
            }),
        );
        state
    }

    fn progress(&self, stage: &str, message: &str) {
        self.emitter.emit(
            WorkflowEventKind::ProgressUpdate,
            json!({ "stage": stage, "message": message }),
        );
    }

    fn reject(&self, operation: &'static str, state: WorkflowState) -> WorkflowState {
        let error = WorkflowError::InvalidTransition {
            operation,
            status: state.status,
        };
        self.fail(state, error)
    }

    fn specialist_failed(
        &self,
        mut state: WorkflowState,
        role: SpecialistRole,
        err: anyhow::Error,
    ) -> WorkflowState {
        charge_failed_call(&mut state, &err);
        self.fail(state, WorkflowError::specialist(role, &err))
    }

    fn fail(&self, mut state: WorkflowState, error: WorkflowError) -> WorkflowState {
        let error = error.to_string();
        tracing::error!(topic = self.emitter.topic(), "Workflow failed: {}", error);

        state.enter(WorkflowStatus::Failed);
        state.error = Some(error.clone());
        self.emitter.emit(
            WorkflowEventKind::WorkflowFailed,
            json!({ "error": error, "message": format!("Error: {}", error) }),
        );
        state
    }
}

/// Add the usage a failed call still consumed, if it reported any.
fn charge_failed_call(state: &mut WorkflowState, err: &anyhow::Error) {
    if let Some(billed) = err.downcast_ref::<BilledFailure>() {
        state.record_usage(&billed.usage);
    }
}

/// Consolidated feedback for an automatic refine
fn review_feedback(report: &CritiqueReport) -> String {
    let lines: Vec<String> = report.major_issues().map(|i| i.feedback_line()).collect();
    format!("{}\n{}", REVIEW_FEEDBACK_HEADER, lines.join("\n"))
}
