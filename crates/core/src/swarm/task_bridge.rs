//! # Task Bridge
//!
//! Runs each workflow phase as an independent unit of work:
//!
//! 1. load the project record
//! 2. rebuild the [`WorkflowState`] from persisted fields
//! 3. run exactly one [`Orchestrator`] operation
//! 4. save the resulting state
//! 5. append conversation log entries
//! 6. write a usage record when the run completes
//!
//! Nothing survives in memory between phases. A failure in any of these steps
//! forces the stored project to `failed` and surfaces as
//! [`WorkflowError::Persistence`]. Phases are not idempotent: callers must
//! trigger each phase once, and serialize phases of the same project.

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use super::coordinator::Orchestrator;
use super::events::{Emitter, EventSink, LogSink};
use super::pipeline::WorkflowStatus;
use crate::config::WorkflowConfig;
use crate::error::{WorkflowError, WorkflowResult};
use crate::models::round_to;
use crate::skills::{llm_specialists, HttpLlmClient, SpecialistRole, Specialists};
use crate::state::{
    LogKind, NewLogEntry, NewProject, ProjectId, ProjectRecord, ProjectStore, PromptsmithDb,
    SqliteProjectStore, UsageRecord, WorkflowState,
};

/// Externally schedulable unit of work
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    StartProject,
    SubmitAnswers,
    ApproveSpec,
    RefinePrompts,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StartProject => "start_project",
            Self::SubmitAnswers => "submit_answers",
            Self::ApproveSpec => "approve_spec",
            Self::RefinePrompts => "refine_prompts",
        }
    }
}

/// Result handed back to the queue after a phase
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseReport {
    pub phase: Phase,
    pub status: WorkflowStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub questions: usize,
    pub prompts_count: usize,
    pub refinement_count: u32,
    pub total_tokens: u64,
    /// Rounded to 4 decimals
    pub total_cost: f64,
    /// Refinement refused because the project hit its cap
    #[serde(default)]
    pub limit_reached: bool,
}

impl PhaseReport {
    fn from_state(phase: Phase, state: &WorkflowState) -> Self {
        Self {
            phase,
            status: state.status,
            error: state.error.clone(),
            questions: state.questions.len(),
            prompts_count: state.parsed_prompts.len(),
            refinement_count: state.refinement_count,
            total_tokens: state.total_tokens,
            total_cost: round_to(state.total_cost, 4),
            limit_reached: false,
        }
    }

    fn at_limit(state: &WorkflowState) -> Self {
        Self {
            error: Some("Maximum refinements reached".to_string()),
            limit_reached: true,
            ..Self::from_state(Phase::RefinePrompts, state)
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == WorkflowStatus::Failed
    }
}

/// Loads and saves workflow state around each orchestrator call
pub struct TaskBridge {
    store: Arc<dyn ProjectStore>,
    specialists: Specialists,
    sink: Arc<dyn EventSink>,
    config: WorkflowConfig,
}

impl TaskBridge {
    pub fn new(
        store: Arc<dyn ProjectStore>,
        specialists: Specialists,
        sink: Arc<dyn EventSink>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            store,
            specialists,
            sink,
            config,
        }
    }

    /// Wire the SQLite store and LLM-backed specialists from `config`.
    ///
    /// Events go to the log until a different sink is set.
    pub fn from_config(config: WorkflowConfig) -> Result<Self> {
        let db = PromptsmithDb::open_at(&config.database_path)?;
        let store = Arc::new(SqliteProjectStore::new(&db));
        let llm = Arc::new(HttpLlmClient::from_env(config.llm_max_retries));
        let specialists = llm_specialists(&config, llm);
        Ok(Self::new(store, specialists, Arc::new(LogSink), config))
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn store(&self) -> &Arc<dyn ProjectStore> {
        &self.store
    }

    /// New project using the configured refinement cap
    pub fn new_project(
        &self,
        user_id: impl Into<String>,
        title: impl Into<String>,
        idea: impl Into<String>,
    ) -> NewProject {
        NewProject::new(user_id, title, idea).with_max_refinements(self.config.max_refinements)
    }

    pub fn create_project(&self, project: &NewProject) -> WorkflowResult<ProjectRecord> {
        let record = self
            .store
            .create_project(project)
            .map_err(|e| WorkflowError::persistence(format!("{:#}", e)))?;
        tracing::info!(project_id = record.id, title = %record.title, "Project created");
        Ok(record)
    }

    /// Elicitor generates clarifying questions.
    #[tracing::instrument(skip(self))]
    pub async fn start_project(&self, id: ProjectId) -> WorkflowResult<PhaseReport> {
        let result = self.run_start_project(id).await;
        self.settle(id, Phase::StartProject, result)
    }

    /// Architect writes spec.md from the answers.
    #[tracing::instrument(skip(self, answers))]
    pub async fn submit_answers(&self, id: ProjectId, answers: &str) -> WorkflowResult<PhaseReport> {
        let result = self.run_submit_answers(id, answers).await;
        self.settle(id, Phase::SubmitAnswers, result)
    }

    /// Synthesizer and critic loop produce the prompt package.
    #[tracing::instrument(skip(self))]
    pub async fn approve_spec(&self, id: ProjectId) -> WorkflowResult<PhaseReport> {
        let result = self.run_approve_spec(id).await;
        self.settle(id, Phase::ApproveSpec, result)
    }

    /// User-requested refinement, refused once the project's cap is reached.
    #[tracing::instrument(skip(self, feedback))]
    pub async fn refine_prompts(
        &self,
        id: ProjectId,
        target: u32,
        feedback: &str,
    ) -> WorkflowResult<PhaseReport> {
        let result = self.run_refine_prompts(id, target, feedback).await;
        self.settle(id, Phase::RefinePrompts, result)
    }

    async fn run_start_project(&self, id: ProjectId) -> Result<PhaseReport> {
        let mut record = self.store.load_project(id)?;
        let state = record.to_state()?;
        tracing::info!(project_id = id, title = %record.title, "Starting workflow");

        let state = self.orchestrator(id).start_from(state).await;
        self.save(&mut record, &state)?;

        if state.is_failed() {
            self.log_failure(id, &state)?;
        } else {
            let first = state
                .questions
                .first()
                .map(|q| q.text.clone())
                .unwrap_or_else(|| "No questions generated".to_string());
            self.store.append_log(
                id,
                NewLogEntry::new(LogKind::AgentQuestion, first)
                    .with_role(SpecialistRole::Elicitor)
                    .with_metadata(json!({ "questions": state.questions })),
            )?;
        }

        Ok(self.finish(Phase::StartProject, id, &state))
    }

    async fn run_submit_answers(&self, id: ProjectId, answers: &str) -> Result<PhaseReport> {
        let mut record = self.store.load_project(id)?;
        let state = record.to_state()?;

        let state = self.orchestrator(id).submit_answers(state, answers).await;
        self.save(&mut record, &state)?;

        self.store
            .append_log(id, NewLogEntry::new(LogKind::UserInput, answers))?;
        if state.is_failed() {
            self.log_failure(id, &state)?;
        } else {
            self.store.append_log(
                id,
                NewLogEntry::new(
                    LogKind::AgentResponse,
                    format!("Spec generated ({} chars)", state.spec_md.chars().count()),
                )
                .with_role(SpecialistRole::Architect)
                .with_metadata(json!({ "tech_stack": state.tech_stack })),
            )?;
        }

        Ok(self.finish(Phase::SubmitAnswers, id, &state))
    }

    async fn run_approve_spec(&self, id: ProjectId) -> Result<PhaseReport> {
        let mut record = self.store.load_project(id)?;
        let state = record.to_state()?;

        let state = self.orchestrator(id).approve_spec(state).await;
        let now = Utc::now();
        record.apply_state(&state, now)?;
        self.store.save_project(&record)?;

        if state.is_failed() {
            self.log_failure(id, &state)?;
        } else {
            self.store
                .append_log(id, NewLogEntry::new(LogKind::SystemUpdate, "Spec approved"))?;
        }

        if state.status == WorkflowStatus::Completed {
            self.store.append_log(
                id,
                NewLogEntry::new(
                    LogKind::AgentResponse,
                    format!("Generated {} prompts", state.parsed_prompts.len()),
                )
                .with_role(SpecialistRole::Synthesizer)
                .with_metadata(json!({ "critique": state.critique_results })),
            )?;

            let usage = UsageRecord::for_project(&record, &state, now);
            self.store.record_usage(&usage)?;
            tracing::info!(
                project_id = id,
                total_tokens = usage.total_tokens_used,
                cost_usd = usage.estimated_cost_usd,
                "Usage recorded"
            );
        }

        Ok(self.finish(Phase::ApproveSpec, id, &state))
    }

    async fn run_refine_prompts(
        &self,
        id: ProjectId,
        target: u32,
        feedback: &str,
    ) -> Result<PhaseReport> {
        let mut record = self.store.load_project(id)?;
        let state = record.to_state()?;

        if record.refinement_count >= record.max_refinements {
            tracing::warn!(
                project_id = id,
                refinement_count = record.refinement_count,
                max_refinements = record.max_refinements,
                "Refinement limit reached"
            );
            return Ok(PhaseReport::at_limit(&state));
        }

        let state = self
            .orchestrator(id)
            .request_refinement(state, target, feedback)
            .await;
        self.save(&mut record, &state)?;

        self.store.append_log(
            id,
            NewLogEntry::new(
                LogKind::UserInput,
                format!("Refine Prompt {}: {}", target, feedback),
            ),
        )?;
        match (&state.error, state.status) {
            (None, WorkflowStatus::Completed) => {
                self.store.append_log(
                    id,
                    NewLogEntry::new(LogKind::AgentResponse, format!("Prompt {} refined", target))
                        .with_role(SpecialistRole::Synthesizer)
                        .with_metadata(json!({ "refinement_count": state.refinement_count })),
                )?;
            }
            _ => self.log_failure(id, &state)?,
        }

        Ok(self.finish(Phase::RefinePrompts, id, &state))
    }

    fn orchestrator(&self, id: ProjectId) -> Orchestrator {
        Orchestrator::new(
            self.specialists.clone(),
            Emitter::for_project(self.sink.clone(), id),
        )
        .with_max_critic_retries(self.config.max_critic_retries)
    }

    fn save(&self, record: &mut ProjectRecord, state: &WorkflowState) -> Result<()> {
        record.apply_state(state, Utc::now())?;
        self.store.save_project(record)
    }

    fn log_failure(&self, id: ProjectId, state: &WorkflowState) -> Result<()> {
        let error = state.error.as_deref().unwrap_or("unknown error");
        self.store.append_log(
            id,
            NewLogEntry::new(LogKind::SystemUpdate, format!("Workflow error: {}", error)),
        )?;
        Ok(())
    }

    fn finish(&self, phase: Phase, id: ProjectId, state: &WorkflowState) -> PhaseReport {
        let report = PhaseReport::from_state(phase, state);
        tracing::info!(
            project_id = id,
            phase = phase.as_str(),
            status = %report.status,
            total_tokens = report.total_tokens,
            "Phase finished"
        );
        report
    }

    /// Turn a bridge-level error into the failure marker plus `Persistence`.
    fn settle(
        &self,
        id: ProjectId,
        phase: Phase,
        result: Result<PhaseReport>,
    ) -> WorkflowResult<PhaseReport> {
        result.map_err(|e| {
            let message = format!("{:#}", e);
            tracing::error!(project_id = id, phase = phase.as_str(), "Phase failed: {}", message);

            if let Err(mark_err) = self.store.mark_failed(id, &message) {
                tracing::error!(project_id = id, "Failed to mark project failed: {:#}", mark_err);
            }
            WorkflowError::Persistence(message)
        })
    }
}
