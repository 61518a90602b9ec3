//! # Project Record
//!
//! The persisted shape of a project and its conversion to and from
//! [`WorkflowState`]. Columns hold what is queried directly; everything else
//! lives in the `workflow_data` JSON blob.
//!
//! The blob is read leniently: every field is optional with a default, so
//! records written by older versions still load. The status column is read
//! strictly and an unknown value fails the load.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::state::{
    CritiqueReport, ParsedPrompt, ProjectType, Question, RefinementRecord, WorkflowState,
};
use crate::swarm::WorkflowStatus;

pub type ProjectId = i64;

/// Fields needed to create a project
#[derive(Debug, Clone, PartialEq)]
pub struct NewProject {
    pub user_id: String,
    pub title: String,
    pub initial_idea: String,
    pub project_type: ProjectType,
    pub codebase_context: Option<String>,
    pub max_refinements: u32,
}

impl NewProject {
    pub fn new(user_id: impl Into<String>, title: impl Into<String>, idea: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            title: title.into(),
            initial_idea: idea.into(),
            project_type: ProjectType::Build,
            codebase_context: None,
            max_refinements: 3,
        }
    }

    pub fn with_project_type(mut self, project_type: ProjectType) -> Self {
        self.project_type = project_type;
        self
    }

    pub fn with_codebase_context(mut self, context: impl Into<String>) -> Self {
        self.codebase_context = Some(context.into());
        self
    }

    pub fn with_max_refinements(mut self, max: u32) -> Self {
        self.max_refinements = max;
        self
    }
}

/// One row of the `projects` table
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectRecord {
    pub id: ProjectId,
    pub user_id: String,
    pub title: String,
    pub initial_idea: String,
    /// Stored string, validated on load
    pub project_type: String,
    pub codebase_context: Option<String>,
    /// Stored string, validated on load
    pub status: String,
    pub current_stage: String,
    pub spec_md: Option<String>,
    pub final_prompts: Option<Vec<ParsedPrompt>>,
    pub refinement_count: u32,
    pub max_refinements: u32,
    pub workflow_data: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Typed view of the `workflow_data` blob
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WorkflowData {
    pub questions: Vec<Question>,
    pub user_answers: String,
    pub spec_approved: bool,
    pub tech_stack: BTreeMap<String, String>,
    pub raw_prompts: String,
    pub parsed_prompts: Vec<ParsedPrompt>,
    #[serde(deserialize_with = "critique_or_none")]
    pub critique_results: Option<CritiqueReport>,
    pub refinement_history: Vec<RefinementRecord>,
    pub total_tokens: u64,
    pub total_cost: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `null` and `{}` both mean "no critique yet".
fn critique_or_none<'de, D>(deserializer: D) -> Result<Option<CritiqueReport>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) if map.is_empty() => Ok(None),
        Some(other) => serde_json::from_value(other)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

impl From<&WorkflowState> for WorkflowData {
    fn from(state: &WorkflowState) -> Self {
        Self {
            questions: state.questions.clone(),
            user_answers: state.user_answers.clone(),
            spec_approved: state.spec_approved,
            tech_stack: state.tech_stack.clone(),
            raw_prompts: state.raw_prompts.clone(),
            parsed_prompts: state.parsed_prompts.clone(),
            critique_results: state.critique_results.clone(),
            refinement_history: state.refinement_history.clone(),
            total_tokens: state.total_tokens,
            total_cost: state.total_cost,
            error: state.error.clone(),
        }
    }
}

impl ProjectRecord {
    /// Rebuild the workflow state purely from persisted fields.
    pub fn to_state(&self) -> Result<WorkflowState> {
        let status: WorkflowStatus = self
            .status
            .parse()
            .with_context(|| format!("Project {} has an invalid status", self.id))?;
        let project_type: ProjectType = self
            .project_type
            .parse()
            .map_err(|e: String| anyhow::anyhow!("Project {}: {}", self.id, e))?;

        let data: WorkflowData = match &self.workflow_data {
            Value::Null => WorkflowData::default(),
            blob => serde_json::from_value(blob.clone())
                .with_context(|| format!("Project {} has malformed workflow_data", self.id))?,
        };

        Ok(WorkflowState {
            status,
            idea: self.initial_idea.clone(),
            project_type,
            codebase_context: self.codebase_context.clone(),
            questions: data.questions,
            user_answers: data.user_answers,
            spec_md: self.spec_md.clone().unwrap_or_default(),
            spec_approved: data.spec_approved,
            tech_stack: data.tech_stack,
            raw_prompts: data.raw_prompts,
            parsed_prompts: data.parsed_prompts,
            critique_results: data.critique_results,
            refinement_history: data.refinement_history,
            refinement_count: self.refinement_count,
            total_tokens: data.total_tokens,
            total_cost: data.total_cost,
            error: data.error,
        })
    }

    /// Write every field of `state` into this record.
    ///
    /// The blob is replaced wholesale. `final_prompts` keeps its previous value
    /// when the state has no prompts.
    pub fn apply_state(&mut self, state: &WorkflowState, now: DateTime<Utc>) -> Result<()> {
        self.status = state.status.as_str().to_string();
        self.current_stage = state.status.as_str().to_string();
        self.initial_idea = state.idea.clone();
        self.project_type = state.project_type.as_str().to_string();
        self.codebase_context = state.codebase_context.clone();
        self.spec_md = Some(state.spec_md.clone()).filter(|s| !s.is_empty());
        self.refinement_count = state.refinement_count;

        if !state.parsed_prompts.is_empty() {
            self.final_prompts = Some(state.parsed_prompts.clone());
        }
        if state.status == WorkflowStatus::Completed {
            self.completed_at = Some(now);
        }

        self.workflow_data = serde_json::to_value(WorkflowData::from(state))
            .context("Failed to serialize workflow_data")?;
        self.updated_at = now;
        Ok(())
    }

    /// Force the failure marker: status `failed` and `error` merged into the blob.
    pub fn mark_failed(&mut self, error: &str, now: DateTime<Utc>) {
        self.status = WorkflowStatus::Failed.as_str().to_string();
        self.current_stage = WorkflowStatus::Failed.as_str().to_string();
        self.workflow_data = merge_error(self.workflow_data.take(), error);
        self.updated_at = now;
    }
}

/// Set `error` on a blob, keeping its other keys.
pub fn merge_error(blob: Value, error: &str) -> Value {
    let mut map = match blob {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    map.insert("error".to_string(), Value::String(error.to_string()));
    Value::Object(map)
}
