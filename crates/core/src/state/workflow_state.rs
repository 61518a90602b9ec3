//! # Workflow State
//!
//! Serializable snapshot of one pipeline run. The orchestrator takes a
//! `WorkflowState` by value and hands back the next one; nothing else about a
//! run lives in memory between phases.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::skills::Usage;
use crate::swarm::WorkflowStatus;

/// Kind of project the idea describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProjectType {
    /// A new application from scratch
    #[default]
    Build,
    /// New features in an existing codebase
    Enhance,
    /// Restructure existing code
    Refactor,
    /// Fix a defect
    Debug,
}

impl ProjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Enhance => "enhance",
            Self::Refactor => "refactor",
            Self::Debug => "debug",
        }
    }
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "build" => Ok(Self::Build),
            "enhance" => Ok(Self::Enhance),
            "refactor" => Ok(Self::Refactor),
            "debug" => Ok(Self::Debug),
            other => Err(format!("unknown project type '{}'", other)),
        }
    }
}

/// A clarifying question from the elicitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub number: u32,
    pub topic: String,
    pub text: String,
    /// Empty when the question is open-ended
    #[serde(default)]
    pub options: Vec<String>,
}

/// One section of the generated prompt package
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedPrompt {
    pub number: u32,
    pub title: String,
    pub content: String,
}

/// Critic-assigned issue level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    None,
    Minor,
    Major,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Minor => "minor",
            Self::Major => "major",
            Self::Critical => "critical",
        }
    }

    /// Only major and critical issues trigger auto-refinement.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Major | Self::Critical)
    }

    /// Lenient parse for model output; unknown labels fall back to `fallback`.
    pub fn parse_or(label: &str, fallback: Severity) -> Severity {
        match label.trim().to_ascii_lowercase().as_str() {
            "none" => Self::None,
            "minor" => Self::Minor,
            "major" => Self::Major,
            "critical" => Self::Critical,
            _ => fallback,
        }
    }
}

/// A single issue found by the critic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticIssue {
    pub prompt_number: u32,
    pub category: String,
    pub severity: Severity,
    pub description: String,
    pub suggestion: String,
}

impl CriticIssue {
    /// `- Prompt <n> (<category>): <description>. Suggestion: <suggestion>`
    pub fn feedback_line(&self) -> String {
        format!(
            "- Prompt {} ({}): {}. Suggestion: {}",
            self.prompt_number, self.category, self.description, self.suggestion
        )
    }
}

/// Structured verdict of one critic pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CritiqueReport {
    #[serde(default)]
    pub issues_found: bool,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub issues: Vec<CriticIssue>,
    #[serde(default)]
    pub overall_assessment: String,
}

impl CritiqueReport {
    /// True if issues are severe enough to warrant auto-refinement.
    pub fn needs_refinement(&self) -> bool {
        self.issues_found && self.severity.is_blocking()
    }

    /// Major and critical issues, in the critic's order
    pub fn major_issues(&self) -> impl Iterator<Item = &CriticIssue> {
        self.issues.iter().filter(|i| i.severity.is_blocking())
    }
}

/// One user-requested refinement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementRecord {
    #[serde(alias = "target_prompt")]
    pub target: u32,
    pub feedback: String,
    #[serde(default)]
    pub tokens: u64,
    #[serde(default)]
    pub cost: f64,
}

/// Full state of a project workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct WorkflowState {
    pub status: WorkflowStatus,
    pub idea: String,
    pub project_type: ProjectType,
    pub codebase_context: Option<String>,
    pub questions: Vec<Question>,
    pub user_answers: String,
    pub spec_md: String,
    pub spec_approved: bool,
    pub tech_stack: BTreeMap<String, String>,
    pub raw_prompts: String,
    pub parsed_prompts: Vec<ParsedPrompt>,
    pub critique_results: Option<CritiqueReport>,
    pub refinement_history: Vec<RefinementRecord>,
    pub refinement_count: u32,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub error: Option<String>,
}

impl WorkflowState {
    /// Fresh state for a new run, in ELICITING
    pub fn new(
        idea: impl Into<String>,
        project_type: ProjectType,
        codebase_context: Option<String>,
    ) -> Self {
        Self {
            status: WorkflowStatus::Eliciting,
            idea: idea.into(),
            project_type,
            codebase_context: codebase_context.filter(|c| !c.trim().is_empty()),
            ..Self::default()
        }
    }

    /// Add one specialist call's usage to the running totals.
    pub fn record_usage(&mut self, usage: &Usage) {
        self.total_tokens += usage.total_tokens;
        self.total_cost += usage.cost_usd;
    }

    /// Move to `next`, logging edges outside the state machine table.
    pub fn enter(&mut self, next: WorkflowStatus) {
        if !self.status.can_transition_to(next) {
            tracing::warn!(from = %self.status, to = %next, "Unexpected workflow transition");
        }
        self.status = next;
    }

    /// Replace the prompt package with a new synthesizer output
    pub fn set_prompts(&mut self, raw_markdown: String, prompts: Vec<ParsedPrompt>) {
        self.raw_prompts = raw_markdown;
        self.parsed_prompts = prompts;
    }

    pub fn is_failed(&self) -> bool {
        self.status == WorkflowStatus::Failed
    }
}
