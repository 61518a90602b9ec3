//! # Workflow Status
//!
//! The status enum of a workflow run and the transitions allowed between
//! statuses, plus the retry budget used by the critic loop.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Elicitor is preparing clarifying questions
    #[default]
    Eliciting,
    /// Waiting for the user to answer the questions
    AwaitingAnswers,
    /// Architect is writing spec.md
    Planning,
    /// Waiting for the user to approve spec.md
    AwaitingApproval,
    /// Synthesizer is writing the prompt package
    Synthesizing,
    /// Critic is auditing the prompt package
    Critiquing,
    /// Synthesizer is refining the prompt package
    Refining,
    /// Prompt package is ready
    Completed,
    /// Failed with error
    Failed,
}

impl WorkflowStatus {
    pub const ALL: [WorkflowStatus; 9] = [
        Self::Eliciting,
        Self::AwaitingAnswers,
        Self::Planning,
        Self::AwaitingApproval,
        Self::Synthesizing,
        Self::Critiquing,
        Self::Refining,
        Self::Completed,
        Self::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eliciting => "eliciting",
            Self::AwaitingAnswers => "awaiting_answers",
            Self::Planning => "planning",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Synthesizing => "synthesizing",
            Self::Critiquing => "critiquing",
            Self::Refining => "refining",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// FAILED cannot be resumed; a new workflow must be started.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// Whether `self -> next` is an edge of the state machine.
    ///
    /// Every status may move to FAILED. COMPLETED is re-enterable through
    /// REFINING.
    pub fn can_transition_to(&self, next: WorkflowStatus) -> bool {
        use WorkflowStatus::*;

        if next == Failed {
            return true;
        }

        matches!(
            (self, next),
            (Eliciting, AwaitingAnswers)
                | (AwaitingAnswers, Planning)
                | (Planning, AwaitingApproval)
                | (AwaitingApproval, Synthesizing)
                | (Synthesizing, Critiquing)
                | (Critiquing, Refining)
                | (Critiquing, Completed)
                | (Refining, Critiquing)
                | (Refining, Completed)
                | (Completed, Refining)
        )
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a persisted status string is not a known status
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown workflow status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for WorkflowStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// Bounded budget of automatic refinements inside one approval
#[derive(Debug, Clone)]
pub struct RefineBudget {
    /// Refinements already attempted
    pub used: u32,
    /// Maximum refinements before the loop gives up
    pub max_retries: u32,
}

impl RefineBudget {
    pub fn new(max_retries: u32) -> Self {
        Self {
            used: 0,
            max_retries,
        }
    }

    /// Consume one refinement. Returns false once the budget is exhausted.
    pub fn try_consume(&mut self) -> bool {
        if self.used >= self.max_retries {
            return false;
        }
        self.used += 1;
        true
    }

    pub fn is_exhausted(&self) -> bool {
        self.used >= self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_string_round_trip() {
        for status in WorkflowStatus::ALL {
            let parsed: WorkflowStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);

            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let err = "archived".parse::<WorkflowStatus>().unwrap_err();
        assert_eq!(err, UnknownStatus("archived".to_string()));
        assert!("COMPLETED".parse::<WorkflowStatus>().is_err());
    }

    #[test]
    fn test_happy_path_edges() {
        use WorkflowStatus::*;
        let path = [
            Eliciting,
            AwaitingAnswers,
            Planning,
            AwaitingApproval,
            Synthesizing,
            Critiquing,
            Refining,
            Critiquing,
            Completed,
            Refining,
            Completed,
        ];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{} -> {} should be allowed",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_illegal_edges() {
        use WorkflowStatus::*;
        assert!(!Eliciting.can_transition_to(Completed));
        assert!(!AwaitingAnswers.can_transition_to(Synthesizing));
        assert!(!Completed.can_transition_to(AwaitingApproval));
        assert!(!Failed.can_transition_to(Eliciting));
        assert!(!Failed.can_transition_to(Completed));
    }

    #[test]
    fn test_every_status_can_fail() {
        for status in WorkflowStatus::ALL {
            assert!(status.can_transition_to(WorkflowStatus::Failed));
        }
        assert!(WorkflowStatus::Failed.is_terminal());
        assert!(!WorkflowStatus::Completed.is_terminal());
    }

    #[test]
    fn test_refine_budget() {
        let mut budget = RefineBudget::new(1);
        assert!(!budget.is_exhausted());
        assert!(budget.try_consume());
        assert!(budget.is_exhausted());
        assert!(!budget.try_consume());
        assert_eq!(budget.used, 1);

        let mut none = RefineBudget::new(0);
        assert!(!none.try_consume());
    }
}
