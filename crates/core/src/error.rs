//! # Workflow Errors
//!
//! Error taxonomy for the orchestrator and the task bridge.
//!
//! Only `Persistence` ever leaves a phase boundary. The other kinds are
//! rendered into the `error` text of a [`WorkflowState`](crate::state::WorkflowState).

use thiserror::Error;

use crate::skills::SpecialistRole;
use crate::swarm::WorkflowStatus;

#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Operation invoked outside its required precondition
    #[error("Cannot {operation} in status {status}")]
    InvalidTransition {
        operation: &'static str,
        status: WorkflowStatus,
    },

    /// A specialist call failed during a transition
    #[error("{role} failed: {message}")]
    Specialist {
        role: SpecialistRole,
        message: String,
    },

    /// A refine call failed; the prior prompt set stays valid
    #[error("Refinement failed: {0}")]
    Refinement(String),

    /// Loading or saving durable state failed
    #[error("Persistence failure: {0}")]
    Persistence(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl WorkflowError {
    pub fn specialist(role: SpecialistRole, err: &anyhow::Error) -> Self {
        Self::Specialist {
            role,
            message: format!("{:#}", err),
        }
    }

    pub fn persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    /// True for the only class allowed to propagate out of a phase.
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }
}

pub type WorkflowResult<T> = std::result::Result<T, WorkflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_transition_message() {
        let err = WorkflowError::InvalidTransition {
            operation: "submit answers",
            status: WorkflowStatus::Completed,
        };
        assert_eq!(err.to_string(), "Cannot submit answers in status completed");
    }

    #[test]
    fn test_specialist_message_includes_role() {
        let err = WorkflowError::specialist(SpecialistRole::Critic, &anyhow::anyhow!("timeout"));
        assert_eq!(err.to_string(), "Critic failed: timeout");
        assert!(!err.is_persistence());
    }
}
