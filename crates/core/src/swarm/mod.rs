//! # Swarm Orchestration
//!
//! Coordinates the specialist pipeline for one project.
//!
//! ## Pipeline Flow
//!
//! ```text
//! Idea → Elicitor → (answers) → Architect → (approval) → Synthesizer ⟷ Critic → Prompts
//! ```
//!
//! [`TaskBridge`] runs each step as a separately scheduled phase around the
//! stateless [`Orchestrator`]; progress is published through an [`EventSink`].

pub mod coordinator;
pub mod events;
pub mod hub;
pub mod pipeline;
pub mod sessions;
pub mod task_bridge;

#[cfg(test)]
pub(crate) mod testing;

pub use coordinator::{Orchestrator, DEFAULT_MAX_CRITIC_RETRIES};
pub use events::{
    project_topic, ChannelSink, Emitter, EventSink, LogSink, WorkflowEvent, WorkflowEventKind,
};
pub use hub::EventHub;
pub use pipeline::{RefineBudget, UnknownStatus, WorkflowStatus};
pub use sessions::{CredentialVerifier, Identity, InMemorySessionRegistry, SessionRegistry};
pub use task_bridge::{Phase, PhaseReport, TaskBridge};
