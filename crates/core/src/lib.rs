//! # Promptsmith Core
//!
//! Turns a free-text product idea into a vetted, staged implementation plan
//! through a pipeline of specialist LLM calls.
//!
//! ## Architecture
//!
//! - `skills/` - Specialist contract and the LLM-backed Elicitor, Architect, Synthesizer, Critic
//! - `models/` - LLM provider configuration and pricing
//! - `state/` - Workflow state, persisted project records, SQLite store
//! - `swarm/` - State machine, orchestrator, task bridge, event delivery
//!
//! ## Usage
//!
//! ```rust,ignore
//! use promptsmith_core::config::WorkflowConfig;
//! use promptsmith_core::swarm::TaskBridge;
//!
//! let bridge = TaskBridge::from_config(WorkflowConfig::from_env()?)?;
//! let project = bridge.create_project(&bridge.new_project("user-1", "Habits", "A habit tracker"))?;
//! let report = bridge.start_project(project.id).await?;
//! ```

pub mod config;
pub mod error;
pub mod models;
pub mod skills;
pub mod state;
pub mod swarm;

pub use config::WorkflowConfig;
pub use error::{WorkflowError, WorkflowResult};
