pub mod db;
pub mod project_store;
pub mod record;
pub mod workflow_state;

pub use db::PromptsmithDb;

pub use project_store::{
    LogEntry, LogKind, NewLogEntry, ProjectStore, SqliteProjectStore, UsageRecord,
};
pub use record::{NewProject, ProjectId, ProjectRecord, WorkflowData};
pub use workflow_state::{
    CriticIssue, CritiqueReport, ParsedPrompt, ProjectType, Question, RefinementRecord, Severity,
    WorkflowState,
};
