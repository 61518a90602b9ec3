//! # Project Store
//!
//! Durable storage for project records, their conversation log and usage
//! accounting. [`SqliteProjectStore`] implements it over the shared
//! [`PromptsmithDb`] connection.

use super::db::PromptsmithDb;
use super::record::{merge_error, NewProject, ProjectId, ProjectRecord};
use crate::skills::SpecialistRole;
use crate::state::{ParsedPrompt, WorkflowState};
use crate::models::round_to;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::Error::FromSqlConversionFailure;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// Kind of conversation log entry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    /// Something the user submitted
    UserInput,
    /// Questions asked by the elicitor
    AgentQuestion,
    /// Output of a specialist
    AgentResponse,
    /// Workflow milestone
    SystemUpdate,
}

impl LogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserInput => "user_input",
            Self::AgentQuestion => "agent_question",
            Self::AgentResponse => "agent_response",
            Self::SystemUpdate => "system_update",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "user_input" => Self::UserInput,
            "agent_question" => Self::AgentQuestion,
            "agent_response" => Self::AgentResponse,
            _ => Self::SystemUpdate,
        }
    }
}

/// Log entry to append; the store assigns the sequence number
#[derive(Debug, Clone, PartialEq)]
pub struct NewLogEntry {
    pub kind: LogKind,
    pub agent_role: Option<SpecialistRole>,
    pub content: String,
    pub metadata: Option<Value>,
}

impl NewLogEntry {
    pub fn new(kind: LogKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            agent_role: None,
            content: content.into(),
            metadata: None,
        }
    }

    pub fn with_role(mut self, role: SpecialistRole) -> Self {
        self.agent_role = Some(role);
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// A stored conversation log entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub project_id: ProjectId,
    pub kind: LogKind,
    pub agent_role: Option<String>,
    pub content: String,
    pub metadata: Option<Value>,
    /// Strictly increasing per project, starting at 1
    pub sequence_number: i64,
    pub created_at: DateTime<Utc>,
}

/// Usage accounting for one completed workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageRecord {
    pub user_id: String,
    pub project_id: ProjectId,
    pub session_start: DateTime<Utc>,
    pub session_end: DateTime<Utc>,
    pub duration_seconds: i64,
    pub total_tokens_used: u64,
    pub estimated_cost_usd: f64,
}

impl UsageRecord {
    /// Session spans from project creation to `now`.
    pub fn for_project(record: &ProjectRecord, state: &WorkflowState, now: DateTime<Utc>) -> Self {
        Self {
            user_id: record.user_id.clone(),
            project_id: record.id,
            session_start: record.created_at,
            session_end: now,
            duration_seconds: (now - record.created_at).num_seconds(),
            total_tokens_used: state.total_tokens,
            estimated_cost_usd: round_to(state.total_cost, 6),
        }
    }
}

/// Durable record store used by the task bridge
pub trait ProjectStore: Send + Sync {
    fn create_project(&self, project: &NewProject) -> Result<ProjectRecord>;

    /// Fails when the project does not exist.
    fn load_project(&self, id: ProjectId) -> Result<ProjectRecord>;

    /// Write every column of the record in one statement.
    fn save_project(&self, record: &ProjectRecord) -> Result<()>;

    /// Set status `failed` and merge `error` into `workflow_data`.
    fn mark_failed(&self, id: ProjectId, error: &str) -> Result<()>;

    fn append_log(&self, id: ProjectId, entry: NewLogEntry) -> Result<LogEntry>;

    /// Entries in sequence order
    fn list_logs(&self, id: ProjectId) -> Result<Vec<LogEntry>>;

    fn record_usage(&self, usage: &UsageRecord) -> Result<()>;

    fn list_usage(&self, id: ProjectId) -> Result<Vec<UsageRecord>>;
}

/// SQLite-backed project store
pub struct SqliteProjectStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteProjectStore {
    /// Create from shared PromptsmithDb connection
    pub fn new(db: &PromptsmithDb) -> Self {
        Self {
            conn: db.connection(),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }
}

/// Raw `projects` row before JSON columns are decoded
struct ProjectRow {
    id: ProjectId,
    user_id: String,
    title: String,
    initial_idea: String,
    project_type: String,
    codebase_context: Option<String>,
    status: String,
    current_stage: String,
    spec_md: Option<String>,
    final_prompts: Option<String>,
    refinement_count: i64,
    max_refinements: i64,
    workflow_data: String,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
}

impl ProjectRow {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            initial_idea: row.get(3)?,
            project_type: row.get(4)?,
            codebase_context: row.get(5)?,
            status: row.get(6)?,
            current_stage: row.get(7)?,
            spec_md: row.get(8)?,
            final_prompts: row.get(9)?,
            refinement_count: row.get(10)?,
            max_refinements: row.get(11)?,
            workflow_data: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
            completed_at: row.get(15)?,
        })
    }

    fn into_record(self) -> Result<ProjectRecord> {
        let id = self.id;
        let final_prompts: Option<Vec<ParsedPrompt>> = self
            .final_prompts
            .map(|json| serde_json::from_str(&json))
            .transpose()
            .with_context(|| format!("Project {} has malformed final_prompts", id))?;
        let workflow_data: Value = serde_json::from_str(&self.workflow_data)
            .with_context(|| format!("Project {} has malformed workflow_data", id))?;
        let refinement_count = u32::try_from(self.refinement_count)
            .with_context(|| format!("Project {} has invalid refinement_count", id))?;
        let max_refinements = u32::try_from(self.max_refinements)
            .with_context(|| format!("Project {} has invalid max_refinements", id))?;
        let created_at = parse_time(&self.created_at)
            .with_context(|| format!("Project {} has malformed created_at", id))?;
        let updated_at = parse_time(&self.updated_at)
            .with_context(|| format!("Project {} has malformed updated_at", id))?;
        let completed_at = self
            .completed_at
            .as_deref()
            .map(parse_time)
            .transpose()
            .with_context(|| format!("Project {} has malformed completed_at", id))?;

        Ok(ProjectRecord {
            id,
            user_id: self.user_id,
            title: self.title,
            initial_idea: self.initial_idea,
            project_type: self.project_type,
            codebase_context: self.codebase_context,
            status: self.status,
            current_stage: self.current_stage,
            spec_md: self.spec_md,
            final_prompts,
            refinement_count,
            max_refinements,
            workflow_data,
            created_at,
            updated_at,
            completed_at,
        })
    }
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|t| t.with_timezone(&Utc))
}

/// Timestamp column read inside a row mapper
fn time_column(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    parse_time(s).map_err(|e| FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

const PROJECT_COLUMNS: &str = "id, user_id, title, initial_idea, project_type, codebase_context, \
     status, current_stage, spec_md, final_prompts, refinement_count, max_refinements, \
     workflow_data, created_at, updated_at, completed_at";

impl ProjectStore for SqliteProjectStore {
    fn create_project(&self, project: &NewProject) -> Result<ProjectRecord> {
        let id = {
            let conn = self.lock()?;
            let now = Utc::now().to_rfc3339();
            conn.execute(
                r#"
                INSERT INTO projects
                (user_id, title, initial_idea, project_type, codebase_context,
                 max_refinements, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                "#,
                params![
                    project.user_id,
                    project.title,
                    project.initial_idea,
                    project.project_type.as_str(),
                    project.codebase_context,
                    project.max_refinements,
                    now,
                ],
            )
            .context("Failed to create project")?;
            conn.last_insert_rowid()
        };

        tracing::debug!(project_id = id, "Created project");
        self.load_project(id)
    }

    fn load_project(&self, id: ProjectId) -> Result<ProjectRecord> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM projects WHERE id = ?1", PROJECT_COLUMNS),
                params![id],
                ProjectRow::from_row,
            )
            .optional()
            .context("Failed to load project")?
            .ok_or_else(|| anyhow::anyhow!("Project {} not found", id))?;
        row.into_record()
    }

    fn save_project(&self, record: &ProjectRecord) -> Result<()> {
        let final_prompts = record
            .final_prompts
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let workflow_data = serde_json::to_string(&record.workflow_data)?;

        let conn = self.lock()?;
        let affected = conn
            .execute(
                r#"
                UPDATE projects SET
                    title = ?2, initial_idea = ?3, project_type = ?4, codebase_context = ?5,
                    status = ?6, current_stage = ?7, spec_md = ?8, final_prompts = ?9,
                    refinement_count = ?10, max_refinements = ?11, workflow_data = ?12,
                    updated_at = ?13, completed_at = ?14
                WHERE id = ?1
                "#,
                params![
                    record.id,
                    record.title,
                    record.initial_idea,
                    record.project_type,
                    record.codebase_context,
                    record.status,
                    record.current_stage,
                    record.spec_md,
                    final_prompts,
                    record.refinement_count,
                    record.max_refinements,
                    workflow_data,
                    record.updated_at.to_rfc3339(),
                    record.completed_at.map(|t| t.to_rfc3339()),
                ],
            )
            .context("Failed to save project")?;

        if affected == 0 {
            anyhow::bail!("Project {} not found", record.id);
        }
        Ok(())
    }

    fn mark_failed(&self, id: ProjectId, error: &str) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let blob: Option<String> = tx
            .query_row(
                "SELECT workflow_data FROM projects WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(blob) = blob else {
            anyhow::bail!("Project {} not found", id);
        };

        let existing = serde_json::from_str(&blob).unwrap_or(Value::Null);
        let merged = serde_json::to_string(&merge_error(existing, error))?;

        tx.execute(
            r#"
            UPDATE projects
            SET status = 'failed', current_stage = 'failed', workflow_data = ?2, updated_at = ?3
            WHERE id = ?1
            "#,
            params![id, merged, Utc::now().to_rfc3339()],
        )?;
        tx.commit().context("Failed to mark project failed")?;

        tracing::debug!(project_id = id, "Marked project failed");
        Ok(())
    }

    fn append_log(&self, id: ProjectId, entry: NewLogEntry) -> Result<LogEntry> {
        let metadata_json = entry
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let agent_role = entry.agent_role.map(|r| r.as_str().to_string());
        let created_at = Utc::now();

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let sequence_number: i64 = tx.query_row(
            "SELECT COALESCE(MAX(sequence_number), 0) + 1 FROM conversation_events WHERE project_id = ?1",
            params![id],
            |row| row.get(0),
        )?;

        tx.execute(
            r#"
            INSERT INTO conversation_events
            (project_id, event_type, agent_role, content, metadata_json, sequence_number, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                id,
                entry.kind.as_str(),
                agent_role,
                entry.content,
                metadata_json,
                sequence_number,
                created_at.to_rfc3339(),
            ],
        )
        .context("Failed to append log entry")?;
        tx.commit()?;

        Ok(LogEntry {
            project_id: id,
            kind: entry.kind,
            agent_role,
            content: entry.content,
            metadata: entry.metadata,
            sequence_number,
            created_at,
        })
    }

    fn list_logs(&self, id: ProjectId) -> Result<Vec<LogEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT project_id, event_type, agent_role, content, metadata_json, sequence_number, created_at
            FROM conversation_events
            WHERE project_id = ?1
            ORDER BY sequence_number ASC
            "#,
        )?;

        let entries = stmt
            .query_map(params![id], |row| {
                let metadata_json: Option<String> = row.get(4)?;
                let created_at: String = row.get(6)?;
                Ok(LogEntry {
                    project_id: row.get(0)?,
                    kind: LogKind::from_str(&row.get::<_, String>(1)?),
                    agent_role: row.get(2)?,
                    content: row.get(3)?,
                    metadata: metadata_json.and_then(|s| serde_json::from_str(&s).ok()),
                    sequence_number: row.get(5)?,
                    created_at: time_column(6, &created_at)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list log entries")?;

        Ok(entries)
    }

    fn record_usage(&self, usage: &UsageRecord) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO user_sessions
            (user_id, project_id, session_start, session_end, duration_seconds,
             total_tokens_used, estimated_cost_usd)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                usage.user_id,
                usage.project_id,
                usage.session_start.to_rfc3339(),
                usage.session_end.to_rfc3339(),
                usage.duration_seconds,
                i64::try_from(usage.total_tokens_used).unwrap_or(i64::MAX),
                usage.estimated_cost_usd,
            ],
        )
        .context("Failed to record usage")?;
        Ok(())
    }

    fn list_usage(&self, id: ProjectId) -> Result<Vec<UsageRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT user_id, project_id, session_start, session_end, duration_seconds,
                   total_tokens_used, estimated_cost_usd
            FROM user_sessions
            WHERE project_id = ?1
            ORDER BY id ASC
            "#,
        )?;

        let records = stmt
            .query_map(params![id], |row| {
                let start: String = row.get(2)?;
                let end: String = row.get(3)?;
                let tokens: i64 = row.get(5)?;
                Ok(UsageRecord {
                    user_id: row.get(0)?,
                    project_id: row.get(1)?,
                    session_start: time_column(2, &start)?,
                    session_end: time_column(3, &end)?,
                    duration_seconds: row.get(4)?,
                    total_tokens_used: u64::try_from(tokens)
                        .map_err(|e| FromSqlConversionFailure(5, Type::Integer, Box::new(e)))?,
                    estimated_cost_usd: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list usage records")?;

        Ok(records)
    }
}
