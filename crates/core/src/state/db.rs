//! # Promptsmith Database
//!
//! Single SQLite database holding projects, their conversation log and the
//! usage records written when a workflow completes.

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Schema version for migrations
const SCHEMA_VERSION: i32 = 1;

/// Default database location
pub const DEFAULT_DB_PATH: &str = ".promptsmith/promptsmith.db";

/// Shared SQLite connection with migrations applied
pub struct PromptsmithDb {
    conn: Arc<Mutex<Connection>>,
}

impl PromptsmithDb {
    /// Open or create the database at `.promptsmith/promptsmith.db`
    pub fn open() -> Result<Self> {
        Self::open_at(DEFAULT_DB_PATH)
    }

    /// Open database at a specific path
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(path.as_ref()).context("Failed to open promptsmith database")?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Get a shared connection for use by other modules
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current_version < 1 {
            Self::migrate_v1(&conn)?;
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                [1],
            )?;
        }

        Ok(())
    }

    /// Migration to version 1 - complete schema
    fn migrate_v1(conn: &Connection) -> Result<()> {
        // One row per project; workflow_data holds the rest of the workflow state as JSON
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS projects (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                initial_idea TEXT NOT NULL,
                project_type TEXT NOT NULL DEFAULT 'build',
                codebase_context TEXT,
                status TEXT NOT NULL DEFAULT 'eliciting',
                current_stage TEXT NOT NULL DEFAULT 'eliciting',
                spec_md TEXT,
                final_prompts TEXT,
                refinement_count INTEGER NOT NULL DEFAULT 0,
                max_refinements INTEGER NOT NULL DEFAULT 3,
                workflow_data TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                completed_at TEXT
            )
            "#,
            [],
        )?;

        // Human-readable history, ordered per project by sequence_number
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS conversation_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                event_type TEXT NOT NULL,
                agent_role TEXT,
                content TEXT NOT NULL,
                metadata_json TEXT,
                sequence_number INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (project_id, sequence_number)
            )
            "#,
            [],
        )?;

        // Usage accounting, one row per completed workflow
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS user_sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                session_start TEXT NOT NULL,
                session_end TEXT NOT NULL,
                duration_seconds INTEGER NOT NULL,
                total_tokens_used INTEGER NOT NULL,
                estimated_cost_usd REAL NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_projects_user ON projects(user_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_sessions_project ON user_sessions(project_id)",
            [],
        )?;

        tracing::info!(
            "PromptsmithDb initialized with schema version {}",
            SCHEMA_VERSION
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn table_names(db: &PromptsmithDb) -> Vec<String> {
        let conn = db.connection();
        let conn = conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap();
        let names = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();
        names
    }

    #[test]
    fn test_open_in_memory_creates_tables() {
        let db = PromptsmithDb::open_in_memory().unwrap();
        let tables = table_names(&db);

        assert!(tables.contains(&"projects".to_string()));
        assert!(tables.contains(&"conversation_events".to_string()));
        assert!(tables.contains(&"user_sessions".to_string()));
        assert!(tables.contains(&"schema_version".to_string()));
    }

    #[test]
    fn test_schema_version_tracking() {
        let path = std::env::temp_dir().join(format!("promptsmith_version_{}.db", std::process::id()));
        let _ = fs::remove_file(&path);

        // Open twice - should not fail on second open
        let db1 = PromptsmithDb::open_at(&path).unwrap();
        drop(db1);

        let db2 = PromptsmithDb::open_at(&path).unwrap();
        let conn = db2.connection();
        let conn = conn.lock().unwrap();

        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);

        drop(conn);
        drop(db2);
        let _ = fs::remove_file(&path);
    }
}
