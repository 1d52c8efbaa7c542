use std::path::Path;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use skein_core::error::{Result, SkeinError};
use skein_core::traits::{AgentStore, ExecutionStore};
use skein_core::types::{
    Agent, AgentId, Execution, ExecutionId, ExecutionStatus, Snapshot, WorkflowId,
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS agents (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        system_prompt TEXT NOT NULL DEFAULT '',
        model_config TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS executions (
        id TEXT PRIMARY KEY,
        workflow_id TEXT NOT NULL,
        status TEXT NOT NULL,
        snapshot TEXT,
        started_at TEXT NOT NULL,
        finished_at TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_executions_workflow
        ON executions(workflow_id);
";

/// SQLite-backed agent and execution store.
///
/// Snapshots are stored as a JSON column; the snapshot is written exactly
/// once, at finalize.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SkeinError::Store(format!("failed to create db directory: {e}")))?;
        }

        let conn = Connection::open(path).map_err(|e| SkeinError::Store(e.to_string()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| SkeinError::Store(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| SkeinError::Store(e.to_string()))?;

        debug!(path = %path.display(), "SQLite store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| SkeinError::Store(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| SkeinError::Store(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert or replace an agent.
    pub fn save_agent(&self, agent: &Agent) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let model_config = serde_json::to_string(&agent.model_config)?;
        conn.execute(
            "INSERT OR REPLACE INTO agents
                 (id, name, description, system_prompt, model_config, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                agent.id.0,
                agent.name,
                agent.description,
                agent.system_prompt,
                model_config,
                agent.created_at.to_rfc3339(),
                agent.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| SkeinError::Store(e.to_string()))?;
        Ok(())
    }

    fn fetch_agent(&self, id: &AgentId) -> Result<Agent> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stmt = conn
            .prepare(
                "SELECT id, name, description, system_prompt, model_config, created_at, updated_at
                 FROM agents WHERE id = ?1",
            )
            .map_err(|e| SkeinError::Store(e.to_string()))?;

        let row = stmt
            .query_row(params![id.0], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })
            .optional()
            .map_err(|e| SkeinError::Store(e.to_string()))?;

        let (id, name, description, system_prompt, model_config, created_at, updated_at) =
            row.ok_or_else(|| SkeinError::AgentNotFound(id.0.clone()))?;

        Ok(Agent {
            id: AgentId::from_string(id),
            name,
            description,
            system_prompt,
            model_config: serde_json::from_str(&model_config)?,
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
        })
    }

    /// Look up one execution record.
    pub fn execution(&self, id: &ExecutionId) -> Result<Option<Execution>> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stmt = conn
            .prepare(
                "SELECT id, workflow_id, status, snapshot, started_at, finished_at
                 FROM executions WHERE id = ?1",
            )
            .map_err(|e| SkeinError::Store(e.to_string()))?;

        let row = stmt
            .query_row(params![id.0], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })
            .optional()
            .map_err(|e| SkeinError::Store(e.to_string()))?;

        let Some((id, workflow_id, status, snapshot, started_at, finished_at)) = row else {
            return Ok(None);
        };

        let snapshot = match snapshot {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => None,
        };

        Ok(Some(Execution {
            id: ExecutionId::from_string(id),
            workflow_id: WorkflowId::from_string(workflow_id),
            status: ExecutionStatus::parse(&status)
                .ok_or_else(|| SkeinError::Store(format!("unknown status: {status}")))?,
            snapshot,
            started_at: parse_timestamp(&started_at),
            finished_at: finished_at.as_deref().map(parse_timestamp),
        }))
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl AgentStore for SqliteStore {
    fn get_agent(&self, id: &AgentId) -> BoxFuture<'_, Result<Agent>> {
        let id = id.clone();
        Box::pin(async move { self.fetch_agent(&id) })
    }
}

impl ExecutionStore for SqliteStore {
    fn create_execution(
        &self,
        id: &ExecutionId,
        workflow_id: &WorkflowId,
    ) -> BoxFuture<'_, Result<()>> {
        let id = id.clone();
        let workflow_id = workflow_id.clone();
        Box::pin(async move {
            let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
            conn.execute(
                "INSERT INTO executions (id, workflow_id, status, started_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    id.0,
                    workflow_id.0,
                    ExecutionStatus::Running.as_str(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(|e| SkeinError::Store(e.to_string()))?;
            Ok(())
        })
    }

    fn finalize_execution(
        &self,
        id: &ExecutionId,
        status: ExecutionStatus,
        snapshot: &Snapshot,
        finished_at: Option<DateTime<Utc>>,
    ) -> BoxFuture<'_, Result<()>> {
        let id = id.clone();
        let snapshot_json = serde_json::to_string(snapshot);
        Box::pin(async move {
            let snapshot_json = snapshot_json?;
            let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
            let updated = conn
                .execute(
                    "UPDATE executions
                     SET status = ?2, snapshot = ?3, finished_at = ?4
                     WHERE id = ?1",
                    params![
                        id.0,
                        status.as_str(),
                        snapshot_json,
                        finished_at.map(|t| t.to_rfc3339()),
                    ],
                )
                .map_err(|e| SkeinError::Store(e.to_string()))?;
            if updated == 0 {
                return Err(SkeinError::ExecutionNotFound(id.0.clone()));
            }
            Ok(())
        })
    }

    fn load_snapshot(&self, id: &ExecutionId) -> BoxFuture<'_, Result<Snapshot>> {
        let id = id.clone();
        Box::pin(async move {
            let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
            let json = conn
                .query_row(
                    "SELECT snapshot FROM executions WHERE id = ?1",
                    params![id.0],
                    |row| row.get::<_, Option<String>>(0),
                )
                .optional()
                .map_err(|e| SkeinError::Store(e.to_string()))?
                .flatten()
                .ok_or_else(|| SkeinError::ExecutionNotFound(id.0.clone()))?;
            Ok(serde_json::from_str(&json)?)
        })
    }
}
