use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::remote::{RemoteError, TaskHandle, TaskKind, TaskResult, TaskStatus};
use crate::tasks::TaskSink;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub image_urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub submitted_at: String,
    pub updated_at: String,
}

impl TaskRecord {
    pub fn to_handle(&self) -> Result<TaskHandle, TaskStoreError> {
        let submitted_at = DateTime::parse_from_rfc3339(self.submitted_at.as_str())
            .map(|at| at.with_timezone(&Utc))
            .map_err(|e| {
                TaskStoreError::InvalidRow(format!(
                    "task '{}' has unreadable submitted_at: {e}",
                    self.task_id
                ))
            })?;
        TaskHandle::new(self.task_id.as_str(), self.kind, submitted_at)
            .map_err(|e: RemoteError| TaskStoreError::InvalidRow(e.to_string()))
    }
}

#[derive(Debug, Error)]
pub enum TaskStoreError {
    #[error("task not found")]
    NotFound,

    #[error("invalid task row: {0}")]
    InvalidRow(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("image url encoding failed: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Durable record of submitted tasks and their outcomes.
#[derive(Debug, Clone)]
pub struct TaskStore {
    db_path: PathBuf,
}

impl TaskStore {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    pub fn initialize(&self) -> Result<(), TaskStoreError> {
        self.with_connection(|_| Ok(()))
    }

    fn with_connection<T, F>(&self, func: F) -> Result<T, TaskStoreError>
    where
        F: FnOnce(&Connection) -> Result<T, TaskStoreError>,
    {
        if let Some(parent) = self.db_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(self.db_path.as_path())?;
        ensure_schema(&conn)?;
        func(&conn)
    }

    /// Idempotent: a handle recorded twice keeps its first timestamps.
    pub fn record_submitted(&self, handle: &TaskHandle) -> Result<(), TaskStoreError> {
        let submitted_at = handle.submitted_at().to_rfc3339();
        self.with_connection(|conn| {
            conn.execute(
                "
                INSERT INTO ai_tasks (task_id, kind, status, image_urls_json, submitted_at, updated_at)
                VALUES (?1, ?2, ?3, '[]', ?4, ?4)
                ON CONFLICT(task_id) DO NOTHING
                ",
                params![
                    handle.task_id(),
                    handle.kind().as_str(),
                    TaskStatus::Pending.as_str(),
                    submitted_at
                ],
            )?;
            Ok(())
        })
    }

    pub fn record_outcome(
        &self,
        handle: &TaskHandle,
        result: &TaskResult,
    ) -> Result<TaskRecord, TaskStoreError> {
        let image_urls_json = serde_json::to_string(result.image_urls())?;
        let (error_code, error_message) = match result {
            TaskResult::Succeeded { .. } => (None, None),
            TaskResult::Failed { code, message } => (Some(code.as_str()), Some(message.as_str())),
        };
        let now = Utc::now().to_rfc3339();
        self.with_connection(|conn| {
            conn.execute(
                "
                INSERT INTO ai_tasks
                  (task_id, kind, status, image_urls_json, error_code, error_message, submitted_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(task_id) DO UPDATE SET
                  status = excluded.status,
                  image_urls_json = excluded.image_urls_json,
                  error_code = excluded.error_code,
                  error_message = excluded.error_message,
                  updated_at = excluded.updated_at
                ",
                params![
                    handle.task_id(),
                    handle.kind().as_str(),
                    result.status().as_str(),
                    image_urls_json,
                    error_code,
                    error_message,
                    handle.submitted_at().to_rfc3339(),
                    now
                ],
            )?;
            fetch_task(conn, handle.task_id())?.ok_or(TaskStoreError::NotFound)
        })
    }

    pub fn get_task(&self, task_id: &str) -> Result<TaskRecord, TaskStoreError> {
        self.with_connection(|conn| fetch_task(conn, task_id.trim())?.ok_or(TaskStoreError::NotFound))
    }

    /// Tasks without a recorded outcome, oldest first.
    pub fn list_open_tasks(&self) -> Result<Vec<TaskRecord>, TaskStoreError> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "
                SELECT task_id, kind, status, image_urls_json, error_code, error_message, submitted_at, updated_at
                FROM ai_tasks
                WHERE status IN ('pending', 'running')
                ORDER BY submitted_at ASC, task_id ASC
                ",
            )?;
            let rows = stmt.query_map([], read_row)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?.into_record()?);
            }
            Ok(out)
        })
    }
}

impl TaskSink for TaskStore {
    fn task_submitted(&self, handle: &TaskHandle) -> Result<(), String> {
        self.record_submitted(handle).map_err(|e| e.to_string())
    }

    fn task_finished(&self, handle: &TaskHandle, result: &TaskResult) -> Result<(), String> {
        let record = self
            .record_outcome(handle, result)
            .map_err(|e| e.to_string())?;
        debug!(task_id = %record.task_id, status = record.status.as_str(), "task outcome recorded");
        Ok(())
    }
}

struct TaskRow {
    task_id: String,
    kind: String,
    status: String,
    image_urls_json: String,
    error_code: Option<String>,
    error_message: Option<String>,
    submitted_at: String,
    updated_at: String,
}

impl TaskRow {
    fn into_record(self) -> Result<TaskRecord, TaskStoreError> {
        let kind = self.kind.parse::<TaskKind>().map_err(TaskStoreError::InvalidRow)?;
        let status = self
            .status
            .parse::<TaskStatus>()
            .map_err(TaskStoreError::InvalidRow)?;
        let image_urls = serde_json::from_str::<Vec<String>>(self.image_urls_json.as_str())?;
        Ok(TaskRecord {
            task_id: self.task_id,
            kind,
            status,
            image_urls,
            error_code: self.error_code,
            error_message: self.error_message,
            submitted_at: self.submitted_at,
            updated_at: self.updated_at,
        })
    }
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<TaskRow> {
    Ok(TaskRow {
        task_id: row.get("task_id")?,
        kind: row.get("kind")?,
        status: row.get("status")?,
        image_urls_json: row.get("image_urls_json")?,
        error_code: row.get("error_code")?,
        error_message: row.get("error_message")?,
        submitted_at: row.get("submitted_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn fetch_task(conn: &Connection, task_id: &str) -> Result<Option<TaskRecord>, TaskStoreError> {
    let row = conn
        .query_row(
            "
            SELECT task_id, kind, status, image_urls_json, error_code, error_message, submitted_at, updated_at
            FROM ai_tasks
            WHERE task_id = ?1
            LIMIT 1
            ",
            params![task_id],
            read_row,
        )
        .optional()?;
    row.map(TaskRow::into_record).transpose()
}

fn ensure_schema(conn: &Connection) -> Result<(), TaskStoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS ai_tasks (
          task_id TEXT PRIMARY KEY,
          kind TEXT NOT NULL,
          status TEXT NOT NULL,
          image_urls_json TEXT NOT NULL DEFAULT '[]',
          error_code TEXT,
          error_message TEXT,
          submitted_at TEXT NOT NULL,
          updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_ai_tasks_status ON ai_tasks(status);
    ",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn temp_store() -> TaskStore {
        let suffix = Uuid::new_v4().to_string();
        let root = std::env::temp_dir().join(format!("picture_ai_tasks_{suffix}"));
        std::fs::create_dir_all(root.as_path()).expect("temp root must be creatable");
        TaskStore::new(root.join("var/tasks.db"))
    }

    fn handle(task_id: &str, kind: TaskKind) -> TaskHandle {
        TaskHandle::new(task_id, kind, Utc::now()).expect("valid handle")
    }

    #[test]
    fn submitted_tasks_are_listed_as_open_until_finished() {
        let store = temp_store();
        store.initialize().expect("schema should be created");
        let first = handle("task-1", TaskKind::Outpainting);
        let second = handle("task-2", TaskKind::TextToImage);
        store.record_submitted(&first).expect("first recorded");
        store.record_submitted(&second).expect("second recorded");
        store.record_submitted(&first).expect("re-recording is a no-op");

        let open = store.list_open_tasks().expect("open tasks");
        assert_eq!(open.len(), 2);
        assert_eq!(open[0].status, TaskStatus::Pending);

        let finished = store
            .record_outcome(
                &first,
                &TaskResult::Succeeded {
                    image_urls: vec![String::from("https://oss.test/a.png")],
                },
            )
            .expect("outcome recorded");
        assert_eq!(finished.status, TaskStatus::Succeeded);
        assert_eq!(finished.image_urls, vec![String::from("https://oss.test/a.png")]);
        assert_eq!(finished.error_code, None);

        let open = store.list_open_tasks().expect("open tasks");
        assert_eq!(
            open.iter().map(|r| r.task_id.as_str()).collect::<Vec<_>>(),
            vec!["task-2"]
        );
    }

    #[test]
    fn failed_outcome_keeps_code_and_message() {
        let store = temp_store();
        let task = handle("task-9", TaskKind::TextToImage);
        let record = store
            .record_outcome(
                &task,
                &TaskResult::Failed {
                    code: String::from("DataInspectionFailed"),
                    message: String::from("Output data may contain inappropriate content."),
                },
            )
            .expect("outcome without prior submission is inserted");
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.error_code.as_deref(), Some("DataInspectionFailed"));

        let loaded = store.get_task("task-9").expect("task loads");
        assert_eq!(loaded, record);
        let restored = loaded.to_handle().expect("handle restores");
        assert_eq!(restored.task_id(), "task-9");
        assert_eq!(restored.kind(), TaskKind::TextToImage);
    }

    #[test]
    fn missing_task_is_not_found() {
        let store = temp_store();
        assert!(matches!(
            store.get_task("nope"),
            Err(TaskStoreError::NotFound)
        ));
    }
}
