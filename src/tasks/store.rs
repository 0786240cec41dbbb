//! # Task Store
//!
//! SQLite-backed persistence for correction tasks, fronted by a bounded
//! in-memory cache of recently touched rows.
//!
//! ## Key Responsibilities:
//! - **Row lifecycle**: insert pending rows, advance them through guarded updates
//! - **Monotonic transitions**: pending → processing → {completed | error},
//!   enforced with `WHERE status = …` guards so a stale writer can't regress a row
//! - **Read caching**: recently written/read rows are served from memory,
//!   lookups fall back to SQLite on a miss
//!
//! The connection lives behind an async mutex; every statement is a short
//! single-row operation, so contention stays negligible at this scale.

use crate::error::{AppError, AppResult};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use uuid::Uuid;

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    reference_text TEXT NOT NULL,
    recognized_text TEXT,
    feedback TEXT,
    error_message TEXT,
    created_at TEXT NOT NULL,
    completed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_tasks_created_at ON tasks(created_at DESC);
CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
"#;

/// Lifecycle states of a correction task.
///
/// ## State Transitions:
/// pending → processing → completed
/// pending/processing → error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
        }
    }

    /// Whether the task has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Error)
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            "error" => Ok(TaskStatus::Error),
            other => Err(format!("Unknown task status: {}", other)),
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A correction task row.
///
/// Created pending on upload, mutated by the background worker, never deleted.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: String,
    pub status: TaskStatus,
    pub reference_text: String,
    pub recognized_text: Option<String>,
    pub feedback: Option<String>,
    pub error_message: Option<String>,
    pub created_at: String,
    pub completed_at: Option<String>,
}

/// Per-status row counts, reported by the health endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub error: u64,
    pub total: u64,
}

/// Bounded insertion-ordered cache of task rows.
///
/// Eviction drops the oldest-inserted id first. Updating an already cached
/// row replaces the value without renewing its position.
struct TaskCache {
    capacity: usize,
    map: HashMap<String, Task>,
    order: VecDeque<String>,
}

impl TaskCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            map: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&self, id: &str) -> Option<Task> {
        self.map.get(id).cloned()
    }

    fn put(&mut self, task: Task) {
        if !self.map.contains_key(&task.id) {
            self.order.push_back(task.id.clone());
        }
        self.map.insert(task.id.clone(), task);

        while self.map.len() > self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.map.remove(&oldest);
                }
                None => break,
            }
        }
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}

/// Handle to the task table. Cheap to clone; all clones share the same
/// connection and cache.
#[derive(Clone)]
pub struct TaskStore {
    conn: Arc<Mutex<Connection>>,
    cache: Arc<RwLock<TaskCache>>,
}

impl TaskStore {
    /// Open (or create) the task database at the given path and apply the
    /// schema idempotently.
    pub async fn open(path: impl Into<PathBuf>, cache_capacity: usize) -> AppResult<Self> {
        let path = path.into();

        let conn = tokio::task::spawn_blocking(move || -> AppResult<Connection> {
            let conn = Connection::open(&path)?;
            conn.execute_batch(SCHEMA)?;
            Ok(conn)
        })
        .await
        .map_err(|e| AppError::Internal(format!("Task store open task failed: {}", e)))??;

        Ok(Self::from_connection(conn, cache_capacity))
    }

    /// In-memory store used by tests and worker-level integration checks.
    pub fn open_in_memory(cache_capacity: usize) -> AppResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self::from_connection(conn, cache_capacity))
    }

    fn from_connection(conn: Connection, cache_capacity: usize) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            cache: Arc::new(RwLock::new(TaskCache::new(cache_capacity))),
        }
    }

    /// Insert a new pending task for the given reference text and return it.
    pub async fn create(&self, reference_text: &str) -> AppResult<Task> {
        let task = Task {
            id: Uuid::new_v4().to_string(),
            status: TaskStatus::Pending,
            reference_text: reference_text.to_string(),
            recognized_text: None,
            feedback: None,
            error_message: None,
            created_at: now_rfc3339(),
            completed_at: None,
        };

        {
            let conn = self.conn.lock().await;
            conn.execute(
                "INSERT INTO tasks (id, status, reference_text, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    task.id,
                    task.status.as_str(),
                    task.reference_text,
                    task.created_at
                ],
            )?;
        }

        self.cache_put(task.clone());
        Ok(task)
    }

    /// Look up a task by id, serving from the cache when possible.
    pub async fn get(&self, id: &str) -> AppResult<Option<Task>> {
        if let Some(task) = self.cache.read().unwrap().get(id) {
            return Ok(Some(task));
        }

        let task = {
            let conn = self.conn.lock().await;
            conn.query_row(
                "SELECT id, status, reference_text, recognized_text, feedback,
                        error_message, created_at, completed_at
                 FROM tasks WHERE id = ?1",
                params![id],
                task_from_row,
            )
            .optional()?
        };

        if let Some(ref task) = task {
            self.cache_put(task.clone());
        }
        Ok(task)
    }

    /// Advance a pending task to processing.
    ///
    /// Returns false when the task was not pending (already picked up, already
    /// terminal, or unknown). The guard is what keeps transitions monotonic.
    pub async fn mark_processing(&self, id: &str) -> AppResult<bool> {
        let updated = {
            let conn = self.conn.lock().await;
            conn.execute(
                "UPDATE tasks SET status = 'processing'
                 WHERE id = ?1 AND status = 'pending'",
                params![id],
            )?
        };

        if updated == 1 {
            self.refresh_cached(id).await?;
        }
        Ok(updated == 1)
    }

    /// Record a successful transcription and mark the task completed.
    pub async fn complete(&self, id: &str, recognized_text: &str, feedback: &str) -> AppResult<bool> {
        let updated = {
            let conn = self.conn.lock().await;
            conn.execute(
                "UPDATE tasks
                 SET status = 'completed', recognized_text = ?2, feedback = ?3,
                     completed_at = ?4
                 WHERE id = ?1 AND status = 'processing'",
                params![id, recognized_text, feedback, now_rfc3339()],
            )?
        };

        if updated == 1 {
            self.refresh_cached(id).await?;
        }
        Ok(updated == 1)
    }

    /// Record a failure message and mark the task errored.
    ///
    /// Errors are accepted from pending as well as processing: an enqueue
    /// failure must land on the row even though no worker ever picked it up.
    pub async fn fail(&self, id: &str, message: &str) -> AppResult<bool> {
        let updated = {
            let conn = self.conn.lock().await;
            conn.execute(
                "UPDATE tasks
                 SET status = 'error', error_message = ?2, completed_at = ?3
                 WHERE id = ?1 AND status IN ('pending', 'processing')",
                params![id, message, now_rfc3339()],
            )?
        };

        if updated == 1 {
            self.refresh_cached(id).await?;
        }
        Ok(updated == 1)
    }

    /// Most recently created tasks, newest first.
    pub async fn list_recent(&self, limit: usize) -> AppResult<Vec<Task>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, status, reference_text, recognized_text, feedback,
                    error_message, created_at, completed_at
             FROM tasks
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit as i64], task_from_row)?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }
        Ok(tasks)
    }

    /// Row counts per status, for health reporting.
    pub async fn status_counts(&self) -> AppResult<StatusCounts> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
        })?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let (status, count) = row?;
            match status.as_str() {
                "pending" => counts.pending = count,
                "processing" => counts.processing = count,
                "completed" => counts.completed = count,
                "error" => counts.error = count,
                _ => {}
            }
            counts.total += count;
        }
        Ok(counts)
    }

    /// Re-read a row from SQLite into the cache after a successful update.
    async fn refresh_cached(&self, id: &str) -> AppResult<()> {
        let task = {
            let conn = self.conn.lock().await;
            conn.query_row(
                "SELECT id, status, reference_text, recognized_text, feedback,
                        error_message, created_at, completed_at
                 FROM tasks WHERE id = ?1",
                params![id],
                task_from_row,
            )
            .optional()?
        };

        if let Some(task) = task {
            self.cache_put(task);
        }
        Ok(())
    }

    fn cache_put(&self, task: Task) {
        self.cache.write().unwrap().put(task);
    }

    #[cfg(test)]
    fn cached_rows(&self) -> usize {
        self.cache.read().unwrap().len()
    }
}

fn task_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    let status_str: String = row.get(1)?;
    let status = status_str.parse::<TaskStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        )
    })?;

    Ok(Task {
        id: row.get(0)?,
        status,
        reference_text: row.get(2)?,
        recognized_text: row.get(3)?,
        feedback: row.get(4)?,
        error_message: row.get(5)?,
        created_at: row.get(6)?,
        completed_at: row.get(7)?,
    })
}

/// Current UTC timestamp as an RFC 3339 string (the column format).
fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_inserts_pending_row() {
        let store = TaskStore::open_in_memory(16).unwrap();
        let task = store.create("بسم الله").await.unwrap();

        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.recognized_text.is_none());
        assert!(task.completed_at.is_none());

        let fetched = store.get(&task.id).await.unwrap().unwrap();
        assert_eq!(fetched.reference_text, "بسم الله");
        assert_eq!(fetched.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_get_unknown_id_is_none() {
        let store = TaskStore::open_in_memory(16).unwrap();
        assert!(store.get("no-such-task").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_full_lifecycle_to_completed() {
        let store = TaskStore::open_in_memory(16).unwrap();
        let task = store.create("ayah").await.unwrap();

        assert!(store.mark_processing(&task.id).await.unwrap());
        assert!(store.complete(&task.id, "recognized", "- a\n+ b").await.unwrap());

        let done = store.get(&task.id).await.unwrap().unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.recognized_text.as_deref(), Some("recognized"));
        assert_eq!(done.feedback.as_deref(), Some("- a\n+ b"));
        assert!(done.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_transitions_never_regress() {
        let store = TaskStore::open_in_memory(16).unwrap();
        let task = store.create("ayah").await.unwrap();

        // Completing a task that was never marked processing is refused.
        assert!(!store.complete(&task.id, "x", "").await.unwrap());

        assert!(store.mark_processing(&task.id).await.unwrap());
        // A second pickup of the same task is refused.
        assert!(!store.mark_processing(&task.id).await.unwrap());

        assert!(store.complete(&task.id, "x", "").await.unwrap());
        // A stale failure can't overwrite the completed row.
        assert!(!store.fail(&task.id, "late error").await.unwrap());

        let done = store.get(&task.id).await.unwrap().unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert!(done.error_message.is_none());
    }

    #[tokio::test]
    async fn test_fail_from_pending_records_message() {
        let store = TaskStore::open_in_memory(16).unwrap();
        let task = store.create("ayah").await.unwrap();

        assert!(store.fail(&task.id, "queue unavailable").await.unwrap());

        let failed = store.get(&task.id).await.unwrap().unwrap();
        assert_eq!(failed.status, TaskStatus::Error);
        assert_eq!(failed.error_message.as_deref(), Some("queue unavailable"));
        assert!(failed.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_list_recent_orders_newest_first() {
        let store = TaskStore::open_in_memory(16).unwrap();
        let a = store.create("first").await.unwrap();
        let b = store.create("second").await.unwrap();
        let c = store.create("third").await.unwrap();

        let recent = store.list_recent(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, c.id);
        assert_eq!(recent[1].id, b.id);

        let all = store.list_recent(10).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].id, a.id);
    }

    #[tokio::test]
    async fn test_status_counts() {
        let store = TaskStore::open_in_memory(16).unwrap();
        let a = store.create("a").await.unwrap();
        let _b = store.create("b").await.unwrap();
        store.mark_processing(&a.id).await.unwrap();
        store.complete(&a.id, "x", "").await.unwrap();

        let counts = store.status_counts().await.unwrap();
        assert_eq!(counts.total, 2);
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.processing, 0);
    }

    #[tokio::test]
    async fn test_cache_stays_bounded_and_misses_fall_back() {
        let store = TaskStore::open_in_memory(2).unwrap();
        let first = store.create("one").await.unwrap();
        store.create("two").await.unwrap();
        store.create("three").await.unwrap();

        assert!(store.cached_rows() <= 2);

        // The evicted row is still served from SQLite.
        let fetched = store.get(&first.id).await.unwrap().unwrap();
        assert_eq!(fetched.reference_text, "one");
    }
}
