//! SQLite-backed task store.
//!
//! Tasks survive restarts so the node can pick up in-progress work after a
//! crash. The full task is kept as a JSON document; the status lives in its
//! own indexed column because every status-scoped query filters on it.

use crate::error::StoreError;
use crate::task::{Task, TaskStatus};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    task_id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    task_json TEXT NOT NULL,
    updated_at INTEGER DEFAULT (strftime('%s', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
"#;

pub struct TaskStore {
    conn: Arc<Mutex<Connection>>,
}

impl TaskStore {
    /// Open (or create) the store at the given path.
    pub fn new(path: PathBuf) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch(SCHEMA)?;
        info!("task store initialized at {:?}", path);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert or replace a task.
    pub fn put(&self, task: &Task) -> Result<(), StoreError> {
        let json = serde_json::to_string(task)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO tasks (task_id, status, task_json, updated_at)
             VALUES (?1, ?2, ?3, strftime('%s', 'now'))",
            params![task.task_id(), task.status().as_str(), json],
        )?;
        Ok(())
    }

    /// Fetch a task by id.
    pub fn get(&self, task_id: &str) -> Result<Option<Task>, StoreError> {
        let conn = self.conn.lock();
        let json: Option<String> = conn
            .query_row(
                "SELECT task_json FROM tasks WHERE task_id = ?1",
                params![task_id],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// All tasks in a given status, oldest update first.
    pub fn get_all_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT task_json FROM tasks WHERE status = ?1 ORDER BY updated_at ASC",
        )?;
        let rows = stmt
            .query_map(params![status.as_str()], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter()
            .map(|json| serde_json::from_str(json).map_err(StoreError::from))
            .collect()
    }

    /// Every stored task.
    pub fn get_all(&self) -> Result<Vec<Task>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT task_json FROM tasks ORDER BY updated_at ASC")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter()
            .map(|json| serde_json::from_str(json).map_err(StoreError::from))
            .collect()
    }

    /// Remove a task. Returns whether a row was deleted.
    pub fn delete(&self, task_id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let count = conn.execute("DELETE FROM tasks WHERE task_id = ?1", params![task_id])?;
        Ok(count > 0)
    }

    /// Number of stored tasks.
    pub fn count(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;

    fn task(id_byte: u8) -> Task {
        let id = format!("{:02x}", id_byte).repeat(32);
        let addr = "ab".repeat(32);
        Task::compute(&id, &addr, "args", "fn", "key", 100).unwrap()
    }

    #[test]
    fn test_put_get_round_trip() {
        let store = TaskStore::in_memory().unwrap();
        let task = task(0x11);
        store.put(&task).unwrap();

        let loaded = store.get(task.task_id()).unwrap().unwrap();
        assert_eq!(loaded, task);
        assert!(store.get("ff".repeat(32).as_str()).unwrap().is_none());
    }

    #[test]
    fn test_put_replaces_on_status_change() {
        let store = TaskStore::in_memory().unwrap();
        let mut task = task(0x22);
        store.put(&task).unwrap();

        task.set_in_progress();
        store.put(&task).unwrap();

        assert_eq!(store.count().unwrap(), 1);
        let loaded = store.get(task.task_id()).unwrap().unwrap();
        assert_eq!(loaded.status(), TaskStatus::InProgress);
    }

    #[test]
    fn test_query_by_status() {
        let store = TaskStore::in_memory().unwrap();
        let unverified = task(0x33);
        let mut in_progress = task(0x44);
        in_progress.set_in_progress();
        store.put(&unverified).unwrap();
        store.put(&in_progress).unwrap();

        let got = store.get_all_by_status(TaskStatus::Unverified).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].task_id(), unverified.task_id());

        assert_eq!(store.get_all().unwrap().len(), 2);
    }

    #[test]
    fn test_delete() {
        let store = TaskStore::in_memory().unwrap();
        let task = task(0x55);
        store.put(&task).unwrap();

        assert!(store.delete(task.task_id()).unwrap());
        assert!(!store.delete(task.task_id()).unwrap());
        assert_eq!(store.count().unwrap(), 0);
    }
}
