//! Task lifecycle manager.
//!
//! Owns the persistent task set and drives each task through its state
//! machine. Interested components (the verification loop, the enclave
//! bridge, result publishers) subscribe to a broadcast channel and react to
//! [`Notification`]s instead of polling the store.

use crate::config::TaskManagerConfig;
use crate::error::StoreError;
use crate::task::store::TaskStore;
use crate::task::{Task, TaskResult, TaskStatus, TaskType};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Lifecycle announcements emitted by the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A new task entered the store and awaits on-chain verification.
    VerifyNewTask { task_id: String },
    /// Verification passed; the task moved to `IN_PROGRESS` and may be
    /// handed to the enclave.
    TaskVerified { task_id: String },
    /// A result was attached and the task reached a terminal status.
    TaskFinished { task_id: String, status: TaskStatus },
}

pub struct TaskManager {
    store: TaskStore,
    notifications: broadcast::Sender<Notification>,
}

impl TaskManager {
    pub fn new(config: &TaskManagerConfig) -> Result<Self, StoreError> {
        let store = match &config.db_path {
            Some(path) => TaskStore::new(path.clone())?,
            None => TaskStore::in_memory()?,
        };
        let (notifications, _) = broadcast::channel(config.notification_capacity);
        Ok(Self {
            store,
            notifications,
        })
    }

    /// In-memory manager for tests.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::new(&TaskManagerConfig::default())
    }

    /// Subscribe to lifecycle notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    fn notify(&self, notification: Notification) {
        // Err here only means nobody is subscribed right now.
        if self.notifications.send(notification).is_err() {
            debug!("task notification dropped, no subscribers");
        }
    }

    /// Admit a new task in `UNVERIFIED` state and announce it for
    /// verification. Rejects tasks that are not unverified and ids already
    /// present in the store.
    pub fn add_task_unverified(&self, task: Task) -> anyhow::Result<()> {
        if !task.is_unverified() {
            anyhow::bail!("task {} is not in UNVERIFIED state", task.task_id());
        }
        if self.store.get(task.task_id())?.is_some() {
            anyhow::bail!("task {} already exists", task.task_id());
        }
        let task_id = task.task_id().to_string();
        self.store.put(&task)?;
        info!(%task_id, "task admitted, awaiting verification");
        self.notify(Notification::VerifyNewTask { task_id });
        Ok(())
    }

    /// Apply a verification verdict. A verified task moves to
    /// `IN_PROGRESS`; a rejected task is deleted from the store.
    pub fn on_verify_task(&self, task_id: &str, verified: bool) -> anyhow::Result<()> {
        let mut task = self
            .store
            .get(task_id)?
            .ok_or_else(|| StoreError::NotFound(task_id.to_string()))?;
        if task.status() != TaskStatus::Unverified {
            anyhow::bail!("task {task_id} is not awaiting verification");
        }
        if verified {
            task.set_in_progress();
            self.store.put(&task)?;
            info!(%task_id, "task verified");
            self.notify(Notification::TaskVerified {
                task_id: task_id.to_string(),
            });
        } else {
            self.store.delete(task_id)?;
            warn!(%task_id, "task failed verification, removed");
        }
        Ok(())
    }

    /// Attach a local execution result to an `IN_PROGRESS` task, moving it
    /// to `SUCCESS` or `FAILED` according to the result shape.
    pub fn on_finish_task(&self, result: TaskResult) -> anyhow::Result<()> {
        let task_id = result.task_id().to_string();
        let mut task = self
            .store
            .get(&task_id)?
            .ok_or_else(|| StoreError::NotFound(task_id.clone()))?;
        if task.status() != TaskStatus::InProgress {
            anyhow::bail!("task {task_id} is not in progress");
        }
        task.set_result(result)?;
        let status = task.status();
        self.store.put(&task)?;
        info!(%task_id, status = status.as_str(), "task finished");
        self.notify(Notification::TaskFinished { task_id, status });
        Ok(())
    }

    /// Record a finished task observed from another worker's announcement.
    /// Stored directly as terminal; no notification is emitted because the
    /// result was not produced here.
    pub fn add_outside_result(
        &self,
        task_type: TaskType,
        result: TaskResult,
    ) -> anyhow::Result<()> {
        let task = Task::from_outside(task_type, result)?;
        debug!(task_id = task.task_id(), "storing outside task result");
        self.store.put(&task)?;
        Ok(())
    }

    pub fn get_task(&self, task_id: &str) -> Result<Option<Task>, StoreError> {
        self.store.get(task_id)
    }

    pub fn get_unverified_tasks(&self) -> Result<Vec<Task>, StoreError> {
        self.store.get_all_by_status(TaskStatus::Unverified)
    }

    pub fn get_verified_tasks(&self) -> Result<Vec<Task>, StoreError> {
        self.store.get_all_by_status(TaskStatus::InProgress)
    }

    pub fn get_successful_tasks(&self) -> Result<Vec<Task>, StoreError> {
        self.store.get_all_by_status(TaskStatus::Success)
    }

    pub fn get_failed_tasks(&self) -> Result<Vec<Task>, StoreError> {
        self.store.get_all_by_status(TaskStatus::Failed)
    }

    /// Every task in a terminal status.
    pub fn get_finished_tasks(&self) -> Result<Vec<Task>, StoreError> {
        let mut tasks = self.store.get_all_by_status(TaskStatus::Success)?;
        tasks.extend(self.store.get_all_by_status(TaskStatus::Failed)?);
        Ok(tasks)
    }

    pub fn get_all_tasks(&self) -> Result<Vec<Task>, StoreError> {
        self.store.get_all()
    }

    pub fn remove_task(&self, task_id: &str) -> Result<bool, StoreError> {
        self.store.delete(task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::FailedResult;

    fn task(id_byte: u8) -> Task {
        let id = format!("{:02x}", id_byte).repeat(32);
        let addr = "cd".repeat(32);
        Task::compute(&id, &addr, "args", "fn", "key", 500).unwrap()
    }

    fn failed_result(task_id: &str) -> TaskResult {
        TaskResult::Failed(FailedResult {
            task_id: task_id.to_string(),
            output: "boom".to_string(),
            used_gas: 3,
            signature: String::new(),
        })
    }

    #[test]
    fn test_admit_and_verify() {
        let manager = TaskManager::in_memory().unwrap();
        let mut rx = manager.subscribe();
        let task = task(0x01);
        let task_id = task.task_id().to_string();

        manager.add_task_unverified(task).unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            Notification::VerifyNewTask {
                task_id: task_id.clone()
            }
        );
        assert_eq!(manager.get_unverified_tasks().unwrap().len(), 1);

        manager.on_verify_task(&task_id, true).unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            Notification::TaskVerified {
                task_id: task_id.clone()
            }
        );
        assert!(manager.get_unverified_tasks().unwrap().is_empty());
        assert_eq!(manager.get_verified_tasks().unwrap().len(), 1);
    }

    #[test]
    fn test_rejected_task_is_removed() {
        let manager = TaskManager::in_memory().unwrap();
        let task = task(0x02);
        let task_id = task.task_id().to_string();

        manager.add_task_unverified(task).unwrap();
        manager.on_verify_task(&task_id, false).unwrap();
        assert!(manager.get_task(&task_id).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_admission_rejected() {
        let manager = TaskManager::in_memory().unwrap();
        manager.add_task_unverified(task(0x03)).unwrap();
        assert!(manager.add_task_unverified(task(0x03)).is_err());
    }

    #[test]
    fn test_finish_requires_in_progress() {
        let manager = TaskManager::in_memory().unwrap();
        let task = task(0x04);
        let task_id = task.task_id().to_string();
        manager.add_task_unverified(task).unwrap();

        // Still unverified: finishing is a protocol violation.
        assert!(manager.on_finish_task(failed_result(&task_id)).is_err());

        manager.on_verify_task(&task_id, true).unwrap();
        let mut rx = manager.subscribe();
        manager.on_finish_task(failed_result(&task_id)).unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            Notification::TaskFinished {
                task_id: task_id.clone(),
                status: TaskStatus::Failed
            }
        );
        assert_eq!(manager.get_failed_tasks().unwrap().len(), 1);
        assert_eq!(manager.get_finished_tasks().unwrap().len(), 1);
    }

    #[test]
    fn test_finish_unknown_task_errors() {
        let manager = TaskManager::in_memory().unwrap();
        let missing = "ee".repeat(32);
        assert!(manager.on_finish_task(failed_result(&missing)).is_err());
    }

    #[test]
    fn test_outside_result_stored_without_notification() {
        let manager = TaskManager::in_memory().unwrap();
        let mut rx = manager.subscribe();
        let task_id = "05".repeat(32);

        manager
            .add_outside_result(TaskType::Compute, failed_result(&task_id))
            .unwrap();
        assert!(rx.try_recv().is_err());

        let task = manager.get_task(&task_id).unwrap().unwrap();
        assert_eq!(task.status(), TaskStatus::Failed);
    }
}
