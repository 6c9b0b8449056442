//! Worker engine configuration.
//!
//! Covers the verification engine and the task manager. Values load from a
//! TOML file or fall back to defaults; collaborator endpoints (ledger client,
//! enclave link) are configured by their own components and injected by
//! construction.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default task timeout, counted in ledger blocks from the block at which a
/// verification was requested. A pending verification expires once an epoch
/// starts strictly beyond this bound.
pub const DEFAULT_TASK_TIMEOUT_BLOCKS: u64 = 200;

/// Configuration of the verification engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierConfig {
    /// Blocks a pending verification may wait before an epoch boundary
    /// expires it.
    #[serde(default = "default_task_timeout_blocks")]
    pub task_timeout_blocks: u64,
}

fn default_task_timeout_blocks() -> u64 {
    DEFAULT_TASK_TIMEOUT_BLOCKS
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            task_timeout_blocks: DEFAULT_TASK_TIMEOUT_BLOCKS,
        }
    }
}

/// Configuration of the task manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskManagerConfig {
    /// Path of the SQLite task store. `None` keeps the store in memory,
    /// which is only appropriate for tests.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    /// Capacity of the notification broadcast channel.
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,
}

fn default_notification_capacity() -> usize {
    256
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            notification_capacity: 256,
        }
    }
}

/// Top-level configuration for the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default)]
    pub verifier: VerifierConfig,
    #[serde(default)]
    pub task_manager: TaskManagerConfig,
}

impl WorkerConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config = toml::from_str(&raw)?;
        Ok(config)
    }
}
