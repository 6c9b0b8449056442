//! Task and result entities.
//!
//! A [`Task`] is the unit of work a user requests from the network: either
//! deploying a secret contract or computing against one. Tasks are owned by
//! the task manager and move through a small state machine:
//!
//! ```text
//! UNVERIFIED -> IN_PROGRESS -> { SUCCESS, FAILED }
//!       \-> removed on verification rejection
//! ```
//!
//! Results observed from other workers' announcements enter already
//! finished through [`Task::from_outside`] and never visit `UNVERIFIED`.

pub mod manager;
pub mod store;

use crate::util::{hash_hex, hash_parts, is_valid_id, strip_0x};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The two kinds of work the network schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskType {
    Deploy,
    Compute,
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Unverified,
    InProgress,
    Success,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Unverified => "UNVERIFIED",
            TaskStatus::InProgress => "INPROGRESS",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Failed => "FAILED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "UNVERIFIED" => Some(TaskStatus::Unverified),
            "INPROGRESS" => Some(TaskStatus::InProgress),
            "SUCCESS" => Some(TaskStatus::Success),
            "FAILED" => Some(TaskStatus::Failed),
            _ => None,
        }
    }
}

/// An incremental state update produced by executing a task, identified by
/// its index in the contract's delta chain and its content (hex).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDelta {
    pub key: u64,
    pub data: String,
}

impl StateDelta {
    /// Ledger hash of the delta content.
    pub fn hash(&self) -> String {
        hash_hex(&self.data)
    }
}

/// Result of a compute task executed in the local enclave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeResult {
    pub task_id: String,
    pub output: String,
    pub delta: Option<StateDelta>,
    pub used_gas: u64,
    pub ethereum_payload: String,
    pub ethereum_address: String,
    pub signature: String,
}

/// Result of a deploy task: the deployed bytecode plus the genesis delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployResult {
    pub task_id: String,
    pub output: String,
    pub delta: Option<StateDelta>,
    pub used_gas: u64,
    pub ethereum_payload: String,
    pub ethereum_address: String,
    pub signature: String,
    pub pre_code_hash: String,
}

/// Result of a task whose execution failed inside the enclave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedResult {
    pub task_id: String,
    /// Failure output; its hash is what the ledger records for the receipt.
    pub output: String,
    pub used_gas: u64,
    pub signature: String,
}

/// Tagged union over the three result shapes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum TaskResult {
    Compute(ComputeResult),
    Deploy(DeployResult),
    Failed(FailedResult),
}

impl TaskResult {
    pub fn task_id(&self) -> &str {
        match self {
            TaskResult::Compute(r) => &r.task_id,
            TaskResult::Deploy(r) => &r.task_id,
            TaskResult::Failed(r) => &r.task_id,
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, TaskResult::Failed(_))
    }

    pub fn output(&self) -> &str {
        match self {
            TaskResult::Compute(r) => &r.output,
            TaskResult::Deploy(r) => &r.output,
            TaskResult::Failed(r) => &r.output,
        }
    }

    pub fn delta(&self) -> Option<&StateDelta> {
        match self {
            TaskResult::Compute(r) => r.delta.as_ref(),
            TaskResult::Deploy(r) => r.delta.as_ref(),
            TaskResult::Failed(_) => None,
        }
    }

    pub fn used_gas(&self) -> u64 {
        match self {
            TaskResult::Compute(r) => r.used_gas,
            TaskResult::Deploy(r) => r.used_gas,
            TaskResult::Failed(r) => r.used_gas,
        }
    }
}

/// A unit of work tracked by the task manager.
///
/// Identity is the immutable `task_id`; for deploy tasks it doubles as the
/// address of the would-be secret contract. Mutation happens only through
/// the transition methods below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    task_id: String,
    task_type: TaskType,
    status: TaskStatus,
    contract_address: String,
    gas_limit: u64,
    encrypted_args: String,
    encrypted_fn: String,
    user_key: String,
    /// Pre-deployment bytecode; deploy tasks only.
    pre_code: Option<String>,
    result: Option<TaskResult>,
    created_at: DateTime<Utc>,
}

impl Task {
    /// Build a compute task. Fails on a malformed task id or contract
    /// address.
    pub fn compute(
        task_id: &str,
        contract_address: &str,
        encrypted_args: &str,
        encrypted_fn: &str,
        user_key: &str,
        gas_limit: u64,
    ) -> anyhow::Result<Self> {
        if !is_valid_id(task_id) {
            anyhow::bail!("malformed task id: {task_id}");
        }
        if !is_valid_id(contract_address) {
            anyhow::bail!("malformed contract address: {contract_address}");
        }
        Ok(Self {
            task_id: strip_0x(task_id),
            task_type: TaskType::Compute,
            status: TaskStatus::Unverified,
            contract_address: strip_0x(contract_address),
            gas_limit,
            encrypted_args: encrypted_args.to_string(),
            encrypted_fn: encrypted_fn.to_string(),
            user_key: user_key.to_string(),
            pre_code: None,
            result: None,
            created_at: Utc::now(),
        })
    }

    /// Build a deploy task. The task id and the contract address are the
    /// same value for deployments.
    pub fn deploy(
        task_id: &str,
        pre_code: &str,
        encrypted_args: &str,
        encrypted_fn: &str,
        user_key: &str,
        gas_limit: u64,
    ) -> anyhow::Result<Self> {
        if !is_valid_id(task_id) {
            anyhow::bail!("malformed task id: {task_id}");
        }
        Ok(Self {
            task_id: strip_0x(task_id),
            task_type: TaskType::Deploy,
            status: TaskStatus::Unverified,
            contract_address: strip_0x(task_id),
            gas_limit,
            encrypted_args: encrypted_args.to_string(),
            encrypted_fn: encrypted_fn.to_string(),
            user_key: user_key.to_string(),
            pre_code: Some(pre_code.to_string()),
            result: None,
            created_at: Utc::now(),
        })
    }

    /// Build an already-finished task from a result announced by another
    /// worker. The inputs are unknown locally; only the result matters.
    pub fn from_outside(task_type: TaskType, result: TaskResult) -> anyhow::Result<Self> {
        let task_id = strip_0x(result.task_id());
        if !is_valid_id(&task_id) {
            anyhow::bail!("malformed task id in outside result: {task_id}");
        }
        let status = if result.is_success() {
            TaskStatus::Success
        } else {
            TaskStatus::Failed
        };
        Ok(Self {
            contract_address: task_id.clone(),
            task_id,
            task_type,
            status,
            gas_limit: 0,
            encrypted_args: String::new(),
            encrypted_fn: String::new(),
            user_key: String::new(),
            pre_code: None,
            result: Some(result),
            created_at: Utc::now(),
        })
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn task_type(&self) -> TaskType {
        self.task_type
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn contract_address(&self) -> &str {
        &self.contract_address
    }

    pub fn gas_limit(&self) -> u64 {
        self.gas_limit
    }

    pub fn encrypted_args(&self) -> &str {
        &self.encrypted_args
    }

    pub fn encrypted_fn(&self) -> &str {
        &self.encrypted_fn
    }

    pub fn user_key(&self) -> &str {
        &self.user_key
    }

    pub fn pre_code(&self) -> Option<&str> {
        self.pre_code.as_deref()
    }

    pub fn result(&self) -> Option<&TaskResult> {
        self.result.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_unverified(&self) -> bool {
        self.status == TaskStatus::Unverified
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, TaskStatus::Success | TaskStatus::Failed)
    }

    /// The hash binding this task's encrypted inputs to its on-chain
    /// record. Field order is part of the ledger contract: encrypted
    /// function, encrypted arguments, code-hash-or-address, user key.
    pub fn inputs_hash(&self) -> String {
        let third = match self.task_type {
            TaskType::Deploy => hash_hex(self.pre_code.as_deref().unwrap_or_default()),
            TaskType::Compute => self.contract_address.clone(),
        };
        hash_parts(&[&self.encrypted_fn, &self.encrypted_args, &third, &self.user_key])
    }

    /// Transition UNVERIFIED -> IN_PROGRESS.
    pub fn set_in_progress(&mut self) {
        self.status = TaskStatus::InProgress;
    }

    /// Attach a result and move to the matching terminal state. Fails when
    /// the result belongs to a different task.
    pub fn set_result(&mut self, result: TaskResult) -> anyhow::Result<()> {
        if !crate::util::hex_eq(result.task_id(), &self.task_id) {
            anyhow::bail!(
                "result task id {} does not match task {}",
                result.task_id(),
                self.task_id
            );
        }
        self.status = if result.is_success() {
            TaskStatus::Success
        } else {
            TaskStatus::Failed
        };
        self.result = Some(result);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_id() -> String {
        "ae2c488a1a718dd9a854783cc34d1b3ae82121d0fc33615c54a290d90e2b02b3".to_string()
    }

    fn compute_task() -> Task {
        Task::compute(
            &task_id(),
            "322c488a1a718dd9a854783cc34d1b3ae82121d0fc33615c54a290d90e2b0233",
            "3cf8eb4f2363",
            "5a380b9a7f59",
            "2532eb4f2363",
            24334,
        )
        .unwrap()
    }

    #[test]
    fn test_build_rejects_malformed_ids() {
        assert!(Task::compute("nope", &task_id(), "", "", "", 1).is_err());
        assert!(Task::deploy("abcd", "00", "", "", "", 1).is_err());
    }

    #[test]
    fn test_deploy_address_is_task_id() {
        let task = Task::deploy(&task_id(), "f23665", "aa", "bb", "cc", 10).unwrap();
        assert_eq!(task.contract_address(), task.task_id());
        assert_eq!(task.task_type(), TaskType::Deploy);
    }

    #[test]
    fn test_result_transitions() {
        let mut task = compute_task();
        assert!(task.is_unverified());
        task.set_in_progress();
        assert_eq!(task.status(), TaskStatus::InProgress);

        let result = TaskResult::Failed(FailedResult {
            task_id: task_id(),
            output: "deadbeef".to_string(),
            used_gas: 5,
            signature: String::new(),
        });
        task.set_result(result).unwrap();
        assert_eq!(task.status(), TaskStatus::Failed);
        assert!(task.is_finished());
    }

    #[test]
    fn test_result_id_mismatch_rejected() {
        let mut task = compute_task();
        let result = TaskResult::Failed(FailedResult {
            task_id: "aaac488a1a718dd9a854783cc34d1b3ae82121d0fc33615c54a290d90e2b02cc".to_string(),
            output: String::new(),
            used_gas: 0,
            signature: String::new(),
        });
        assert!(task.set_result(result).is_err());
        assert!(!task.is_finished());
    }

    #[test]
    fn test_inputs_hash_depends_on_type() {
        let compute = compute_task();
        let deploy = Task::deploy(&task_id(), "f23665", "3cf8eb4f2363", "5a380b9a7f59", "2532eb4f2363", 1).unwrap();
        assert_ne!(compute.inputs_hash(), deploy.inputs_hash());
        // Stable across calls.
        assert_eq!(compute.inputs_hash(), compute.inputs_hash());
    }

    #[test]
    fn test_outside_result_enters_finished() {
        let result = TaskResult::Deploy(DeployResult {
            task_id: task_id(),
            output: "the-deployed-bytecode".to_string(),
            delta: Some(StateDelta { key: 0, data: "0b02030529".to_string() }),
            used_gas: 99,
            ethereum_payload: String::new(),
            ethereum_address: String::new(),
            signature: String::new(),
            pre_code_hash: "87c2d362".to_string(),
        });
        let task = Task::from_outside(TaskType::Deploy, result).unwrap();
        assert_eq!(task.status(), TaskStatus::Success);
        assert!(task.result().is_some());
    }

    #[test]
    fn test_serde_round_trip() {
        let mut task = compute_task();
        task.set_in_progress();
        let json = serde_json::to_string(&task).unwrap();
        let back: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(task, back);
    }
}
