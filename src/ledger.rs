//! Ledger read surface.
//!
//! Everything the verification engine needs from the blockchain is behind
//! [`LedgerReader`]: point reads of on-chain task, contract and epoch state.
//! Events arrive separately, pushed into the verifier by whatever transport
//! owns the subscription, so this trait stays a pure query interface and
//! tests can drive event timing deterministically.

use crate::epoch::EpochParams;
use crate::error::LedgerError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Status codes of a task record as stored on-chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerTaskStatus {
    /// No record exists yet.
    RecordUndefined,
    /// The record was created; no receipt yet.
    RecordCreated,
    /// A success receipt was committed.
    ReceiptVerified,
    /// A failure receipt was committed.
    ReceiptFailed,
    /// The ledger-side callback failed while committing the receipt.
    ReceiptFailedEth,
    /// The task was cancelled and its fee returned.
    ReceiptFailedCancelled,
}

/// On-chain record of a single task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskParams {
    pub status: LedgerTaskStatus,
    /// Block at which the record was created.
    pub block_number: u64,
    pub gas_limit: Option<u64>,
    /// Hash of the task's encrypted inputs, present once the record exists.
    pub inputs_hash: Option<String>,
    /// Hash of the result output, present once a receipt exists.
    pub output_hash: Option<String>,
}

/// On-chain record of a deployed secret contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractParams {
    /// Hash of the deployed bytecode, absent until deployment is committed.
    pub code_hash: Option<String>,
    /// Hash chain of all committed state deltas, index-aligned with delta
    /// keys. `delta_hashes[0]` is the genesis delta from deployment.
    pub delta_hashes: Vec<String>,
}

/// Events the ledger transport pushes into the verification engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    TaskRecordCreated {
        task_id: String,
        inputs_hash: String,
        gas_limit: u64,
        block_number: u64,
    },
    TaskFeeReturned {
        task_id: String,
    },
    ReceiptVerified {
        task_id: String,
        state_delta_hash: String,
        /// Index of the delta in the contract's hash chain.
        state_delta_index: u64,
        output_hash: String,
        block_number: u64,
    },
    ReceiptFailed {
        task_id: String,
        output_hash: String,
        block_number: u64,
    },
    ReceiptFailedEth {
        task_id: String,
        block_number: u64,
    },
    SecretContractDeployed {
        task_id: String,
        code_hash: String,
        state_delta_hash: String,
        block_number: u64,
    },
    WorkersParameterized {
        params: EpochParams,
    },
}

impl LedgerEvent {
    /// Task id this event resolves, if it targets a single task.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            LedgerEvent::TaskRecordCreated { task_id, .. }
            | LedgerEvent::TaskFeeReturned { task_id }
            | LedgerEvent::ReceiptVerified { task_id, .. }
            | LedgerEvent::ReceiptFailed { task_id, .. }
            | LedgerEvent::ReceiptFailedEth { task_id, .. }
            | LedgerEvent::SecretContractDeployed { task_id, .. } => Some(task_id),
            LedgerEvent::WorkersParameterized { .. } => None,
        }
    }
}

/// Snapshot of ledger connectivity, produced by health checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub is_connected: bool,
    pub block_number: u64,
}

/// Read-only queries against the ledger.
#[async_trait]
pub trait LedgerReader: Send + Sync {
    /// Current chain head.
    async fn current_block_number(&self) -> Result<u64, LedgerError>;

    /// On-chain record of a task. A missing record comes back as
    /// `RecordUndefined`, not as an error.
    async fn task_params(&self, task_id: &str) -> Result<TaskParams, LedgerError>;

    /// On-chain record of a secret contract.
    async fn contract_params(&self, contract_address: &str)
        -> Result<ContractParams, LedgerError>;

    /// All epoch parameter snapshots the ledger currently exposes.
    async fn worker_params(&self) -> Result<Vec<EpochParams>, LedgerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_task_id() {
        let event = LedgerEvent::TaskFeeReturned {
            task_id: "ab".repeat(32),
        };
        assert_eq!(event.task_id(), Some("ab".repeat(32).as_str()));

        let event = LedgerEvent::WorkersParameterized {
            params: EpochParams {
                seed: 1,
                nonce: 0,
                workers: vec![],
                balances: vec![],
                first_block_number: 0,
            },
        };
        assert_eq!(event.task_id(), None);
    }
}
