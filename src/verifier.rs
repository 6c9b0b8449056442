//! On-chain verification engine.
//!
//! Before this node executes a task it checks the ledger agrees the task is
//! real, funded and assigned to the claimed worker; after execution it checks
//! the committed receipt matches the result it holds. Both checks resolve
//! immediately when the ledger already carries the relevant record, and
//! otherwise park a listener that the event feed resolves later.
//!
//! Events are pushed in through [`EthereumVerifier::handle_event`] by the
//! transport that owns the ledger subscription. Each parked listener resolves
//! exactly once: the first event that decides it atomically claims it, and
//! every later event for the same task falls through.

use crate::config::VerifierConfig;
use crate::epoch::{EpochCache, SharedEpochCache};
use crate::error::{VerificationError, VerificationOutcome};
use crate::ledger::{HealthReport, LedgerEvent, LedgerReader, LedgerTaskStatus};
use crate::selection::select_worker_group;
use crate::task::{StateDelta, Task, TaskResult};
use crate::util::{hash_hex, hex_eq, is_valid_address, strip_0x, EMPTY_STATE_HASH};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// What a parked listener is waiting to compare against.
#[derive(Debug, Clone)]
enum PendingCheck {
    /// Awaiting `TaskRecordCreated`.
    Creation { inputs_hash: String, gas_limit: u64 },
    /// Awaiting `ReceiptVerified` for a compute result. `delta` holds the
    /// expected `(index, hash)`; `None` means the execution produced no
    /// state change and the receipt must carry the empty-state marker.
    ComputeReceipt {
        output_hash: String,
        delta: Option<(u64, String)>,
    },
    /// Awaiting `SecretContractDeployed`. `delta_hash` is the expected
    /// genesis delta hash; a deploy without one can never match.
    DeployReceipt {
        code_hash: String,
        delta_hash: Option<String>,
    },
    /// Awaiting `ReceiptFailed` carrying this failure output hash.
    FailedReceipt { output_hash: String },
}

struct PendingVerification {
    sender: oneshot::Sender<VerificationOutcome>,
    check: PendingCheck,
    /// Chain head when the listener was parked; the timeout horizon counts
    /// from here.
    current_block: u64,
}

pub struct EthereumVerifier {
    ledger: Arc<dyn LedgerReader>,
    epochs: SharedEpochCache,
    config: VerifierConfig,
    pending: DashMap<String, PendingVerification>,
}

impl EthereumVerifier {
    pub fn new(ledger: Arc<dyn LedgerReader>, config: VerifierConfig) -> Self {
        Self {
            ledger,
            epochs: Arc::new(EpochCache::new()),
            config,
            pending: DashMap::new(),
        }
    }

    /// Seed the epoch cache from the ledger. Call once before serving
    /// verification requests.
    pub async fn init(&self) -> anyhow::Result<()> {
        let params = self.ledger.worker_params().await?;
        info!(epochs = params.len(), "loaded epoch parameters from ledger");
        self.epochs.load(params);
        Ok(())
    }

    pub fn epoch_cache(&self) -> &SharedEpochCache {
        &self.epochs
    }

    /// Probe ledger connectivity.
    pub async fn health_check(&self) -> HealthReport {
        match self.ledger.current_block_number().await {
            Ok(block_number) => HealthReport {
                is_connected: true,
                block_number,
            },
            Err(err) => {
                warn!(%err, "ledger health check failed");
                HealthReport {
                    is_connected: false,
                    block_number: 0,
                }
            }
        }
    }

    /// Check that the selection algorithm assigns `task`'s contract to
    /// `worker_address` at `block_number`.
    pub fn verify_selected_worker(
        &self,
        task: &Task,
        block_number: u64,
        worker_address: &str,
    ) -> Result<(), VerificationError> {
        let params = self
            .epochs
            .params_at(block_number)
            .ok_or(VerificationError::TaskValidity)?;
        let group = select_worker_group(task.contract_address(), &params, 1);
        match group.first() {
            Some(selected) if hex_eq(selected, worker_address) => Ok(()),
            _ => Err(VerificationError::WorkerSelection),
        }
    }

    /// Verify that a newly announced task exists on the ledger, is assigned
    /// to `worker_address`, and matches the announced inputs and gas limit.
    ///
    /// If the record is not mined yet, waits for `TaskRecordCreated` (or a
    /// cancellation or epoch timeout). Errors only on transport failure or
    /// listener cancellation; every verification verdict is an `Ok` outcome.
    pub async fn verify_task_creation(
        &self,
        task: &Task,
        worker_address: &str,
    ) -> anyhow::Result<VerificationOutcome> {
        if !is_valid_address(worker_address) {
            warn!(worker_address, "creation verification called with a malformed worker address");
            return Ok(VerificationOutcome::failed(VerificationError::Type(
                format!("malformed worker address: {worker_address}"),
            )));
        }

        let current_block = self.ledger.current_block_number().await?;
        if let Err(err) = self.verify_selected_worker(task, current_block, worker_address) {
            return Ok(VerificationOutcome::failed(err));
        }

        let params = self.ledger.task_params(task.task_id()).await?;
        match params.status {
            LedgerTaskStatus::RecordCreated => {
                let inputs_match = params
                    .inputs_hash
                    .as_deref()
                    .is_some_and(|h| hex_eq(h, &task.inputs_hash()));
                let gas_match = params.gas_limit == Some(task.gas_limit());
                if inputs_match && gas_match {
                    Ok(VerificationOutcome::ok_with_record(
                        task.gas_limit(),
                        params.block_number,
                    ))
                } else {
                    Ok(VerificationOutcome::failed(
                        VerificationError::TaskVerification,
                    ))
                }
            }
            LedgerTaskStatus::RecordUndefined => {
                self.wait_for_event(
                    task.task_id(),
                    PendingCheck::Creation {
                        inputs_hash: task.inputs_hash(),
                        gas_limit: task.gas_limit(),
                    },
                    current_block,
                )
                .await
            }
            // A receipt already exists: this task is long past creation.
            _ => Ok(VerificationOutcome::failed(VerificationError::TaskValidity)),
        }
    }

    /// Verify that the receipt the ledger committed for a task matches the
    /// locally held result.
    ///
    /// `local_tip` is the newest state delta this node holds for the
    /// contract; it is consulted only for compute results that produced no
    /// delta, where the on-chain tip must still match local state. If no
    /// receipt is mined yet, waits for the matching receipt event.
    pub async fn verify_task_submission(
        &self,
        result: &TaskResult,
        contract_address: &str,
        local_tip: Option<&StateDelta>,
    ) -> anyhow::Result<VerificationOutcome> {
        let task_id = strip_0x(result.task_id());
        if !crate::util::is_valid_id(&task_id) {
            warn!(%task_id, "submission verification called with a malformed task id");
            return Ok(VerificationOutcome::failed(VerificationError::Type(
                format!("malformed task id: {task_id}"),
            )));
        }

        let params = self.ledger.task_params(&task_id).await?;
        match params.status {
            LedgerTaskStatus::ReceiptVerified => {
                self.check_mined_success(result, contract_address, local_tip, &params.output_hash)
                    .await
            }
            LedgerTaskStatus::ReceiptFailed => match result {
                TaskResult::Failed(failed) => {
                    let matches = params
                        .output_hash
                        .as_deref()
                        .is_some_and(|h| hex_eq(h, &hash_hex(&failed.output)));
                    if matches {
                        Ok(VerificationOutcome::ok())
                    } else {
                        Ok(VerificationOutcome::failed(
                            VerificationError::TaskVerification,
                        ))
                    }
                }
                // We hold a success result but the chain recorded failure.
                _ => Ok(VerificationOutcome::failed(VerificationError::TaskFailed)),
            },
            LedgerTaskStatus::ReceiptFailedEth => Ok(VerificationOutcome::failed(
                VerificationError::EthereumFailure,
            )),
            LedgerTaskStatus::ReceiptFailedCancelled => {
                Ok(VerificationOutcome::failed(VerificationError::TaskValidity))
            }
            LedgerTaskStatus::RecordUndefined | LedgerTaskStatus::RecordCreated => {
                let current_block = self.ledger.current_block_number().await?;
                let check = match result {
                    TaskResult::Compute(r) => PendingCheck::ComputeReceipt {
                        output_hash: hash_hex(&r.output),
                        delta: r.delta.as_ref().map(|d| (d.key, d.hash())),
                    },
                    TaskResult::Deploy(r) => PendingCheck::DeployReceipt {
                        code_hash: hash_hex(&r.output),
                        delta_hash: r.delta.as_ref().map(|d| d.hash()),
                    },
                    TaskResult::Failed(r) => PendingCheck::FailedReceipt {
                        output_hash: hash_hex(&r.output),
                    },
                };
                self.wait_for_event(&task_id, check, current_block).await
            }
        }
    }

    /// Compare a result against an already-mined success receipt.
    async fn check_mined_success(
        &self,
        result: &TaskResult,
        contract_address: &str,
        local_tip: Option<&StateDelta>,
        record_output_hash: &Option<String>,
    ) -> anyhow::Result<VerificationOutcome> {
        let output_matches = |output: &str| {
            record_output_hash
                .as_deref()
                .is_some_and(|h| hex_eq(h, &hash_hex(output)))
        };
        let failed = Ok(VerificationOutcome::failed(
            VerificationError::TaskVerification,
        ));

        match result {
            TaskResult::Compute(r) => {
                let contract = self.ledger.contract_params(contract_address).await?;
                match &r.delta {
                    Some(delta) => {
                        let key = delta.key as usize;
                        let delta_ok = contract
                            .delta_hashes
                            .get(key)
                            .is_some_and(|h| hex_eq(h, &delta.hash()));
                        if delta_ok && output_matches(&r.output) {
                            Ok(VerificationOutcome::ok())
                        } else {
                            failed
                        }
                    }
                    None => {
                        // No delta produced locally: the on-chain delta tip
                        // must still equal the tip this node holds.
                        let Some(tip) = local_tip else {
                            return failed;
                        };
                        let tip_is_last = contract
                            .delta_hashes
                            .len()
                            .checked_sub(1)
                            .is_some_and(|last| tip.key as usize == last);
                        let tip_ok = tip_is_last
                            && contract
                                .delta_hashes
                                .get(tip.key as usize)
                                .is_some_and(|h| hex_eq(h, &tip.hash()));
                        if tip_ok && output_matches(&r.output) {
                            Ok(VerificationOutcome::ok())
                        } else {
                            failed
                        }
                    }
                }
            }
            TaskResult::Deploy(r) => {
                let contract = self.ledger.contract_params(contract_address).await?;
                let Some(delta) = &r.delta else {
                    return failed;
                };
                let genesis_ok = delta.key == 0
                    && contract
                        .delta_hashes
                        .first()
                        .is_some_and(|h| hex_eq(h, &delta.hash()));
                let code_ok = contract
                    .code_hash
                    .as_deref()
                    .is_some_and(|h| hex_eq(h, &hash_hex(&r.output)));
                if genesis_ok && code_ok {
                    Ok(VerificationOutcome::ok())
                } else {
                    failed
                }
            }
            // Success receipt on chain, failure result in hand.
            TaskResult::Failed(_) => {
                Ok(VerificationOutcome::failed(VerificationError::TaskFailed))
            }
        }
    }

    /// Whether a verification is currently parked for this task.
    pub fn has_pending(&self, task_id: &str) -> bool {
        self.pending.contains_key(&strip_0x(task_id))
    }

    /// Remove the parked listener for a task, if any. The waiter, if still
    /// awaiting, resolves with a cancellation error. Idempotent.
    pub fn delete_task_submission_listener(&self, task_id: &str) {
        let task_id = strip_0x(task_id);
        if self.pending.remove(&task_id).is_some() {
            debug!(%task_id, "verification listener removed");
        }
    }

    /// Feed one ledger event into the engine.
    ///
    /// `WorkersParameterized` advances the epoch cache and expires pending
    /// verifications whose timeout horizon the new epoch crossed. Task
    /// events resolve the matching parked listener, if the event shape
    /// decides it; undecided events leave the listener parked.
    pub fn handle_event(&self, event: LedgerEvent) {
        if let LedgerEvent::WorkersParameterized { params } = &event {
            let first_block = params.first_block_number;
            self.epochs.append(params.clone());
            self.expire_pending(first_block);
            return;
        }

        let Some(task_id) = event.task_id().map(strip_0x) else {
            return;
        };
        let mut decision: Option<VerificationOutcome> = None;
        let removed = self.pending.remove_if(&task_id, |_, pending| {
            decision = decide(&pending.check, &event);
            decision.is_some()
        });
        if let (Some((_, pending)), Some(outcome)) = (removed, decision) {
            debug!(%task_id, verified = outcome.is_verified, "pending verification resolved");
            let _ = pending.sender.send(outcome);
        }
    }

    /// Expire every pending verification whose deadline lies strictly
    /// before the new epoch's first block.
    fn expire_pending(&self, epoch_first_block: u64) {
        let timeout = self.config.task_timeout_blocks;
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|entry| epoch_first_block > entry.value().current_block + timeout)
            .map(|entry| entry.key().clone())
            .collect();
        for task_id in expired {
            if let Some((_, pending)) = self.pending.remove(&task_id) {
                warn!(%task_id, "pending verification timed out at epoch boundary");
                let _ = pending
                    .sender
                    .send(VerificationOutcome::failed(VerificationError::TaskTimeout));
            }
        }
    }

    async fn wait_for_event(
        &self,
        task_id: &str,
        check: PendingCheck,
        current_block: u64,
    ) -> anyhow::Result<VerificationOutcome> {
        let task_id = strip_0x(task_id);
        let (sender, receiver) = oneshot::channel();
        // A second wait for the same task replaces the first; the earlier
        // waiter resolves as cancelled.
        self.pending.insert(
            task_id.clone(),
            PendingVerification {
                sender,
                check,
                current_block,
            },
        );
        debug!(%task_id, current_block, "verification parked, awaiting ledger event");
        match receiver.await {
            Ok(outcome) => Ok(outcome),
            Err(_) => anyhow::bail!("verification for task {task_id} was cancelled"),
        }
    }
}

/// Resolve a parked check against an incoming event. `None` leaves the
/// listener parked.
fn decide(check: &PendingCheck, event: &LedgerEvent) -> Option<VerificationOutcome> {
    use LedgerEvent::*;
    use VerificationError::*;

    let verdict = |ok: bool| {
        Some(if ok {
            VerificationOutcome::ok()
        } else {
            VerificationOutcome::failed(TaskVerification)
        })
    };

    match (check, event) {
        (
            PendingCheck::Creation {
                inputs_hash,
                gas_limit,
            },
            TaskRecordCreated {
                inputs_hash: event_hash,
                gas_limit: event_gas,
                block_number,
                ..
            },
        ) => {
            if hex_eq(event_hash, inputs_hash) && event_gas == gas_limit {
                Some(VerificationOutcome::ok_with_record(
                    *event_gas,
                    *block_number,
                ))
            } else {
                Some(VerificationOutcome::failed(TaskVerification))
            }
        }
        (PendingCheck::Creation { .. }, TaskFeeReturned { .. }) => {
            Some(VerificationOutcome::failed(TaskCancelled))
        }
        (PendingCheck::Creation { .. }, _) => None,

        (
            PendingCheck::ComputeReceipt { output_hash, delta },
            ReceiptVerified {
                state_delta_hash,
                state_delta_index,
                output_hash: event_output,
                ..
            },
        ) => {
            let delta_ok = match delta {
                Some((key, hash)) => state_delta_index == key && hex_eq(state_delta_hash, hash),
                None => *state_delta_index == 0 && hex_eq(state_delta_hash, EMPTY_STATE_HASH),
            };
            verdict(delta_ok && hex_eq(event_output, output_hash))
        }
        (PendingCheck::ComputeReceipt { .. }, ReceiptFailed { .. }) => {
            Some(VerificationOutcome::failed(TaskFailed))
        }
        (PendingCheck::ComputeReceipt { .. }, ReceiptFailedEth { .. }) => {
            Some(VerificationOutcome::failed(EthereumFailure))
        }
        (PendingCheck::ComputeReceipt { .. }, SecretContractDeployed { .. }) => {
            Some(VerificationOutcome::failed(TaskValidity))
        }

        (
            PendingCheck::DeployReceipt {
                code_hash,
                delta_hash,
            },
            SecretContractDeployed {
                code_hash: event_code,
                state_delta_hash,
                ..
            },
        ) => match delta_hash {
            Some(delta_hash) => {
                verdict(hex_eq(event_code, code_hash) && hex_eq(state_delta_hash, delta_hash))
            }
            // A deployment must carry a genesis delta.
            None => Some(VerificationOutcome::failed(TaskVerification)),
        },
        (PendingCheck::DeployReceipt { .. }, ReceiptFailed { .. }) => {
            Some(VerificationOutcome::failed(TaskFailed))
        }
        (PendingCheck::DeployReceipt { .. }, ReceiptFailedEth { .. }) => {
            Some(VerificationOutcome::failed(EthereumFailure))
        }
        (PendingCheck::DeployReceipt { .. }, ReceiptVerified { .. }) => {
            Some(VerificationOutcome::failed(TaskValidity))
        }

        (
            PendingCheck::FailedReceipt { output_hash },
            ReceiptFailed {
                output_hash: event_output,
                ..
            },
        ) => verdict(hex_eq(event_output, output_hash)),
        (PendingCheck::FailedReceipt { .. }, ReceiptVerified { .. }) => {
            Some(VerificationOutcome::failed(TaskFailed))
        }
        (PendingCheck::FailedReceipt { .. }, SecretContractDeployed { .. }) => {
            Some(VerificationOutcome::failed(TaskValidity))
        }
        (PendingCheck::FailedReceipt { .. }, ReceiptFailedEth { .. }) => {
            Some(VerificationOutcome::failed(EthereumFailure))
        }

        _ => None,
    }
}
