//! Verification outcomes and error kinds.
//!
//! Verification failures are data, not exceptions: every verification entry
//! point resolves to a [`VerificationOutcome`] whose `error` field carries
//! the failure kind, and callers branch on that kind to decide whether to
//! drop, retry or resync. Only transport-level ledger failures propagate as
//! `Err` through the async boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a verification did not pass.
///
/// All kinds except [`VerificationError::Type`] are expected steady-state
/// outcomes. `Type` means the caller handed over malformed input and should
/// be treated as a programmer error upstream.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum VerificationError {
    /// Malformed input: unrecognized task variant or malformed address.
    #[error("malformed input: {0}")]
    Type(String),
    /// On-chain data is present but does not match the expected hashes,
    /// indices or gas limit.
    #[error("on-chain record does not match the local task data")]
    TaskVerification,
    /// The on-chain status is inconsistent with what this check expects,
    /// e.g. a receipt already exists while creation is being verified.
    #[error("on-chain task status is inconsistent with the requested check")]
    TaskValidity,
    /// An explicit failure receipt arrived where success was awaited, or
    /// vice versa.
    #[error("ledger recorded the opposite receipt outcome")]
    TaskFailed,
    /// The selection algorithm disagrees with the claimed worker.
    #[error("worker selection does not match the assigned worker")]
    WorkerSelection,
    /// The task fee was returned: the task was withdrawn before being mined.
    #[error("task was cancelled and its fee returned")]
    TaskCancelled,
    /// The ledger-side callback failed. The caller should trigger a resync
    /// with the network rather than merely marking the task failed.
    #[error("ledger-side callback failure, resync required")]
    EthereumFailure,
    /// An epoch boundary passed the task deadline without resolution.
    #[error("epoch boundary crossed before the awaited ledger event arrived")]
    TaskTimeout,
}

/// The resolution of a single verification request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub is_verified: bool,
    pub error: Option<VerificationError>,
    /// Gas limit recorded on the ledger, set on verified creation outcomes.
    pub gas_limit: Option<u64>,
    /// Block number at which the ledger recorded the event, set on verified
    /// creation outcomes.
    pub block_number: Option<u64>,
}

impl VerificationOutcome {
    /// A verified outcome with no ledger metadata.
    pub fn ok() -> Self {
        Self {
            is_verified: true,
            error: None,
            gas_limit: None,
            block_number: None,
        }
    }

    /// A verified creation outcome carrying the on-chain gas limit and the
    /// block number of the record.
    pub fn ok_with_record(gas_limit: u64, block_number: u64) -> Self {
        Self {
            is_verified: true,
            error: None,
            gas_limit: Some(gas_limit),
            block_number: Some(block_number),
        }
    }

    /// A failed outcome of the given kind.
    pub fn failed(error: VerificationError) -> Self {
        Self {
            is_verified: false,
            error: Some(error),
            gas_limit: None,
            block_number: None,
        }
    }
}

/// Transport-level failure while talking to the ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger connection failure: {0}")]
    Connection(String),
    #[error("ledger query failure: {0}")]
    Query(String),
}

/// Failure of the persistent task store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task {0} not found")]
    NotFound(String),
    #[error("task payload could not be decoded: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("io failure: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_constructors() {
        let ok = VerificationOutcome::ok_with_record(10, 250);
        assert!(ok.is_verified);
        assert_eq!(ok.gas_limit, Some(10));
        assert_eq!(ok.block_number, Some(250));

        let failed = VerificationOutcome::failed(VerificationError::TaskTimeout);
        assert!(!failed.is_verified);
        assert_eq!(failed.error, Some(VerificationError::TaskTimeout));
        assert_eq!(failed.gas_limit, None);
    }
}
