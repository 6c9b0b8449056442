//! Task verification and lifecycle engine for a worker node in a
//! decentralized confidential-computation network.
//!
//! A worker receives deploy and compute tasks from the network, checks them
//! against the ledger before and after execution, and tracks their lifecycle
//! locally. The crate has two cooperating halves:
//!
//! - [`verifier::EthereumVerifier`] answers "is this task real, funded and
//!   mine to execute?" before work starts, and "does the committed receipt
//!   match my result?" after it finishes. Checks that the ledger cannot
//!   answer yet park on the event feed and resolve when the relevant event
//!   arrives, or expire at an epoch boundary.
//! - [`task::manager::TaskManager`] owns the persistent task set and its
//!   `UNVERIFIED -> IN_PROGRESS -> SUCCESS | FAILED` state machine, and
//!   broadcasts lifecycle notifications to the rest of the node.
//!
//! Ledger access goes through the [`ledger::LedgerReader`] trait; the
//! concrete chain client lives outside this crate and pushes its event
//! stream into the verifier.

/// Shared hex/hash helpers
pub mod util;

/// Verification outcomes and error kinds
pub mod error;

/// Engine configuration
pub mod config;

/// Epoch parameter cache
pub mod epoch;

/// Deterministic worker selection
pub mod selection;

/// Ledger read surface and events
pub mod ledger;

/// Task entities, store and lifecycle manager
pub mod task;

/// On-chain verification engine
pub mod verifier;

pub use config::{TaskManagerConfig, VerifierConfig, WorkerConfig};
pub use epoch::{EpochCache, EpochParams, SharedEpochCache};
pub use error::{LedgerError, StoreError, VerificationError, VerificationOutcome};
pub use ledger::{ContractParams, HealthReport, LedgerEvent, LedgerReader, LedgerTaskStatus, TaskParams};
pub use selection::select_worker_group;
pub use task::manager::{Notification, TaskManager};
pub use task::store::TaskStore;
pub use task::{
    ComputeResult, DeployResult, FailedResult, StateDelta, Task, TaskResult, TaskStatus, TaskType,
};
pub use verifier::EthereumVerifier;

/// Install the global tracing subscriber, honoring `RUST_LOG` with an
/// `info` default. Call once from the embedding binary.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
