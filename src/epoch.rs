//! Epoch parameter cache.
//!
//! The ledger reparameterizes the worker set at every epoch boundary and
//! announces the new parameters in a `WorkersParameterized` event. The cache
//! keeps an ordered, append-only list of those snapshots and answers which
//! snapshot governs a given block number.
//!
//! # Ordering invariant
//! Entries are ordered by `first_block_number` ascending. An event whose
//! `first_block_number` does not advance past the latest stored entry is
//! dropped: late or duplicate event delivery must never rewrite history that
//! pending verifications may already have read.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// One epoch's worker-selection parameters, as recorded on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochParams {
    /// Epoch randomness seed, set by the principal node.
    pub seed: u128,
    /// Selection nonce the epoch starts from.
    pub nonce: u64,
    /// Eligible worker addresses, hex without `0x`.
    pub workers: Vec<String>,
    /// Stake balances, index-aligned with `workers`.
    pub balances: Vec<u64>,
    /// First ledger block at which these parameters apply.
    pub first_block_number: u64,
}

/// Append-only cache of epoch parameter snapshots.
#[derive(Debug, Default)]
pub struct EpochCache {
    entries: RwLock<Vec<EpochParams>>,
}

impl EpochCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the cache with the epochs currently known to the ledger.
    /// Entries are sorted by `first_block_number`; any existing content is
    /// replaced. Used once at verifier startup.
    pub fn load(&self, mut params: Vec<EpochParams>) {
        params.sort_by_key(|p| p.first_block_number);
        *self.entries.write() = params;
    }

    /// Append a newly observed epoch snapshot.
    ///
    /// Returns `true` if the snapshot advanced the frontier and was stored.
    /// Snapshots that do not strictly advance `first_block_number` are
    /// dropped silently, mirroring the ledger's own append-only progression.
    pub fn append(&self, params: EpochParams) -> bool {
        let mut entries = self.entries.write();
        if let Some(latest) = entries.last() {
            if params.first_block_number <= latest.first_block_number {
                debug!(
                    first_block = params.first_block_number,
                    frontier = latest.first_block_number,
                    "dropping stale epoch parameters"
                );
                return false;
            }
        }
        entries.push(params);
        true
    }

    /// The snapshot that governs `block_number`: the latest entry whose
    /// `first_block_number <= block_number`, or `None` if the block predates
    /// every known epoch (callers must then wait for parameters).
    pub fn params_at(&self, block_number: u64) -> Option<EpochParams> {
        let entries = self.entries.read();
        entries
            .iter()
            .rev()
            .find(|p| p.first_block_number <= block_number)
            .cloned()
    }

    /// First block of the newest known epoch, if any.
    pub fn frontier(&self) -> Option<u64> {
        self.entries.read().last().map(|p| p.first_block_number)
    }

    /// Number of stored snapshots.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Shared epoch cache handle.
pub type SharedEpochCache = Arc<EpochCache>;

#[cfg(test)]
mod tests {
    use super::*;

    fn params(first_block_number: u64) -> EpochParams {
        EpochParams {
            seed: 10,
            nonce: 0,
            workers: vec!["aa".repeat(20), "bb".repeat(20)],
            balances: vec![1, 2],
            first_block_number,
        }
    }

    #[test]
    fn test_params_at_picks_latest_covering_entry() {
        let cache = EpochCache::new();
        cache.load(vec![params(300), params(100), params(200)]);

        assert_eq!(cache.params_at(150).unwrap().first_block_number, 100);
        assert_eq!(cache.params_at(200).unwrap().first_block_number, 200);
        assert_eq!(cache.params_at(9999).unwrap().first_block_number, 300);
        assert!(cache.params_at(50).is_none());
    }

    #[test]
    fn test_append_requires_advancing_frontier() {
        let cache = EpochCache::new();
        assert!(cache.append(params(100)));
        assert!(cache.append(params(200)));

        // Stale and duplicate snapshots are dropped.
        assert!(!cache.append(params(150)));
        assert!(!cache.append(params(200)));
        assert_eq!(cache.len(), 2);

        // Coverage is unchanged for blocks governed by the later entry.
        assert_eq!(cache.params_at(250).unwrap().first_block_number, 200);
        assert_eq!(cache.params_at(180).unwrap().first_block_number, 100);
    }

    #[test]
    fn test_frontier_tracks_latest_entry() {
        let cache = EpochCache::new();
        assert_eq!(cache.frontier(), None);
        cache.append(params(400));
        assert_eq!(cache.frontier(), Some(400));
    }

    #[test]
    fn test_load_replaces_and_sorts() {
        let cache = EpochCache::new();
        cache.append(params(700));
        cache.load(vec![params(400), params(300)]);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.params_at(350).unwrap().first_block_number, 300);
    }
}
