//! Deterministic balance-weighted worker selection.
//!
//! The ledger assigns each task to a worker by hashing the epoch seed, the
//! secret contract address and a selection nonce, then using the digest as a
//! weighted draw over the epoch's stake balances. The node replays the exact
//! same computation to check that an assignment claimed by the network is the
//! one the ledger would have produced. Bit-for-bit reproducibility against
//! the on-chain algorithm is the whole point: the packing order below is
//! fixed and must never change.

use crate::epoch::EpochParams;
use crate::util::{hex_or_raw_bytes, strip_0x, to_word};
use sha2::{Digest, Sha256};

/// Draw of a single worker for `(seed, address, nonce)`.
///
/// The digest is interpreted as an unsigned big integer and reduced modulo
/// the total stake; the reduced value then walks the balance array, and the
/// first index at which the running remainder drops to zero or below wins.
/// Returns `None` when the epoch has no stake at all.
fn select_worker(contract_address: &str, params: &EpochParams, nonce: u64) -> Option<usize> {
    let total: u128 = params.balances.iter().map(|&b| b as u128).sum();
    if total == 0 || params.workers.is_empty() {
        return None;
    }

    let mut hasher = Sha256::new();
    hasher.update(to_word(&params.seed.to_be_bytes()));
    hasher.update(to_word(&hex_or_raw_bytes(contract_address)));
    hasher.update(to_word(&nonce.to_be_bytes()));
    let digest = hasher.finalize();

    // digest mod total, byte by byte; total fits u64 so this cannot overflow
    let mut rand_val: u128 = 0;
    for byte in digest {
        rand_val = ((rand_val << 8) | byte as u128) % total;
    }

    let mut remainder = rand_val as i128;
    for (index, &balance) in params.balances.iter().enumerate() {
        remainder -= balance as i128;
        if remainder <= 0 {
            return Some(index);
        }
    }
    None
}

/// Select `count` distinct workers for a contract under the given epoch
/// parameters.
///
/// The draw starts at the epoch's nonce and increments it for every attempt,
/// skipping workers already chosen, exactly as the ledger builds its worker
/// group. Returns fewer than `count` addresses only if the epoch does not
/// hold enough distinct workers.
pub fn select_worker_group(
    contract_address: &str,
    params: &EpochParams,
    count: usize,
) -> Vec<String> {
    let mut selected: Vec<String> = Vec::with_capacity(count);
    let mut nonce = params.nonce;
    let distinct = {
        let mut workers: Vec<&String> = params.workers.iter().collect();
        workers.sort();
        workers.dedup();
        workers.len()
    };
    let wanted = count.min(distinct);

    while selected.len() < wanted {
        if let Some(index) = select_worker(contract_address, params, nonce) {
            let address = strip_0x(&params.workers[index]);
            if !selected.contains(&address) {
                selected.push(address);
            }
        } else {
            break;
        }
        nonce += 1;
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture_params() -> EpochParams {
        EpochParams {
            seed: 10,
            nonce: 0,
            workers: vec![
                "1000000000000000000000000000000000000001".to_string(),
                "1000000000000000000000000000000000000002".to_string(),
                "1000000000000000000000000000000000000003".to_string(),
                "1000000000000000000000000000000000000004".to_string(),
                "1000000000000000000000000000000000000005".to_string(),
            ],
            balances: vec![1, 2, 3, 4, 5],
            first_block_number: 300,
        }
    }

    const CONTRACT: &str = "ae2c488a1a718dd9a854783cc34d1b3ae82121d0fc33615c54a290d90e2b02b3";

    #[test]
    fn test_reference_vector() {
        // sha256(seed=10 as u256 | contract | nonce=0 as u256) mod 15 == 8,
        // which lands on index 3 after walking balances [1, 2, 3, 4, 5].
        let params = fixture_params();
        let selected = select_worker_group(CONTRACT, &params, 1);
        assert_eq!(selected, vec![params.workers[3].clone()]);
    }

    #[test]
    fn test_selection_is_deterministic() {
        let params = fixture_params();
        let first = select_worker_group(CONTRACT, &params, 1);
        for _ in 0..10 {
            assert_eq!(select_worker_group(CONTRACT, &params, 1), first);
        }
    }

    #[test]
    fn test_group_selection_is_distinct() {
        // nonce=1 draws index 4, so the two-worker group is [3, 4].
        let params = fixture_params();
        let group = select_worker_group(CONTRACT, &params, 2);
        assert_eq!(
            group,
            vec![params.workers[3].clone(), params.workers[4].clone()]
        );

        let all = select_worker_group(CONTRACT, &params, 5);
        assert_eq!(all.len(), 5);
        let mut sorted = all.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), 5);
    }

    #[test]
    fn test_group_capped_by_distinct_workers() {
        let params = fixture_params();
        let group = select_worker_group(CONTRACT, &params, 100);
        assert_eq!(group.len(), 5);
    }

    #[test]
    fn test_zero_stake_selects_nobody() {
        let mut params = fixture_params();
        params.balances = vec![0, 0, 0, 0, 0];
        assert!(select_worker_group(CONTRACT, &params, 1).is_empty());
    }

    #[test]
    fn test_single_worker_epoch() {
        let params = EpochParams {
            seed: 99,
            nonce: 7,
            workers: vec!["2000000000000000000000000000000000000009".to_string()],
            balances: vec![1],
            first_block_number: 0,
        };
        let selected = select_worker_group(CONTRACT, &params, 1);
        assert_eq!(selected, vec![params.workers[0].clone()]);
    }

    #[test]
    fn test_addresses_normalized() {
        let mut params = fixture_params();
        params.workers[3] = "0xABCDEF0000000000000000000000000000000123".to_string();
        let selected = select_worker_group(CONTRACT, &params, 1);
        assert_eq!(selected[0], "abcdef0000000000000000000000000000000123");
    }
}
