//! Stake-weighted, deterministic leader selection.

use crate::validator::ValidatorInfo;
use cc_core::u256::collapse_to_u64;

/// Deterministic stake-weighted leader index for `view`.
///
/// Each validator's 256-bit stake collapses to a 64-bit weight (the most
/// significant non-zero 64-bit limb, floored at 1). Weights sum with
/// saturating addition. `seed = first 8 LE bytes of BLAKE3(view_LE)`,
/// `target = seed mod total_weight`; the first validator whose running
/// weight sum strictly exceeds `target` is the leader. Falls back to
/// round-robin (`view mod count`) when total weight is zero.
///
/// Install via [`crate::validator::ValidatorSet::set_leader_selector`].
pub fn stake_weighted_leader_index(view: u64, validators: &[ValidatorInfo]) -> usize {
    if validators.is_empty() {
        return 0;
    }

    let weights: Vec<u64> = validators.iter().map(|v| collapse_to_u64(v.stake)).collect();
    let total_weight: u64 = weights.iter().fold(0u64, |acc, &w| acc.saturating_add(w));

    if total_weight == 0 {
        return (view as usize) % validators.len();
    }

    let seed = seed_for_view(view);
    let target = seed % total_weight;

    let mut running = 0u64;
    for (i, &w) in weights.iter().enumerate() {
        running = running.saturating_add(w);
        if running > target {
            return i;
        }
    }
    // Saturation edge case: if saturating addition clipped the running sum
    // before it could exceed `target`, hand the last validator the leadership.
    validators.len() - 1
}

fn seed_for_view(view: u64) -> u64 {
    let digest = blake3::hash(&view.to_le_bytes());
    let bytes = digest.as_bytes();
    u64::from_le_bytes(bytes[0..8].try_into().expect("8 bytes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cc_core::{BlsPublicKey, CCPublicKey, U256};

    fn validator(index: usize, stake: u64) -> ValidatorInfo {
        ValidatorInfo {
            peer_id: [index as u8; 32],
            consensus_public_key: CCPublicKey::default(),
            aggregate_public_key: BlsPublicKey([0u8; 48]),
            address: [index as u8; 20],
            stake: U256::from(stake),
            index,
        }
    }

    #[test]
    fn deterministic_for_fixed_stake_snapshot_and_view() {
        let validators: Vec<_> = (0..4).map(|i| validator(i, 1000 + i as u64 * 10)).collect();
        let a = stake_weighted_leader_index(7, &validators);
        let b = stake_weighted_leader_index(7, &validators);
        assert_eq!(a, b);
    }

    #[test]
    fn falls_back_to_round_robin_when_all_stake_is_zero() {
        let validators: Vec<_> = (0..4).map(|i| validator(i, 0)).collect();
        assert_eq!(stake_weighted_leader_index(5, &validators), 5 % 4);
    }

    #[test]
    fn saturating_stake_does_not_panic() {
        let validators = vec![validator(0, u64::MAX), validator(1, u64::MAX)];
        let idx = stake_weighted_leader_index(1, &validators);
        assert!(idx < 2);
    }

    #[test]
    fn single_validator_is_always_leader() {
        let validators = vec![validator(0, 500)];
        assert_eq!(stake_weighted_leader_index(0, &validators), 0);
        assert_eq!(stake_weighted_leader_index(99, &validators), 0);
    }
}
