//! Validator set: identity, quorum math, and leader-selector plumbing.

use cc_core::{BlsPublicKey, CCPublicKey, U256};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type PeerId = [u8; 32];
pub type Address = [u8; 20];

/// A single validator's identity and stake, as snapshotted into an epoch's
/// validator set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorInfo {
    pub peer_id: PeerId,
    pub consensus_public_key: CCPublicKey,
    pub aggregate_public_key: BlsPublicKey,
    pub address: Address,
    pub stake: U256,
    /// Dense, 0-based index into the owning `ValidatorSet`; `< 64` so it
    /// fits a commit bitmap bit.
    pub index: usize,
}

/// A closure mapping `view -> validator index`, pluggable so the leader
/// rule can be swapped between round-robin and stake-weighted selection
/// without the engine knowing which one is in effect.
pub type LeaderSelector = Box<dyn Fn(u64, &[ValidatorInfo]) -> usize + Send + Sync>;

fn round_robin(view: u64, validators: &[ValidatorInfo]) -> usize {
    (view as usize) % validators.len().max(1)
}

/// Maximum number of validators a 64-bit commit bitmap can represent.
pub const MAX_VALIDATORS: usize = 64;

/// Ordered, immutable-per-epoch set of validators plus the derived lookup
/// maps and quorum thresholds the consensus round and epoch manager need.
pub struct ValidatorSet {
    validators: Vec<ValidatorInfo>,
    by_peer_id: HashMap<PeerId, usize>,
    by_address: HashMap<Address, usize>,
    leader_selector: LeaderSelector,
}

impl std::fmt::Debug for ValidatorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatorSet")
            .field("validators", &self.validators)
            .finish()
    }
}

impl ValidatorSet {
    /// Build a set from an unordered list of validators. Validators are
    /// sorted by `address` ascending and assigned a fresh dense `index`,
    /// per the spec's epoch-construction invariant. Truncated to
    /// [`MAX_VALIDATORS`] if given more (callers are expected not to rely
    /// on this and instead cap at the staking layer).
    pub fn new(mut validators: Vec<ValidatorInfo>) -> Self {
        validators.sort_by(|a, b| a.address.cmp(&b.address));
        validators.truncate(MAX_VALIDATORS);
        for (i, v) in validators.iter_mut().enumerate() {
            v.index = i;
        }

        let mut by_peer_id = HashMap::with_capacity(validators.len());
        let mut by_address = HashMap::with_capacity(validators.len());
        for (i, v) in validators.iter().enumerate() {
            by_peer_id.insert(v.peer_id, i);
            by_address.insert(v.address, i);
        }

        Self {
            validators,
            by_peer_id,
            by_address,
            leader_selector: Box::new(round_robin),
        }
    }

    pub fn count(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn validators(&self) -> &[ValidatorInfo] {
        &self.validators
    }

    /// `floor(2n/3) + 1`.
    pub fn quorum(&self) -> usize {
        (2 * self.count()) / 3 + 1
    }

    /// `floor((n-1)/3)`.
    pub fn max_faults(&self) -> usize {
        self.count().saturating_sub(1) / 3
    }

    pub fn by_peer_id(&self, peer_id: &PeerId) -> Option<&ValidatorInfo> {
        self.by_peer_id.get(peer_id).map(|&i| &self.validators[i])
    }

    pub fn by_address(&self, address: &Address) -> Option<&ValidatorInfo> {
        self.by_address.get(address).map(|&i| &self.validators[i])
    }

    pub fn is_validator(&self, peer_id: &PeerId) -> bool {
        self.by_peer_id.contains_key(peer_id)
    }

    pub fn index_of(&self, peer_id: &PeerId) -> Option<usize> {
        self.by_peer_id.get(peer_id).copied()
    }

    /// Validator at a given dense index, if any.
    pub fn by_index(&self, index: usize) -> Option<&ValidatorInfo> {
        self.validators.get(index)
    }

    /// Validators whose bit is set in a commit bitmap.
    pub fn validators_from_bitmap(&self, bitmap: u64) -> impl Iterator<Item = &ValidatorInfo> {
        self.validators
            .iter()
            .filter(move |v| v.index < 64 && (bitmap & (1u64 << v.index)) != 0)
    }

    /// Deterministic leader for `view`, via the currently installed
    /// selector (round-robin by default).
    pub fn leader(&self, view: u64) -> Option<&ValidatorInfo> {
        if self.validators.is_empty() {
            return None;
        }
        let idx = (self.leader_selector)(view, &self.validators);
        self.validators.get(idx)
    }

    pub fn set_leader_selector(&mut self, selector: LeaderSelector) {
        self.leader_selector = selector;
    }

    /// Overwrite a validator's network identity in place (peer id and
    /// public keys are discovered by handshake, not carried by stake).
    pub fn update_identity(
        &mut self,
        index: usize,
        peer_id: PeerId,
        consensus_public_key: CCPublicKey,
        aggregate_public_key: BlsPublicKey,
    ) {
        let Some(validator) = self.validators.get_mut(index) else {
            return;
        };
        let old_peer_id = validator.peer_id;
        validator.peer_id = peer_id;
        validator.consensus_public_key = consensus_public_key;
        validator.aggregate_public_key = aggregate_public_key;
        self.by_peer_id.remove(&old_peer_id);
        self.by_peer_id.insert(peer_id, index);
    }

    /// For every validator in `self` whose address also appears in
    /// `previous`, copy over the previous set's peer id and public keys.
    /// Run after rebuilding a set from stake so long-lived network
    /// identities survive the rebuild.
    pub fn transfer_identities_from(&mut self, previous: &ValidatorSet) {
        for i in 0..self.validators.len() {
            let address = self.validators[i].address;
            if let Some(old) = previous.by_address(&address) {
                let peer_id = old.peer_id;
                let consensus_public_key = old.consensus_public_key;
                let aggregate_public_key = old.aggregate_public_key;
                self.update_identity(i, peer_id, consensus_public_key, aggregate_public_key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator(address_byte: u8, stake: u64) -> ValidatorInfo {
        ValidatorInfo {
            peer_id: [address_byte; 32],
            consensus_public_key: CCPublicKey::default(),
            aggregate_public_key: BlsPublicKey([0u8; 48]),
            address: [address_byte; 20],
            stake: U256::from(stake),
            index: 0,
        }
    }

    #[test]
    fn construction_sorts_by_address_and_assigns_dense_index() {
        let set = ValidatorSet::new(vec![validator(3, 1), validator(1, 1), validator(2, 1)]);
        let addrs: Vec<u8> = set.validators().iter().map(|v| v.address[0]).collect();
        assert_eq!(addrs, vec![1, 2, 3]);
        for (i, v) in set.validators().iter().enumerate() {
            assert_eq!(v.index, i);
        }
    }

    #[test]
    fn quorum_and_max_faults_match_bft_formula() {
        let set = ValidatorSet::new((0..4).map(|i| validator(i, 1)).collect());
        assert_eq!(set.quorum(), 3);
        assert_eq!(set.max_faults(), 1);
    }

    #[test]
    fn identical_stake_inputs_produce_byte_identical_sets() {
        let a = ValidatorSet::new(vec![validator(2, 10), validator(1, 20)]);
        let b = ValidatorSet::new(vec![validator(1, 20), validator(2, 10)]);
        assert_eq!(a.validators(), b.validators());
    }

    #[test]
    fn identity_transfer_preserves_peer_id_by_address() {
        let old = ValidatorSet::new(vec![validator(1, 10)]);
        let old_peer_id = old.validators()[0].peer_id;

        let mut fresh = validator(1, 99);
        fresh.peer_id = [0xFF; 32];
        let mut new_set = ValidatorSet::new(vec![fresh]);
        new_set.transfer_identities_from(&old);

        assert_eq!(new_set.validators()[0].peer_id, old_peer_id);
        assert_eq!(new_set.validators()[0].stake, U256::from(99u64));
    }

    #[test]
    fn round_robin_leader_cycles_with_view() {
        let set = ValidatorSet::new((0..4).map(|i| validator(i, 1)).collect());
        let l0 = set.leader(0).unwrap().address;
        let l1 = set.leader(1).unwrap().address;
        assert_ne!(l0, l1);
        assert_eq!(set.leader(4).unwrap().address, l0);
    }

    #[test]
    fn bitmap_iteration_only_yields_set_bits() {
        let set = ValidatorSet::new((0..4).map(|i| validator(i, 1)).collect());
        let bitmap = 0b0101u64;
        let indices: Vec<usize> = set.validators_from_bitmap(bitmap).map(|v| v.index).collect();
        assert_eq!(indices, vec![0, 2]);
    }
}
