//! Epoch lifecycle: per-height signer-bitmap tracking, boundary slashing,
//! restart-deterministic replay, and rebuilding the validator set from
//! staking state.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

use crate::config::EngineConfig;
use crate::slashing::SlashingEngine;
use crate::staking::StakingState;
use crate::validator::{PeerId, ValidatorSet};

struct EpochState {
    epoch: u64,
    /// Commit bitmap per finalized height, bounded to the current epoch's
    /// window so restarts can replay exactly the blocks that count toward
    /// the next boundary's inactivity slashing.
    block_signers: BTreeMap<u64, u64>,
    /// First height belonging to the current epoch's window.
    epoch_start_height: u64,
}

/// Owns the current validator set and epoch counters, and performs the
/// epoch-boundary transition: slash inactive validators, release matured
/// unbonding stake, rebuild the set from staking, carry over long-lived
/// peer identities.
pub struct EpochManager {
    state: Mutex<EpochState>,
    validator_set: parking_lot::RwLock<ValidatorSet>,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl EpochManager {
    pub fn new(initial_set: ValidatorSet) -> Self {
        Self {
            state: Mutex::new(EpochState {
                epoch: 0,
                block_signers: BTreeMap::new(),
                epoch_start_height: 1,
            }),
            validator_set: parking_lot::RwLock::new(initial_set),
        }
    }

    pub fn current_epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    pub fn validator_set(&self) -> parking_lot::RwLockReadGuard<'_, ValidatorSet> {
        self.validator_set.read()
    }

    /// Swap in a new validator set wholesale (e.g. a genesis reconfiguration
    /// or externally-driven set change outside the normal epoch-boundary
    /// rebuild in [`Self::on_block_finalized`]).
    pub fn set_validator_set(&self, new_set: ValidatorSet) {
        *self.validator_set.write() = new_set;
    }

    /// Record the commit bitmap for a just-finalized height. Heights
    /// outside `[epoch_start, epoch_start + L]` are silently dropped —
    /// either stale (already rolled into a prior boundary) or a sign the
    /// caller raced ahead of an epoch transition that hasn't happened yet.
    pub fn record_block_signers(&self, height: u64, bitmap: u64, config: &EngineConfig) {
        if config.epoch_length == 0 {
            return;
        }
        let mut state = self.state.lock();
        let window_end = state.epoch_start_height + config.epoch_length;
        if height < state.epoch_start_height || height > window_end {
            return;
        }
        state.block_signers.insert(height, bitmap);
    }

    /// Rebuild `current_epoch` and `block_signers` from persisted bitmaps
    /// so inactivity slashing at the next boundary is identical whether or
    /// not the node restarted partway through the epoch. `bitmap_loader`
    /// is the orchestrator's `load_commit_bitmap` callback.
    pub fn seed_from_chain_height(&self, tip: u64, config: &EngineConfig, mut bitmap_loader: impl FnMut(u64) -> Option<u64>) {
        if config.epoch_length == 0 {
            return;
        }
        let epoch = tip / config.epoch_length;
        let epoch_start_height = epoch * config.epoch_length + 1;

        let mut block_signers = BTreeMap::new();
        for height in epoch_start_height..=tip {
            if let Some(bitmap) = bitmap_loader(height) {
                block_signers.insert(height, bitmap);
            }
        }

        let mut state = self.state.lock();
        state.epoch = epoch;
        state.epoch_start_height = epoch_start_height;
        state.block_signers = block_signers;
    }

    /// If `height` closes an epoch (`height > 0 && height % L == 0`), run
    /// the boundary transition: slash validators under the inactivity
    /// threshold, release matured unbonding entries, and rebuild the
    /// validator set from staking. Returns the new epoch number if a
    /// transition happened. A no-op when `config.epoch_length == 0`
    /// (epoch detection disabled).
    pub fn on_block_finalized(
        &self,
        height: u64,
        config: &EngineConfig,
        staking: &StakingState,
        slashing: &SlashingEngine,
    ) -> Option<u64> {
        if config.epoch_length == 0 || height == 0 || height % config.epoch_length != 0 {
            return None;
        }

        let (epoch, epoch_start_height, snapshot) = {
            let state = self.state.lock();
            (state.epoch, state.epoch_start_height, state.block_signers.clone())
        };
        let total_blocks = height.saturating_sub(epoch_start_height) + 1;
        info!(height, epoch, total_blocks, "epoch boundary reached");

        // 1. Slash validators under the inactivity threshold, unless
        // inactivity slashing is disabled (P = 0, which would otherwise
        // divide out to a zero threshold and slash everyone).
        let percent = config.inactivity_threshold_percent.min(100);
        if percent > 0 && total_blocks > 0 {
            let threshold = ((total_blocks as u128 * percent as u128) + 99) / 100;
            let set = self.validator_set.read();
            for validator in set.validators() {
                if validator.index >= 64 {
                    continue;
                }
                let signed = snapshot.values().filter(|bitmap| *bitmap & (1u64 << validator.index) != 0).count() as u128;
                if signed < threshold {
                    let event = slashing.slash_inactivity(staking, validator.address, epoch_start_height, height, now_ms());
                    info!(
                        validator = %hex::encode(validator.address),
                        signed = signed as u64,
                        threshold = threshold as u64,
                        removed = %event.penalty,
                        "validator slashed for inactivity"
                    );
                }
            }
        }

        // 2. Release matured unbonding entries.
        let released = staking.process_unbonding(height);
        if !released.is_empty() {
            info!(count = released.len(), "unbonding entries released");
        }

        // 3. Rebuild the validator set: top `validator_set_size` active
        // validators by stake, then re-sorted (inside `ValidatorSet::new`)
        // by address ascending for deterministic indexing. Peer identities
        // are then carried over from the outgoing set by address.
        let cap = config.validator_set_size.min(crate::validator::MAX_VALIDATORS);
        let mut top = staking.active_validators();
        top.truncate(cap);
        let infos = top
            .into_iter()
            .map(|stake| crate::validator::ValidatorInfo {
                peer_id: PeerId::default(),
                consensus_public_key: cc_core::CCPublicKey::default(),
                aggregate_public_key: cc_core::BlsPublicKey([0u8; 48]),
                address: stake.validator,
                stake: stake.total_stake(),
                index: 0,
            })
            .collect();
        let mut new_set = ValidatorSet::new(infos);

        {
            let old_set = self.validator_set.read();
            new_set.transfer_identities_from(&old_set);
        }
        *self.validator_set.write() = new_set;

        // 4. Reset per-epoch counters, advance epoch.
        let mut state = self.state.lock();
        state.epoch += 1;
        state.epoch_start_height = height + 1;
        state.block_signers.clear();
        Some(state.epoch)
    }
}
