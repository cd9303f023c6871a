//! Engine construction parameters.

use std::time::Duration;

/// Parameters fixed for the lifetime of a [`crate::engine::ConsensusEngine`].
/// Validator-set membership and stake move through
/// [`crate::staking::StakingState`] and [`crate::epoch::EpochManager`]
/// instead, since they change across epochs while these don't.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Mixed into every signed vote and view-change payload; a signature
    /// produced under one chain id never verifies under another.
    pub chain_id: u32,
    /// Number of blocks per epoch before the validator set is rebuilt from
    /// staking state. `0` disables epoch-boundary detection entirely.
    pub epoch_length: u64,
    /// Maximum validators admitted into a rebuilt set. Values above
    /// [`crate::validator::MAX_VALIDATORS`] are silently capped there,
    /// since a commit bitmap is a single 64-bit word.
    pub validator_set_size: usize,
    /// Minimum stake (in the native 256-bit unit) a validator must hold to
    /// register, or to be included when a validator set is rebuilt.
    pub min_validator_stake: cc_core::U256,
    /// Number of blocks an unbonding request must wait, after the block it
    /// was requested at, before its stake is released back to the
    /// delegator.
    pub unbonding_period_blocks: u64,
    /// A validator that signs fewer than this percent of an epoch's blocks
    /// is slashed for inactivity at the epoch boundary. `0` disables
    /// inactivity slashing.
    pub inactivity_threshold_percent: u32,
    /// How long a round may sit without reaching the next phase before a
    /// view change is requested.
    pub view_timeout: Duration,
    /// Maximum number of rounds the engine keeps open concurrently ahead
    /// of the last finalized height.
    pub pipeline_depth: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            epoch_length: 100,
            validator_set_size: 64,
            min_validator_stake: cc_core::U256::from(1_000u64),
            unbonding_period_blocks: 2_000,
            inactivity_threshold_percent: 50,
            view_timeout: Duration::from_secs(2),
            pipeline_depth: 3,
        }
    }
}
