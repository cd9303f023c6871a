//! Slashing offenses and their deterministic penalties.

use cc_core::{Hash, U256};

use crate::staking::StakingState;
use crate::validator::Address;

/// Double-signing two conflicting blocks at the same height: total loss.
pub const DOUBLE_SIGN_PERCENT: u32 = 100;
/// Missing the epoch's inactivity threshold of signed blocks.
pub const INACTIVITY_PERCENT: u32 = 5;
/// Proposing or voting for a block that fails validation.
pub const INVALID_BLOCK_PERCENT: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlashingReason {
    DoubleSign,
    Inactivity,
    InvalidBlock,
}

impl SlashingReason {
    fn percent(self) -> u32 {
        match self {
            SlashingReason::DoubleSign => DOUBLE_SIGN_PERCENT,
            SlashingReason::Inactivity => INACTIVITY_PERCENT,
            SlashingReason::InvalidBlock => INVALID_BLOCK_PERCENT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SlashingEvent {
    pub validator: Address,
    pub reason: SlashingReason,
    pub penalty: U256,
    pub block_number: u64,
    pub description: String,
    /// Milliseconds since the Unix epoch, stamped by the caller (the
    /// engine never calls `SystemTime::now()` from the hot path itself;
    /// see [`crate::epoch::EpochManager::on_block_finalized`]).
    pub timestamp_ms: u64,
}

/// Append-only ledger of slashing events, backed by the staking layer's
/// own lock for the actual stake deduction.
pub struct SlashingEngine {
    history: parking_lot::Mutex<Vec<SlashingEvent>>,
}

impl SlashingEngine {
    pub fn new() -> Self {
        Self {
            history: parking_lot::Mutex::new(Vec::new()),
        }
    }

    fn apply(
        &self,
        staking: &StakingState,
        validator: Address,
        reason: SlashingReason,
        block_number: u64,
        description: String,
        timestamp_ms: u64,
    ) -> SlashingEvent {
        let penalty = staking.slash_percent(validator, reason.percent());
        let event = SlashingEvent {
            validator,
            reason,
            penalty,
            block_number,
            description,
            timestamp_ms,
        };
        self.history.lock().push(event.clone());
        event
    }

    /// 100% penalty, and the validator is always deactivated even if the
    /// stake deduction alone would not have dropped it below the minimum
    /// (it won't — 100% always zeroes it — but this makes the invariant
    /// explicit rather than incidental).
    pub fn slash_double_sign(
        &self,
        staking: &StakingState,
        validator: Address,
        block_number: u64,
        hash_a: Hash,
        hash_b: Hash,
        timestamp_ms: u64,
    ) -> SlashingEvent {
        let description = format!(
            "double-sign at height {block_number}: {} vs {}",
            hex::encode(hash_a),
            hex::encode(hash_b)
        );
        let event = self.apply(staking, validator, SlashingReason::DoubleSign, block_number, description, timestamp_ms);
        staking.deactivate(validator);
        event
    }

    /// 5% of total stake for missing the epoch's inactivity threshold
    /// over `[from, to]`.
    pub fn slash_inactivity(
        &self,
        staking: &StakingState,
        validator: Address,
        from: u64,
        to: u64,
        timestamp_ms: u64,
    ) -> SlashingEvent {
        let description = format!("inactive over blocks {from}..={to}");
        self.apply(staking, validator, SlashingReason::Inactivity, to, description, timestamp_ms)
    }

    /// 1% of total stake for proposing or voting for an invalid block.
    pub fn slash_invalid_block(
        &self,
        staking: &StakingState,
        validator: Address,
        block_number: u64,
        reason: &str,
        timestamp_ms: u64,
    ) -> SlashingEvent {
        self.apply(
            staking,
            validator,
            SlashingReason::InvalidBlock,
            block_number,
            reason.to_string(),
            timestamp_ms,
        )
    }

    pub fn history(&self) -> Vec<SlashingEvent> {
        self.history.lock().clone()
    }

    pub fn history_for(&self, validator: &Address) -> Vec<SlashingEvent> {
        self.history
            .lock()
            .iter()
            .filter(|e| &e.validator == validator)
            .cloned()
            .collect()
    }
}

impl Default for SlashingEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cc_core::U256;

    fn addr(b: u8) -> Address {
        [b; 20]
    }

    fn staking() -> StakingState {
        StakingState::new(U256::zero(), 2)
    }

    #[test]
    fn double_sign_removes_all_stake_and_deactivates() {
        let staking = staking();
        staking.register_validator(addr(1), U256::from(1_000u64), 0).unwrap();
        let slashing = SlashingEngine::new();

        let event = slashing.slash_double_sign(&staking, addr(1), 7, [0xAA; 32], [0xBB; 32], 42);
        assert_eq!(event.penalty, U256::from(1_000u64));
        assert_eq!(event.block_number, 7);
        let info = staking.stake_of(&addr(1)).unwrap();
        assert_eq!(info.self_stake, U256::zero());
        assert!(!info.is_active);
    }

    #[test]
    fn inactivity_removes_five_percent() {
        let staking = staking();
        staking.register_validator(addr(1), U256::from(1_000u64), 0).unwrap();
        let slashing = SlashingEngine::new();

        let event = slashing.slash_inactivity(&staking, addr(1), 100, 199, 0);
        assert_eq!(event.penalty, U256::from(50u64));
        assert_eq!(event.block_number, 199);
    }

    #[test]
    fn history_is_append_only_and_queryable_per_validator() {
        let staking = staking();
        staking.register_validator(addr(1), U256::from(100u64), 0).unwrap();
        staking.register_validator(addr(2), U256::from(100u64), 0).unwrap();
        let slashing = SlashingEngine::new();

        slashing.slash_invalid_block(&staking, addr(1), 0, "bad state root", 0);
        slashing.slash_invalid_block(&staking, addr(2), 0, "bad state root", 0);
        slashing.slash_inactivity(&staking, addr(1), 0, 99, 0);

        assert_eq!(slashing.history().len(), 3);
        assert_eq!(slashing.history_for(&addr(1)).len(), 2);
    }
}
