//! Stake bookkeeping: registration, self-stake, delegation and unbonding.
//!
//! Guarded by a single coarse lock — staking changes are rare compared to
//! the vote traffic the engine handles, so there's no payoff to finer
//! grained locking here. Readers get deep-copied snapshots rather than a
//! lock held across their work.

use cc_core::{CCError, Result, U256};
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::validator::Address;

/// One validator's self-stake plus everything delegated to it.
#[derive(Debug, Clone)]
pub struct StakeInfo {
    pub validator: Address,
    pub self_stake: U256,
    pub delegated: HashMap<Address, U256>,
    pub is_active: bool,
    pub registered_at_block: u64,
}

impl StakeInfo {
    fn new(validator: Address, registered_at_block: u64) -> Self {
        Self {
            validator,
            self_stake: U256::zero(),
            delegated: HashMap::new(),
            is_active: false,
            registered_at_block,
        }
    }

    pub fn total_stake(&self) -> U256 {
        self.delegated
            .values()
            .fold(self.self_stake, |acc, &d| cc_core::u256::saturating_add(acc, d))
    }
}

/// A pending withdrawal, released back to the delegator once the chain
/// height reaches `complete_at_block`.
#[derive(Debug, Clone)]
pub struct UnbondingEntry {
    pub delegator: Address,
    pub validator: Address,
    pub amount: U256,
    pub complete_at_block: u64,
}

struct StakingInner {
    stakes: HashMap<Address, StakeInfo>,
    unbonding: Vec<UnbondingEntry>,
}

pub struct StakingState {
    inner: Mutex<StakingInner>,
    min_validator_stake: U256,
    unbonding_period: u64,
}

impl StakingState {
    pub fn new(min_validator_stake: U256, unbonding_period: u64) -> Self {
        Self {
            inner: Mutex::new(StakingInner {
                stakes: HashMap::new(),
                unbonding: Vec::new(),
            }),
            min_validator_stake,
            unbonding_period,
        }
    }

    /// Register a new validator with an initial self-stake. Fails if the
    /// address is already registered or `stake < MinValidatorStake`.
    pub fn register_validator(&self, validator: Address, stake: U256, registered_at_block: u64) -> Result<()> {
        if stake < self.min_validator_stake {
            return Err(CCError::InvalidInput("register: stake below minimum".into()));
        }
        let mut inner = self.inner.lock();
        if inner.stakes.contains_key(&validator) {
            return Err(CCError::InvalidInput("register: validator already registered".into()));
        }
        let mut info = StakeInfo::new(validator, registered_at_block);
        info.self_stake = stake;
        info.is_active = true;
        inner.stakes.insert(validator, info);
        Ok(())
    }

    /// Credit self-stake to an already-registered validator.
    pub fn add_stake(&self, validator: Address, amount: U256) -> Result<()> {
        let mut inner = self.inner.lock();
        let info = inner
            .stakes
            .get_mut(&validator)
            .ok_or_else(|| CCError::InvalidInput("add_stake: unknown validator".into()))?;
        info.self_stake = cc_core::u256::saturating_add(info.self_stake, amount);
        Ok(())
    }

    pub fn delegate(&self, delegator: Address, validator: Address, amount: U256) -> Result<()> {
        let mut inner = self.inner.lock();
        let info = inner
            .stakes
            .get_mut(&validator)
            .ok_or_else(|| CCError::InvalidInput("delegate: unknown validator".into()))?;
        let entry = info.delegated.entry(delegator).or_insert(U256::zero());
        *entry = cc_core::u256::saturating_add(*entry, amount);
        Ok(())
    }

    /// Move `amount` out of active stake into an unbonding entry that
    /// matures `UnbondingPeriod` blocks after `current_block`. `delegator ==
    /// validator` withdraws self-stake, which may not leave dust: the
    /// remainder must be either zero or at least `MinValidatorStake`. When
    /// self-stake reaches zero the validator is deactivated.
    pub fn initiate_unstake(
        &self,
        delegator: Address,
        validator: Address,
        amount: U256,
        current_block: u64,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        let info = inner
            .stakes
            .get_mut(&validator)
            .ok_or_else(|| CCError::InvalidInput("unstake: unknown validator".into()))?;

        if delegator == validator {
            if info.self_stake < amount {
                return Err(CCError::InvalidInput("unstake: amount exceeds self-stake".into()));
            }
            let remaining = info.self_stake - amount;
            if !remaining.is_zero() && remaining < self.min_validator_stake {
                return Err(CCError::InvalidInput(
                    "unstake: remaining self-stake would be dust".into(),
                ));
            }
            info.self_stake = remaining;
            if remaining.is_zero() {
                info.is_active = false;
            }
        } else {
            let balance = info
                .delegated
                .get_mut(&delegator)
                .ok_or_else(|| CCError::InvalidInput("unstake: no such delegation".into()))?;
            if *balance < amount {
                return Err(CCError::InvalidInput("unstake: amount exceeds delegation".into()));
            }
            *balance -= amount;
        }

        inner.unbonding.push(UnbondingEntry {
            delegator,
            validator,
            amount,
            complete_at_block: current_block + self.unbonding_period,
        });
        Ok(())
    }

    /// Release all unbonding entries matured as of `current_block`,
    /// removing them from the pending list and returning them.
    pub fn process_unbonding(&self, current_block: u64) -> Vec<UnbondingEntry> {
        let mut inner = self.inner.lock();
        let (released, pending): (Vec<_>, Vec<_>) = inner
            .unbonding
            .drain(..)
            .partition(|e| e.complete_at_block <= current_block);
        inner.unbonding = pending;
        released
    }

    /// Slash `percent` of a validator's self-stake and of every
    /// delegation, proportionally. Self-stake and each delegator (visited
    /// in ascending address order) are cut by the same percentage; the
    /// rounding remainder between the sum of per-account cuts and the
    /// exact `percent_of(total_stake)` penalty is assessed against the
    /// last delegator in that ordering (or against self-stake if there
    /// are no delegators). Deactivates the validator if the resulting
    /// total stake drops below `MinValidatorStake`. Returns the total
    /// amount removed.
    pub fn slash_percent(&self, validator: Address, percent: u32) -> U256 {
        let mut inner = self.inner.lock();
        let Some(info) = inner.stakes.get_mut(&validator) else {
            return U256::zero();
        };

        let total_penalty = cc_core::u256::percent_of(info.total_stake(), percent);
        let mut self_cut = cc_core::u256::percent_of(info.self_stake, percent);

        let mut delegators: Vec<Address> = info.delegated.keys().copied().collect();
        delegators.sort();
        let mut cuts: Vec<(Address, U256)> = delegators
            .iter()
            .map(|&d| (d, cc_core::u256::percent_of(info.delegated[&d], percent)))
            .collect();

        let assessed = cuts
            .iter()
            .fold(self_cut, |acc, &(_, cut)| cc_core::u256::saturating_add(acc, cut));
        let dust = total_penalty.saturating_sub(assessed);

        if let Some(last) = cuts.last_mut() {
            last.1 = cc_core::u256::saturating_add(last.1, dust);
        } else {
            self_cut = cc_core::u256::saturating_add(self_cut, dust);
        }

        let self_cut = self_cut.min(info.self_stake);
        info.self_stake -= self_cut;
        let mut removed = self_cut;
        for (delegator, cut) in cuts {
            let balance = info.delegated.get_mut(&delegator).unwrap();
            let take = cut.min(*balance);
            *balance -= take;
            removed = cc_core::u256::saturating_add(removed, take);
        }

        if info.self_stake.is_zero() || info.total_stake() < self.min_validator_stake {
            info.is_active = false;
        }
        removed
    }

    /// Deep-copied snapshot of every active validator, sorted by total
    /// stake descending (used to pick the top-N stake-weighted candidates
    /// when a validator set is rebuilt).
    pub fn active_validators(&self) -> Vec<StakeInfo> {
        let inner = self.inner.lock();
        let mut active: Vec<StakeInfo> = inner.stakes.values().filter(|info| info.is_active).cloned().collect();
        active.sort_by(|a, b| b.total_stake().cmp(&a.total_stake()));
        active
    }

    pub fn stake_of(&self, validator: &Address) -> Option<StakeInfo> {
        self.inner.lock().stakes.get(validator).cloned()
    }

    /// Unconditionally deactivate a validator, regardless of remaining
    /// stake. Used by double-sign slashing, which always removes a
    /// validator from the active set.
    pub fn deactivate(&self, validator: Address) {
        if let Some(info) = self.inner.lock().stakes.get_mut(&validator) {
            info.is_active = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(b: u8) -> Address {
        [b; 20]
    }

    fn staking() -> StakingState {
        StakingState::new(U256::zero(), 2)
    }

    #[test]
    fn register_fails_below_minimum_and_on_duplicate() {
        let staking = StakingState::new(U256::from(100u64), 2);
        assert!(staking.register_validator(addr(1), U256::from(50u64), 0).is_err());
        staking.register_validator(addr(1), U256::from(200u64), 0).unwrap();
        assert!(staking.register_validator(addr(1), U256::from(200u64), 0).is_err());
    }

    #[test]
    fn delegation_and_self_stake_sum_into_total() {
        let staking = staking();
        staking.register_validator(addr(1), U256::from(100u64), 0).unwrap();
        staking.delegate(addr(2), addr(1), U256::from(50u64)).unwrap();
        let info = staking.stake_of(&addr(1)).unwrap();
        assert_eq!(info.total_stake(), U256::from(150u64));
    }

    #[test]
    fn unstake_moves_stake_to_unbonding_until_maturity() {
        let staking = staking();
        staking.register_validator(addr(1), U256::from(100u64), 0).unwrap();
        staking.initiate_unstake(addr(1), addr(1), U256::from(40u64), 10).unwrap();
        assert_eq!(staking.stake_of(&addr(1)).unwrap().self_stake, U256::from(60u64));

        assert!(staking.process_unbonding(11).is_empty());
        let released = staking.process_unbonding(12);
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].amount, U256::from(40u64));
    }

    #[test]
    fn unstake_rejects_dust_remainder() {
        let staking = StakingState::new(U256::from(50u64), 2);
        staking.register_validator(addr(1), U256::from(100u64), 0).unwrap();
        assert!(staking.initiate_unstake(addr(1), addr(1), U256::from(80u64), 0).is_err());
        staking.initiate_unstake(addr(1), addr(1), U256::from(100u64), 0).unwrap();
        assert!(!staking.stake_of(&addr(1)).unwrap().is_active);
    }

    #[test]
    fn slash_percent_cuts_self_stake_and_every_delegation_proportionally() {
        let staking = staking();
        staking.register_validator(addr(1), U256::from(100u64), 0).unwrap();
        staking.delegate(addr(5), addr(1), U256::from(100u64)).unwrap();
        staking.delegate(addr(2), addr(1), U256::from(100u64)).unwrap();

        // 10% of a 300 total: 10 from self, 10 from each delegation.
        let removed = staking.slash_percent(addr(1), 10);
        assert_eq!(removed, U256::from(30u64));
        let info = staking.stake_of(&addr(1)).unwrap();
        assert_eq!(info.self_stake, U256::from(90u64));
        assert_eq!(*info.delegated.get(&addr(2)).unwrap(), U256::from(90u64));
        assert_eq!(*info.delegated.get(&addr(5)).unwrap(), U256::from(90u64));
    }

    #[test]
    fn slash_percent_rounding_dust_goes_to_last_delegator_by_address() {
        let staking = staking();
        staking.register_validator(addr(1), U256::from(10u64), 0).unwrap();
        staking.delegate(addr(2), addr(1), U256::from(10u64)).unwrap();
        staking.delegate(addr(9), addr(1), U256::from(10u64)).unwrap();

        let removed = staking.slash_percent(addr(1), 1);
        assert_eq!(removed, U256::zero());

        let removed = staking.slash_percent(addr(1), 34);
        // self: 34% of 10 = 3 (floor); addr(2): 34% of 10 = 3; addr(9): 34% of 10 = 3.
        // total_stake after prior no-op slash is still 30, exact penalty = 34%*30/100 = 10 (floor),
        // assessed = 3+3+3 = 9, dust = 1 goes to the last delegator (addr 9).
        assert_eq!(removed, U256::from(10u64));
        let info = staking.stake_of(&addr(1)).unwrap();
        assert_eq!(*info.delegated.get(&addr(9)).unwrap(), U256::from(6u64));
        assert_eq!(*info.delegated.get(&addr(2)).unwrap(), U256::from(7u64));
    }

    #[test]
    fn slash_below_minimum_deactivates() {
        let staking = StakingState::new(U256::from(50u64), 2);
        staking.register_validator(addr(1), U256::from(100u64), 0).unwrap();
        staking.slash_percent(addr(1), 60);
        assert!(!staking.stake_of(&addr(1)).unwrap().is_active);
    }

    #[test]
    fn active_validators_filters_and_sorts_by_stake_descending() {
        let staking = staking();
        staking.register_validator(addr(3), U256::from(5u64), 0).unwrap();
        staking.register_validator(addr(1), U256::from(500u64), 0).unwrap();
        staking.register_validator(addr(2), U256::from(50u64), 0).unwrap();

        let active = staking.active_validators();
        let addrs: Vec<u8> = active.iter().map(|s| s.validator[0]).collect();
        assert_eq!(addrs, vec![1, 2, 3]);
    }
}
