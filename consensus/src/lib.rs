//! Pipelined Byzantine fault-tolerant consensus: stake-weighted leader
//! election, a three-phase (Prepare / Pre-Commit / Commit) vote protocol
//! per block height, BLS signature aggregation, view-change recovery,
//! and the staking/slashing/epoch lifecycle that drives validator-set
//! membership.

pub mod config;
pub mod engine;
pub mod epoch;
pub mod error;
pub mod leader;
pub mod messages;
pub mod round;
pub mod signing;
pub mod slashing;
pub mod staking;
pub mod validator;

pub use config::EngineConfig;
pub use engine::{ConsensusEngine, ConsensusEvent, Outbound};
pub use epoch::EpochManager;
pub use error::{ConsensusError, Result};
pub use messages::{FinalizationEvent, Proposal, ViewChange, Vote};
pub use round::{ConsensusRound, RoundPhase};
pub use slashing::{SlashingEngine, SlashingEvent, SlashingReason};
pub use staking::{StakeInfo, StakingState, UnbondingEntry};
pub use validator::{Address, LeaderSelector, PeerId, ValidatorInfo, ValidatorSet, MAX_VALIDATORS};
