//! Per-height consensus round: phase state machine, vote sets and
//! per-phase BLS signature lists.

use cc_core::{BlsPublicKey, BlsSignature, Hash};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use crate::signing::{PHASE_COMMIT, PHASE_PREPARE, PHASE_PRE_COMMIT};
use crate::validator::PeerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RoundPhase {
    Idle = 0,
    Proposing = 1,
    Preparing = 2,
    PreCommitting = 3,
    Committing = 4,
    Finalized = 5,
}

impl RoundPhase {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => RoundPhase::Idle,
            1 => RoundPhase::Proposing,
            2 => RoundPhase::Preparing,
            3 => RoundPhase::PreCommitting,
            4 => RoundPhase::Committing,
            _ => RoundPhase::Finalized,
        }
    }
}

#[derive(Default)]
struct PhaseVotes {
    voters: HashSet<PeerId>,
    signatures: Vec<(BlsSignature, BlsPublicKey)>,
    /// Set the first time this phase's voter count crosses quorum, so a
    /// concurrent late arrival can never re-trigger the next-phase vote.
    quorum_crossed: bool,
}

impl PhaseVotes {
    fn reset(&mut self) {
        self.voters.clear();
        self.signatures.clear();
        self.quorum_crossed = false;
    }
}

struct RoundHeader {
    view: u64,
    block_hash: Hash,
    block_data: Vec<u8>,
    start_time: Instant,
}

/// Per-height consensus state machine. Vote-set membership and the
/// phase-transition check happen under the same per-phase lock, so at
/// most one caller observes a fresh quorum crossing and emits the
/// next-phase vote.
pub struct ConsensusRound {
    pub block_number: u64,
    header: Mutex<RoundHeader>,
    phase: AtomicU8,
    prepare: Mutex<PhaseVotes>,
    precommit: Mutex<PhaseVotes>,
    commit: Mutex<PhaseVotes>,
    view_change_requested: AtomicBool,
}

impl ConsensusRound {
    pub fn new(block_number: u64, view: u64, block_hash: Hash, block_data: Vec<u8>) -> Self {
        Self {
            block_number,
            header: Mutex::new(RoundHeader {
                view,
                block_hash,
                block_data,
                start_time: Instant::now(),
            }),
            phase: AtomicU8::new(RoundPhase::Proposing as u8),
            prepare: Mutex::new(PhaseVotes::default()),
            precommit: Mutex::new(PhaseVotes::default()),
            commit: Mutex::new(PhaseVotes::default()),
            view_change_requested: AtomicBool::new(false),
        }
    }

    pub fn phase(&self) -> RoundPhase {
        RoundPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn set_phase(&self, phase: RoundPhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    pub fn view(&self) -> u64 {
        self.header.lock().view
    }

    pub fn block_hash(&self) -> Hash {
        self.header.lock().block_hash
    }

    pub fn block_data(&self) -> Vec<u8> {
        self.header.lock().block_data.clone()
    }

    pub fn age(&self) -> Duration {
        self.header.lock().start_time.elapsed()
    }

    pub fn view_change_requested(&self) -> bool {
        self.view_change_requested.load(Ordering::Acquire)
    }

    pub fn set_view_change_requested(&self, requested: bool) {
        self.view_change_requested.store(requested, Ordering::Release);
        // Reset the clock so a repeat timeout check doesn't immediately
        // re-fire for the view change that was just requested.
        self.header.lock().start_time = Instant::now();
    }

    /// Accept a conflicting proposal that arrives at a strictly higher
    /// view than the round currently holds. This is the one place a
    /// round moves phase backward: new view, new hash, vote sets reset,
    /// back to `Proposing`. Returns `false` (equivocation, dropped) if
    /// the round is already `Finalized` or `view` is not strictly higher.
    pub fn accept_proposal(&self, view: u64, block_hash: Hash, block_data: Vec<u8>) -> bool {
        if self.phase() == RoundPhase::Finalized {
            return false;
        }
        {
            let mut header = self.header.lock();
            if view <= header.view {
                return false;
            }
            header.view = view;
            header.block_hash = block_hash;
            header.block_data = block_data;
            header.start_time = Instant::now();
        }
        self.prepare.lock().reset();
        self.precommit.lock().reset();
        self.commit.lock().reset();
        self.view_change_requested.store(false, Ordering::Release);
        self.set_phase(RoundPhase::Proposing);
        true
    }

    fn phase_votes(&self, phase: u8) -> &Mutex<PhaseVotes> {
        match phase {
            PHASE_PREPARE => &self.prepare,
            PHASE_PRE_COMMIT => &self.precommit,
            _ => &self.commit,
        }
    }

    /// Record a verified vote for `phase`. Returns `true` exactly once per
    /// phase: on the call whose insertion first brings the distinct-voter
    /// count to `quorum`. Duplicate votes from the same voter are ignored.
    pub fn record_vote(
        &self,
        phase: u8,
        voter: PeerId,
        signature: BlsSignature,
        public_key: BlsPublicKey,
        quorum: usize,
    ) -> bool {
        let mut votes = self.phase_votes(phase).lock();
        if !votes.voters.insert(voter) {
            return false;
        }
        votes.signatures.push((signature, public_key));
        if !votes.quorum_crossed && votes.voters.len() >= quorum {
            votes.quorum_crossed = true;
            return true;
        }
        false
    }

    pub fn vote_count(&self, phase: u8) -> usize {
        self.phase_votes(phase).lock().voters.len()
    }

    pub fn has_voted(&self, phase: u8, voter: &PeerId) -> bool {
        self.phase_votes(phase).lock().voters.contains(voter)
    }

    /// Aggregate this phase's collected signatures into one BLS signature.
    pub fn aggregate_signature(&self, phase: u8) -> cc_core::Result<BlsSignature> {
        let votes = self.phase_votes(phase).lock();
        let sigs: Vec<BlsSignature> = votes.signatures.iter().map(|(s, _)| s.clone()).collect();
        cc_core::bls::aggregate(&sigs)
    }

    /// Commit-phase bitmap: bit `i` set iff the validator at dense index
    /// `i` cast a verified Commit vote. `index_of` maps a voter's peer id
    /// to its validator-set index.
    pub fn commit_bitmap(&self, index_of: impl Fn(&PeerId) -> Option<usize>) -> u64 {
        let votes = self.commit.lock();
        let mut bitmap = 0u64;
        for voter in &votes.voters {
            if let Some(index) = index_of(voter) {
                if index < 64 {
                    bitmap |= 1u64 << index;
                }
            }
        }
        bitmap
    }
}
