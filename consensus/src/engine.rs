//! The pipelined BFT engine: drives many in-flight
//! [`ConsensusRound`]s at once, one per height, advancing each
//! independently through Prepare, Pre-Commit and Commit as votes arrive.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cc_core::{BlsKeypair, BlsPublicKey, BlsSignature, Hash};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::epoch::EpochManager;
use crate::error::{ConsensusError, Result};
use crate::messages::{FinalizationEvent, Proposal, ViewChange, Vote};
use crate::round::{ConsensusRound, RoundPhase};
use crate::signing::{self, PHASE_COMMIT, PHASE_PREPARE, PHASE_PRE_COMMIT};
use crate::slashing::SlashingEngine;
use crate::staking::StakingState;
use crate::validator::{PeerId, ValidatorSet};

/// Something the engine produced that the (unspecified) networking layer
/// should broadcast on the caller's behalf.
#[derive(Debug, Clone)]
pub enum Outbound {
    Vote(Vote),
    ViewChange(ViewChange),
}

/// Something the engine observed that callers outside the hot vote path
/// care about.
#[derive(Debug, Clone)]
pub enum ConsensusEvent {
    Finalized(FinalizationEvent),
    ViewChanged { new_view: u64 },
    BehindDetected { local_height: u64, remote_height: u64 },
    /// A vote produced by a cascade that ran past the one return slot a
    /// caller's method signature has room for (see
    /// [`ConsensusEngine::cascade_vote`]).
    Outbound(Outbound),
}

/// Drives many in-flight rounds concurrently. Each round advances
/// independently; the engine's job is admission control (is this message
/// for a height/view we still care about), routing votes to the right
/// round, and stitching finalization back into sequential order.
pub struct ConsensusEngine {
    config: EngineConfig,
    local_peer_id: PeerId,
    local_bls: BlsKeypair,
    epoch_manager: EpochManager,
    staking: StakingState,
    slashing: SlashingEngine,
    active_rounds: DashMap<u64, Arc<ConsensusRound>>,
    /// Floor below which no view is accepted anywhere in the pipeline,
    /// raised only by a quorum of view-change votes.
    min_next_view: AtomicU64,
    last_finalized_block: AtomicU64,
    /// Rounds that finalized out of height order, held until the gap to
    /// `last_finalized_block` closes so finalization events emit in
    /// strictly increasing height order.
    pending_finalizations: Mutex<BTreeMap<u64, FinalizationEvent>>,
    view_change_votes: DashMap<u64, Mutex<HashSet<PeerId>>>,
    events: Mutex<std::collections::VecDeque<ConsensusEvent>>,
}

impl ConsensusEngine {
    pub fn new(
        config: EngineConfig,
        epoch_manager: EpochManager,
        staking: StakingState,
        local_peer_id: PeerId,
        local_bls: BlsKeypair,
    ) -> Self {
        Self {
            config,
            local_peer_id,
            local_bls,
            epoch_manager,
            staking,
            slashing: SlashingEngine::new(),
            active_rounds: DashMap::new(),
            min_next_view: AtomicU64::new(0),
            last_finalized_block: AtomicU64::new(0),
            pending_finalizations: Mutex::new(BTreeMap::new()),
            view_change_votes: DashMap::new(),
            events: Mutex::new(std::collections::VecDeque::new()),
        }
    }

    pub fn last_finalized_block(&self) -> u64 {
        self.last_finalized_block.load(Ordering::Acquire)
    }

    pub fn min_next_view(&self) -> u64 {
        self.min_next_view.load(Ordering::Acquire)
    }

    pub fn epoch_manager(&self) -> &EpochManager {
        &self.epoch_manager
    }

    pub fn staking(&self) -> &StakingState {
        &self.staking
    }

    pub fn slashing(&self) -> &SlashingEngine {
        &self.slashing
    }

    pub fn active_round_count(&self) -> usize {
        self.active_rounds.len()
    }

    pub fn next_event(&self) -> Option<ConsensusEvent> {
        self.events.lock().pop_front()
    }

    fn push_event(&self, event: ConsensusEvent) {
        self.events.lock().push_back(event);
    }

    fn admit_height(&self, height: u64) -> Result<()> {
        let last = self.last_finalized_block();
        if height <= last {
            return Err(ConsensusError::Stale);
        }
        if height > last + self.config.pipeline_depth + 1 {
            self.push_event(ConsensusEvent::BehindDetected {
                local_height: last,
                remote_height: height,
            });
            return Err(ConsensusError::Ahead(height - last));
        }
        if self.active_rounds.len() as u64 >= self.config.pipeline_depth && !self.active_rounds.contains_key(&height) {
            return Err(ConsensusError::Capacity);
        }
        Ok(())
    }

    fn quorum(&self) -> usize {
        self.epoch_manager.validator_set().quorum()
    }

    /// The view a *new* round for `height` must open at: never below the
    /// floor a prior view-change quorum raised, so a round can never reuse
    /// a view a quorum already abandoned.
    fn view_for_height(&self, height: u64) -> u64 {
        height.max(self.min_next_view())
    }

    /// Start a round as the leader for `height`: sign the proposal over
    /// the canonical Prepare payload, record the leader's own implicit
    /// Prepare vote, and return the `Proposal` for broadcast. Returns
    /// `Ok(None)` when the pipeline is full or the height is already past
    /// (deferred silently, per the admission contract); an `Err` only for
    /// genuine protocol violations (e.g. not actually the leader).
    pub fn start_round(&self, height: u64, block_hash: Hash, block_data: Vec<u8>) -> Result<Option<Proposal>> {
        if let Err(e) = self.admit_height(height) {
            return match e {
                ConsensusError::Capacity | ConsensusError::Ahead(_) => Ok(None),
                other => Err(other),
            };
        }

        let view = self.view_for_height(height);
        {
            let set = self.epoch_manager.validator_set();
            let expected_leader = set
                .leader(view)
                .ok_or_else(|| ConsensusError::Malformed("empty validator set".into()))?;
            if expected_leader.peer_id != self.local_peer_id {
                return Err(ConsensusError::Unauthorized);
            }
        }

        let round = self
            .active_rounds
            .entry(height)
            .or_insert_with(|| Arc::new(ConsensusRound::new(height, view, block_hash, block_data.clone())))
            .clone();
        if round.view() != view || round.block_hash() != block_hash {
            if !round.accept_proposal(view, block_hash, block_data.clone()) {
                return Err(ConsensusError::Equivocation);
            }
        }

        let payload = signing::vote_payload(self.config.chain_id, PHASE_PREPARE, view, height, &block_hash);
        let proposer_sig = self.local_bls.sign(&payload);
        let quorum = self.quorum();
        let crossed = round.record_vote(PHASE_PREPARE, self.local_peer_id, proposer_sig.clone(), self.local_bls.public_key(), quorum);
        if round.phase() == RoundPhase::Proposing {
            round.set_phase(RoundPhase::Preparing);
        }
        // A lone validator (or a pre-populated quorum) can satisfy every
        // phase off this one self-vote; drive the cascade so the round
        // doesn't sit stuck in `Preparing` with no second voter to ever
        // arrive.
        if crossed {
            if let Some(next) = self.cascade_vote(&round, height, view, block_hash, PHASE_PREPARE)? {
                self.push_event(ConsensusEvent::Outbound(Outbound::Vote(next)));
            }
        }

        info!(height, view, "round opened as leader");
        Ok(Some(Proposal {
            sender_id: self.local_peer_id,
            timestamp_ms: 0,
            view,
            height,
            block_hash,
            block_data,
            proposer_sig,
        }))
    }

    /// Handle an inbound block proposal: verify the leader signed it,
    /// open (or fast-forward) the round, and move it into `Preparing`.
    /// Returns the caller's own Prepare vote for broadcast, mirroring
    /// `start_round`'s implicit self-vote for followers.
    pub fn handle_proposal(&self, proposal: &Proposal) -> Result<Vote> {
        self.admit_height(proposal.height)?;
        if proposal.view < self.min_next_view() {
            return Err(ConsensusError::Stale);
        }

        let (leader_peer_id, leader_pub) = {
            let set = self.epoch_manager.validator_set();
            let leader = set
                .leader(proposal.view)
                .ok_or_else(|| ConsensusError::Malformed("empty validator set".into()))?;
            (leader.peer_id, leader.aggregate_public_key)
        };
        if leader_peer_id != proposal.sender_id {
            return Err(ConsensusError::Unauthorized);
        }

        let payload = signing::vote_payload(
            self.config.chain_id,
            PHASE_PREPARE,
            proposal.view,
            proposal.height,
            &proposal.block_hash,
        );
        if !proposal.proposer_sig.verify(&payload, &leader_pub) {
            return Err(ConsensusError::Malformed("invalid proposer signature".into()));
        }

        let round = self.active_rounds.entry(proposal.height).or_insert_with(|| {
            Arc::new(ConsensusRound::new(
                proposal.height,
                proposal.view,
                proposal.block_hash,
                proposal.block_data.clone(),
            ))
        });
        let round = round.clone();

        if round.view() != proposal.view || round.block_hash() != proposal.block_hash {
            if !round.accept_proposal(proposal.view, proposal.block_hash, proposal.block_data.clone()) {
                return Err(ConsensusError::Equivocation);
            }
        }

        let quorum = self.quorum();
        let leader_crossed = round.record_vote(PHASE_PREPARE, proposal.sender_id, proposal.proposer_sig.clone(), leader_pub, quorum);
        if round.phase() == RoundPhase::Proposing {
            round.set_phase(RoundPhase::Preparing);
        }

        let (vote, self_crossed) = self.cast_vote(&round, PHASE_PREPARE, proposal.height, proposal.view, proposal.block_hash)?;
        // At most one of these two votes is the one that actually crosses
        // quorum (`record_vote` only reports `true` once per phase), but
        // either could be it in a small validator set.
        if leader_crossed || self_crossed {
            if let Some(next) = self.cascade_vote(&round, proposal.height, proposal.view, proposal.block_hash, PHASE_PREPARE)? {
                self.push_event(ConsensusEvent::Outbound(Outbound::Vote(next)));
            }
        }
        debug!(height = proposal.height, view = proposal.view, "proposal accepted");
        Ok(vote)
    }

    /// Handle an inbound phase vote. Returns the engine's own next-phase
    /// vote when this call is the one that crosses quorum, or `None` if
    /// the vote was recorded but quorum wasn't reached (or already was).
    pub fn handle_vote(&self, vote: &Vote) -> Result<Option<Outbound>> {
        self.admit_height(vote.height)?;
        if vote.view < self.min_next_view() {
            return Err(ConsensusError::Stale);
        }

        let voter_pub = {
            let set = self.epoch_manager.validator_set();
            let validator = set.by_peer_id(&vote.sender_id).ok_or(ConsensusError::Unauthorized)?;
            validator.aggregate_public_key
        };
        if voter_pub != vote.voter_pub {
            return Err(ConsensusError::Unauthorized);
        }

        let payload = signing::vote_payload(self.config.chain_id, vote.phase, vote.view, vote.height, &vote.block_hash);
        if !vote.voter_sig.verify(&payload, &voter_pub) {
            return Err(ConsensusError::Malformed("invalid vote signature".into()));
        }

        // A vote for a height with no open round is dropped, not buffered:
        // the canonical (pipelined) engine requires the round to already
        // exist (see DESIGN.md's resolution of this Open Question).
        let Some(round) = self.active_rounds.get(&vote.height).map(|r| r.clone()) else {
            return Err(ConsensusError::Stale);
        };
        if vote.view != round.view() || vote.block_hash != round.block_hash() {
            return Err(ConsensusError::Stale);
        }

        let quorum = self.quorum();
        let crossed = round.record_vote(vote.phase, vote.sender_id, vote.voter_sig.clone(), vote.voter_pub, quorum);
        if !crossed {
            return Ok(None);
        }

        // `crossed_phase` is whichever phase this inbound vote just
        // brought to quorum; `cascade_vote` casts the following phase's
        // self-vote and, if that self-vote *also* crosses its own quorum
        // (a small validator set can satisfy more than one phase off a
        // single vote), keeps going until one no longer does.
        let next = self.cascade_vote(&round, vote.height, vote.view, vote.block_hash, vote.phase)?;
        Ok(next.map(Outbound::Vote))
    }

    fn cast_vote(&self, round: &ConsensusRound, phase: u8, height: u64, view: u64, block_hash: Hash) -> Result<(Vote, bool)> {
        let payload = signing::vote_payload(self.config.chain_id, phase, view, height, &block_hash);
        let signature = self.local_bls.sign(&payload);
        let voter_pub = self.local_bls.public_key();

        let quorum = self.quorum();
        let crossed = round.record_vote(phase, self.local_peer_id, signature.clone(), voter_pub, quorum);

        Ok((
            Vote {
                sender_id: self.local_peer_id,
                timestamp_ms: 0,
                view,
                height,
                block_hash,
                phase,
                voter_sig: signature,
                voter_pub,
            },
            crossed,
        ))
    }

    /// Drive the round forward from a phase whose quorum just crossed,
    /// casting this node's own vote for each following phase and
    /// finalizing once Commit crosses. Keeps advancing past a phase
    /// whose self-vote *itself* crosses quorum (an `n=1` round, or any
    /// round where the remaining gap to quorum is one vote, can satisfy
    /// every phase off a single crossing) instead of leaving the round
    /// stuck one phase behind with no further vote ever arriving to
    /// unstick it. Returns the vote for the phase immediately following
    /// `crossed_phase`, if any; every vote beyond that one is pushed onto
    /// the event queue, since a caller's return slot only has room for
    /// one.
    fn cascade_vote(&self, round: &ConsensusRound, height: u64, view: u64, block_hash: Hash, mut crossed_phase: u8) -> Result<Option<Vote>> {
        let mut first: Option<Vote> = None;
        loop {
            let next_phase = match crossed_phase {
                PHASE_PREPARE => {
                    round.set_phase(RoundPhase::PreCommitting);
                    PHASE_PRE_COMMIT
                }
                PHASE_PRE_COMMIT => {
                    round.set_phase(RoundPhase::Committing);
                    PHASE_COMMIT
                }
                PHASE_COMMIT => {
                    round.set_phase(RoundPhase::Finalized);
                    self.finalize(round)?;
                    return Ok(first);
                }
                _ => return Err(ConsensusError::Malformed("unknown vote phase".into())),
            };

            let (vote, crossed) = self.cast_vote(round, next_phase, height, view, block_hash)?;
            match first {
                Some(_) => self.push_event(ConsensusEvent::Outbound(Outbound::Vote(vote))),
                None => first = Some(vote),
            }
            if !crossed {
                return Ok(first);
            }
            crossed_phase = next_phase;
        }
    }

    fn finalize(&self, round: &ConsensusRound) -> Result<()> {
        let commit_bitmap = {
            let set = self.epoch_manager.validator_set();
            round.commit_bitmap(|peer| set.index_of(peer))
        };
        let event = FinalizationEvent {
            height: round.block_number,
            block_hash: round.block_hash(),
            block_data: round.block_data(),
            commit_bitmap,
        };
        info!(height = event.height, "round finalized");
        self.on_round_finalized(event);
        Ok(())
    }

    /// Buffer a just-finalized round and drain every height that is now
    /// contiguous with `last_finalized_block`, in order.
    fn on_round_finalized(&self, event: FinalizationEvent) {
        let mut pending = self.pending_finalizations.lock();
        pending.insert(event.height, event);

        loop {
            let next_height = self.last_finalized_block.load(Ordering::Acquire) + 1;
            let Some(event) = pending.remove(&next_height) else {
                break;
            };
            self.last_finalized_block.store(next_height, Ordering::Release);
            self.epoch_manager
                .record_block_signers(next_height, event.commit_bitmap, &self.config);
            self.epoch_manager
                .on_block_finalized(next_height, &self.config, &self.staking, &self.slashing);
            self.active_rounds.remove(&next_height);
            self.push_event(ConsensusEvent::Finalized(event));
        }
    }

    /// Check every open round for a view timeout, requesting a view
    /// change (once) for any that has been sitting past
    /// `config.view_timeout` without reaching the next phase. Returns at
    /// most one `ViewChange` per call (the spec's own "one timeout per
    /// tick" contract) so a single slow tick can't flood the network.
    pub fn check_view_timeout(&self) -> Option<ViewChange> {
        for entry in self.active_rounds.iter() {
            let round = entry.value();
            if round.phase() == RoundPhase::Finalized || round.view_change_requested() {
                continue;
            }
            if round.age() < self.config.view_timeout {
                continue;
            }
            round.set_view_change_requested(true);
            let proposed_view = round.view() + 1;
            return Some(self.sign_view_change(round.view(), proposed_view));
        }
        None
    }

    fn sign_view_change(&self, current_view: u64, proposed_view: u64) -> ViewChange {
        let payload = signing::view_change_payload(self.config.chain_id, proposed_view);
        let signature = self.local_bls.sign(&payload);
        ViewChange {
            sender_id: self.local_peer_id,
            timestamp_ms: 0,
            current_view,
            proposed_view,
            voter_sig: signature,
            voter_pub: self.local_bls.public_key(),
        }
    }

    /// Handle an inbound view-change vote. Once a quorum of validators
    /// propose the same view, raises `min_next_view`, aborts every open
    /// non-finalized round, prunes stale vote records, and emits
    /// `ViewChanged`. If this call causes the *local* node to newly
    /// auto-join the view change (it had not already requested one, but a
    /// local round has independently timed out and `proposed_view`
    /// exceeds every active round's view), returns a freshly signed
    /// `ViewChange` for the caller to broadcast, so the auto-join is
    /// visible to peers.
    pub fn handle_view_change(&self, vote: &ViewChange) -> Result<Option<ViewChange>> {
        let voter_pub = {
            let set = self.epoch_manager.validator_set();
            let validator = set.by_peer_id(&vote.sender_id).ok_or(ConsensusError::Unauthorized)?;
            validator.aggregate_public_key
        };
        if voter_pub != vote.voter_pub {
            return Err(ConsensusError::Unauthorized);
        }

        let payload = signing::view_change_payload(self.config.chain_id, vote.proposed_view);
        if !vote.voter_sig.verify(&payload, &voter_pub) {
            return Err(ConsensusError::Malformed("invalid view-change signature".into()));
        }

        let auto_join = self.maybe_auto_join(vote.proposed_view);

        let quorum = self.quorum();
        let crossed = {
            let entry = self
                .view_change_votes
                .entry(vote.proposed_view)
                .or_insert_with(|| Mutex::new(HashSet::new()));
            let mut voters = entry.lock();
            voters.insert(vote.sender_id);
            if let Some(ref joined) = auto_join {
                voters.insert(joined.sender_id);
            }
            voters.len() >= quorum
        };

        if crossed {
            let previous = self.min_next_view.fetch_max(vote.proposed_view, Ordering::AcqRel);
            if previous < vote.proposed_view {
                warn!(new_view = vote.proposed_view, "view change quorum reached");
                for entry in self.active_rounds.iter() {
                    entry.value().set_view_change_requested(true);
                }
                self.active_rounds.retain(|_, round| round.phase() == RoundPhase::Finalized);
                self.view_change_votes.retain(|&view, _| view > vote.proposed_view);
                self.push_event(ConsensusEvent::ViewChanged {
                    new_view: vote.proposed_view,
                });
            }
        }
        Ok(auto_join)
    }

    /// Auto-join gate: join `proposed_view` only if it exceeds every
    /// active non-finalized round's view (we're not already ahead or
    /// mid-proposal at that view) and at least one local round has
    /// independently timed out. This prevents a single peer's timeout from
    /// racing a view change to quorum before proposals can be processed.
    fn maybe_auto_join(&self, proposed_view: u64) -> Option<ViewChange> {
        let mut any_timed_out = false;
        for entry in self.active_rounds.iter() {
            let round = entry.value();
            if round.phase() == RoundPhase::Finalized {
                continue;
            }
            if round.view() >= proposed_view {
                return None;
            }
            if round.view_change_requested() {
                any_timed_out = true;
            }
        }
        if !any_timed_out {
            return None;
        }
        Some(self.sign_view_change(self.min_next_view(), proposed_view))
    }

    /// Advance the finalized-height floor directly (state-sync catch-up),
    /// clearing stale rounds and resetting `min_next_view` so the pipeline
    /// can resume cleanly above the new height.
    pub fn update_last_finalized_block(&self, height: u64) {
        self.last_finalized_block.store(height, Ordering::Release);
        self.min_next_view.store(0, Ordering::Release);
        self.cleanup_finalized_rounds();
        self.view_change_votes.clear();
    }

    /// Swap in a new validator set (epoch transition), with the same
    /// stale-round and view-floor reset as `update_last_finalized_block`.
    pub fn update_validator_set(&self, new_set: ValidatorSet) {
        self.epoch_manager.set_validator_set(new_set);
        self.min_next_view.store(0, Ordering::Release);
        self.active_rounds.clear();
        self.view_change_votes.clear();
    }

    /// Drop rounds for heights already finalized. The engine also does
    /// this incrementally as each height drains in
    /// [`Self::on_round_finalized`]; this is for catching up after a gap
    /// (e.g. state sync) advanced `last_finalized_block` directly.
    pub fn cleanup_finalized_rounds(&self) {
        let last = self.last_finalized_block();
        self.active_rounds.retain(|height, _| *height > last);
        self.pending_finalizations.lock().retain(|height, _| *height > last);
    }

    /// Aggregate the Commit-phase signatures of a finalized (or
    /// in-progress) round at `height` into one BLS signature.
    pub fn aggregate_signature(&self, height: u64) -> Result<BlsSignature> {
        let round = self.active_rounds.get(&height).ok_or(ConsensusError::Stale)?;
        Ok(round.aggregate_signature(PHASE_COMMIT)?)
    }

    pub fn local_public_key(&self) -> BlsPublicKey {
        self.local_bls.public_key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::{ValidatorInfo, ValidatorSet};
    use cc_core::{CCPublicKey, U256};

    struct Node {
        peer_id: PeerId,
        bls: BlsKeypair,
    }

    fn build_nodes(n: usize) -> Vec<Node> {
        (0..n)
            .map(|i| Node {
                peer_id: [i as u8 + 1; 32],
                bls: BlsKeypair::generate(),
            })
            .collect()
    }

    fn build_validator_set(nodes: &[Node]) -> ValidatorSet {
        let infos = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| ValidatorInfo {
                peer_id: n.peer_id,
                consensus_public_key: CCPublicKey::default(),
                aggregate_public_key: n.bls.public_key(),
                address: [i as u8 + 1; 20],
                stake: U256::from(100u64),
                index: 0,
            })
            .collect();
        ValidatorSet::new(infos)
    }

    fn build_engine(nodes: &[Node], local: usize) -> ConsensusEngine {
        let set = build_validator_set(nodes);
        let manager = EpochManager::new(set);
        let staking = StakingState::new(U256::from(1u64), 10);
        ConsensusEngine::new(EngineConfig::default(), manager, staking, nodes[local].peer_id, nodes[local].bls.clone())
    }

    #[test]
    fn single_validator_round_cascades_to_finalization_on_self_vote() {
        let nodes = build_nodes(1);
        let engine = build_engine(&nodes, 0);
        let hash = [9u8; 32];

        engine.start_round(1, hash, vec![1, 2, 3]).unwrap();

        assert_eq!(engine.last_finalized_block(), 1);
        assert_eq!(engine.active_round_count(), 0);
        let mut saw_precommit = false;
        let mut saw_commit = false;
        let mut saw_finalized = false;
        while let Some(event) = engine.next_event() {
            match event {
                ConsensusEvent::Outbound(Outbound::Vote(v)) if v.phase == PHASE_PRE_COMMIT => saw_precommit = true,
                ConsensusEvent::Outbound(Outbound::Vote(v)) if v.phase == PHASE_COMMIT => saw_commit = true,
                ConsensusEvent::Finalized(event) => {
                    saw_finalized = true;
                    assert_eq!(event.height, 1);
                }
                _ => {}
            }
        }
        assert!(saw_precommit && saw_commit && saw_finalized);
    }

    #[test]
    fn leader_start_round_emits_proposal_and_implicit_vote() {
        let nodes = build_nodes(4);
        let engine = build_engine(&nodes, 0);
        let hash = [9u8; 32];

        let proposal = engine.start_round(1, hash, vec![1, 2, 3]).unwrap().unwrap();
        assert_eq!(proposal.height, 1);
        assert_eq!(proposal.view, 0);
        assert!(proposal.proposer_sig.verify(
            &signing::vote_payload(engine.config.chain_id, PHASE_PREPARE, 0, 1, &hash),
            &engine.local_public_key()
        ));
    }

    #[test]
    fn full_round_reaches_finalization_with_quorum_votes() {
        let nodes = build_nodes(4);
        let engine = build_engine(&nodes, 0);
        let height = 1;
        let view = 0;
        let hash = [9u8; 32];

        engine.start_round(height, hash, vec![1, 2, 3]).unwrap();

        let mut next: Option<Outbound> = None;
        for node in nodes.iter().skip(1) {
            let payload = signing::vote_payload(engine.config.chain_id, PHASE_PREPARE, view, height, &hash);
            let sig = node.bls.sign(&payload);
            let vote = Vote {
                sender_id: node.peer_id,
                timestamp_ms: 0,
                view,
                height,
                block_hash: hash,
                phase: PHASE_PREPARE,
                voter_sig: sig,
                voter_pub: node.bls.public_key(),
            };
            if let Ok(Some(out)) = engine.handle_vote(&vote) {
                next = Some(out);
            }
        }
        assert!(matches!(next, Some(Outbound::Vote(v)) if v.phase == PHASE_PRE_COMMIT));
    }

    #[test]
    fn stale_height_is_rejected() {
        let nodes = build_nodes(4);
        let engine = build_engine(&nodes, 0);
        engine.update_last_finalized_block(10);
        let result = engine.start_round(5, [1u8; 32], vec![]);
        assert!(matches!(result, Err(ConsensusError::Stale)));
    }

    #[test]
    fn far_ahead_height_reports_behind_and_returns_none() {
        let nodes = build_nodes(4);
        let engine = build_engine(&nodes, 0);
        let result = engine.start_round(1_000, [1u8; 32], vec![]);
        assert_eq!(result.unwrap(), None);
        assert!(matches!(
            engine.next_event(),
            Some(ConsensusEvent::BehindDetected { .. })
        ));
    }

    #[test]
    fn view_change_quorum_raises_floor_and_emits_event() {
        let nodes = build_nodes(4);
        let engine = build_engine(&nodes, 0);
        let quorum = engine.quorum();

        for node in nodes.iter().take(quorum) {
            let payload = signing::view_change_payload(engine.config.chain_id, 5);
            let sig = node.bls.sign(&payload);
            let vc = ViewChange {
                sender_id: node.peer_id,
                timestamp_ms: 0,
                current_view: 0,
                proposed_view: 5,
                voter_sig: sig,
                voter_pub: node.bls.public_key(),
            };
            engine.handle_view_change(&vc).unwrap();
        }

        assert_eq!(engine.min_next_view(), 5);
        assert!(matches!(
            engine.next_event(),
            Some(ConsensusEvent::ViewChanged { new_view: 5 })
        ));
    }

    #[test]
    fn auto_join_requires_local_timeout_and_higher_view() {
        let nodes = build_nodes(4);
        let engine = build_engine(&nodes, 0);
        engine.start_round(1, [1u8; 32], vec![]).unwrap();

        // No local timeout yet: a peer's view-change vote must not trigger
        // an auto-join broadcast.
        let payload = signing::view_change_payload(engine.config.chain_id, 5);
        let sig = nodes[1].bls.sign(&payload);
        let vc = ViewChange {
            sender_id: nodes[1].peer_id,
            timestamp_ms: 0,
            current_view: 0,
            proposed_view: 5,
            voter_sig: sig,
            voter_pub: nodes[1].bls.public_key(),
        };
        let joined = engine.handle_view_change(&vc).unwrap();
        assert!(joined.is_none());
    }

    #[test]
    fn update_validator_set_resets_view_floor_and_rounds() {
        let nodes = build_nodes(4);
        let engine = build_engine(&nodes, 0);
        engine.start_round(1, [1u8; 32], vec![]).unwrap();
        assert_eq!(engine.active_round_count(), 1);

        let new_set = build_validator_set(&nodes);
        engine.update_validator_set(new_set);
        assert_eq!(engine.active_round_count(), 0);
        assert_eq!(engine.min_next_view(), 0);
    }
}
