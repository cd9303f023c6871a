//! Wire message types the transport (unspecified here) frames and
//! delivers to the engine.

use cc_core::{BlsPublicKey, BlsSignature, Hash};
use serde::{Deserialize, Serialize};

use crate::validator::PeerId;

/// A proposed block for `(height, view)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub sender_id: PeerId,
    pub timestamp_ms: u64,
    pub view: u64,
    pub height: u64,
    pub block_hash: Hash,
    pub block_data: Vec<u8>,
    pub proposer_sig: BlsSignature,
}

/// A phase vote (Prepare / Pre-Commit / Commit) from one validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub sender_id: PeerId,
    pub timestamp_ms: u64,
    pub view: u64,
    pub height: u64,
    pub block_hash: Hash,
    pub phase: u8,
    pub voter_sig: BlsSignature,
    pub voter_pub: BlsPublicKey,
}

/// A vote to move to a new view, carrying the sender's current view for
/// diagnostics (only `proposed_view` is signed over).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewChange {
    pub sender_id: PeerId,
    pub timestamp_ms: u64,
    pub current_view: u64,
    pub proposed_view: u64,
    pub voter_sig: BlsSignature,
    pub voter_pub: BlsPublicKey,
}

/// Internal, to-orchestrator notification that a height has finalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizationEvent {
    pub height: u64,
    pub block_hash: Hash,
    pub block_data: Vec<u8>,
    pub commit_bitmap: u64,
}
