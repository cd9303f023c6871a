//! Canonical, domain-separated signing payloads for votes and view-changes.
//!
//! Both payloads are prefixed with `chain_id` so a signature produced on
//! one chain can never be replayed as valid on another.

use cc_core::Hash;

pub const PHASE_PREPARE: u8 = 1;
pub const PHASE_PRE_COMMIT: u8 = 2;
pub const PHASE_COMMIT: u8 = 3;
const VIEW_CHANGE_TAG: u8 = 0xFF;

/// `chain_id (u32 LE) || phase_tag (1B) || view (u64 LE) || height (u64 LE) || block_hash (32B)` — 53 bytes.
pub fn vote_payload(chain_id: u32, phase: u8, view: u64, height: u64, block_hash: &Hash) -> [u8; 53] {
    let mut buf = [0u8; 53];
    buf[0..4].copy_from_slice(&chain_id.to_le_bytes());
    buf[4] = phase;
    buf[5..13].copy_from_slice(&view.to_le_bytes());
    buf[13..21].copy_from_slice(&height.to_le_bytes());
    buf[21..53].copy_from_slice(block_hash);
    buf
}

/// `chain_id (u32 LE) || 0xFF || proposed_view (u64 LE)` — 13 bytes.
pub fn view_change_payload(chain_id: u32, proposed_view: u64) -> [u8; 13] {
    let mut buf = [0u8; 13];
    buf[0..4].copy_from_slice(&chain_id.to_le_bytes());
    buf[4] = VIEW_CHANGE_TAG;
    buf[5..13].copy_from_slice(&proposed_view.to_le_bytes());
    buf
}

/// Decode a vote payload back into its fields. Only used by tests to
/// assert the encoder is bijective; the engine never needs to decode its
/// own payloads since it builds and verifies against freshly-encoded
/// bytes on both ends.
pub fn decode_vote_payload(buf: &[u8; 53]) -> (u32, u8, u64, u64, Hash) {
    let chain_id = u32::from_le_bytes(buf[0..4].try_into().unwrap());
    let phase = buf[4];
    let view = u64::from_le_bytes(buf[5..13].try_into().unwrap());
    let height = u64::from_le_bytes(buf[13..21].try_into().unwrap());
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&buf[21..53]);
    (chain_id, phase, view, height, hash)
}

pub fn decode_view_change_payload(buf: &[u8; 13]) -> (u32, u8, u64) {
    let chain_id = u32::from_le_bytes(buf[0..4].try_into().unwrap());
    let tag = buf[4];
    let proposed_view = u64::from_le_bytes(buf[5..13].try_into().unwrap());
    (chain_id, tag, proposed_view)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vote_payload_round_trips() {
        let hash = [7u8; 32];
        let encoded = vote_payload(7, PHASE_PREPARE, 3, 10, &hash);
        assert_eq!(encoded.len(), 53);
        let (chain_id, phase, view, height, decoded_hash) = decode_vote_payload(&encoded);
        assert_eq!((chain_id, phase, view, height, decoded_hash), (7, PHASE_PREPARE, 3, 10, hash));
    }

    #[test]
    fn view_change_payload_round_trips() {
        let encoded = view_change_payload(7, 42);
        assert_eq!(encoded.len(), 13);
        let (chain_id, tag, proposed_view) = decode_view_change_payload(&encoded);
        assert_eq!((chain_id, tag, proposed_view), (7, 0xFF, 42));
    }

    #[test]
    fn different_chain_ids_produce_different_payloads() {
        let hash = [1u8; 32];
        assert_ne!(
            vote_payload(1, PHASE_COMMIT, 1, 1, &hash),
            vote_payload(2, PHASE_COMMIT, 1, 1, &hash)
        );
    }
}
