//! CC Chain Core Components
//!
//! Fundamental building blocks shared by the consensus core:
//! - 256-bit stake arithmetic
//! - Ed25519 peer identity keys and BLAKE3 hashing
//! - BLS12-381 signing or the consensus vote/proposal/view-change payloads
//! - Error taxonomy
//!
//! Block bodies, transaction formats, state trie layout, storage and the
//! wire/gossip transport are owned by other crates in the node and are
//! deliberately not modeled here; the consensus core only ever sees a
//! block as an opaque hash plus opaque bytes.

pub mod bls;
pub mod crypto;
pub mod error;
pub mod u256;

pub use bls::{BlsKeypair, BlsPublicKey, BlsSignature};
pub use crypto::{hash, CCKeypair, CCPublicKey, CCSignature, Hash};
pub use error::{CCError, Result};
pub use u256::U256;
