//! BLS12-381 signing for consensus votes, proposals and view-changes.
//!
//! Uses the `min_pk` variant of `blst` (public keys in G1 — 48 bytes
//! compressed, signatures in G2 — 96 bytes compressed), which matches the
//! wire sizes the consensus messages carry. All signatures in this crate
//! share one domain-separation tag; chain/phase/view separation on top of
//! that is the caller's job (see `consensus::signing`).

use crate::error::{CCError, Result};
use blst::min_pk::{AggregateSignature, PublicKey, SecretKey, Signature};
use blst::BLST_ERROR;
use rand::RngCore;
use serde::{Deserialize, Serialize};

const DST: &[u8] = b"CC-CHAIN-BFT-CONSENSUS-V1_BLS12381G2_XMD:SHA-256_SSWU_RO_NUL_";

#[derive(Clone)]
pub struct BlsKeypair {
    secret: SecretKey,
}

/// 48-byte compressed G1 public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlsPublicKey(#[serde(with = "serde_bytes")] pub [u8; 48]);

/// 96-byte compressed G2 signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlsSignature(#[serde(with = "serde_bytes")] pub [u8; 96]);

impl BlsKeypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let mut ikm = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut ikm);
        let secret = SecretKey::key_gen(&ikm, &[]).expect("32-byte ikm is always valid");
        Self { secret }
    }

    /// Derive from fixed key material (e.g. a persisted validator key).
    pub fn from_ikm(ikm: &[u8]) -> Result<Self> {
        let secret =
            SecretKey::key_gen(ikm, &[]).map_err(|e| CCError::Crypto(format!("{e:?}")))?;
        Ok(Self { secret })
    }

    pub fn public_key(&self) -> BlsPublicKey {
        BlsPublicKey(self.secret.sk_to_pk().to_bytes())
    }

    /// Sign a domain-separated consensus payload (see `consensus::signing`).
    pub fn sign(&self, payload: &[u8]) -> BlsSignature {
        BlsSignature(self.secret.sign(payload, DST, &[]).to_bytes())
    }
}

impl BlsPublicKey {
    pub fn to_bytes(&self) -> [u8; 48] {
        self.0
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 48] = bytes
            .try_into()
            .map_err(|_| CCError::InvalidInput("bls public key must be 48 bytes".into()))?;
        // Validate it actually decodes to a curve point before accepting it.
        PublicKey::from_bytes(&arr).map_err(|e| CCError::Crypto(format!("{e:?}")))?;
        Ok(BlsPublicKey(arr))
    }
}

impl BlsSignature {
    pub fn to_bytes(&self) -> [u8; 96] {
        self.0
    }

    /// Verify a single signature over `payload`.
    pub fn verify(&self, payload: &[u8], public_key: &BlsPublicKey) -> bool {
        let (Ok(pk), Ok(sig)) = (
            PublicKey::from_bytes(&public_key.0),
            Signature::from_bytes(&self.0),
        ) else {
            return false;
        };
        sig.verify(true, payload, DST, &[], &pk, true) == BLST_ERROR::BLST_SUCCESS
    }
}

/// Aggregate a set of signatures that all signed the *same* payload
/// (e.g. every Commit vote for one round's canonical tuple) into one
/// BLS signature.
pub fn aggregate(signatures: &[BlsSignature]) -> Result<BlsSignature> {
    if signatures.is_empty() {
        return Err(CCError::InvalidInput("cannot aggregate zero signatures".into()));
    }
    let parsed: Vec<Signature> = signatures
        .iter()
        .map(|s| Signature::from_bytes(&s.0).map_err(|e| CCError::Crypto(format!("{e:?}"))))
        .collect::<Result<_>>()?;
    let refs: Vec<&Signature> = parsed.iter().collect();
    let agg = AggregateSignature::aggregate(&refs, true)
        .map_err(|e| CCError::Crypto(format!("{e:?}")))?;
    Ok(BlsSignature(agg.to_signature().to_bytes()))
}

/// Verify an aggregate signature against the ordered multiset of public
/// keys whose signatures were combined, all over the same `payload`.
pub fn fast_aggregate_verify(
    signature: &BlsSignature,
    payload: &[u8],
    public_keys: &[BlsPublicKey],
) -> bool {
    if public_keys.is_empty() {
        return false;
    }
    let Ok(sig) = Signature::from_bytes(&signature.0) else {
        return false;
    };
    let parsed: Option<Vec<PublicKey>> = public_keys
        .iter()
        .map(|pk| PublicKey::from_bytes(&pk.0).ok())
        .collect();
    let Some(parsed) = parsed else {
        return false;
    };
    let refs: Vec<&PublicKey> = parsed.iter().collect();
    sig.fast_aggregate_verify(true, payload, DST, &refs) == BLST_ERROR::BLST_SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_roundtrips() {
        let kp = BlsKeypair::generate();
        let payload = b"chain=7|phase=1|view=3|height=10|hash=...";
        let sig = kp.sign(payload);
        assert!(sig.verify(payload, &kp.public_key()));
        assert!(!sig.verify(b"different payload", &kp.public_key()));
    }

    #[test]
    fn aggregate_verifies_against_public_key_set() {
        let keypairs: Vec<_> = (0..4).map(|_| BlsKeypair::generate()).collect();
        let payload = b"same payload for every voter";
        let sigs: Vec<_> = keypairs.iter().map(|k| k.sign(payload)).collect();
        let agg = aggregate(&sigs).unwrap();
        let pks: Vec<_> = keypairs.iter().map(|k| k.public_key()).collect();
        assert!(fast_aggregate_verify(&agg, payload, &pks));

        let mut wrong_pks = pks.clone();
        wrong_pks.pop();
        assert!(!fast_aggregate_verify(&agg, payload, &wrong_pks));
    }
}
