use crate::error::{CCError, Result};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

/// 32-byte hash digest
pub type Hash = [u8; 32];

/// Ed25519 public key, used for peer/node identity (not consensus voting —
/// consensus signatures are BLS, see [`crate::bls`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CCPublicKey(#[serde(with = "serde_bytes")] pub [u8; 32]);

/// Ed25519 signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CCSignature(#[serde(with = "serde_bytes")] pub [u8; 64]);

/// Ed25519 keypair.
#[derive(Debug, Clone)]
pub struct CCKeypair {
    signing_key: SigningKey,
}

impl CCKeypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        let signing_key = SigningKey::from_bytes(&rand::Rng::gen(&mut csprng));
        Self { signing_key }
    }

    /// Create keypair from secret key bytes.
    pub fn from_secret_key(secret_bytes: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(secret_bytes),
        }
    }

    pub fn public_key(&self) -> CCPublicKey {
        CCPublicKey(self.signing_key.verifying_key().to_bytes())
    }

    pub fn sign(&self, data: &[u8]) -> CCSignature {
        CCSignature(self.signing_key.sign(data).to_bytes())
    }
}

impl CCPublicKey {
    pub fn verify(&self, data: &[u8], signature: &CCSignature) -> bool {
        if let Ok(verifying_key) = VerifyingKey::from_bytes(&self.0) {
            if let Ok(sig) = Signature::try_from(&signature.0[..]) {
                return verifying_key.verify(data, &sig).is_ok();
            }
        }
        false
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(CCError::InvalidInput("invalid public key length".to_string()));
        }
        let mut key_bytes = [0u8; 32];
        key_bytes.copy_from_slice(bytes);
        Ok(CCPublicKey(key_bytes))
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl Default for CCPublicKey {
    fn default() -> Self {
        CCPublicKey([0u8; 32])
    }
}

/// BLAKE3 hash of a single buffer.
pub fn hash(data: &[u8]) -> Hash {
    blake3::hash(data).into()
}

/// BLAKE3 hash over several buffers without concatenating them first.
pub fn hash_multiple(data_pieces: &[&[u8]]) -> Hash {
    let mut hasher = blake3::Hasher::new();
    for piece in data_pieces {
        hasher.update(piece);
    }
    hasher.finalize().into()
}
