//! Pluggable acknowledgement signing.
//!
//! A vote's acknowledgement is produced by [`Signer::sign`] over the vote
//! payload and checked by [`Signer::verify`] on every replica that tallies
//! or receives a certificate. Two implementations ship:
//!
//! - [`MockSigner`]: keyless, deterministic digests for simulation.
//! - [`Ed25519Signer`]: real signatures against a public-key roster.

use std::collections::HashMap;
use std::fmt;

use crate::crypto::hash::sha256;
use crate::crypto::keys::{ValidatorKeypair, ValidatorPublicKey, ValidatorSignature};

/// Hex-encoded acknowledgement carried in votes and certificates.
pub type Ack = String;

/// Signs on behalf of one validator and verifies any validator's acks.
pub trait Signer: Send + Sync {
    /// Validator id this signer acts for.
    fn node_id(&self) -> &str;

    fn sign(&self, data: &[u8]) -> Ack;

    /// Whether `ack` is `validator`'s acknowledgement of `data`.
    fn verify(&self, ack: &str, data: &[u8], validator: &str) -> bool;
}

// ---------------------------------------------------------------------------
// MockSigner
// ---------------------------------------------------------------------------

/// Deterministic stand-in: `ack = hex(sha256(validator || 0x00 || data))`.
///
/// Anyone can forge it. Use only where every participant is trusted.
#[derive(Debug, Clone)]
pub struct MockSigner {
    id: String,
}

impl MockSigner {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    fn digest(validator: &str, data: &[u8]) -> Ack {
        let mut preimage = Vec::with_capacity(validator.len() + 1 + data.len());
        preimage.extend_from_slice(validator.as_bytes());
        preimage.push(0x00);
        preimage.extend_from_slice(data);
        hex::encode(sha256(&preimage))
    }
}

impl Signer for MockSigner {
    fn node_id(&self) -> &str {
        &self.id
    }

    fn sign(&self, data: &[u8]) -> Ack {
        Self::digest(&self.id, data)
    }

    fn verify(&self, ack: &str, data: &[u8], validator: &str) -> bool {
        Self::digest(validator, data) == ack
    }
}

// ---------------------------------------------------------------------------
// Ed25519Signer
// ---------------------------------------------------------------------------

/// Ed25519 signatures, verified against a roster of validator public keys.
#[derive(Clone)]
pub struct Ed25519Signer {
    id: String,
    keypair: ValidatorKeypair,
    roster: HashMap<String, ValidatorPublicKey>,
}

impl Ed25519Signer {
    pub fn new(
        id: impl Into<String>,
        keypair: ValidatorKeypair,
        roster: HashMap<String, ValidatorPublicKey>,
    ) -> Self {
        Self {
            id: id.into(),
            keypair,
            roster,
        }
    }

    /// Generates fresh keypairs for `ids` and returns one signer per id, all
    /// sharing the same roster.
    pub fn generate_cluster<I, S>(ids: I) -> Vec<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keyed: Vec<(String, ValidatorKeypair)> = ids
            .into_iter()
            .map(|id| (id.into(), ValidatorKeypair::generate()))
            .collect();
        let roster: HashMap<String, ValidatorPublicKey> = keyed
            .iter()
            .map(|(id, kp)| (id.clone(), kp.public_key()))
            .collect();
        keyed
            .into_iter()
            .map(|(id, kp)| Self::new(id, kp, roster.clone()))
            .collect()
    }

    pub fn public_key(&self) -> ValidatorPublicKey {
        self.keypair.public_key()
    }
}

impl fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ed25519Signer")
            .field("id", &self.id)
            .field("roster", &self.roster.len())
            .finish()
    }
}

impl Signer for Ed25519Signer {
    fn node_id(&self) -> &str {
        &self.id
    }

    fn sign(&self, data: &[u8]) -> Ack {
        self.keypair.sign(data).to_hex()
    }

    fn verify(&self, ack: &str, data: &[u8], validator: &str) -> bool {
        let Some(key) = self.roster.get(validator) else {
            return false;
        };
        match ValidatorSignature::from_hex(ack) {
            Ok(signature) => key.verify(data, &signature),
            Err(_) => false,
        }
    }
}
