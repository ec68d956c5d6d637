//! # Validator Keys
//!
//! Ed25519 key material for validators that run with real vote
//! signatures. Simulations can skip this entirely and use the mock signer.
//!
//! Secret key bytes are never logged or included in `Debug` output.

use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors from key parsing.
#[derive(Debug, Error)]
pub enum KeyError {
    /// Secret key hex was malformed or the wrong length.
    #[error("invalid secret key bytes: expected 32 bytes of hex")]
    InvalidSecretKey,

    /// Public key bytes do not decode to an Ed25519 point.
    #[error("invalid public key bytes: not a valid Ed25519 point")]
    InvalidPublicKey,

    /// Signature hex was malformed or the wrong length.
    #[error("invalid signature encoding")]
    InvalidSignature,
}

// ---------------------------------------------------------------------------
// ValidatorKeypair
// ---------------------------------------------------------------------------

/// An Ed25519 signing keypair held by one validator.
pub struct ValidatorKeypair {
    signing_key: SigningKey,
}

impl ValidatorKeypair {
    /// Generates a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Deterministic keypair from a 32-byte seed. Test and simulation use.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Parses a hex-encoded 32-byte secret key.
    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_str).map_err(|_| KeyError::InvalidSecretKey)?;
        let seed: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidSecretKey)?;
        Ok(Self::from_seed(&seed))
    }

    pub fn public_key(&self) -> ValidatorPublicKey {
        ValidatorPublicKey {
            bytes: self.signing_key.verifying_key().to_bytes(),
        }
    }

    pub fn sign(&self, message: &[u8]) -> ValidatorSignature {
        ValidatorSignature {
            bytes: self.signing_key.sign(message).to_bytes().to_vec(),
        }
    }
}

impl Clone for ValidatorKeypair {
    fn clone(&self) -> Self {
        Self::from_seed(&self.signing_key.to_bytes())
    }
}

impl fmt::Debug for ValidatorKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValidatorKeypair(pub={})", self.public_key().to_hex())
    }
}

// ---------------------------------------------------------------------------
// ValidatorPublicKey
// ---------------------------------------------------------------------------

/// A validator's Ed25519 verifying key.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidatorPublicKey {
    bytes: [u8; 32],
}

impl ValidatorPublicKey {
    /// Parses and validates a hex-encoded public key.
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s).map_err(|_| KeyError::InvalidPublicKey)?;
        let bytes: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidPublicKey)?;
        VerifyingKey::from_bytes(&bytes).map_err(|_| KeyError::InvalidPublicKey)?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// Verifies `signature` over `message`. Malformed keys or signatures
    /// simply fail verification.
    pub fn verify(&self, message: &[u8], signature: &ValidatorSignature) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(&self.bytes) else {
            return false;
        };
        let Ok(sig_bytes) = <[u8; 64]>::try_from(signature.bytes.as_slice()) else {
            return false;
        };
        verifying_key
            .verify(message, &DalekSignature::from_bytes(&sig_bytes))
            .is_ok()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }
}

impl fmt::Display for ValidatorPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for ValidatorPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValidatorPublicKey({})", &self.to_hex()[..16])
    }
}

// ---------------------------------------------------------------------------
// ValidatorSignature
// ---------------------------------------------------------------------------

/// A detached Ed25519 signature.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSignature {
    bytes: Vec<u8>,
}

impl ValidatorSignature {
    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s).map_err(|_| KeyError::InvalidSignature)?;
        if bytes.len() != 64 {
            return Err(KeyError::InvalidSignature);
        }
        Ok(Self { bytes })
    }
}

impl fmt::Debug for ValidatorSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex_str = self.to_hex();
        write!(f, "ValidatorSignature({}…)", &hex_str[..hex_str.len().min(16)])
    }
}
