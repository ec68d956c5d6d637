//! Quorum certificates.
//!
//! A certificate is the aggregated proof that at least `2f + 1` validators
//! acknowledged one `(view, block hash)` pair. Each acknowledgement is a
//! [`Signer`] output over [`vote_payload`].
//!
//! The genesis certificate is the one exception: view 0, the genesis hash,
//! no acknowledgements. It bootstraps `high_qc` and `high_commit_qc` and is
//! accepted for the genesis hash only.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::signer::{Ack, Signer};
use super::validator_set::ValidatorSet;
use crate::crypto::hash::short_hex;
use crate::ledger::BlockHash;

/// Bytes every validator signs when voting: `view (u64 LE) || block hash`.
pub fn vote_payload(view: u64, block_hash: &BlockHash) -> Vec<u8> {
    let mut payload = Vec::with_capacity(40);
    payload.extend_from_slice(&view.to_le_bytes());
    payload.extend_from_slice(block_hash);
    payload
}

/// Why a certificate does not prove what it claims.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CertificateError {
    #[error("certificate without acknowledgements names a non-genesis block")]
    NotGenesis,
    #[error("certificate acknowledged by unknown validator {0}")]
    UnknownSigner(String),
    #[error("certificate has {have} acknowledgements, needs {need}")]
    InsufficientAcks { have: usize, need: usize },
    #[error("certificate carries an invalid acknowledgement from {0}")]
    InvalidAck(String),
}

/// Immutable proof that a quorum voted for `block_hash` in `view`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumCertificate {
    pub view: u64,
    pub block_hash: BlockHash,
    /// Validator id → acknowledgement. Keyed by id, so one validator
    /// counts once.
    pub acks: BTreeMap<String, Ack>,
}

impl QuorumCertificate {
    /// The bootstrap certificate for the genesis block.
    pub fn genesis(genesis_hash: BlockHash) -> Self {
        Self {
            view: 0,
            block_hash: genesis_hash,
            acks: BTreeMap::new(),
        }
    }

    pub fn new(view: u64, block_hash: BlockHash, acks: BTreeMap<String, Ack>) -> Self {
        Self {
            view,
            block_hash,
            acks,
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.view == 0 && self.acks.is_empty()
    }

    /// Whether `self` is a newer certificate than `other`. The genesis
    /// certificate ranks below every formed one, including view 0.
    pub fn outranks(&self, other: &QuorumCertificate) -> bool {
        !self.is_genesis() && (other.is_genesis() || self.view > other.view)
    }

    pub fn signer_count(&self) -> usize {
        self.acks.len()
    }

    pub fn payload(&self) -> Vec<u8> {
        vote_payload(self.view, &self.block_hash)
    }

    /// Checks the certificate against the roster.
    ///
    /// With `check_signatures` off only membership and the quorum size are
    /// checked.
    pub fn verify(
        &self,
        validators: &ValidatorSet,
        signer: &dyn Signer,
        genesis_hash: &BlockHash,
        check_signatures: bool,
    ) -> Result<(), CertificateError> {
        if self.is_genesis() {
            return if &self.block_hash == genesis_hash {
                Ok(())
            } else {
                Err(CertificateError::NotGenesis)
            };
        }

        let need = validators.quorum_threshold();
        if self.acks.len() < need {
            return Err(CertificateError::InsufficientAcks {
                have: self.acks.len(),
                need,
            });
        }

        let payload = self.payload();
        for (validator, ack) in &self.acks {
            if !validators.contains(validator) {
                return Err(CertificateError::UnknownSigner(validator.clone()));
            }
            if check_signatures && !signer.verify(ack, &payload, validator) {
                return Err(CertificateError::InvalidAck(validator.clone()));
            }
        }
        Ok(())
    }

    /// Abbreviated certified hash for log lines.
    pub fn short_hash(&self) -> String {
        short_hex(&self.block_hash)
    }
}
