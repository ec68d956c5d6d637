//! Consensus error types.

use thiserror::Error;

use super::certificate::CertificateError;
use crate::ledger::{IntegrityFault, LedgerError};

/// Why a replica refused a message or a step.
///
/// Everything except an integrity fault is a local drop: logged, counted,
/// never propagated past the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsensusError {
    /// Message for a view other than the current one.
    #[error("message for view {view} while at view {current}")]
    StaleView { view: u64, current: u64 },

    #[error("{sender} is not the primary of view {view}")]
    UnauthorizedProposer { sender: String, view: u64 },

    #[error("{0} is not in the validator set")]
    UnknownValidator(String),

    #[error("invalid acknowledgement from {0}")]
    InvalidSignature(String),

    #[error("invalid parent certificate: {0}")]
    InvalidCertificate(#[from] CertificateError),

    #[error("parent certificate does not name the block's previous hash")]
    ParentMismatch,

    #[error("declared hash {declared} does not match recomputed {computed}")]
    HashMismatch { declared: String, computed: String },

    #[error("block hash does not carry {difficulty} leading zeros")]
    InsufficientWork { difficulty: u32 },

    #[error("sealing difficulty {difficulty} exceeds the maximum of {max}")]
    UnsealableDifficulty { difficulty: u32, max: u32 },

    #[error("no seal at difficulty {difficulty} within {attempts} nonces")]
    SealExhausted { difficulty: u32, attempts: u64 },

    #[error("parent block {0} is unknown")]
    UnknownParent(String),

    #[error("block extends a branch that conflicts with committed height {height}")]
    ConflictsWithCommitted { height: u64 },

    /// The proposal builds on a certificate older than one this replica
    /// already voted on top of.
    #[error("parent certificate of view {parent_view} is below the locked view {locked_view}")]
    BelowLock { parent_view: u64, locked_view: u64 },

    #[error("already voted in view {view}")]
    DuplicateProposal { view: u64 },

    #[error("replica is stopped")]
    Stopped,

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Integrity(#[from] IntegrityFault),
}

impl ConsensusError {
    /// Only a broken chain is unrecoverable.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Integrity(_) => true,
            Self::Ledger(e) => e.is_fatal(),
            _ => false,
        }
    }

    /// The integrity fault carried by a fatal error.
    pub fn fault(&self) -> Option<&IntegrityFault> {
        match self {
            Self::Integrity(fault) | Self::Ledger(LedgerError::Integrity(fault)) => Some(fault),
            _ => None,
        }
    }

    /// Drops that happen in normal operation: late, early or repeated
    /// messages. Logged at debug level instead of warn.
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            Self::StaleView { .. }
                | Self::DuplicateProposal { .. }
                | Self::BelowLock { .. }
                | Self::Stopped
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_integrity_is_fatal() {
        let fault = IntegrityFault::new(3, "broken");
        assert!(ConsensusError::Integrity(fault.clone()).is_fatal());
        assert!(ConsensusError::Ledger(LedgerError::Integrity(fault.clone())).is_fatal());
        assert_eq!(
            ConsensusError::Ledger(LedgerError::Integrity(fault.clone())).fault(),
            Some(&fault)
        );
        assert!(!ConsensusError::StaleView { view: 2, current: 3 }.is_fatal());
        assert!(!ConsensusError::Ledger(LedgerError::ZeroMint).is_fatal());
        assert!(ConsensusError::UnknownValidator("x".into()).fault().is_none());
    }

    #[test]
    fn benign_drops() {
        assert!(ConsensusError::DuplicateProposal { view: 1 }.is_benign());
        assert!(ConsensusError::BelowLock { parent_view: 1, locked_view: 4 }.is_benign());
        assert!(!ConsensusError::ParentMismatch.is_benign());
    }
}
