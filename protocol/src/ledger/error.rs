//! Ledger error types.

use thiserror::Error;

/// A broken hash chain in committed history.
///
/// This is the one unrecoverable condition in the system: the ledger can no
/// longer prove its own history, so the owning replica stops and the fault
/// is surfaced to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("chain integrity fault at height {height}: {reason}")]
pub struct IntegrityFault {
    /// Height of the first block that failed the audit.
    pub height: u64,
    /// What did not match.
    pub reason: String,
}

impl IntegrityFault {
    pub fn new(height: u64, reason: impl Into<String>) -> Self {
        Self {
            height,
            reason: reason.into(),
        }
    }
}

/// Why the ledger refused a block, a batch or an issuance.
///
/// Every variant except [`LedgerError::Integrity`] leaves ledger state
/// untouched and is local to the rejected operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// `previous_hash` does not name the current tip.
    #[error("block {index} does not extend the tip: previous hash {found}, tip {expected}")]
    BrokenLink {
        index: u64,
        expected: String,
        found: String,
    },

    /// Stored hash does not match the recomputed one.
    #[error("block {index} hash mismatch: stored {stored}, computed {computed}")]
    HashMismatch {
        index: u64,
        stored: String,
        computed: String,
    },

    /// Index is not exactly tip height + 1.
    #[error("block index {found} does not follow tip height {tip}")]
    IndexGap { tip: u64, found: u64 },

    /// A sender's working balance cannot cover the transfer.
    #[error("insufficient funds for transaction {tx_id}: {account} has {available}, needs {required}")]
    InsufficientFunds {
        tx_id: String,
        account: String,
        available: u64,
        required: u64,
    },

    /// A `Mint` transaction that does not come from the reserved account.
    #[error("transaction {tx_id} is a mint not issued by the reserved account")]
    InvalidMint { tx_id: String },

    /// A non-mint transfer touches the reserved issuance account.
    #[error("transaction {tx_id} touches the reserved issuance account")]
    ReservedAccount { tx_id: String },

    /// The stored id was not derived from the transaction's content.
    #[error("transaction id {tx_id} does not match its content")]
    InvalidId { tx_id: String },

    /// The id is already committed, or repeats within one block.
    #[error("transaction {tx_id} is already recorded")]
    DuplicateTransaction { tx_id: String },

    /// A credit would overflow the recipient's balance.
    #[error("credit from transaction {tx_id} overflows the recipient balance")]
    Overflow { tx_id: String },

    /// Issuance must create money.
    #[error("mint amount must be positive")]
    ZeroMint,

    /// Committed history is corrupt.
    #[error(transparent)]
    Integrity(#[from] IntegrityFault),
}

impl LedgerError {
    /// The hash or previous-hash checks failed. A second `add_block` of an
    /// already-appended block always lands here.
    pub fn is_chain_link(&self) -> bool {
        matches!(
            self,
            Self::BrokenLink { .. } | Self::HashMismatch { .. } | Self::IndexGap { .. }
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Integrity(_))
    }
}
