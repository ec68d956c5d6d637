//! Transaction construction via the builder pattern.
//!
//! [`TransactionBuilder`] sets the required fields, stamps a timestamp and
//! derives the content id. The result starts life as
//! [`TransactionStatus::Created`].

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::types::{TransactionStatus, TransactionType};
use crate::config::{MINT_ACCOUNT, MINT_INSTITUTION};
use crate::crypto::hash::double_sha256;

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// A single value transfer between two accounts.
///
/// The `id` is `hex(double_sha256(canonical_bytes))` and never covers
/// `status`, so the id stays stable while the status moves through its
/// lifecycle. Blocks hash transaction ids, not whole records, for the
/// same reason.
///
/// # Canonical Byte Format
///
/// kind, sender, recipient, institution and memo are written as UTF-8
/// followed by a `0x00` separator; amount and timestamp as little-endian
/// `u64`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Content-derived id.
    pub id: String,

    /// What the transfer represents.
    pub kind: TransactionType,

    /// Debited account. [`MINT_ACCOUNT`] for issuance.
    pub sender: String,

    /// Credited account.
    pub recipient: String,

    /// Amount in the smallest currency unit.
    pub amount: u64,

    /// Financial institution that originated the transfer.
    pub institution: String,

    /// Unix timestamp in milliseconds at creation.
    pub timestamp: u64,

    /// Lifecycle state. The only field that changes after creation.
    pub status: TransactionStatus,

    /// Free-form additional data (contract reference, offline voucher id).
    pub memo: Option<String>,
}

impl Transaction {
    /// Canonical bytes used for id derivation.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128);

        buf.extend_from_slice(self.kind.code().as_bytes());
        buf.push(0x00);
        buf.extend_from_slice(self.sender.as_bytes());
        buf.push(0x00);
        buf.extend_from_slice(self.recipient.as_bytes());
        buf.push(0x00);
        buf.extend_from_slice(&self.amount.to_le_bytes());
        buf.extend_from_slice(self.institution.as_bytes());
        buf.push(0x00);
        buf.extend_from_slice(&self.timestamp.to_le_bytes());

        match self.memo {
            Some(ref memo) => {
                buf.push(0x01);
                buf.extend_from_slice(memo.as_bytes());
            }
            None => buf.push(0x00),
        }

        buf
    }

    /// Recomputes the id from the current field values.
    pub fn compute_id(&self) -> String {
        hex::encode(double_sha256(&self.canonical_bytes()))
    }

    /// Digest fed into the block hash. Covers the content fields only, so a
    /// status change never alters a block hash.
    pub fn digest(&self) -> [u8; 32] {
        double_sha256(&self.canonical_bytes())
    }

    /// The stored id matches the content.
    pub fn has_valid_id(&self) -> bool {
        self.id == self.compute_id()
    }

    pub fn is_mint(&self) -> bool {
        self.kind == TransactionType::Mint
    }

    /// Whether `account` is either party.
    pub fn involves(&self, account: &str) -> bool {
        self.sender == account || self.recipient == account
    }

    /// Moves the status forward. Illegal moves are refused and leave the
    /// status unchanged.
    pub fn transition(&mut self, next: TransactionStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }
}

// ---------------------------------------------------------------------------
// TransactionBuilder
// ---------------------------------------------------------------------------

/// Fluent builder for [`Transaction`].
///
/// ```rust
/// use settlenet_protocol::transaction::{TransactionBuilder, TransactionType};
///
/// let tx = TransactionBuilder::transfer("USER_000001", "USER_000002", 300)
///     .kind(TransactionType::C2B)
///     .institution("FO_001")
///     .build();
/// assert!(tx.has_valid_id());
/// ```
///
/// Defaults: kind `C2C`, empty institution, timestamp = now (UTC).
pub struct TransactionBuilder {
    kind: TransactionType,
    sender: String,
    recipient: String,
    amount: u64,
    institution: String,
    timestamp: Option<u64>,
    memo: Option<String>,
}

impl TransactionBuilder {
    /// Starts a transfer of `amount` from `sender` to `recipient`.
    pub fn transfer(sender: &str, recipient: &str, amount: u64) -> Self {
        Self {
            kind: TransactionType::C2C,
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            amount,
            institution: String::new(),
            timestamp: None,
            memo: None,
        }
    }

    /// Starts an issuance of `amount` to `recipient` from the reserved
    /// mint account.
    pub fn mint(recipient: &str, amount: u64) -> Self {
        Self::transfer(MINT_ACCOUNT, recipient, amount)
            .kind(TransactionType::Mint)
            .institution(MINT_INSTITUTION)
    }

    pub fn kind(mut self, kind: TransactionType) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the originating institution id.
    pub fn institution(mut self, institution: &str) -> Self {
        self.institution = institution.to_string();
        self
    }

    /// Sets the timestamp explicitly (Unix milliseconds).
    ///
    /// If not called, `build()` uses the current UTC time.
    pub fn timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn memo(mut self, memo: &str) -> Self {
        self.memo = Some(memo.to_string());
        self
    }

    /// Consumes the builder and produces a `Created` transaction with its
    /// id filled in.
    pub fn build(self) -> Transaction {
        let timestamp = self
            .timestamp
            .unwrap_or_else(|| Utc::now().timestamp_millis().max(0) as u64);

        let mut tx = Transaction {
            id: String::new(),
            kind: self.kind,
            sender: self.sender,
            recipient: self.recipient,
            amount: self.amount,
            institution: self.institution,
            timestamp,
            status: TransactionStatus::Created,
            memo: self.memo,
        };

        tx.id = tx.compute_id();
        tx
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
