//! # Block Structure
//!
//! A block is one ordered batch of transfers plus the link that chains it
//! to its predecessor.
//!
//! ## Block Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  index: u64            (0 = genesis, dense)   │
//! │  previous_hash: [u8; 32]                      │
//! │  transactions: Vec<Transaction>               │
//! │  timestamp: u64        (unix ms)              │
//! │  nonce: u64            (sealing placeholder)  │
//! │  parent_qc: Option<QuorumCertificate>         │
//! │  hash: [u8; 32]        (BLAKE3, see below)    │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Hash Computation
//!
//! The hash covers `index || previous_hash || tx_count || tx digests ||
//! timestamp || nonce`. The parent certificate is carried alongside but is
//! not part of the digest, and neither is any transaction's status.

use serde::{Deserialize, Serialize};

use super::error::LedgerError;
use crate::config::{GENESIS_PREVIOUS_HASH, GENESIS_TIMESTAMP_MS, MAX_POW_DIFFICULTY};
use crate::consensus::certificate::QuorumCertificate;
use crate::crypto::hash::{blake3_hash, leading_hex_zeros, short_hex, to_hex};
use crate::transaction::Transaction;

/// A 32-byte block digest.
pub type BlockHash = [u8; 32];

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

/// One link of the chain.
///
/// Blocks are immutable once proposed except for the transactions'
/// status, which the ledger flips to `Confirmed` on commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Height (0-indexed, genesis = 0).
    pub index: u64,
    /// Hash of the parent block. All zeros for genesis.
    pub previous_hash: BlockHash,
    /// Ordered transfers. Applied in this order.
    pub transactions: Vec<Transaction>,
    /// Unix timestamp (milliseconds) at construction.
    pub timestamp: u64,
    /// Sealing nonce. Not security-critical.
    pub nonce: u64,
    /// Certificate of the parent block. `None` only for genesis.
    pub parent_qc: Option<QuorumCertificate>,
    /// Digest of the content fields.
    pub hash: BlockHash,
}

impl Block {
    /// The height-0 root: no transactions, zeroed previous hash, fixed
    /// timestamp, so every replica derives the same genesis hash.
    pub fn genesis() -> Self {
        Self::assemble(
            0,
            GENESIS_PREVIOUS_HASH,
            Vec::new(),
            GENESIS_TIMESTAMP_MS,
            None,
        )
    }

    /// Builds a child of `parent` stamped with the current time.
    pub fn new(
        parent: &Block,
        transactions: Vec<Transaction>,
        parent_qc: QuorumCertificate,
    ) -> Self {
        let timestamp = chrono::Utc::now().timestamp_millis().max(0) as u64;
        Self::assemble(
            parent.index + 1,
            parent.hash,
            transactions,
            timestamp,
            Some(parent_qc),
        )
    }

    /// Builds a block from explicit fields and computes its hash.
    pub fn assemble(
        index: u64,
        previous_hash: BlockHash,
        transactions: Vec<Transaction>,
        timestamp: u64,
        parent_qc: Option<QuorumCertificate>,
    ) -> Self {
        let mut block = Block {
            index,
            previous_hash,
            transactions,
            timestamp,
            nonce: 0,
            parent_qc,
            hash: [0u8; 32],
        };
        block.hash = block.compute_hash();
        block
    }

    /// Recomputes the digest from the content fields.
    pub fn compute_hash(&self) -> BlockHash {
        compute_block_hash(
            self.index,
            &self.previous_hash,
            &self.transactions,
            self.timestamp,
            self.nonce,
        )
    }

    /// Checks that the stored hash matches the content.
    pub fn verify_hash(&self) -> Result<(), LedgerError> {
        let computed = self.compute_hash();
        if computed != self.hash {
            return Err(LedgerError::HashMismatch {
                index: self.index,
                stored: to_hex(&self.hash),
                computed: to_hex(&computed),
            });
        }
        Ok(())
    }

    /// Searches at most `max_attempts` nonces for a hash with
    /// `difficulty` leading hex zeros. Returns whether the block is sealed.
    ///
    /// Difficulties above [`MAX_POW_DIFFICULTY`] are refused without
    /// searching.
    pub fn mine(&mut self, difficulty: u32, max_attempts: u64) -> bool {
        if difficulty > MAX_POW_DIFFICULTY {
            return false;
        }
        let mut attempts = 0;
        while !self.meets_difficulty(difficulty) {
            if attempts == max_attempts {
                return false;
            }
            attempts += 1;
            self.nonce = self.nonce.wrapping_add(1);
            self.hash = self.compute_hash();
        }
        true
    }

    pub fn meets_difficulty(&self, difficulty: u32) -> bool {
        leading_hex_zeros(&self.hash) >= difficulty
    }

    /// Hash of the block the parent certificate names.
    pub fn parent_qc_hash(&self) -> Option<&BlockHash> {
        self.parent_qc.as_ref().map(|qc| &qc.block_hash)
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }

    pub fn tx_count(&self) -> usize {
        self.transactions.len()
    }

    pub fn hash_hex(&self) -> String {
        to_hex(&self.hash)
    }

    /// Abbreviated hash for log lines.
    pub fn short_hash(&self) -> String {
        short_hex(&self.hash)
    }
}

// ---------------------------------------------------------------------------
// Hash Computation
// ---------------------------------------------------------------------------

fn compute_block_hash(
    index: u64,
    previous_hash: &BlockHash,
    transactions: &[Transaction],
    timestamp: u64,
    nonce: u64,
) -> BlockHash {
    let mut preimage = Vec::with_capacity(64 + transactions.len() * 32);
    preimage.extend_from_slice(&index.to_le_bytes());
    preimage.extend_from_slice(previous_hash);
    preimage.extend_from_slice(&(transactions.len() as u64).to_le_bytes());
    for tx in transactions {
        preimage.extend_from_slice(&tx.digest());
    }
    preimage.extend_from_slice(&timestamp.to_le_bytes());
    preimage.extend_from_slice(&nonce.to_le_bytes());
    blake3_hash(&preimage)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
