//! # Ledger
//!
//! The append-only chain of committed blocks and the balance map derived
//! from it. This is the only place balances change.
//!
//! ## Invariants
//!
//! 1. `blocks[0]` is genesis and `blocks[i].previous_hash ==
//!    blocks[i-1].hash` with every stored hash matching its content.
//! 2. `balances` is exactly the replay, in commit order, of every issued
//!    mint and every transaction of every committed block.
//! 3. No committed application leaves a non-mint sender negative.
//!
//! A rejected operation leaves all state untouched. Validation always runs
//! on a working copy and the result is swapped in only when every check
//! has passed.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error};

use super::block::{Block, BlockHash};
use super::error::{IntegrityFault, LedgerError};
use crate::config::{GENESIS_PREVIOUS_HASH, MINT_ACCOUNT};
use crate::crypto::hash::to_hex;
use crate::transaction::{Transaction, TransactionBuilder, TransactionStatus};

/// Account id → balance. Ordered so snapshots are deterministic.
pub type Balances = BTreeMap<String, u64>;

/// A ledger shared behind its own lock.
///
/// Replicas that share one ledger serialize `add_block` through this lock,
/// which is separate from every replica's own state lock.
pub type SharedLedger = Arc<RwLock<Ledger>>;

/// Where a confirmed transaction lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxLocation {
    /// Position in the issuance log.
    Issued(usize),
    /// Block height and position within the block.
    Block { height: u64, position: usize },
}

/// The committed chain plus derived balances.
#[derive(Debug, Clone)]
pub struct Ledger {
    blocks: Vec<Block>,
    balances: Balances,
    issuance: Vec<Transaction>,
    tx_index: HashMap<String, TxLocation>,
    block_index: HashMap<BlockHash, u64>,
    /// Commit order across issuance and blocks.
    journal: Vec<TxLocation>,
    minted_total: u128,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    /// A ledger holding only the genesis block, with no balances.
    pub fn new() -> Self {
        let genesis = Block::genesis();
        let mut block_index = HashMap::new();
        block_index.insert(genesis.hash, 0);
        Self {
            blocks: vec![genesis],
            balances: Balances::new(),
            issuance: Vec::new(),
            tx_index: HashMap::new(),
            block_index,
            journal: Vec::new(),
            minted_total: 0,
        }
    }

    /// A ledger wrapped for sharing.
    pub fn shared() -> SharedLedger {
        Arc::new(RwLock::new(Self::new()))
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Applies `transactions` in order to a working copy of `balances` and
    /// returns the copy.
    ///
    /// A later transaction may spend what an earlier one in the same batch
    /// credited. The first failure aborts the whole batch and nothing of
    /// the working copy survives.
    pub fn validate_batch(
        balances: &Balances,
        transactions: &[Transaction],
    ) -> Result<Balances, LedgerError> {
        let mut working = balances.clone();
        for tx in transactions {
            apply_transaction(&mut working, tx)?;
        }
        Ok(working)
    }

    /// Applies one transaction to `balances` in place. On error the map
    /// is left as it was.
    pub fn apply(balances: &mut Balances, tx: &Transaction) -> Result<(), LedgerError> {
        apply_transaction(balances, tx)
    }

    /// Rejects ids that repeat inside `transactions` or are already
    /// recorded.
    pub fn check_unique(&self, transactions: &[Transaction]) -> Result<(), LedgerError> {
        let mut seen = HashSet::with_capacity(transactions.len());
        for tx in transactions {
            if self.tx_index.contains_key(&tx.id) || !seen.insert(tx.id.as_str()) {
                return Err(LedgerError::DuplicateTransaction {
                    tx_id: tx.id.clone(),
                });
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Appends `block` and applies its transactions.
    ///
    /// Preconditions, checked in order:
    ///
    /// 1. The stored tip still verifies (otherwise [`LedgerError::Integrity`]).
    /// 2. `previous_hash` names the tip and `index` is tip + 1.
    /// 3. The stored hash matches the content.
    /// 4. No transaction id repeats or is already recorded.
    /// 5. The batch validates against the committed balances.
    ///
    /// On success every transaction is marked `Confirmed`.
    pub fn add_block(&mut self, mut block: Block) -> Result<(), LedgerError> {
        self.verify_tip()?;

        let tip = self.latest_block();
        if block.previous_hash != tip.hash {
            return Err(LedgerError::BrokenLink {
                index: block.index,
                expected: to_hex(&tip.hash),
                found: to_hex(&block.previous_hash),
            });
        }
        if block.index != tip.index + 1 {
            return Err(LedgerError::IndexGap {
                tip: tip.index,
                found: block.index,
            });
        }
        block.verify_hash()?;
        self.check_unique(&block.transactions)?;
        let next_balances = Self::validate_batch(&self.balances, &block.transactions)?;

        let height = block.index;
        for (position, tx) in block.transactions.iter_mut().enumerate() {
            tx.status = TransactionStatus::Confirmed;
            if tx.is_mint() {
                self.minted_total += u128::from(tx.amount);
            }
            let location = TxLocation::Block { height, position };
            self.tx_index.insert(tx.id.clone(), location);
            self.journal.push(location);
        }
        self.balances = next_balances;
        self.block_index.insert(block.hash, height);

        debug!(
            height,
            hash = %block.short_hash(),
            txs = block.transactions.len(),
            "block appended to ledger"
        );
        self.blocks.push(block);
        Ok(())
    }

    /// Issues `amount` to `recipient` from the reserved mint account.
    ///
    /// Issuance is recorded in the issuance log, not in a block.
    pub fn mint(&mut self, recipient: &str, amount: u64) -> Result<Transaction, LedgerError> {
        let tx = TransactionBuilder::mint(recipient, amount).build();
        self.issue(tx.clone())?;
        Ok(self.issuance.last().cloned().unwrap_or(tx))
    }

    /// Applies a prebuilt mint transaction. Used to replicate one issuance
    /// across several ledgers with an identical id.
    pub fn issue(&mut self, mut tx: Transaction) -> Result<(), LedgerError> {
        if !tx.is_mint() || tx.sender != MINT_ACCOUNT {
            return Err(LedgerError::InvalidMint { tx_id: tx.id });
        }
        if tx.amount == 0 {
            return Err(LedgerError::ZeroMint);
        }
        self.check_unique(std::slice::from_ref(&tx))?;

        let mut working = self.balances.clone();
        apply_transaction(&mut working, &tx)?;

        tx.status = TransactionStatus::Confirmed;
        self.minted_total += u128::from(tx.amount);
        let location = TxLocation::Issued(self.issuance.len());
        self.tx_index.insert(tx.id.clone(), location);
        self.journal.push(location);
        self.balances = working;

        debug!(recipient = %tx.recipient, amount = tx.amount, "issued");
        self.issuance.push(tx);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Audit
    // -----------------------------------------------------------------------

    /// Walks the chain from genesis, recomputing every hash and link.
    /// Fails fast on the first mismatch.
    pub fn verify_chain(&self) -> Result<(), IntegrityFault> {
        for (i, block) in self.blocks.iter().enumerate() {
            let height = i as u64;
            if block.index != height {
                return Err(IntegrityFault::new(
                    height,
                    format!("stored index {} out of sequence", block.index),
                ));
            }
            let expected_previous = if i == 0 {
                GENESIS_PREVIOUS_HASH
            } else {
                self.blocks[i - 1].hash
            };
            if block.previous_hash != expected_previous {
                return Err(IntegrityFault::new(height, "previous-hash link broken"));
            }
            if block.compute_hash() != block.hash {
                return Err(IntegrityFault::new(height, "stored hash does not match content"));
            }
        }
        Ok(())
    }

    /// Replays issuance and blocks in commit order and compares the result
    /// with the live balance map.
    pub fn verify_balances(&self) -> Result<(), IntegrityFault> {
        let mut replay = Balances::new();
        for location in &self.journal {
            let tx = self.resolve(*location).ok_or_else(|| {
                IntegrityFault::new(self.height(), "journal entry points nowhere")
            })?;
            apply_transaction(&mut replay, tx).map_err(|e| {
                IntegrityFault::new(self.height(), format!("replay rejected {}: {}", tx.id, e))
            })?;
        }
        if replay != self.balances {
            return Err(IntegrityFault::new(
                self.height(),
                "balances diverge from transaction replay",
            ));
        }
        Ok(())
    }

    /// Full audit: hash walk, then balance replay.
    pub fn audit(&self) -> Result<(), IntegrityFault> {
        self.verify_chain()?;
        self.verify_balances()
    }

    pub fn is_chain_valid(&self) -> bool {
        match self.verify_chain() {
            Ok(()) => true,
            Err(fault) => {
                error!(%fault, "chain validation failed");
                false
            }
        }
    }

    /// Cheap check of the tip and its link, run before every append.
    fn verify_tip(&self) -> Result<(), IntegrityFault> {
        let tip = self.latest_block();
        if tip.compute_hash() != tip.hash {
            return Err(IntegrityFault::new(tip.index, "tip hash does not match content"));
        }
        if let Some(parent) = self.blocks.len().checked_sub(2).map(|i| &self.blocks[i]) {
            if tip.previous_hash != parent.hash {
                return Err(IntegrityFault::new(tip.index, "tip is not linked to its parent"));
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn latest_block(&self) -> &Block {
        // Never empty: constructed with genesis and append-only.
        &self.blocks[self.blocks.len() - 1]
    }

    /// Height of the tip. Genesis only = 0.
    pub fn height(&self) -> u64 {
        self.latest_block().index
    }

    pub fn chain(&self) -> &[Block] {
        &self.blocks
    }

    pub fn genesis(&self) -> &Block {
        &self.blocks[0]
    }

    pub fn block_at(&self, height: u64) -> Option<&Block> {
        usize::try_from(height).ok().and_then(|h| self.blocks.get(h))
    }

    pub fn block_by_hash(&self, hash: &BlockHash) -> Option<&Block> {
        self.block_index
            .get(hash)
            .and_then(|height| self.block_at(*height))
    }

    pub fn contains_block(&self, hash: &BlockHash) -> bool {
        self.block_index.contains_key(hash)
    }

    /// Balance of `account`; zero for accounts never seen.
    pub fn balance(&self, account: &str) -> u64 {
        self.balances.get(account).copied().unwrap_or(0)
    }

    pub fn balances(&self) -> &Balances {
        &self.balances
    }

    /// Sum of every balance. Equals [`Ledger::minted_total`] by conservation.
    pub fn total_supply(&self) -> u128 {
        self.balances.values().map(|v| u128::from(*v)).sum()
    }

    pub fn minted_total(&self) -> u128 {
        self.minted_total
    }

    /// Confirmed mints, in issuance order.
    pub fn issuance(&self) -> &[Transaction] {
        &self.issuance
    }

    pub fn find_transaction(&self, id: &str) -> Option<&Transaction> {
        self.tx_index
            .get(id)
            .and_then(|location| self.resolve(*location))
    }

    /// Every confirmed transaction in which `account` is a party, in commit
    /// order.
    pub fn history(&self, account: &str) -> Vec<&Transaction> {
        self.journal
            .iter()
            .filter_map(|location| self.resolve(*location))
            .filter(|tx| tx.involves(account))
            .collect()
    }

    /// Number of confirmed transactions, mints included.
    pub fn transaction_count(&self) -> usize {
        self.journal.len()
    }

    fn resolve(&self, location: TxLocation) -> Option<&Transaction> {
        match location {
            TxLocation::Issued(i) => self.issuance.get(i),
            TxLocation::Block { height, position } => self
                .block_at(height)
                .and_then(|block| block.transactions.get(position)),
        }
    }

    #[cfg(test)]
    pub(crate) fn tamper_block(&mut self, height: usize, f: impl FnOnce(&mut Block)) {
        f(&mut self.blocks[height]);
    }
}

/// Applies one transaction to `balances` in place, all or nothing.
///
/// The id must match the content. Mints credit without a debit and must
/// come from [`MINT_ACCOUNT`]; every other transfer is refused if it
/// touches that account or overdraws its sender.
fn apply_transaction(balances: &mut Balances, tx: &Transaction) -> Result<(), LedgerError> {
    if !tx.has_valid_id() {
        return Err(LedgerError::InvalidId {
            tx_id: tx.id.clone(),
        });
    }
    let debit = if tx.is_mint() {
        if tx.sender != MINT_ACCOUNT || tx.recipient == MINT_ACCOUNT {
            return Err(LedgerError::InvalidMint {
                tx_id: tx.id.clone(),
            });
        }
        None
    } else {
        if tx.sender == MINT_ACCOUNT || tx.recipient == MINT_ACCOUNT {
            return Err(LedgerError::ReservedAccount {
                tx_id: tx.id.clone(),
            });
        }
        let available = balances.get(&tx.sender).copied().unwrap_or(0);
        if available < tx.amount {
            return Err(LedgerError::InsufficientFunds {
                tx_id: tx.id.clone(),
                account: tx.sender.clone(),
                available,
                required: tx.amount,
            });
        }
        Some(available - tx.amount)
    };

    let before = match debit {
        Some(remaining) if tx.recipient == tx.sender => remaining,
        _ => balances.get(&tx.recipient).copied().unwrap_or(0),
    };
    let credited = before
        .checked_add(tx.amount)
        .ok_or_else(|| LedgerError::Overflow {
            tx_id: tx.id.clone(),
        })?;

    if let Some(remaining) = debit {
        balances.insert(tx.sender.clone(), remaining);
    }
    balances.insert(tx.recipient.clone(), credited);
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
