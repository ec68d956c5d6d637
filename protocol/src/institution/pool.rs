//! First-in, first-out transaction pool.
//!
//! Thread-safe pool of transfers awaiting inclusion in a block. Proposers
//! drain in arrival order; there are no fees to prioritise by.
//!
//! ## Design
//!
//! - `DashMap` holds the entries keyed by id, so duplicate detection and
//!   lookups from the API never contend with the proposer.
//! - `parking_lot::Mutex<VecDeque>` keeps arrival order. Ids whose entry is
//!   gone are skipped lazily on drain.
//! - Per-sender counts stop one account from filling the pool.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::{MAX_PENDING_PER_SENDER, MAX_POOL_SIZE};
use crate::transaction::{Transaction, TransactionStatus};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of transactions the pool will hold.
    pub max_size: usize,
    /// Maximum pending transactions allowed per sender.
    pub max_per_sender: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: MAX_POOL_SIZE,
            max_per_sender: MAX_PENDING_PER_SENDER,
        }
    }
}

// ---------------------------------------------------------------------------
// PoolError
// ---------------------------------------------------------------------------

/// Errors returned by pool admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// A transaction with the same id is already pooled.
    Duplicate(String),

    PoolFull { size: usize },

    SenderLimitExceeded { sender: String, limit: usize },

    /// Zero amount, self-transfer, or an id that does not match the content.
    InvalidTransfer(String),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Duplicate(id) => write!(f, "transaction {} already pooled", id),
            Self::PoolFull { size } => write!(f, "pool is full ({} transactions)", size),
            Self::SenderLimitExceeded { sender, limit } => {
                write!(f, "sender {} exceeded per-sender limit of {}", sender, limit)
            }
            Self::InvalidTransfer(reason) => write!(f, "invalid transfer: {}", reason),
        }
    }
}

impl std::error::Error for PoolError {}

// ---------------------------------------------------------------------------
// TransactionPool
// ---------------------------------------------------------------------------

/// A transaction the proposing leader excluded.
#[derive(Debug, Clone, Serialize)]
pub struct RejectedTransaction {
    pub transaction: Transaction,
    pub reason: String,
    pub rejected_at: DateTime<Utc>,
}

pub struct TransactionPool {
    entries: DashMap<String, Transaction>,
    order: Mutex<VecDeque<String>>,
    sender_counts: DashMap<String, usize>,
    rejected: Mutex<Vec<RejectedTransaction>>,
    config: PoolConfig,
}

impl fmt::Debug for TransactionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionPool")
            .field("size", &self.entries.len())
            .field("config", &self.config)
            .finish()
    }
}

impl Default for TransactionPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl TransactionPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            entries: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            sender_counts: DashMap::new(),
            rejected: Mutex::new(Vec::new()),
            config,
        }
    }

    /// Admits a transaction and marks it `Pending`.
    ///
    /// Checks, in order: shape, duplicate id, per-sender limit, capacity.
    pub fn submit(&self, mut tx: Transaction) -> Result<(), PoolError> {
        if tx.amount == 0 {
            return Err(PoolError::InvalidTransfer("zero amount".into()));
        }
        if tx.sender == tx.recipient {
            return Err(PoolError::InvalidTransfer("sender equals recipient".into()));
        }
        if !tx.has_valid_id() {
            return Err(PoolError::InvalidTransfer("id does not match content".into()));
        }
        if self.entries.contains_key(&tx.id) {
            return Err(PoolError::Duplicate(tx.id));
        }

        let sender_count = self.sender_counts.get(&tx.sender).map(|v| *v).unwrap_or(0);
        if sender_count >= self.config.max_per_sender {
            return Err(PoolError::SenderLimitExceeded {
                sender: tx.sender,
                limit: self.config.max_per_sender,
            });
        }
        if self.entries.len() >= self.config.max_size {
            return Err(PoolError::PoolFull {
                size: self.config.max_size,
            });
        }

        tx.transition(TransactionStatus::Pending);
        let id = tx.id.clone();
        *self.sender_counts.entry(tx.sender.clone()).or_insert(0) += 1;
        self.entries.insert(id.clone(), tx);
        self.order.lock().push_back(id);
        Ok(())
    }

    /// Removes and returns up to `max` transactions, oldest first.
    pub fn drain(&self, max: usize) -> Vec<Transaction> {
        let mut order = self.order.lock();
        let mut batch = Vec::with_capacity(max.min(order.len()));
        while batch.len() < max {
            let Some(id) = order.pop_front() else {
                break;
            };
            if let Some((_, tx)) = self.entries.remove(&id) {
                self.decrement_sender_count(&tx.sender);
                batch.push(tx);
            }
        }
        batch
    }

    /// Records a transaction the leader left out of its block.
    pub fn reject(&self, tx: &Transaction, reason: &str) {
        let mut tx = tx.clone();
        tx.transition(TransactionStatus::Rejected);
        self.rejected.lock().push(RejectedTransaction {
            transaction: tx,
            reason: reason.to_string(),
            rejected_at: Utc::now(),
        });
    }

    pub fn get(&self, tx_id: &str) -> Option<Transaction> {
        self.entries.get(tx_id).map(|e| e.value().clone())
    }

    pub fn contains(&self, tx_id: &str) -> bool {
        self.entries.contains_key(tx_id)
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn rejected(&self) -> Vec<RejectedTransaction> {
        self.rejected.lock().clone()
    }

    pub fn rejected_count(&self) -> usize {
        self.rejected.lock().len()
    }

    pub fn pending_for_sender(&self, sender: &str) -> Vec<Transaction> {
        self.entries
            .iter()
            .filter(|entry| entry.value().sender == sender)
            .map(|entry| entry.value().clone())
            .collect()
    }

    fn decrement_sender_count(&self, sender: &str) {
        if let Some(mut count) = self.sender_counts.get_mut(sender) {
            if *count <= 1 {
                drop(count);
                self.sender_counts.remove(sender);
            } else {
                *count -= 1;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TransactionBuilder;

    fn make_tx(sender: &str, recipient: &str, amount: u64, ts: u64) -> Transaction {
        TransactionBuilder::transfer(sender, recipient, amount)
            .institution("FO_001")
            .timestamp(ts)
            .build()
    }

    #[test]
    fn submit_marks_pending() {
        let pool = TransactionPool::default();
        let tx = make_tx("A", "B", 10, 1);
        pool.submit(tx.clone()).unwrap();
        assert_eq!(pool.get(&tx.id).unwrap().status, TransactionStatus::Pending);
        assert!(pool.contains(&tx.id));
        assert_eq!(pool.size(), 1);
    }

    #[test]
    fn rejects_duplicate() {
        let pool = TransactionPool::default();
        let tx = make_tx("A", "B", 10, 1);
        pool.submit(tx.clone()).unwrap();
        assert_eq!(pool.submit(tx.clone()), Err(PoolError::Duplicate(tx.id)));
    }

    #[test]
    fn rejects_malformed() {
        let pool = TransactionPool::default();
        assert!(matches!(
            pool.submit(make_tx("A", "B", 0, 1)),
            Err(PoolError::InvalidTransfer(_))
        ));
        assert!(matches!(
            pool.submit(make_tx("A", "A", 5, 1)),
            Err(PoolError::InvalidTransfer(_))
        ));
        let mut tampered = make_tx("A", "B", 5, 1);
        tampered.amount = 6;
        assert!(matches!(
            pool.submit(tampered),
            Err(PoolError::InvalidTransfer(_))
        ));
    }

    #[test]
    fn enforces_sender_limit() {
        let pool = TransactionPool::new(PoolConfig {
            max_size: 100,
            max_per_sender: 2,
        });
        pool.submit(make_tx("A", "B", 10, 1)).unwrap();
        pool.submit(make_tx("A", "B", 10, 2)).unwrap();
        assert!(matches!(
            pool.submit(make_tx("A", "B", 10, 3)),
            Err(PoolError::SenderLimitExceeded { limit: 2, .. })
        ));
        // Other senders unaffected.
        pool.submit(make_tx("C", "B", 10, 3)).unwrap();
    }

    #[test]
    fn enforces_capacity() {
        let pool = TransactionPool::new(PoolConfig {
            max_size: 1,
            max_per_sender: 10,
        });
        pool.submit(make_tx("A", "B", 10, 1)).unwrap();
        assert_eq!(
            pool.submit(make_tx("C", "D", 10, 1)),
            Err(PoolError::PoolFull { size: 1 })
        );
    }

    #[test]
    fn drain_is_fifo_and_bounded() {
        let pool = TransactionPool::default();
        let txs: Vec<_> = (0..5).map(|i| make_tx("A", "B", 10 + i, i)).collect();
        for tx in &txs {
            pool.submit(tx.clone()).unwrap();
        }

        let first = pool.drain(3);
        assert_eq!(
            first.iter().map(|t| t.id.clone()).collect::<Vec<_>>(),
            txs[..3].iter().map(|t| t.id.clone()).collect::<Vec<_>>()
        );
        assert_eq!(pool.size(), 2);
        assert_eq!(pool.drain(10).len(), 2);
        assert!(pool.drain(10).is_empty());
        assert!(pool.is_empty());
    }

    #[test]
    fn drain_releases_sender_slots() {
        let pool = TransactionPool::new(PoolConfig {
            max_size: 10,
            max_per_sender: 1,
        });
        pool.submit(make_tx("A", "B", 10, 1)).unwrap();
        pool.drain(1);
        pool.submit(make_tx("A", "B", 10, 2)).unwrap();
        assert_eq!(pool.pending_for_sender("A").len(), 1);
    }

    #[test]
    fn reject_is_logged() {
        let pool = TransactionPool::default();
        let tx = make_tx("A", "B", 10, 1);
        pool.submit(tx.clone()).unwrap();
        let drained = pool.drain(1);
        pool.reject(&drained[0], "insufficient funds");
        let rejected = pool.rejected();
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].transaction.status, TransactionStatus::Rejected);
        assert_eq!(rejected[0].reason, "insufficient funds");
        assert_eq!(pool.rejected_count(), 1);
    }

    #[test]
    fn concurrent_submit_and_drain() {
        use std::sync::Arc;
        use std::thread;

        let pool = Arc::new(TransactionPool::default());
        let mut handles = Vec::new();
        for t in 0..4u64 {
            let pool = Arc::clone(&pool);
            handles.push(thread::spawn(move || {
                for i in 0..25u64 {
                    let sender = format!("S{}", t);
                    pool.submit(make_tx(&sender, "R", 10, i)).unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(pool.size(), 100);
        let mut total = 0;
        while !pool.is_empty() {
            total += pool.drain(7).len();
        }
        assert_eq!(total, 100);
    }
}
