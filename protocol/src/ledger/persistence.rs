//! Commit notifications for durable storage.
//!
//! The engine calls [`Persistence::on_block_committed`] once per block it
//! appends, after the ledger lock is released. The hook is fire-and-forget:
//! it cannot refuse a commit and its failures are its own business.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use super::block::Block;

/// Receives every block a replica commits.
pub trait Persistence: Send + Sync {
    fn on_block_committed(&self, node: &str, block: &Block);
}

/// One observed commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitRecord {
    pub node: String,
    pub height: u64,
    pub hash: String,
    pub tx_count: usize,
    pub committed_at: DateTime<Utc>,
}

/// In-memory [`Persistence`] that keeps every record, in arrival order.
#[derive(Debug, Default)]
pub struct CommitJournal {
    records: RwLock<Vec<CommitRecord>>,
}

impl CommitJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<CommitRecord> {
        self.records.read().clone()
    }

    /// Records emitted by one replica.
    pub fn for_node(&self, node: &str) -> Vec<CommitRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| r.node == node)
            .cloned()
            .collect()
    }

    /// Highest height any replica reported, if any.
    pub fn highest(&self) -> Option<u64> {
        self.records.read().iter().map(|r| r.height).max()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl Persistence for CommitJournal {
    fn on_block_committed(&self, node: &str, block: &Block) {
        self.records.write().push(CommitRecord {
            node: node.to_string(),
            height: block.index,
            hash: block.hash_hex(),
            tx_count: block.tx_count(),
            committed_at: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn journal_records_per_node() {
        let journal = CommitJournal::new();
        assert!(journal.is_empty());

        let genesis = Block::genesis();
        let child = Block::assemble(1, genesis.hash, vec![], 10, None);
        journal.on_block_committed("FO_001", &child);
        journal.on_block_committed("FO_002", &child);

        assert_eq!(journal.len(), 2);
        assert_eq!(journal.for_node("FO_001").len(), 1);
        assert_eq!(journal.for_node("FO_003").len(), 0);
        assert_eq!(journal.highest(), Some(1));
        assert_eq!(journal.records()[0].hash, child.hash_hex());
    }
}
