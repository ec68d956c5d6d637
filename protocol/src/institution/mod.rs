//! # Financial Institutions
//!
//! Institutions own customer accounts and feed transfers to the proposing
//! leader. Every institution in the simulation is also a validator.
//!
//! ```text
//! pool.rs — FIFO TransactionPool with per-sender limits
//! ```

pub mod pool;

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

pub use pool::{PoolConfig, PoolError, RejectedTransaction, TransactionPool};

use crate::transaction::{Transaction, TransactionBuilder, TransactionType};

/// Supplies the next batch of transfers to a proposing leader.
pub trait TransactionSource: Send + Sync {
    /// Removes and returns up to `max` transfers.
    fn drain(&self, max: usize) -> Vec<Transaction>;

    /// Called for each drained transfer the leader left out of its block.
    fn reject(&self, _tx: &Transaction, _reason: &str) {}
}

impl TransactionSource for TransactionPool {
    fn drain(&self, max: usize) -> Vec<Transaction> {
        TransactionPool::drain(self, max)
    }

    fn reject(&self, tx: &Transaction, reason: &str) {
        TransactionPool::reject(self, tx, reason)
    }
}

/// A bank or payment provider operating one replica.
#[derive(Debug)]
pub struct FinancialInstitution {
    id: String,
    accounts: Vec<String>,
    pool: Arc<TransactionPool>,
}

/// Public view of an institution.
#[derive(Debug, Clone, Serialize)]
pub struct InstitutionSummary {
    pub id: String,
    pub accounts: usize,
    pub pool_depth: usize,
    pub rejected: usize,
}

impl FinancialInstitution {
    pub fn new(id: impl Into<String>, accounts: Vec<String>, pool_config: PoolConfig) -> Self {
        Self {
            id: id.into(),
            accounts,
            pool: Arc::new(TransactionPool::new(pool_config)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn accounts(&self) -> &[String] {
        &self.accounts
    }

    pub fn serves(&self, account: &str) -> bool {
        self.accounts.iter().any(|a| a == account)
    }

    pub fn pool(&self) -> &Arc<TransactionPool> {
        &self.pool
    }

    /// The pool as a source for this institution's replica.
    pub fn source(&self) -> Arc<dyn TransactionSource> {
        self.pool.clone()
    }

    /// Creates a transfer stamped with this institution's id and pools it.
    pub fn submit_transfer(
        &self,
        sender: &str,
        recipient: &str,
        amount: u64,
        kind: TransactionType,
    ) -> Result<Transaction, PoolError> {
        let tx = TransactionBuilder::transfer(sender, recipient, amount)
            .kind(kind)
            .institution(&self.id)
            .build();
        self.pool.submit(tx.clone())?;
        debug!(institution = %self.id, tx = %tx.id, amount, "transfer pooled");
        Ok(tx)
    }

    pub fn summary(&self) -> InstitutionSummary {
        InstitutionSummary {
            id: self.id.clone(),
            accounts: self.accounts.len(),
            pool_depth: self.pool.size(),
            rejected: self.pool.rejected_count(),
        }
    }
}

impl TransactionSource for FinancialInstitution {
    fn drain(&self, max: usize) -> Vec<Transaction> {
        self.pool.drain(max)
    }

    fn reject(&self, tx: &Transaction, reason: &str) {
        self.pool.reject(tx, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TransactionStatus;

    fn institution() -> FinancialInstitution {
        FinancialInstitution::new(
            "FO_001",
            vec!["USER_000001".into(), "USER_000002".into()],
            PoolConfig::default(),
        )
    }

    #[test]
    fn submitted_transfer_is_stamped_and_pooled() {
        let fi = institution();
        let tx = fi
            .submit_transfer("USER_000001", "USER_000002", 50, TransactionType::C2C)
            .unwrap();
        assert_eq!(tx.institution, "FO_001");
        assert_eq!(fi.summary().pool_depth, 1);
        let drained = TransactionSource::drain(&fi, 10);
        assert_eq!(drained[0].id, tx.id);
        assert_eq!(drained[0].status, TransactionStatus::Pending);
    }

    #[test]
    fn reject_flows_to_pool_log() {
        let fi = institution();
        fi.submit_transfer("USER_000001", "USER_000002", 50, TransactionType::C2B)
            .unwrap();
        let source = fi.source();
        let drained = source.drain(1);
        source.reject(&drained[0], "insufficient funds");
        assert_eq!(fi.summary().rejected, 1);
    }

    #[test]
    fn roster_membership() {
        let fi = institution();
        assert!(fi.serves("USER_000001"));
        assert!(!fi.serves("USER_000003"));
        assert_eq!(fi.accounts().len(), 2);
    }
}
