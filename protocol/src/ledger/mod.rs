//! # Ledger
//!
//! ```text
//! block.rs       — Block, hash preimage, sealing
//! chain.rs       — Ledger: append, validation, audit, queries
//! error.rs       — LedgerError, IntegrityFault
//! persistence.rs — commit hook and in-memory journal
//! ```

pub mod block;
pub mod chain;
pub mod error;
pub mod persistence;

pub use block::{Block, BlockHash};
pub use chain::{Balances, Ledger, SharedLedger};
pub use error::{IntegrityFault, LedgerError};
pub use persistence::{CommitJournal, CommitRecord, Persistence};
