//! # Protocol Configuration & Constants
//!
//! Every protocol-wide number lives here. Tunables that an operator may
//! reasonably change per deployment are grouped into [`ConsensusConfig`];
//! the rest are constants that every replica must agree on.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// Protocol version string reported by the node binary.
pub const PROTOCOL_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Ledger Parameters
// ---------------------------------------------------------------------------

/// Reserved, non-spendable account that issues new money.
///
/// Only `Mint` transactions may name it as sender, and it never holds a
/// balance of its own.
pub const MINT_ACCOUNT: &str = "CENTRAL_BANK_MINT";

/// Institution id stamped on mint transactions.
pub const MINT_INSTITUTION: &str = "CBR";

/// Previous-hash value of the genesis block.
pub const GENESIS_PREVIOUS_HASH: [u8; 32] = [0u8; 32];

/// Genesis timestamp (unix ms). Fixed so every replica derives the same
/// genesis hash.
pub const GENESIS_TIMESTAMP_MS: u64 = 0;

// ---------------------------------------------------------------------------
// Consensus Parameters
// ---------------------------------------------------------------------------

/// Upper bound on transactions a leader drains into one block.
pub const MAX_BATCH_SIZE: usize = 10;

/// Default proposal cadence.
pub const DEFAULT_PROPOSE_INTERVAL_MS: u64 = 2_000;

/// Default proposal cadence as a `Duration`. Keep in sync with
/// [`DEFAULT_PROPOSE_INTERVAL_MS`].
pub const DEFAULT_PROPOSE_INTERVAL: Duration = Duration::from_millis(DEFAULT_PROPOSE_INTERVAL_MS);

/// Smallest roster that tolerates one Byzantine validator (`n = 3f + 1`).
pub const MIN_BFT_VALIDATORS: usize = 4;

/// Highest sealing difficulty a cluster accepts, in leading hex zeros.
/// Each extra digit multiplies the expected search by 16.
pub const MAX_POW_DIFFICULTY: u32 = 5;

/// Nonces a leader tries before giving up on sealing a proposal.
pub const MAX_SEAL_ATTEMPTS: u64 = 1 << 24;

// ---------------------------------------------------------------------------
// Pool & Workload Parameters
// ---------------------------------------------------------------------------

/// Maximum transactions an institution pool holds.
pub const MAX_POOL_SIZE: usize = 10_000;

/// Maximum pending transactions per sender in one pool.
pub const MAX_PENDING_PER_SENDER: usize = 64;

/// Balance minted to each simulated account at start-up.
pub const DEFAULT_INITIAL_BALANCE: u64 = 10_000;

/// Inclusive lower bound of generated transfer amounts.
pub const MIN_TRANSFER_AMOUNT: u64 = 10;

/// Exclusive upper bound of generated transfer amounts.
pub const MAX_TRANSFER_AMOUNT: u64 = 1_000;

// ---------------------------------------------------------------------------
// ConsensusConfig
// ---------------------------------------------------------------------------

/// Per-deployment consensus tunables.
///
/// All replicas of one cluster must run with the same `pow_difficulty`
/// and `verify_signatures`, otherwise honest proposals get dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Maximum transactions drained from the source per proposal.
    pub max_batch_size: usize,
    /// Cadence of the leader's proposal tick, in milliseconds.
    pub propose_interval_ms: u64,
    /// Leading hex zeros a proposed block hash must carry. Zero disables
    /// sealing; at most [`MAX_POW_DIFFICULTY`].
    pub pow_difficulty: u32,
    /// Check vote acknowledgements and certificate signatures.
    pub verify_signatures: bool,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            max_batch_size: MAX_BATCH_SIZE,
            propose_interval_ms: DEFAULT_PROPOSE_INTERVAL_MS,
            pow_difficulty: 0,
            verify_signatures: true,
        }
    }
}

impl ConsensusConfig {
    /// Proposal cadence as a `Duration`.
    pub fn propose_interval(&self) -> Duration {
        Duration::from_millis(self.propose_interval_ms)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn propose_interval_constants_agree() {
        assert_eq!(
            DEFAULT_PROPOSE_INTERVAL.as_millis() as u64,
            DEFAULT_PROPOSE_INTERVAL_MS
        );
        assert_eq!(
            ConsensusConfig::default().propose_interval(),
            DEFAULT_PROPOSE_INTERVAL
        );
    }

    #[test]
    fn transfer_amount_bounds_are_sane() {
        assert!(MIN_TRANSFER_AMOUNT > 0);
        assert!(MIN_TRANSFER_AMOUNT < MAX_TRANSFER_AMOUNT);
        assert!(MAX_TRANSFER_AMOUNT < DEFAULT_INITIAL_BALANCE);
    }

    #[test]
    fn config_deserializes_with_missing_fields() {
        let cfg: ConsensusConfig = serde_json::from_str(r#"{"pow_difficulty": 2}"#).unwrap();
        assert_eq!(cfg.pow_difficulty, 2);
        assert_eq!(cfg.max_batch_size, MAX_BATCH_SIZE);
        assert!(cfg.verify_signatures);
    }
}
