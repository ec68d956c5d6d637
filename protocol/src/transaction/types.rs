//! Core type definitions for settlement transactions.
//!
//! Small `Copy` enums that every layer speaks: the kind of transfer and
//! where it sits in its lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// TransactionType
// ---------------------------------------------------------------------------

/// What a transfer represents, by the parties involved.
///
/// Letters encode the counterparties: `C` citizen, `B` business,
/// `G` government. The kind is recorded for reporting and does not change
/// validation, except for [`TransactionType::Mint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(clippy::upper_case_acronyms)]
pub enum TransactionType {
    /// Citizen to citizen.
    C2C,
    /// Citizen to business.
    C2B,
    /// Business to citizen.
    B2C,
    /// Business to business.
    B2B,
    /// Government to business.
    G2B,
    /// Business to government.
    B2G,
    /// Citizen to government.
    C2G,
    /// Government to citizen.
    G2C,
    /// Settlement of a transfer made while the payer was offline.
    Offline,
    /// Transfer triggered by a smart-contract execution.
    SmartContract,
    /// Issuance from the reserved mint account. Skips the sender balance
    /// check.
    Mint,
}

impl TransactionType {
    /// Every variant, in declaration order.
    pub const ALL: [TransactionType; 11] = [
        Self::C2C,
        Self::C2B,
        Self::B2C,
        Self::B2B,
        Self::G2B,
        Self::B2G,
        Self::C2G,
        Self::G2C,
        Self::Offline,
        Self::SmartContract,
        Self::Mint,
    ];

    /// Stable wire/display code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::C2C => "C2C",
            Self::C2B => "C2B",
            Self::B2C => "B2C",
            Self::B2B => "B2B",
            Self::G2B => "G2B",
            Self::B2G => "B2G",
            Self::C2G => "C2G",
            Self::G2C => "G2C",
            Self::Offline => "OFFLINE",
            Self::SmartContract => "SMART_CONTRACT",
            Self::Mint => "MINT",
        }
    }

    /// A business sits on at least one side.
    pub fn is_business(&self) -> bool {
        matches!(
            self,
            Self::C2B | Self::B2C | Self::B2B | Self::G2B | Self::B2G
        )
    }

    /// A government body sits on at least one side.
    pub fn is_government(&self) -> bool {
        matches!(self, Self::G2B | Self::B2G | Self::C2G | Self::G2C)
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_ascii_uppercase();
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.code() == upper)
            .ok_or_else(|| format!("unknown transaction type: {}", s))
    }
}

// ---------------------------------------------------------------------------
// TransactionStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a transaction.
///
/// ```text
/// Created ──▶ Pending ──▶ Confirmed
///    │           │
///    └───────────┴──────▶ Rejected
/// ```
///
/// `Confirmed` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// Built but not yet admitted to a pool.
    Created,
    /// Sitting in a pool or an uncommitted block.
    Pending,
    /// Applied by a committed block (or issued by the mint).
    Confirmed,
    /// Refused by a pool or by the proposing leader.
    Rejected,
}

impl TransactionStatus {
    /// Whether moving from `self` to `next` is a legal lifecycle step.
    pub fn can_transition_to(self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Created, Pending) | (Created, Confirmed) | (Created, Rejected)
                | (Pending, Confirmed)
                | (Pending, Rejected)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed | Self::Rejected)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Pending => write!(f, "Pending"),
            Self::Confirmed => write!(f, "Confirmed"),
            Self::Rejected => write!(f, "Rejected"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
