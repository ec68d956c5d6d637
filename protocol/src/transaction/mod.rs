//! # Transaction Module
//!
//! Transfer records and their lifecycle.
//!
//! ```text
//! types.rs   — TransactionType and TransactionStatus
//! builder.rs — Transaction and the fluent TransactionBuilder
//! ```
//!
//! Amounts are `u64` in the smallest unit. No floating point anywhere near
//! money.

pub mod builder;
pub mod types;

pub use builder::{Transaction, TransactionBuilder};
pub use types::{TransactionStatus, TransactionType};
