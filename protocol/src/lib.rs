// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Settlenet Protocol — Core Library
//!
//! Settlenet settles a retail digital currency among a fixed set of
//! financial institutions. Every institution runs a validator replica; the
//! replicas agree on one ordered, hash-chained sequence of transfer batches
//! and apply it to identical balance ledgers.
//!
//! ## Architecture
//!
//! - **crypto** — Hashing helpers and the Ed25519 key wrapper.
//! - **transaction** — Transfer records, lifecycle status, the builder.
//! - **ledger** — Blocks, the append-only chain, balances, the commit hook.
//! - **consensus** — Validator roster, quorum certificates, messages,
//!   signers, the replica state machine and its async run loop.
//! - **network** — The `Transport` contract plus a channel-backed network
//!   and a deterministic simulated one.
//! - **institution** — Transaction pools and the `TransactionSource` seam.
//! - **simulation** — Scenario presets, workload generation, clusters.
//! - **config** — Protocol constants and tunables.
//!
//! ## Control Flow
//!
//! ```text
//! TransactionSource ─▶ leader propose ─▶ Transport ─▶ replicas validate + vote
//!                                                         │
//!        Ledger::add_block ◀── 3-chain commit ◀── QC ◀────┘
//! ```
//!
//! Per-message failures are dropped and logged inside the engine. Only a
//! broken hash chain escapes, as an [`ledger::IntegrityFault`].

pub mod config;
pub mod consensus;
pub mod crypto;
pub mod institution;
pub mod ledger;
pub mod network;
pub mod simulation;
pub mod transaction;
