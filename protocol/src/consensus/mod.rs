//! # Consensus
//!
//! Quorum-certificate consensus over a fixed validator roster.
//!
//! ```text
//! validator_set.rs — roster, f, quorum threshold, primary(view)
//! certificate.rs   — QuorumCertificate and the signed vote payload
//! message.rs       — Proposal, Vote, ConsensusMessage
//! signer.rs        — Signer trait, MockSigner, Ed25519Signer
//! engine.rs        — per-replica state machine and commit rule
//! runner.rs        — async run loop and shutdown controller
//! error.rs         — ConsensusError
//! ```
//!
//! Agreement comes only from certificates. Replicas never share a lock;
//! the one thing they may share in a single-process simulation is a
//! ledger, which serialises appends on its own lock.

pub mod certificate;
pub mod engine;
pub mod error;
pub mod message;
pub mod runner;
pub mod signer;
pub mod validator_set;

pub use certificate::{vote_payload, CertificateError, QuorumCertificate};
pub use engine::{ConsensusEngine, EngineStats, EngineStatus};
pub use error::ConsensusError;
pub use message::{ConsensusMessage, Proposal, Vote};
pub use runner::{Controller, ReplicaRunner, RunnerError, RunnerExit};
pub use signer::{Ack, Ed25519Signer, MockSigner, Signer};
pub use validator_set::{ValidatorInfo, ValidatorSet};
