//! # Cryptographic Primitives
//!
//! Thin wrappers over audited implementations:
//!
//! - **BLAKE3** for block hashes.
//! - **SHA-256** (doubled) for transaction ids and mock acknowledgements.
//! - **Ed25519** for validator vote signatures in production deployments.

pub mod hash;
pub mod keys;

pub use hash::{blake3_hash, double_sha256, sha256, to_hex};
pub use keys::{KeyError, ValidatorKeypair, ValidatorPublicKey, ValidatorSignature};
