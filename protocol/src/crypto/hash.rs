//! # Hashing Utilities
//!
//! Two hash functions cover every need of the ledger:
//!
//! - **BLAKE3** digests block contents. Every replica recomputes it on
//!   receipt, so speed matters.
//! - **SHA-256** derives transaction ids (doubled) and backs the mock
//!   signer used in simulations.

use sha2::{Digest, Sha256};

/// SHA-256 of `data` as a fixed-size array.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let mut output = [0u8; 32];
    output.copy_from_slice(&hasher.finalize());
    output
}

/// `SHA-256(SHA-256(data))`. Used for content-derived transaction ids.
///
/// # Example
///
/// ```
/// use settlenet_protocol::crypto::double_sha256;
///
/// let id = double_sha256(b"raw transaction bytes");
/// assert_eq!(id.len(), 32);
/// ```
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    sha256(&sha256(data))
}

/// BLAKE3 of `data`.
///
/// # Example
///
/// ```
/// use settlenet_protocol::crypto::blake3_hash;
///
/// let hash = blake3_hash(b"block preimage");
/// assert_eq!(hash.len(), 32);
/// ```
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Lower-case hex of a 32-byte digest.
pub fn to_hex(hash: &[u8; 32]) -> String {
    hex::encode(hash)
}

/// Abbreviated hex for log lines: the first eight bytes.
pub fn short_hex(hash: &[u8; 32]) -> String {
    hex::encode(&hash[..8])
}

/// Number of leading `'0'` characters in the hex form of `hash`.
pub fn leading_hex_zeros(hash: &[u8; 32]) -> u32 {
    let mut zeros = 0;
    for byte in hash {
        if *byte == 0 {
            zeros += 2;
            continue;
        }
        if byte >> 4 == 0 {
            zeros += 1;
        }
        break;
    }
    zeros
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        // SHA-256("abc")
        assert_eq!(
            hex::encode(sha256(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn double_sha256_differs_from_single() {
        assert_ne!(double_sha256(b"x"), sha256(b"x"));
        assert_eq!(double_sha256(b"x"), sha256(&sha256(b"x")));
    }

    #[test]
    fn blake3_is_deterministic() {
        assert_eq!(blake3_hash(b"settle"), blake3_hash(b"settle"));
        assert_ne!(blake3_hash(b"settle"), blake3_hash(b"settlE"));
    }

    #[test]
    fn leading_zero_count() {
        let mut h = [0xFFu8; 32];
        assert_eq!(leading_hex_zeros(&h), 0);
        h[0] = 0x0F;
        assert_eq!(leading_hex_zeros(&h), 1);
        h[0] = 0x00;
        assert_eq!(leading_hex_zeros(&h), 2);
        h[1] = 0x01;
        assert_eq!(leading_hex_zeros(&h), 3);
        assert_eq!(leading_hex_zeros(&[0u8; 32]), 64);
    }

    #[test]
    fn short_hex_is_prefix() {
        let h = blake3_hash(b"abc");
        assert!(to_hex(&h).starts_with(&short_hex(&h)));
        assert_eq!(short_hex(&h).len(), 16);
    }
}
