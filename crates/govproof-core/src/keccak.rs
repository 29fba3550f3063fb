use tiny_keccak::{Hasher, Keccak};

use crate::types::Bytes32;

/// Ethereum Keccak-256 (original Keccak padding, not FIPS-202 SHA3-256).
pub fn keccak256(data: &[u8]) -> Bytes32 {
    keccak256_concat(&[data])
}

/// Keccak-256 over the concatenation of `parts` without materialising it.
pub fn keccak256_concat(parts: &[&[u8]]) -> Bytes32 {
    let mut keccak = Keccak::v256();
    for part in parts {
        keccak.update(part);
    }
    let mut out = [0u8; 32];
    keccak.finalize(&mut out);
    out
}
