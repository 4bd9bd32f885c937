//! Memory-hard proof-of-work hash (spec §4.2).
//!
//! The block header's content hash ([`BlockHeader::hash`](crate::types::BlockHeader::hash),
//! plain SHA-256d) is cheap to compute and is used purely as a content
//! address. The hash actually checked against the difficulty target is
//! memory-hard, to keep mining ASIC-resistant. The algorithm is chosen once
//! at genesis and is immutable for the life of the chain — headers carry no
//! per-block algorithm tag.

use argon2::{Algorithm, Argon2, Params as Argon2Params, Version};
use scrypt::{scrypt, Params as ScryptParams};

use crate::constants::PowAlgorithm;
use crate::error::HeaderError;
use crate::types::{BlockHeader, Hash256};

const SCRYPT_LOG_N: u8 = 10; // N = 1024
const SCRYPT_R: u32 = 1;
const SCRYPT_P: u32 = 1;

const ARGON2_MEMORY_KIB: u32 = 64 * 1024; // 64 MiB
const ARGON2_TIME_COST: u32 = 3;
const ARGON2_PARALLELISM: u32 = 4;

/// Fixed domain-separation salt; the header bytes themselves already vary
/// the input, so this exists only to separate this use from any other
/// consumer of the same KDFs.
const POW_SALT: &[u8] = b"co2chain-pow-v1";

/// Compute the memory-hard proof-of-work hash of a header under the given
/// algorithm.
pub fn pow_hash(header: &BlockHeader, algorithm: PowAlgorithm) -> Hash256 {
    let header_bytes = header.to_bytes();
    let mut out = [0u8; 32];
    match algorithm {
        PowAlgorithm::Scrypt => {
            let params = ScryptParams::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, 32)
                .expect("fixed scrypt parameters are always valid");
            scrypt(&header_bytes, POW_SALT, &params, &mut out)
                .expect("32-byte output buffer matches fixed scrypt parameters");
        }
        PowAlgorithm::Argon2id => {
            let params = Argon2Params::new(
                ARGON2_MEMORY_KIB,
                ARGON2_TIME_COST,
                ARGON2_PARALLELISM,
                Some(32),
            )
            .expect("fixed argon2id parameters are always valid");
            let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
            argon2
                .hash_password_into(&header_bytes, POW_SALT, &mut out)
                .expect("32-byte output buffer matches fixed argon2id parameters");
        }
    }
    Hash256::from_bytes(out)
}

/// Whether a header's proof-of-work hash satisfies its own `bits` target.
pub fn meets_target(header: &BlockHeader, algorithm: PowAlgorithm) -> Result<bool, HeaderError> {
    let hash = pow_hash(header, algorithm);
    crate::difficulty::meets_target(&hash, header.bits)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> BlockHeader {
        BlockHeader {
            version: 1,
            prev_hash: Hash256::ZERO,
            merkle_root: Hash256::ZERO,
            timestamp: 1_700_000_000,
            bits: 0x1d00_ffff,
            nonce: 0,
        }
    }

    #[test]
    fn pow_hash_deterministic() {
        let h = sample_header();
        assert_eq!(pow_hash(&h, PowAlgorithm::Scrypt), pow_hash(&h, PowAlgorithm::Scrypt));
    }

    #[test]
    fn pow_hash_differs_by_algorithm() {
        let h = sample_header();
        assert_ne!(
            pow_hash(&h, PowAlgorithm::Scrypt),
            pow_hash(&h, PowAlgorithm::Argon2id)
        );
    }

    #[test]
    fn pow_hash_changes_with_nonce() {
        let h1 = sample_header();
        let mut h2 = h1.clone();
        h2.nonce = 1;
        assert_ne!(
            pow_hash(&h1, PowAlgorithm::Scrypt),
            pow_hash(&h2, PowAlgorithm::Scrypt)
        );
    }

    #[test]
    fn pow_hash_independent_of_content_hash() {
        let h = sample_header();
        assert_ne!(pow_hash(&h, PowAlgorithm::Scrypt), h.hash());
    }

    #[test]
    fn meets_target_rejects_under_minimal_difficulty_with_overwhelming_probability() {
        let h = sample_header();
        // bits = 0 encodes a zero target, which nothing can satisfy.
        let mut zero_target = h.clone();
        zero_target.bits = 0;
        assert!(!meets_target(&zero_target, PowAlgorithm::Scrypt).unwrap());
    }
}
