//! Address encoding for the CO2Chain network.
//!
//! Addresses use Base58Check encoding, in the style of classic Bitcoin
//! P2PKH addresses:
//!
//! ```text
//! address = Base58(version_byte || RIPEMD160(SHA256(pubkey)) || checksum[0..4])
//! checksum = SHA-256d(version_byte || RIPEMD160(SHA256(pubkey)))
//! ```
//!
//! The version byte is fixed per network; decoding rejects any other value.

use ripemd::Ripemd160;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::constants::{ADDRESS_VERSION_BYTE, BURN_PUBKEY_HASH};
use crate::crypto::PublicKey;
use crate::error::AddressError;
use crate::types::Hash256;

/// `RIPEMD160(SHA256(pubkey))` — the 20-byte payload an address commits to.
pub fn pubkey_hash160(pubkey_bytes: &[u8]) -> [u8; 20] {
    let sha = Sha256::digest(pubkey_bytes);
    Ripemd160::digest(sha).into()
}

/// A CO2Chain address: a version byte plus a 20-byte pubkey hash.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Address {
    version: u8,
    hash160: [u8; 20],
}

impl Address {
    /// Create an address directly from a 20-byte pubkey hash.
    pub fn from_hash160(hash160: [u8; 20]) -> Self {
        Self {
            version: ADDRESS_VERSION_BYTE,
            hash160,
        }
    }

    /// Derive the address for a raw, compressed-SEC-encoded public key.
    pub fn from_pubkey_bytes(pubkey_bytes: &[u8]) -> Self {
        Self::from_hash160(pubkey_hash160(pubkey_bytes))
    }

    /// Derive the address for a [`PublicKey`].
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        Self::from_pubkey_bytes(&public_key.to_sec_bytes())
    }

    /// The pubkey hash encoded in this address.
    pub fn hash160(&self) -> [u8; 20] {
        self.hash160
    }

    /// The address version byte.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Whether `pubkey_bytes` hashes to this address (spec §3 TxInput
    /// invariant: the unlocking pubkey must hash to the referenced address).
    pub fn matches_pubkey(&self, pubkey_bytes: &[u8]) -> bool {
        self.hash160 == pubkey_hash160(pubkey_bytes)
    }

    /// Encode as Base58Check.
    pub fn encode(&self) -> String {
        let mut payload = Vec::with_capacity(25);
        payload.push(self.version);
        payload.extend_from_slice(&self.hash160);
        let checksum = Hash256::hash256(&payload);
        payload.extend_from_slice(&checksum.as_bytes()[0..4]);
        bs58::encode(payload).into_string()
    }

    /// Decode a Base58Check address string, validating the checksum and
    /// version byte.
    pub fn decode(s: &str) -> Result<Self, AddressError> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|_| AddressError::InvalidBase58)?;
        if bytes.len() != 25 {
            return Err(AddressError::InvalidLength);
        }

        let (payload, checksum) = bytes.split_at(21);
        let expected = Hash256::hash256(payload);
        if &expected.as_bytes()[0..4] != checksum {
            return Err(AddressError::InvalidChecksum);
        }

        let version = payload[0];
        if version != ADDRESS_VERSION_BYTE {
            return Err(AddressError::UnknownVersion(version));
        }

        let mut hash160 = [0u8; 20];
        hash160.copy_from_slice(&payload[1..21]);
        Ok(Self { version, hash160 })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Validate an address string without retaining the decoded form.
pub fn is_valid_address(s: &str) -> bool {
    Address::decode(s).is_ok()
}

/// The canonical burn address: the fixed version byte over an all-zero
/// pubkey hash (spec §4.3 BURN — unspendable by construction, no private
/// key can hash to it with overwhelming probability).
pub fn burn_address() -> Address {
    Address {
        version: ADDRESS_VERSION_BYTE,
        hash160: BURN_PUBKEY_HASH,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    fn sample_hash160() -> [u8; 20] {
        [0xAA; 20]
    }

    // --- Encoding ---

    #[test]
    fn encode_is_base58_alphabet() {
        let addr = Address::from_hash160(sample_hash160());
        let encoded = addr.encode();
        assert!(encoded.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(!encoded.contains(['0', 'O', 'I', 'l']));
    }

    #[test]
    fn encode_deterministic() {
        let addr = Address::from_hash160(sample_hash160());
        assert_eq!(addr.encode(), addr.encode());
    }

    #[test]
    fn encode_different_hashes_differ() {
        let a1 = Address::from_hash160([0xAA; 20]);
        let a2 = Address::from_hash160([0xBB; 20]);
        assert_ne!(a1.encode(), a2.encode());
    }

    // --- Decoding / round trips ---

    #[test]
    fn decode_roundtrip() {
        let original = Address::from_hash160(sample_hash160());
        let encoded = original.encode();
        let decoded = Address::decode(&encoded).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn decode_invalid_base58_rejected() {
        assert_eq!(
            Address::decode("0OIl_not_base58"),
            Err(AddressError::InvalidBase58)
        );
    }

    #[test]
    fn decode_wrong_length_rejected() {
        let short = bs58::encode([0u8; 10]).into_string();
        assert_eq!(Address::decode(&short), Err(AddressError::InvalidLength));
    }

    #[test]
    fn decode_tampered_checksum_rejected() {
        let addr = Address::from_hash160(sample_hash160());
        let mut encoded = addr.encode();
        // Flip the last character; almost certainly invalidates the checksum.
        let last = encoded.pop().unwrap();
        let replacement = if last == '1' { '2' } else { '1' };
        encoded.push(replacement);
        assert_eq!(
            Address::decode(&encoded),
            Err(AddressError::InvalidChecksum)
        );
    }

    #[test]
    fn decode_unknown_version_rejected() {
        let mut payload = vec![0xFFu8];
        payload.extend_from_slice(&[0u8; 20]);
        let checksum = Hash256::hash256(&payload);
        payload.extend_from_slice(&checksum.as_bytes()[0..4]);
        let encoded = bs58::encode(payload).into_string();
        assert_eq!(
            Address::decode(&encoded),
            Err(AddressError::UnknownVersion(0xFF))
        );
    }

    #[test]
    fn roundtrip_zero_hash() {
        let addr = Address::from_hash160([0u8; 20]);
        let decoded = Address::decode(&addr.encode()).unwrap();
        assert_eq!(decoded.hash160(), [0u8; 20]);
    }

    #[test]
    fn roundtrip_max_hash() {
        let addr = Address::from_hash160([0xFF; 20]);
        let decoded = Address::decode(&addr.encode()).unwrap();
        assert_eq!(decoded.hash160(), [0xFF; 20]);
    }

    #[test]
    fn roundtrip_many_hashes() {
        for i in 0u8..=10 {
            let hash = [i.wrapping_mul(37); 20];
            let addr = Address::from_hash160(hash);
            let decoded = Address::decode(&addr.encode()).unwrap();
            assert_eq!(decoded.hash160(), hash);
        }
    }

    #[test]
    fn roundtrip_from_public_key() {
        let kp = KeyPair::generate();
        let pk = kp.public_key();
        let addr = Address::from_public_key(&pk);

        let encoded = addr.encode();
        let decoded = Address::decode(&encoded).unwrap();

        assert_eq!(decoded.hash160(), addr.hash160());
        assert_eq!(decoded.version(), ADDRESS_VERSION_BYTE);
        assert!(decoded.matches_pubkey(&pk.to_sec_bytes()));
    }

    // --- Accessors / Display / FromStr ---

    #[test]
    fn version_accessor() {
        let addr = Address::from_hash160(sample_hash160());
        assert_eq!(addr.version(), ADDRESS_VERSION_BYTE);
    }

    #[test]
    fn display_matches_encode() {
        let addr = Address::from_hash160(sample_hash160());
        assert_eq!(format!("{addr}"), addr.encode());
    }

    #[test]
    fn from_str_roundtrip() {
        let addr = Address::from_hash160(sample_hash160());
        let encoded = addr.encode();
        let parsed: Address = encoded.parse().unwrap();
        assert_eq!(addr, parsed);
    }

    // --- Serde ---

    #[test]
    fn serde_json_roundtrip() {
        let addr = Address::from_hash160(sample_hash160());
        let json = serde_json::to_string(&addr).unwrap();
        assert!(json.starts_with('"'));
        let decoded: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(addr, decoded);
    }

    // --- Burn address / validation helper ---

    #[test]
    fn burn_address_is_all_zero_hash() {
        assert_eq!(burn_address().hash160(), [0u8; 20]);
        assert!(is_valid_address(&burn_address().encode()));
    }

    #[test]
    fn burn_address_deterministic() {
        assert_eq!(burn_address(), burn_address());
    }

    #[test]
    fn is_valid_address_helper() {
        let addr = Address::from_hash160(sample_hash160());
        assert!(is_valid_address(&addr.encode()));
        assert!(!is_valid_address("not-a-real-address"));
    }

    #[test]
    fn matches_pubkey_rejects_other_keys() {
        let owner = KeyPair::generate();
        let stranger = KeyPair::generate();
        let addr = Address::from_public_key(&owner.public_key());
        assert!(!addr.matches_pubkey(&stranger.public_key().to_sec_bytes()));
    }
}
