//! ECDSA/secp256k1 cryptographic operations (spec §4.1).
//!
//! Provides key generation, transaction signing, and signature verification.
//! Uses `k256` for the curve arithmetic. Signatures are DER-encoded and must
//! be low-S canonical (spec §4.1) — a signature normalizes to a different
//! encoding than the one submitted is rejected rather than silently accepted,
//! closing the classic ECDSA malleability hole.
//!
//! # Signing scheme
//!
//! Each transaction input is signed independently over a **sighash** that
//! commits to:
//! - The canonical transaction encoding with every input's signature cleared
//!   (spec §4.3 — shared with `txid()`; see [`crate::codec`])
//! - The index of the input being signed
//!
//! Public keys are excluded from the hashed bytes (so a pubkey can be
//! attached after signing) but are authenticated separately: verification
//! checks that the attached pubkey hashes to the output's address.

use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::CryptoError;
use crate::types::{Hash256, Transaction};

/// secp256k1 keypair for signing transaction inputs.
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a random keypair using the OS cryptographic RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut rand::rngs::OsRng),
        }
    }

    /// Create a keypair from 32 bytes of secret scalar material.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Result<Self, CryptoError> {
        let signing_key =
            SigningKey::from_slice(&bytes).map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self { signing_key })
    }

    /// Derive the public key from this keypair.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            verifying_key: *self.signing_key.verifying_key(),
        }
    }

    /// Raw secret scalar bytes. Handle with care.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes().into()
    }

    /// Sign a message with ECDSA, returning a low-S canonical DER signature.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let signature: Signature = self.signing_key.sign(message);
        let signature = signature.normalize_s().unwrap_or(signature);
        signature.to_der().as_bytes().to_vec()
    }
}

impl Clone for KeyPair {
    fn clone(&self) -> Self {
        Self {
            signing_key: self.signing_key.clone(),
        }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// secp256k1 public key for verifying signatures and deriving addresses.
#[derive(Clone, Copy)]
pub struct PublicKey {
    verifying_key: VerifyingKey,
}

impl PublicKey {
    /// Parse a public key from SEC1 bytes (33-byte compressed or 65-byte
    /// uncompressed encoding).
    pub fn from_sec_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let verifying_key =
            VerifyingKey::from_sec1_bytes(bytes).map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self { verifying_key })
    }

    /// Compressed SEC1 encoding (33 bytes) — the form stored on-chain.
    pub fn to_sec_bytes(&self) -> Vec<u8> {
        self.verifying_key.to_encoded_point(true).as_bytes().to_vec()
    }

    /// Derive the Base58Check address for this key.
    pub fn address(&self) -> crate::address::Address {
        crate::address::Address::from_public_key(self)
    }

    /// Verify a DER-encoded ECDSA signature over `message`.
    ///
    /// Rejects non-canonical (high-S) signatures outright (spec §4.1):
    /// a signature is accepted only if it is already in its normalized form.
    pub fn verify(&self, message: &[u8], signature_der: &[u8]) -> Result<(), CryptoError> {
        let signature =
            Signature::from_der(signature_der).map_err(|_| CryptoError::InvalidSignature)?;
        if signature.normalize_s().is_some() {
            return Err(CryptoError::NonCanonicalSignature);
        }
        self.verifying_key
            .verify(message, &signature)
            .map_err(|_| CryptoError::VerificationFailed)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.to_sec_bytes()))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.to_sec_bytes()))
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.to_sec_bytes() == other.to_sec_bytes()
    }
}

impl Eq for PublicKey {}

impl std::hash::Hash for PublicKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.to_sec_bytes().hash(state);
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_sec_bytes().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = Vec::<u8>::deserialize(deserializer)?;
        Self::from_sec_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

/// Compute the signing hash (sighash) for a transaction input.
///
/// `SHA-256d(encode_transaction_for_sighash(tx) || input_index)`. Every
/// input's signature is cleared by the shared encoding (see
/// [`crate::codec::encode_transaction_for_sighash`]), so inputs can be
/// signed independently and in any order; the input index is appended so
/// that a signature for one input cannot be replayed against another.
pub fn signing_hash(tx: &Transaction, input_index: usize) -> Result<Hash256, CryptoError> {
    if input_index >= tx.inputs.len() {
        return Err(CryptoError::InputIndexOutOfBounds {
            index: input_index,
            len: tx.inputs.len(),
        });
    }

    let mut data = crate::codec::encode_transaction_for_sighash(tx);
    data.extend_from_slice(&(input_index as u64).to_le_bytes());
    Ok(Hash256::hash256(&data))
}

/// Sign a transaction input in place: computes the sighash, signs it, and
/// writes the signature and public key into the input.
pub fn sign_transaction_input(
    tx: &mut Transaction,
    input_index: usize,
    keypair: &KeyPair,
) -> Result<(), CryptoError> {
    let sighash = signing_hash(tx, input_index)?;
    let signature = keypair.sign(sighash.as_bytes());
    let pubkey_bytes = keypair.public_key().to_sec_bytes();

    tx.inputs[input_index].signature = signature;
    tx.inputs[input_index].pubkey = pubkey_bytes;
    Ok(())
}

/// Verify a transaction input's signature against the address it claims to
/// unlock.
///
/// Checks that:
/// 1. The input carries a parseable public key and low-S DER signature
/// 2. The public key hashes to `expected_address` (the UTXO owner)
/// 3. The ECDSA signature verifies against the sighash
pub fn verify_transaction_input(
    tx: &Transaction,
    input_index: usize,
    expected_address: &str,
) -> Result<(), CryptoError> {
    if input_index >= tx.inputs.len() {
        return Err(CryptoError::InputIndexOutOfBounds {
            index: input_index,
            len: tx.inputs.len(),
        });
    }

    let input = &tx.inputs[input_index];
    let pk = PublicKey::from_sec_bytes(&input.pubkey)?;

    if pk.address().encode() != expected_address {
        return Err(CryptoError::AddressMismatch);
    }

    let sighash = signing_hash(tx, input_index)?;
    pk.verify(sighash.as_bytes(), &input.signature)
}
