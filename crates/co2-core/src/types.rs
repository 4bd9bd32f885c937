//! Core protocol types: transactions, blocks, UTXOs, certificates, projects.
//!
//! All monetary amounts are non-negative u64 satoshi (1 CCO2 = 10^8 satoshi).
//! All hashes are 32-byte SHA-256d digests. All timestamps are Unix seconds.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::TxError;

/// A 32-byte hash value (SHA-256d throughout: block ids, tx ids, merkle nodes).
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// SHA-256d ("hash256"): `SHA256(SHA256(bytes))`.
    pub fn hash256(bytes: &[u8]) -> Self {
        let first = Sha256::digest(bytes);
        Self(Sha256::digest(first).into())
    }

    /// Interpret the hash as a little-endian 256-bit integer for PoW comparison.
    pub fn as_le_u256(&self) -> [u8; 32] {
        let mut le = self.0;
        le.reverse();
        le
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.iter().rev() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Reference to a specific output of a previous transaction.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutPoint {
    pub txid: Hash256,
    pub index: u32,
}

impl OutPoint {
    /// The null outpoint, used for coinbase transaction inputs.
    pub fn null() -> Self {
        Self {
            txid: Hash256::ZERO,
            index: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.txid.is_zero() && self.index == u32::MAX
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}

/// A transaction input, spending a previous output.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TxInput {
    /// The outpoint being spent. Null outpoint for coinbase.
    pub previous_output: OutPoint,
    /// ECDSA/secp256k1 signature in low-S canonical form (DER), empty for coinbase.
    pub signature: Vec<u8>,
    /// Compressed secp256k1 public key (33 bytes), empty for coinbase.
    pub pubkey: Vec<u8>,
}

/// Per-output CO2 coin-state phase (spec §3, §4.3).
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CoinState {
    /// Freely spendable, ordinary value.
    Spendable,
    /// Locked to a certificate; spendable only via ASSIGN_COMPENSATION.
    Certified,
    /// Irreversibly retired; never spendable.
    Compensated,
}

/// A transaction output, creating a new UTXO.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TxOutput {
    /// Amount in satoshi. Must be > 0.
    pub amount: u64,
    /// Base58Check-encoded recipient address.
    pub address: String,
    pub coin_state: CoinState,
    /// Set iff `coin_state == Certified` (or `Compensated` via a certificate-bound BURN).
    pub certificate_id: Option<String>,
}

impl TxOutput {
    /// `coin_state == Certified ⇒ certificate_id is set` (spec §3 invariant).
    pub fn respects_certificate_invariant(&self) -> bool {
        match self.coin_state {
            CoinState::Certified => self.certificate_id.is_some(),
            CoinState::Spendable | CoinState::Compensated => true,
        }
    }
}

/// Transaction kind, a closed tagged sum with per-variant validation (spec §9:
/// no virtual dispatch — see [`crate::validation`] for the per-kind routines).
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TxKind {
    Coinbase,
    Transfer,
    AssignCert,
    AssignCompensation,
    Burn,
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TxKind::Coinbase => "COINBASE",
            TxKind::Transfer => "TRANSFER",
            TxKind::AssignCert => "ASSIGN_CERT",
            TxKind::AssignCompensation => "ASSIGN_COMPENSATION",
            TxKind::Burn => "BURN",
        };
        write!(f, "{s}")
    }
}

/// A transaction. `metadata` carries kind-specific structured data (the
/// certificate blob for `AssignCert`, for example) as a deterministically
/// ordered `BTreeMap` — the canonical byte layout frozen in DESIGN.md.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub version: u32,
    pub kind: TxKind,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub metadata: BTreeMap<String, Vec<u8>>,
    pub timestamp: u32,
}

impl Transaction {
    /// `txid = SHA-256d` of the canonical serialization excluding signatures
    /// (spec §3). Each input's `signature` field is cleared before hashing so
    /// the txid is fixed at creation and does not change if it is re-signed.
    pub fn txid(&self) -> Result<Hash256, TxError> {
        let bytes = crate::codec::encode_transaction_for_txid(self)
            .map_err(|e| TxError::Serialization(e.to_string()))?;
        Ok(Hash256::hash256(&bytes))
    }

    pub fn is_coinbase(&self) -> bool {
        self.kind == TxKind::Coinbase
    }

    /// Sum of all output amounts. `None` on overflow.
    pub fn total_output_value(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, out| acc.checked_add(out.amount))
    }

    /// All distinct certificate ids referenced by this transaction's outputs.
    pub fn output_certificate_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .outputs
            .iter()
            .filter_map(|o| o.certificate_id.as_deref())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

/// Block header containing the proof-of-work puzzle (spec §3, §4.1, §4.2).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: u32,
    pub prev_hash: Hash256,
    pub merkle_root: Hash256,
    pub timestamp: u32,
    /// Compact target encoding: `mantissa * 256^(exponent-3)`.
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    /// 80-byte canonical encoding used both for the content hash and PoW hash.
    pub fn to_bytes(&self) -> [u8; 80] {
        let mut out = [0u8; 80];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..36].copy_from_slice(self.prev_hash.as_bytes());
        out[36..68].copy_from_slice(self.merkle_root.as_bytes());
        out[68..72].copy_from_slice(&self.timestamp.to_le_bytes());
        out[72..76].copy_from_slice(&self.bits.to_le_bytes());
        out[76..80].copy_from_slice(&self.nonce.to_le_bytes());
        out
    }

    /// Content-addressing hash: SHA-256d of the 80-byte header.
    ///
    /// Distinct from the memory-hard [`crate::pow::pow_hash`] used to check
    /// the proof of work — this is the id used to reference the header.
    pub fn hash(&self) -> Hash256 {
        Hash256::hash256(&self.to_bytes())
    }
}

/// A complete block: header plus transactions (spec §3).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub height: u32,
    /// Ordered list of transactions. First transaction must be coinbase.
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first()
    }
}

/// An entry in the unspent transaction output set (spec §4.4).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UtxoEntry {
    pub output: TxOutput,
    pub block_height: u32,
    pub is_coinbase: bool,
}

impl UtxoEntry {
    /// Coinbase outputs require [`COINBASE_MATURITY`](crate::constants::COINBASE_MATURITY)
    /// confirmations; non-coinbase outputs are always mature.
    pub fn is_mature(&self, current_height: u32) -> bool {
        if !self.is_coinbase {
            return true;
        }
        (current_height as u64).saturating_sub(self.block_height as u64)
            >= crate::constants::COINBASE_MATURITY
    }
}

/// A certificate minted by an `ASSIGN_CERT`-bearing issuance (spec §3).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Certificate {
    /// Matches `CERT-\d{4}-\d{4,}`.
    pub certificate_id: String,
    pub project_id: String,
    pub total_amount: u64,
    pub assigned_amount: u64,
    pub compensated_amount: u64,
    pub issuer_address: String,
    pub standard: String,
    pub location: String,
    pub issue_date: u32,
    pub metadata: BTreeMap<String, String>,
}

impl Certificate {
    /// `0 ≤ compensated ≤ assigned ≤ total` (spec §3, §8).
    pub fn respects_accumulator_invariant(&self) -> bool {
        self.compensated_amount <= self.assigned_amount && self.assigned_amount <= self.total_amount
    }

    pub fn remaining_assignable(&self) -> u64 {
        self.total_amount - self.assigned_amount
    }

    pub fn remaining_compensable(&self) -> u64 {
        self.assigned_amount - self.compensated_amount
    }
}

/// The real-world source of certificates (spec §3).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Project {
    pub project_id: String,
    pub name: String,
    pub project_type: String,
    pub location: String,
    pub created_height: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::COIN;

    fn sample_output() -> TxOutput {
        TxOutput {
            amount: 50 * COIN,
            address: "addr1".into(),
            coin_state: CoinState::Spendable,
            certificate_id: None,
        }
    }

    fn sample_tx() -> Transaction {
        Transaction {
            version: 1,
            kind: TxKind::Transfer,
            inputs: vec![TxInput {
                previous_output: OutPoint {
                    txid: Hash256([0x11; 32]),
                    index: 0,
                },
                signature: vec![0u8; 70],
                pubkey: vec![0u8; 33],
            }],
            outputs: vec![sample_output()],
            metadata: BTreeMap::new(),
            timestamp: 1_700_000_000,
        }
    }

    fn sample_coinbase() -> Transaction {
        Transaction {
            version: 1,
            kind: TxKind::Coinbase,
            inputs: vec![TxInput {
                previous_output: OutPoint::null(),
                signature: vec![],
                pubkey: vec![],
            }],
            outputs: vec![sample_output()],
            metadata: BTreeMap::new(),
            timestamp: 1_700_000_000,
        }
    }

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

    // --- Hash256 ---

    #[test]
    fn hash256_zero_is_zero() {
        assert!(Hash256::ZERO.is_zero());
        assert_eq!(Hash256::ZERO, Hash256::default());
    }

    #[test]
    fn hash256_display_hex_is_reversed_le() {
        let mut bytes = [0u8; 32];
        bytes[31] = 0xAB;
        let h = Hash256(bytes);
        let s = format!("{h}");
        assert_eq!(&s[0..2], "ab");
    }

    #[test]
    fn hash256_hash256_is_sha256d() {
        let data = b"hello";
        let first = Sha256::digest(data);
        let expected = Hash256(Sha256::digest(first).into());
        assert_eq!(Hash256::hash256(data), expected);
    }

    // --- OutPoint ---

    #[test]
    fn outpoint_null_detection() {
        assert!(OutPoint::null().is_null());
    }

    #[test]
    fn outpoint_non_null() {
        let op = OutPoint {
            txid: Hash256([1; 32]),
            index: 0,
        };
        assert!(!op.is_null());
    }

    // --- TxOutput invariants ---

    #[test]
    fn certified_without_id_violates_invariant() {
        let out = TxOutput {
            amount: 1,
            address: "a".into(),
            coin_state: CoinState::Certified,
            certificate_id: None,
        };
        assert!(!out.respects_certificate_invariant());
    }

    #[test]
    fn certified_with_id_respects_invariant() {
        let out = TxOutput {
            amount: 1,
            address: "a".into(),
            coin_state: CoinState::Certified,
            certificate_id: Some("CERT-2025-0001".into()),
        };
        assert!(out.respects_certificate_invariant());
    }

    #[test]
    fn spendable_without_id_respects_invariant() {
        assert!(sample_output().respects_certificate_invariant());
    }

    // --- Transaction ---

    #[test]
    fn coinbase_detection() {
        assert!(sample_coinbase().is_coinbase());
        assert!(!sample_tx().is_coinbase());
    }

    #[test]
    fn total_output_value_sums_correctly() {
        let tx = Transaction {
            outputs: vec![
                TxOutput { amount: 100, ..sample_output() },
                TxOutput { amount: 200, ..sample_output() },
                TxOutput { amount: 300, ..sample_output() },
            ],
            ..sample_tx()
        };
        assert_eq!(tx.total_output_value(), Some(600));
    }

    #[test]
    fn total_output_value_overflow_returns_none() {
        let tx = Transaction {
            outputs: vec![
                TxOutput { amount: u64::MAX, ..sample_output() },
                TxOutput { amount: 1, ..sample_output() },
            ],
            ..sample_tx()
        };
        assert_eq!(tx.total_output_value(), None);
    }

    #[test]
    fn txid_deterministic() {
        let tx = sample_tx();
        assert_eq!(tx.txid().unwrap(), tx.txid().unwrap());
    }

    #[test]
    fn txid_changes_with_data() {
        let tx1 = sample_tx();
        let mut tx2 = sample_tx();
        tx2.timestamp += 1;
        assert_ne!(tx1.txid().unwrap(), tx2.txid().unwrap());
    }

    #[test]
    fn txid_excludes_signature() {
        let tx1 = sample_tx();
        let mut tx2 = tx1.clone();
        tx2.inputs[0].signature = vec![0xAA; 70];
        assert_eq!(tx1.txid().unwrap(), tx2.txid().unwrap());
    }

    #[test]
    fn output_certificate_ids_dedup_and_sort() {
        let mut tx = sample_tx();
        tx.outputs = vec![
            TxOutput {
                certificate_id: Some("CERT-2025-0002".into()),
                coin_state: CoinState::Certified,
                ..sample_output()
            },
            TxOutput {
                certificate_id: Some("CERT-2025-0001".into()),
                coin_state: CoinState::Certified,
                ..sample_output()
            },
            TxOutput {
                certificate_id: Some("CERT-2025-0001".into()),
                coin_state: CoinState::Certified,
                ..sample_output()
            },
        ];
        assert_eq!(
            tx.output_certificate_ids(),
            vec!["CERT-2025-0001", "CERT-2025-0002"]
        );
    }

    // --- BlockHeader ---

    #[test]
    fn block_header_hash_deterministic() {
        let h = sample_header();
        assert_eq!(h.hash(), h.hash());
    }

    #[test]
    fn block_header_hash_changes_with_nonce() {
        let h1 = sample_header();
        let mut h2 = h1.clone();
        h2.nonce = 1;
        assert_ne!(h1.hash(), h2.hash());
    }

    #[test]
    fn block_header_to_bytes_is_80() {
        assert_eq!(sample_header().to_bytes().len(), 80);
    }

    // --- Block ---

    #[test]
    fn block_coinbase_accessor() {
        let block = Block {
            header: sample_header(),
            height: 0,
            transactions: vec![sample_coinbase()],
        };
        assert!(block.coinbase().unwrap().is_coinbase());
    }

    #[test]
    fn block_empty_has_no_coinbase() {
        let block = Block {
            header: sample_header(),
            height: 0,
            transactions: vec![],
        };
        assert!(block.coinbase().is_none());
    }

    // --- UtxoEntry maturity ---

    #[test]
    fn utxo_coinbase_not_mature_early() {
        let entry = UtxoEntry {
            output: sample_output(),
            block_height: 100,
            is_coinbase: true,
        };
        assert!(!entry.is_mature(150));
    }

    #[test]
    fn utxo_coinbase_mature_at_threshold() {
        let entry = UtxoEntry {
            output: sample_output(),
            block_height: 100,
            is_coinbase: true,
        };
        assert!(entry.is_mature(200));
    }

    #[test]
    fn utxo_non_coinbase_always_mature() {
        let entry = UtxoEntry {
            output: sample_output(),
            block_height: 100,
            is_coinbase: false,
        };
        assert!(entry.is_mature(0));
    }

    // --- Certificate invariants ---

    fn sample_cert() -> Certificate {
        Certificate {
            certificate_id: "CERT-2025-0001".into(),
            project_id: "PROJ-1".into(),
            total_amount: 1000,
            assigned_amount: 1000,
            compensated_amount: 400,
            issuer_address: "addr-issuer".into(),
            standard: "Verra".into(),
            location: "BR".into(),
            issue_date: 1_700_000_000,
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn certificate_monotonic_invariant_holds() {
        assert!(sample_cert().respects_accumulator_invariant());
    }

    #[test]
    fn certificate_invariant_violated_when_overcompensated() {
        let mut cert = sample_cert();
        cert.compensated_amount = cert.assigned_amount + 1;
        assert!(!cert.respects_accumulator_invariant());
    }

    #[test]
    fn certificate_remaining_helpers() {
        let cert = sample_cert();
        assert_eq!(cert.remaining_assignable(), 0);
        assert_eq!(cert.remaining_compensable(), 600);
    }
}
