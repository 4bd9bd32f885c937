//! Error taxonomy for the CO2Chain consensus engine (spec §7).
//!
//! Errors carry a stable `code()` string so that the query surface and event
//! listeners can match on taxonomy rather than on message text.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid public key bytes")]
    InvalidPublicKey,
    #[error("invalid signature bytes")]
    InvalidSignature,
    #[error("non-canonical (high-S) signature")]
    NonCanonicalSignature,
    #[error("signature verification failed")]
    VerificationFailed,
    #[error("pubkey does not hash to the expected address")]
    AddressMismatch,
    #[error("input index out of bounds: {index} >= {len}")]
    InputIndexOutOfBounds { index: usize, len: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid base58 encoding")]
    InvalidBase58,
    #[error("invalid length")]
    InvalidLength,
    #[error("checksum mismatch")]
    InvalidChecksum,
    #[error("unknown version byte: {0:#x}")]
    UnknownVersion(u8),
}

/// Context-free (Phase A) and context-dependent header validation failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    #[error("proof of work insufficient")]
    PowInsufficient,
    #[error("unrecognised header version: {0}")]
    UnknownVersion(u32),
    #[error("bits field outside allowed range")]
    BitsOutOfRange,
    #[error("timestamp {got} is not after median-time-past {median}")]
    TimestampTooOld { got: u32, median: u32 },
    #[error("timestamp {got} exceeds now+2h ({limit})")]
    TimestampTooNew { got: u32, limit: u32 },
    #[error("parent header unknown")]
    UnknownParent,
}

/// Context-free (Phase B) and stateful (Phase C) transaction validation failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxError {
    #[error("transaction has no inputs")]
    EmptyInputs,
    #[error("transaction has no outputs")]
    EmptyOutputs,
    #[error("output {index} has non-positive amount")]
    NonPositiveAmount { index: usize },
    #[error("sum of outputs exceeds MAX_MONEY")]
    AmountExceedsMaxMoney,
    #[error("duplicate outpoint within inputs: {0}")]
    DuplicateInput(String),
    #[error("malformed transaction kind for {0:?}")]
    MalformedKind(crate::types::TxKind),
    #[error("unknown UTXO referenced: {0}")]
    UnknownUtxo(String),
    #[error("referenced UTXO is immature (coinbase, {confirmations} confirmations)")]
    ImmatureCoinbase { confirmations: u64 },
    #[error("coin-state forbids spending from this tx kind")]
    CoinStateForbidden,
    #[error("invalid signature on input {index}")]
    InvalidSignature { index: usize },
    #[error("sum(inputs) < sum(outputs): inputs={inputs}, outputs={outputs}")]
    InsufficientInputValue { inputs: u64, outputs: u64 },
    #[error("certificate id {0} is already in use")]
    CertIdReused(String),
    #[error("certificate id {0} is unknown")]
    UnknownCertificate(String),
    #[error("compensation would exceed assigned_amount for certificate {0}")]
    CertOvercompensated(String),
    #[error("assignment would exceed total_amount for certificate {0}")]
    CertOverassigned(String),
    #[error("ASSIGN_COMPENSATION inputs reference more than one certificate")]
    MixedCertificateInputs,
    #[error("malformed certificate metadata: {0}")]
    MalformedCertificateMetadata(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("oversized transaction: {size} > {max}")]
    Oversized { size: usize, max: usize },
    #[error("coinbase height metadata {got} does not match block height {expected}")]
    CoinbaseHeightMismatch { expected: u32, got: u32 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error(transparent)]
    Header(#[from] HeaderError),
    #[error("tx {index}: {source}")]
    Tx { index: usize, source: TxError },
    #[error("block has no transactions")]
    NoCoinbase,
    #[error("first transaction is not a coinbase")]
    FirstTxNotCoinbase,
    #[error("more than one coinbase transaction")]
    MultipleCoinbase,
    #[error("duplicate txid within block: {0}")]
    DuplicateTxid(String),
    #[error("merkle root mismatch")]
    InvalidMerkleRoot,
    #[error("oversized block: {size} > {max}")]
    OversizeBlock { size: usize, max: usize },
    #[error("too many transactions: {count} > {max}")]
    TooManyTransactions { count: usize, max: usize },
    #[error("coinbase pays {got}, may pay at most {max}")]
    InvalidCoinbaseValue { got: u64, max: u64 },
    #[error("certificate id {0} reused within block")]
    CertIdReused(String),
    #[error("block at a checkpoint height does not match the pinned hash")]
    CheckpointMismatch,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MempoolError {
    #[error("transaction already in pool: {0}")]
    AlreadyExists(String),
    #[error("double-spends mempool tx {existing_txid} on outpoint {outpoint}")]
    Conflict {
        existing_txid: String,
        outpoint: String,
    },
    #[error("replace-by-fee underbid: needs {required} more, got {offered}")]
    RbfUnderbid { required: u64, offered: u64 },
    #[error("fee rate {got} below minimum relay fee rate {min}")]
    FeeRateTooLow { got: u64, min: u64 },
    #[error("absolute fee {got} below minimum {min}")]
    FeeTooLow { got: u64, min: u64 },
    #[error(transparent)]
    Tx(#[from] TxError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("empty chain: no blocks connected")]
    EmptyChain,
    #[error("block not found: {0}")]
    BlockNotFound(String),
    #[error("undo data missing for block: {0}")]
    UndoDataMissing(String),
    #[error("height mismatch: expected {expected}, got {got}")]
    HeightMismatch { expected: u64, got: u64 },
    #[error("duplicate block: {0}")]
    DuplicateBlock(String),
    #[error("parent block unknown, stored as orphan")]
    UnknownParent,
    #[error(transparent)]
    Block(#[from] BlockError),
    #[error("storage read returned inconsistent data: {0}")]
    IntegrityFault(String),
}

/// Structured error surfaced to submitters and event listeners (spec §7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodedError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for CodedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for CodedError {}

impl TxError {
    /// Stable error code, e.g. `INVALID_SIGNATURE`, `CERT_ID_REUSED`.
    pub fn code(&self) -> &'static str {
        match self {
            TxError::EmptyInputs | TxError::EmptyOutputs => "MALFORMED_TX",
            TxError::NonPositiveAmount { .. } => "NON_POSITIVE_AMOUNT",
            TxError::AmountExceedsMaxMoney => "AMOUNT_EXCEEDS_MAX_MONEY",
            TxError::DuplicateInput(_) => "DUPLICATE_INPUT",
            TxError::MalformedKind(_) => "MALFORMED_TX_KIND",
            TxError::UnknownUtxo(_) => "UNKNOWN_UTXO",
            TxError::ImmatureCoinbase { .. } => "IMMATURE_COINBASE",
            TxError::CoinStateForbidden => "COIN_STATE_FORBIDDEN",
            TxError::InvalidSignature { .. } => "INVALID_SIGNATURE",
            TxError::InsufficientInputValue { .. } => "DOUBLE_SPEND",
            TxError::CertIdReused(_) => "CERT_ID_REUSED",
            TxError::UnknownCertificate(_) => "UNKNOWN_CERTIFICATE",
            TxError::CertOvercompensated(_) => "CERT_OVERCOMPENSATED",
            TxError::CertOverassigned(_) => "CERT_OVERASSIGNED",
            TxError::MixedCertificateInputs => "MIXED_CERTIFICATE_INPUTS",
            TxError::MalformedCertificateMetadata(_) => "MALFORMED_CERTIFICATE",
            TxError::Serialization(_) => "MALFORMED",
            TxError::Oversized { .. } => "OVERSIZE_TX",
            TxError::CoinbaseHeightMismatch { .. } => "COINBASE_HEIGHT_MISMATCH",
        }
    }
}

impl HeaderError {
    pub fn code(&self) -> &'static str {
        match self {
            HeaderError::PowInsufficient => "POW_INSUFFICIENT",
            HeaderError::UnknownVersion(_) => "UNKNOWN_VERSION",
            HeaderError::BitsOutOfRange => "INVALID_BITS",
            HeaderError::TimestampTooOld { .. } => "TIMESTAMP_TOO_OLD",
            HeaderError::TimestampTooNew { .. } => "TIMESTAMP_TOO_NEW",
            HeaderError::UnknownParent => "UNKNOWN_PARENT",
        }
    }
}

impl BlockError {
    pub fn code(&self) -> &'static str {
        match self {
            BlockError::Header(e) => e.code(),
            BlockError::Tx { source, .. } => source.code(),
            BlockError::NoCoinbase | BlockError::FirstTxNotCoinbase => "NO_COINBASE",
            BlockError::MultipleCoinbase => "MULTIPLE_COINBASE",
            BlockError::DuplicateTxid(_) => "DUPLICATE_TXID",
            BlockError::InvalidMerkleRoot => "INVALID_MERKLE_ROOT",
            BlockError::OversizeBlock { .. } | BlockError::TooManyTransactions { .. } => {
                "OVERSIZE_BLOCK"
            }
            BlockError::InvalidCoinbaseValue { .. } => "INVALID_SUBSIDY",
            BlockError::CertIdReused(_) => "CERT_ID_REUSED",
            BlockError::CheckpointMismatch => "CHECKPOINT_MISMATCH",
        }
    }
}

impl MempoolError {
    pub fn code(&self) -> &'static str {
        match self {
            MempoolError::AlreadyExists(_) => "ALREADY_IN_MEMPOOL",
            MempoolError::Conflict { .. } => "DOUBLE_SPEND",
            MempoolError::RbfUnderbid { .. } => "RBF_UNDERBID",
            MempoolError::FeeRateTooLow { .. } | MempoolError::FeeTooLow { .. } => "FEE_TOO_LOW",
            MempoolError::Tx(e) => e.code(),
        }
    }
}

impl ChainError {
    pub fn code(&self) -> &'static str {
        match self {
            ChainError::EmptyChain => "EMPTY_CHAIN",
            ChainError::BlockNotFound(_) => "BLOCK_NOT_FOUND",
            ChainError::UndoDataMissing(_) => "INTEGRITY_FAULT",
            ChainError::HeightMismatch { .. } => "HEIGHT_MISMATCH",
            ChainError::DuplicateBlock(_) => "DUPLICATE_BLOCK",
            ChainError::UnknownParent => "UNKNOWN_PARENT",
            ChainError::Block(e) => e.code(),
            ChainError::IntegrityFault(_) => "INTEGRITY_FAULT",
        }
    }
}

/// Top-level error aggregating every per-concern taxonomy (spec §7) behind
/// one `code()`/`message()` pair so RPC handlers and event listeners never
/// need to match on the inner variant directly.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error(transparent)]
    Tx(#[from] TxError),
    #[error(transparent)]
    Header(#[from] HeaderError),
    #[error(transparent)]
    Block(#[from] BlockError),
    #[error(transparent)]
    Mempool(#[from] MempoolError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("storage: {0}")]
    Storage(String),
}

impl CoreError {
    /// Stable error code for the `{code, message, details}` triple of spec §7.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Crypto(_) => "INVALID_SIGNATURE",
            CoreError::Address(_) => "INVALID_ADDRESS",
            CoreError::Tx(e) => e.code(),
            CoreError::Header(e) => e.code(),
            CoreError::Block(e) => e.code(),
            CoreError::Mempool(e) => e.code(),
            CoreError::Chain(e) => e.code(),
            CoreError::Storage(_) => "INTEGRITY_FAULT",
        }
    }

    /// Whether this error should halt the chain writer rather than simply
    /// being reported to the submitter (spec §7: `IntegrityFault` is fatal).
    pub fn is_integrity_fault(&self) -> bool {
        matches!(
            self,
            CoreError::Storage(_)
                | CoreError::Chain(ChainError::IntegrityFault(_))
                | CoreError::Chain(ChainError::UndoDataMissing(_))
        )
    }
}

#[cfg(test)]
mod core_error_tests {
    use super::*;

    #[test]
    fn tx_error_code_matches_spec_taxonomy() {
        assert_eq!(TxError::CertIdReused("CERT-2025-0001".into()).code(), "CERT_ID_REUSED");
        assert_eq!(TxError::CoinStateForbidden.code(), "COIN_STATE_FORBIDDEN");
        assert_eq!(TxError::InvalidSignature { index: 0 }.code(), "INVALID_SIGNATURE");
    }

    #[test]
    fn header_error_code_matches_spec_taxonomy() {
        assert_eq!(HeaderError::PowInsufficient.code(), "POW_INSUFFICIENT");
    }

    #[test]
    fn core_error_propagates_inner_code() {
        let err: CoreError = TxError::CertOvercompensated("CERT-2025-0001".into()).into();
        assert_eq!(err.code(), "CERT_OVERCOMPENSATED");
    }

    #[test]
    fn storage_error_is_integrity_fault() {
        let err = CoreError::Storage("corrupt column family".into());
        assert!(err.is_integrity_fault());
        assert_eq!(err.code(), "INTEGRITY_FAULT");
    }

    #[test]
    fn mempool_conflict_code_is_double_spend() {
        let err = MempoolError::Conflict { existing_txid: "a".into(), outpoint: "b:0".into() };
        assert_eq!(err.code(), "DOUBLE_SPEND");
    }
}
