//! Canonical wire/storage encoding (spec §6).
//!
//! Transactions: `{version u32, kind u8, input_count varint, inputs…,
//! output_count varint, outputs…, timestamp u32, metadata_len varint,
//! metadata_bytes}`. Blocks: header (80 bytes) then `tx_count varint` then
//! concatenated transactions. Varints use Bitcoin-style CompactSize. Unknown
//! trailing bytes are a parse error (spec §6).
//!
//! This format is consensus-critical: every node must agree bit-exactly, so
//! it is hand-rolled rather than derived through a generic serde backend
//! (DESIGN.md records the divergence from the teacher's `bincode` derive).

use std::collections::BTreeMap;
use std::io::{self, Read};

use crate::types::{
    Block, BlockHeader, CoinState, Hash256, OutPoint, Transaction, TxInput, TxKind, TxOutput,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("trailing bytes after parsed value")]
    TrailingBytes,
    #[error("invalid utf8 in address/metadata field")]
    InvalidUtf8,
    #[error("unknown tx kind tag: {0}")]
    UnknownTxKind(u8),
    #[error("unknown coin-state tag: {0}")]
    UnknownCoinState(u8),
    #[error("varint is not minimally encoded")]
    NonMinimalVarint,
}

impl From<io::Error> for CodecError {
    fn from(_: io::Error) -> Self {
        CodecError::UnexpectedEof
    }
}

type Result<T> = std::result::Result<T, CodecError>;

// --- varint (Bitcoin-style CompactSize) ---

fn write_varint(buf: &mut Vec<u8>, n: u64) {
    if n < 0xFD {
        buf.push(n as u8);
    } else if n <= 0xFFFF {
        buf.push(0xFD);
        buf.extend_from_slice(&(n as u16).to_le_bytes());
    } else if n <= 0xFFFF_FFFF {
        buf.push(0xFE);
        buf.extend_from_slice(&(n as u32).to_le_bytes());
    } else {
        buf.push(0xFF);
        buf.extend_from_slice(&n.to_le_bytes());
    }
}

fn read_varint(r: &mut impl Read) -> Result<u64> {
    let mut tag = [0u8; 1];
    r.read_exact(&mut tag)?;
    match tag[0] {
        0xFD => {
            let mut b = [0u8; 2];
            r.read_exact(&mut b)?;
            let v = u16::from_le_bytes(b) as u64;
            if v < 0xFD {
                return Err(CodecError::NonMinimalVarint);
            }
            Ok(v)
        }
        0xFE => {
            let mut b = [0u8; 4];
            r.read_exact(&mut b)?;
            let v = u32::from_le_bytes(b) as u64;
            if v <= 0xFFFF {
                return Err(CodecError::NonMinimalVarint);
            }
            Ok(v)
        }
        0xFF => {
            let mut b = [0u8; 8];
            r.read_exact(&mut b)?;
            let v = u64::from_le_bytes(b);
            if v <= 0xFFFF_FFFF {
                return Err(CodecError::NonMinimalVarint);
            }
            Ok(v)
        }
        n => Ok(n as u64),
    }
}

fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    write_varint(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

fn read_bytes(r: &mut impl Read) -> Result<Vec<u8>> {
    let len = read_varint(r)? as usize;
    let mut out = vec![0u8; len];
    r.read_exact(&mut out)?;
    Ok(out)
}

fn read_string(r: &mut impl Read) -> Result<String> {
    String::from_utf8(read_bytes(r)?).map_err(|_| CodecError::InvalidUtf8)
}

fn tx_kind_tag(kind: TxKind) -> u8 {
    match kind {
        TxKind::Coinbase => 0,
        TxKind::Transfer => 1,
        TxKind::AssignCert => 2,
        TxKind::AssignCompensation => 3,
        TxKind::Burn => 4,
    }
}

fn tx_kind_from_tag(tag: u8) -> Result<TxKind> {
    match tag {
        0 => Ok(TxKind::Coinbase),
        1 => Ok(TxKind::Transfer),
        2 => Ok(TxKind::AssignCert),
        3 => Ok(TxKind::AssignCompensation),
        4 => Ok(TxKind::Burn),
        n => Err(CodecError::UnknownTxKind(n)),
    }
}

fn coin_state_tag(state: CoinState) -> u8 {
    match state {
        CoinState::Spendable => 0,
        CoinState::Certified => 1,
        CoinState::Compensated => 2,
    }
}

fn coin_state_from_tag(tag: u8) -> Result<CoinState> {
    match tag {
        0 => Ok(CoinState::Spendable),
        1 => Ok(CoinState::Certified),
        2 => Ok(CoinState::Compensated),
        n => Err(CodecError::UnknownCoinState(n)),
    }
}

fn write_input(buf: &mut Vec<u8>, input: &TxInput, clear_signature: bool) {
    buf.extend_from_slice(input.previous_output.txid.as_bytes());
    buf.extend_from_slice(&input.previous_output.index.to_le_bytes());
    if clear_signature {
        write_bytes(buf, &[]);
    } else {
        write_bytes(buf, &input.signature);
    }
    write_bytes(buf, &input.pubkey);
}

fn read_input(r: &mut impl Read) -> Result<TxInput> {
    let mut txid = [0u8; 32];
    r.read_exact(&mut txid)?;
    let mut index_bytes = [0u8; 4];
    r.read_exact(&mut index_bytes)?;
    let signature = read_bytes(r)?;
    let pubkey = read_bytes(r)?;
    Ok(TxInput {
        previous_output: OutPoint {
            txid: Hash256(txid),
            index: u32::from_le_bytes(index_bytes),
        },
        signature,
        pubkey,
    })
}

fn write_output(buf: &mut Vec<u8>, output: &TxOutput) {
    buf.extend_from_slice(&output.amount.to_le_bytes());
    write_bytes(buf, output.address.as_bytes());
    buf.push(coin_state_tag(output.coin_state));
    match &output.certificate_id {
        Some(id) => {
            buf.push(1);
            write_bytes(buf, id.as_bytes());
        }
        None => buf.push(0),
    }
}

fn read_output(r: &mut impl Read) -> Result<TxOutput> {
    let mut amount_bytes = [0u8; 8];
    r.read_exact(&mut amount_bytes)?;
    let address = read_string(r)?;
    let mut state_tag = [0u8; 1];
    r.read_exact(&mut state_tag)?;
    let coin_state = coin_state_from_tag(state_tag[0])?;
    let mut has_cert = [0u8; 1];
    r.read_exact(&mut has_cert)?;
    let certificate_id = if has_cert[0] != 0 {
        Some(read_string(r)?)
    } else {
        None
    };
    Ok(TxOutput {
        amount: u64::from_le_bytes(amount_bytes),
        address,
        coin_state,
        certificate_id,
    })
}

/// Encode a transaction per the canonical layout. `clear_signatures` strips
/// every input's signature field — used for both `txid()` and the sighash.
fn encode_transaction_inner(tx: &Transaction, clear_signatures: bool) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&tx.version.to_le_bytes());
    buf.push(tx_kind_tag(tx.kind));

    write_varint(&mut buf, tx.inputs.len() as u64);
    for input in &tx.inputs {
        write_input(&mut buf, input, clear_signatures);
    }

    write_varint(&mut buf, tx.outputs.len() as u64);
    for output in &tx.outputs {
        write_output(&mut buf, output);
    }

    buf.extend_from_slice(&tx.timestamp.to_le_bytes());

    write_varint(&mut buf, tx.metadata.len() as u64);
    // BTreeMap iterates in key order, giving deterministic metadata_bytes.
    for (key, value) in &tx.metadata {
        write_bytes(&mut buf, key.as_bytes());
        write_bytes(&mut buf, value);
    }

    buf
}

/// Full canonical encoding, signatures included (wire/storage format).
pub fn encode_transaction(tx: &Transaction) -> Vec<u8> {
    encode_transaction_inner(tx, false)
}

/// The byte sequence hashed for `txid()`: signatures cleared (spec §3).
pub fn encode_transaction_for_txid(tx: &Transaction) -> Result<Vec<u8>> {
    Ok(encode_transaction_inner(tx, true))
}

/// The byte sequence hashed for the signing hash (spec §4.3): identical
/// construction to the txid encoding — both clear every input's signature.
pub fn encode_transaction_for_sighash(tx: &Transaction) -> Vec<u8> {
    encode_transaction_inner(tx, true)
}

pub fn decode_transaction(bytes: &[u8]) -> Result<Transaction> {
    let mut cursor = io::Cursor::new(bytes);
    let tx = decode_transaction_from(&mut cursor)?;
    if (cursor.position() as usize) != bytes.len() {
        return Err(CodecError::TrailingBytes);
    }
    Ok(tx)
}

fn decode_transaction_from(r: &mut impl Read) -> Result<Transaction> {
    let mut version_bytes = [0u8; 4];
    r.read_exact(&mut version_bytes)?;
    let mut kind_tag = [0u8; 1];
    r.read_exact(&mut kind_tag)?;
    let kind = tx_kind_from_tag(kind_tag[0])?;

    let input_count = read_varint(r)?;
    let mut inputs = Vec::with_capacity(input_count as usize);
    for _ in 0..input_count {
        inputs.push(read_input(r)?);
    }

    let output_count = read_varint(r)?;
    let mut outputs = Vec::with_capacity(output_count as usize);
    for _ in 0..output_count {
        outputs.push(read_output(r)?);
    }

    let mut timestamp_bytes = [0u8; 4];
    r.read_exact(&mut timestamp_bytes)?;

    let metadata_count = read_varint(r)?;
    let mut metadata = BTreeMap::new();
    for _ in 0..metadata_count {
        let key = String::from_utf8(read_bytes(r)?).map_err(|_| CodecError::InvalidUtf8)?;
        let value = read_bytes(r)?;
        metadata.insert(key, value);
    }

    Ok(Transaction {
        version: u32::from_le_bytes(version_bytes),
        kind,
        inputs,
        outputs,
        metadata,
        timestamp: u32::from_le_bytes(timestamp_bytes),
    })
}

fn decode_header_from(r: &mut impl Read) -> Result<BlockHeader> {
    let mut buf = [0u8; 80];
    r.read_exact(&mut buf)?;
    Ok(BlockHeader {
        version: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
        prev_hash: Hash256(buf[4..36].try_into().unwrap()),
        merkle_root: Hash256(buf[36..68].try_into().unwrap()),
        timestamp: u32::from_le_bytes(buf[68..72].try_into().unwrap()),
        bits: u32::from_le_bytes(buf[72..76].try_into().unwrap()),
        nonce: u32::from_le_bytes(buf[76..80].try_into().unwrap()),
    })
}

/// Encode a block: 80-byte header, `tx_count` varint, concatenated transactions.
/// `height` is chain position, not part of the wire format, and is not encoded.
pub fn encode_block(block: &Block) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&block.header.to_bytes());
    write_varint(&mut buf, block.transactions.len() as u64);
    for tx in &block.transactions {
        buf.extend_from_slice(&encode_transaction(tx));
    }
    buf
}

/// Decode a block. `height` must be supplied by the caller (chain position).
pub fn decode_block(bytes: &[u8], height: u32) -> Result<Block> {
    let mut cursor = io::Cursor::new(bytes);
    let header = decode_header_from(&mut cursor)?;
    let tx_count = read_varint(&mut cursor)?;
    let mut transactions = Vec::with_capacity(tx_count as usize);
    for _ in 0..tx_count {
        transactions.push(decode_transaction_from(&mut cursor)?);
    }
    if (cursor.position() as usize) != bytes.len() {
        return Err(CodecError::TrailingBytes);
    }
    Ok(Block {
        header,
        height,
        transactions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::COIN;

    fn sample_tx() -> Transaction {
        let mut metadata = BTreeMap::new();
        metadata.insert("note".to_string(), b"hello".to_vec());
        Transaction {
            version: 1,
            kind: TxKind::Transfer,
            inputs: vec![TxInput {
                previous_output: OutPoint {
                    txid: Hash256([7; 32]),
                    index: 2,
                },
                signature: vec![0xAB; 70],
                pubkey: vec![0xCD; 33],
            }],
            outputs: vec![TxOutput {
                amount: 50 * COIN,
                address: "addr-recipient".into(),
                coin_state: CoinState::Spendable,
                certificate_id: None,
            }],
            metadata,
            timestamp: 1_700_000_000,
        }
    }

    #[test]
    fn transaction_round_trips() {
        let tx = sample_tx();
        let bytes = encode_transaction(&tx);
        let decoded = decode_transaction(&bytes).unwrap();
        assert_eq!(tx, decoded);
    }

    #[test]
    fn transaction_trailing_bytes_rejected() {
        let tx = sample_tx();
        let mut bytes = encode_transaction(&tx);
        bytes.push(0xFF);
        assert_eq!(decode_transaction(&bytes), Err(CodecError::TrailingBytes));
    }

    #[test]
    fn transaction_truncated_is_eof_error() {
        let tx = sample_tx();
        let bytes = encode_transaction(&tx);
        let truncated = &bytes[..bytes.len() - 1];
        assert_eq!(
            decode_transaction(truncated),
            Err(CodecError::UnexpectedEof)
        );
    }

    #[test]
    fn sighash_encoding_clears_signature_but_keeps_pubkey() {
        let tx = sample_tx();
        let cleared = encode_transaction_for_sighash(&tx);
        let mut tx2 = tx.clone();
        tx2.inputs[0].signature = vec![0x11; 5];
        let cleared2 = encode_transaction_for_sighash(&tx2);
        assert_eq!(cleared, cleared2);
    }

    #[test]
    fn txid_bytes_insensitive_to_signature() {
        let tx = sample_tx();
        let mut tx2 = tx.clone();
        tx2.inputs[0].signature = vec![];
        assert_eq!(
            encode_transaction_for_txid(&tx).unwrap(),
            encode_transaction_for_txid(&tx2).unwrap()
        );
    }

    #[test]
    fn unknown_tx_kind_tag_rejected() {
        let tx = sample_tx();
        let mut bytes = encode_transaction(&tx);
        bytes[4] = 0xFF; // kind tag byte
        assert_eq!(
            decode_transaction(&bytes),
            Err(CodecError::UnknownTxKind(0xFF))
        );
    }

    #[test]
    fn block_round_trips() {
        let header = BlockHeader {
            version: 1,
            prev_hash: Hash256::ZERO,
            merkle_root: Hash256::ZERO,
            timestamp: 1_700_000_000,
            bits: 0x1d00_ffff,
            nonce: 42,
        };
        let block = Block {
            header,
            height: 7,
            transactions: vec![sample_tx()],
        };
        let bytes = encode_block(&block);
        let decoded = decode_block(&bytes, 7).unwrap();
        assert_eq!(block, decoded);
    }

    #[test]
    fn varint_minimal_encoding_enforced() {
        // 0xFD followed by a u16 value < 0xFD is non-minimal.
        let bytes = [0xFDu8, 0x05, 0x00];
        let mut cursor = io::Cursor::new(&bytes[..]);
        assert_eq!(read_varint(&mut cursor), Err(CodecError::NonMinimalVarint));
    }

    #[test]
    fn varint_round_trips_at_boundaries() {
        for n in [0u64, 0xFC, 0xFD, 0xFFFF, 0x1_0000, 0xFFFF_FFFF, 0x1_0000_0000] {
            let mut buf = Vec::new();
            write_varint(&mut buf, n);
            let mut cursor = io::Cursor::new(&buf[..]);
            assert_eq!(read_varint(&mut cursor).unwrap(), n);
        }
    }
}
