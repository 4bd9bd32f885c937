//! Genesis block definition for the CO2Chain network.
//!
//! The genesis block is the first block in the chain (height 0). It contains
//! a single coinbase transaction paying the ordinary epoch-0 subsidy — there
//! is no premine (spec §3, §4.3: genesis is not special-cased in the reward
//! schedule). All values are hardcoded and deterministic: every node computes
//! the identical genesis block.
//!
//! Genesis bits are fixed at the network's easiest target ([`max_target`]);
//! the nonce is fixed at `0` and the chain manager accepts height 0 by
//! matching its hash rather than re-checking proof-of-work (see DESIGN.md's
//! "genesis hardcoding" entry) — mirroring how Bitcoin-family nodes hardcode
//! their genesis hash rather than mining one at every startup.

use std::sync::LazyLock;

use crate::difficulty::{max_target, target_to_bits};
use crate::merkle;
use crate::reward::block_reward;
use crate::types::{
    Block, BlockHeader, CoinState, Hash256, OutPoint, Transaction, TxInput, TxKind, TxOutput,
};

/// Genesis block timestamp: January 1, 2026 00:00:00 UTC.
pub const GENESIS_TIMESTAMP: u32 = 1_767_225_600;

/// Message embedded in the genesis coinbase (in the spirit of Bitcoin's
/// "The Times" headline), carried as coinbase metadata rather than as a
/// scriptSig, since coinbase inputs here carry no signature/pubkey.
pub const GENESIS_MESSAGE: &[u8] =
    b"Certify the reduction, compensate the atmosphere. CO2Chain genesis 2026.";

/// Cached genesis data, computed once on first access.
struct GenesisData {
    block: Block,
    hash: Hash256,
    coinbase_txid: Hash256,
}

static GENESIS: LazyLock<GenesisData> = LazyLock::new(build_genesis);

/// Build the genesis block and cache derived values.
fn build_genesis() -> GenesisData {
    let coinbase = build_genesis_coinbase();
    // Hardcoded coinbase — serialization cannot fail.
    let coinbase_txid = coinbase.txid().expect("genesis coinbase is hardcoded valid data");
    let merkle_root = merkle::merkle_root(&[coinbase_txid]);

    let block = Block {
        header: BlockHeader {
            version: 1,
            prev_hash: Hash256::ZERO,
            merkle_root,
            timestamp: GENESIS_TIMESTAMP,
            bits: genesis_bits(),
            nonce: 0,
        },
        height: 0,
        transactions: vec![coinbase],
    };
    let hash = block.header.hash();

    GenesisData {
        block,
        hash,
        coinbase_txid,
    }
}

/// The compact `bits` encoding of the network's easiest target, used at
/// genesis and on fresh test networks before any retarget has occurred.
pub fn genesis_bits() -> u32 {
    target_to_bits(max_target())
}

/// Build the genesis coinbase transaction.
///
/// Pays the height-0 subsidy to a fixed, unowned genesis allocation address
/// (no private key is known for it, matching the dev-fund-free design
/// recorded in DESIGN.md). The genesis message is carried as metadata.
fn build_genesis_coinbase() -> Transaction {
    let mut metadata = std::collections::BTreeMap::new();
    metadata.insert("message".to_string(), GENESIS_MESSAGE.to_vec());
    metadata.insert(crate::validation::COINBASE_HEIGHT_KEY.to_string(), 0u32.to_le_bytes().to_vec());

    Transaction {
        version: 1,
        kind: TxKind::Coinbase,
        inputs: vec![TxInput {
            previous_output: OutPoint::null(),
            signature: vec![],
            pubkey: vec![],
        }],
        outputs: vec![TxOutput {
            amount: block_reward(0),
            address: genesis_allocation_address(),
            coin_state: CoinState::Spendable,
            certificate_id: None,
        }],
        metadata,
        timestamp: GENESIS_TIMESTAMP,
    }
}

/// The address the genesis subsidy is paid to.
///
/// Derived deterministically as the low 20 bytes of
/// `SHA-256d(b"co2chain genesis allocation")` — there is no corresponding
/// private key, so the output is unspendable in practice even though its
/// coin_state is SPENDABLE.
pub fn genesis_allocation_address() -> String {
    let digest = Hash256::hash256(b"co2chain genesis allocation");
    let mut hash160 = [0u8; 20];
    hash160.copy_from_slice(&digest.as_bytes()[0..20]);
    crate::address::Address::from_hash160(hash160).encode()
}

/// The genesis block (height 0).
pub fn genesis_block() -> &'static Block {
    &GENESIS.block
}

/// The genesis block header hash.
pub fn genesis_hash() -> Hash256 {
    GENESIS.hash
}

/// The transaction ID of the genesis coinbase.
pub fn genesis_coinbase_txid() -> Hash256 {
    GENESIS.coinbase_txid
}

/// Check whether a block is the genesis block by comparing header hashes.
pub fn is_genesis(block: &Block) -> bool {
    block.header.hash() == GENESIS.hash
}
