//! Shared test helpers for the integration suites: spinning up in-memory
//! nodes, mining child blocks, and building signed transactions.

use std::sync::Arc;

use co2_consensus::engine::{mine_block, CancelToken};
use co2_core::constants::PowAlgorithm;
use co2_core::crypto::KeyPair;
use co2_core::traits::{BlockProducer, ChainState};
use co2_core::types::{Block, CoinState, OutPoint, Transaction, TxInput, TxKind, TxOutput};
use co2_node_lib::{Node, NodeConfig};

/// Build a fresh in-memory node (no RocksDB, no networking) for tests.
pub fn test_node() -> Arc<Node> {
    Node::in_memory(NodeConfig::default())
}

/// Mine and accept one child block paying the subsidy to `miner_address`,
/// returning the accepted block.
pub fn mine_and_accept(node: &Arc<Node>, miner_address: &str) -> Block {
    let template = node.miner().create_block_template(miner_address).unwrap();
    let cancel = CancelToken::new();
    let header = mine_block(template.header.clone(), PowAlgorithm::Scrypt, &cancel)
        .expect("test targets are easy enough to solve promptly");
    let block = Block { header, ..template };
    node.accept_block(block.clone()).unwrap();
    block
}

/// Mine `count` blocks onto `node`, all paying `miner_address`.
pub fn mine_n(node: &Arc<Node>, miner_address: &str, count: u32) -> Vec<Block> {
    (0..count).map(|_| mine_and_accept(node, miner_address)).collect()
}

/// A funded keypair plus the coinbase outpoint it owns, for building
/// spending transactions in tests once the coinbase has matured.
pub struct FundedKey {
    pub keypair: KeyPair,
    pub address: String,
    pub outpoint: OutPoint,
    pub amount: u64,
}

/// Mine a block whose coinbase pays a freshly generated keypair, returning
/// the keypair and the outpoint it can later spend.
pub fn mine_funded_block(node: &Arc<Node>) -> FundedKey {
    let keypair = KeyPair::generate();
    let address = keypair.public_key().address().encode();
    let block = mine_and_accept(node, &address);
    let coinbase = &block.transactions[0];
    let txid = coinbase.txid().unwrap();
    FundedKey {
        amount: coinbase.outputs[0].amount,
        keypair,
        address,
        outpoint: OutPoint { txid, index: 0 },
    }
}

/// Build and sign a simple transfer transaction spending `funded`'s
/// coinbase output to `to_address`, with `fee` satoshi left as the miner fee.
pub fn build_transfer(funded: &FundedKey, to_address: &str, fee: u64, timestamp: u32) -> Transaction {
    let mut tx = Transaction {
        version: 1,
        kind: TxKind::Transfer,
        inputs: vec![TxInput {
            previous_output: funded.outpoint,
            signature: Vec::new(),
            pubkey: Vec::new(),
        }],
        outputs: vec![TxOutput {
            amount: funded.amount.saturating_sub(fee),
            address: to_address.to_string(),
            coin_state: CoinState::Spendable,
            certificate_id: None,
        }],
        metadata: Default::default(),
        timestamp,
    };
    co2_core::crypto::sign_transaction_input(&mut tx, 0, &funded.keypair).unwrap();
    tx
}
