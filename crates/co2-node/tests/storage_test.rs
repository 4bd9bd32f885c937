//! Standalone test for the RocksDB-backed storage layer, independent of the
//! chain manager or networking.

use std::collections::BTreeMap;

use co2_core::constants::COIN;
use co2_core::genesis;
use co2_core::ledger::LedgerDiff;
use co2_core::merkle;
use co2_core::types::{Block, BlockHeader, CoinState, OutPoint, Transaction, TxInput, TxKind, TxOutput};
use co2_core::utxo::Diff;
use co2_node_lib::storage::{ChainStore, RocksStore};

fn make_coinbase(amount: u64, address: &str, height: u32) -> Transaction {
    Transaction {
        version: 1,
        kind: TxKind::Coinbase,
        inputs: vec![TxInput {
            previous_output: OutPoint::null(),
            signature: height.to_le_bytes().to_vec(),
            pubkey: Vec::new(),
        }],
        outputs: vec![TxOutput {
            amount,
            address: address.to_string(),
            coin_state: CoinState::Spendable,
            certificate_id: None,
        }],
        metadata: BTreeMap::new(),
        timestamp: genesis::GENESIS_TIMESTAMP + height,
    }
}

fn make_child_block(prev_hash: co2_core::types::Hash256, height: u32, txs: Vec<Transaction>) -> Block {
    let txids: Vec<_> = txs.iter().map(|tx| tx.txid().unwrap()).collect();
    Block {
        header: BlockHeader {
            version: 1,
            prev_hash,
            merkle_root: merkle::merkle_root(&txids),
            timestamp: genesis::GENESIS_TIMESTAMP + height,
            bits: genesis::genesis_bits(),
            nonce: 0,
        },
        height,
        transactions: txs,
    }
}

#[test]
fn put_block_advances_tip_and_persists_the_block() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = RocksStore::open(dir.path().join("chaindata")).unwrap();

    let genesis_hash = genesis::genesis_hash();
    let coinbase = make_coinbase(50 * COIN, "miner-address", 1);
    let coinbase_txid = coinbase.txid().unwrap();
    let block = make_child_block(genesis_hash, 1, vec![coinbase]);
    let block_hash = block.header.hash();

    let mut diff = Diff::new();
    diff.insert(
        OutPoint { txid: coinbase_txid, index: 0 },
        co2_core::types::UtxoEntry {
            output: block.transactions[0].outputs[0].clone(),
            block_height: 1,
            is_coinbase: true,
        },
    );

    store.put_block(&block, &diff, &LedgerDiff::new()).unwrap();

    let (tip_height, tip_hash) = store.tip().unwrap();
    assert_eq!(tip_height, 1);
    assert_eq!(tip_hash, block_hash);

    let fetched = store.get_block(&block_hash).unwrap().expect("block should be persisted");
    assert_eq!(fetched.transactions[0].txid().unwrap(), coinbase_txid);
    assert_eq!(store.get_hash_at_height(1).unwrap(), Some(block_hash));
}

#[test]
fn take_tip_reverts_to_the_parent_and_returns_the_stored_diff() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = RocksStore::open(dir.path().join("chaindata")).unwrap();

    let genesis_hash = genesis::genesis_hash();
    let coinbase = make_coinbase(50 * COIN, "miner-address", 1);
    let coinbase_txid = coinbase.txid().unwrap();
    let block = make_child_block(genesis_hash, 1, vec![coinbase]);
    let block_hash = block.header.hash();

    let mut diff = Diff::new();
    diff.insert(
        OutPoint { txid: coinbase_txid, index: 0 },
        co2_core::types::UtxoEntry {
            output: block.transactions[0].outputs[0].clone(),
            block_height: 1,
            is_coinbase: true,
        },
    );
    store.put_block(&block, &diff, &LedgerDiff::new()).unwrap();

    let (undo_diff, _undo_ledger) = store.take_tip(&block_hash).unwrap();
    assert_eq!(undo_diff.inserts.len(), 1);

    let (tip_height, tip_hash) = store.tip().unwrap();
    assert_eq!(tip_height, 0);
    assert_eq!(tip_hash, genesis_hash);
    assert!(store.get_block(&block_hash).unwrap().is_none());
}

#[test]
fn iter_utxo_entries_reflects_connected_coinbases() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = RocksStore::open(dir.path().join("chaindata")).unwrap();

    let genesis_hash = genesis::genesis_hash();
    let coinbase = make_coinbase(50 * COIN, "miner-address", 1);
    let coinbase_txid = coinbase.txid().unwrap();
    let outpoint = OutPoint { txid: coinbase_txid, index: 0 };
    let block = make_child_block(genesis_hash, 1, vec![coinbase]);

    let mut diff = Diff::new();
    diff.insert(
        outpoint.clone(),
        co2_core::types::UtxoEntry {
            output: block.transactions[0].outputs[0].clone(),
            block_height: 1,
            is_coinbase: true,
        },
    );
    store.put_block(&block, &diff, &LedgerDiff::new()).unwrap();

    let entries = store.iter_utxo_entries().unwrap();
    assert!(entries.iter().any(|(op, entry)| *op == outpoint && entry.output.amount == 50 * COIN));
}
