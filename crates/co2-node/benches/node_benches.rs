//! Criterion benchmarks for co2-node: connecting a mined block through the
//! RocksDB-backed store, and UTXO/balance lookups against the live index.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tempfile::TempDir;

use co2_consensus::engine::{mine_block, CancelToken};
use co2_core::constants::PowAlgorithm;
use co2_core::traits::{BlockProducer, ChainState};
use co2_node_lib::{Node, NodeConfig};

fn config_in(dir: &TempDir) -> NodeConfig {
    NodeConfig { data_dir: dir.path().to_path_buf(), ..NodeConfig::default() }
}

fn mined_child(node: &Node, miner_address: &str) -> co2_core::types::Block {
    let mut template = node.miner().create_block_template(miner_address).unwrap();
    let cancel = CancelToken::new();
    template.header = mine_block(template.header, PowAlgorithm::Scrypt, &cancel)
        .expect("bench network targets are easy enough to solve promptly");
    template
}

fn bench_accept_block(c: &mut Criterion) {
    c.bench_function("accept_block_rocksdb", |b| {
        b.iter_with_setup(
            || {
                let dir = TempDir::new().unwrap();
                let node = Node::open(config_in(&dir)).unwrap();
                let block = mined_child(&node, "bench-miner-address");
                (dir, node, block)
            },
            |(_dir, node, block)| {
                node.accept_block(black_box(block)).unwrap();
            },
        )
    });
}

fn bench_utxo_lookup(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let node = Node::open(config_in(&dir)).unwrap();
    for _ in 0..10 {
        let block = mined_child(&node, "bench-miner-address");
        node.accept_block(block).unwrap();
    }

    let genesis = co2_core::genesis::genesis_block();
    let genesis_txid = genesis.transactions[0].txid().unwrap();
    let existing = co2_core::types::OutPoint { txid: genesis_txid, index: 0 };
    let missing = co2_core::types::OutPoint { txid: co2_core::types::Hash256([0xFF; 32]), index: 999 };

    let chain = node.chain_state();
    c.bench_function("utxo_lookup_hit", |b| b.iter(|| chain.utxo(black_box(&existing))));
    c.bench_function("utxo_lookup_miss", |b| b.iter(|| chain.utxo(black_box(&missing))));
    c.bench_function("balance_lookup", |b| b.iter(|| chain.balance(black_box("bench-miner-address"))));
}

criterion_group!(benches, bench_accept_block, bench_utxo_lookup);
criterion_main!(benches);
