//! Chain manager: the node's single writer over the active tip, side
//! branches, the orphan pool, and the in-memory UTXO index and certificate
//! ledger (spec §4.5).
//!
//! [`Node`] owns everything mutated by connecting or disconnecting a block.
//! All mutation is serialized through [`Node::writer`]; readers (RPC, the
//! miner, mempool admission) reach the same state concurrently through the
//! [`NodeChainState`] adapter's [`ChainState`] implementation, which takes
//! only read locks.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use primitive_types::U256;
use tracing::debug;

use co2_consensus::checkpoint;
use co2_consensus::engine::Miner;
use co2_core::codec;
use co2_core::constants::{MEDIAN_TIME_SPAN, ORPHAN_POOL_MAX_AGE_SECS, ORPHAN_POOL_MAX_ENTRIES};
use co2_core::difficulty;
use co2_core::error::{BlockError, ChainError, CoreError, MempoolError};
use co2_core::genesis;
use co2_core::ledger::{Ledger, LedgerDiff};
use co2_core::mempool::Mempool;
use co2_core::traits::{BlockProducer, ChainState, NetworkService, SubmissionSink};
use co2_core::types::{Block, BlockHeader, Certificate, Hash256, OutPoint, Project, Transaction, TxOutput};
use co2_core::utxo::{Diff, UtxoIndex};
use co2_core::validation;

use crate::config::NodeConfig;
use crate::storage::{ChainStore, MemoryStore, RocksStore};

/// Operational limit on how many blocks a reorg may unwind, independent of
/// the consensus-level checkpoint rule. A reorg this deep almost certainly
/// indicates a partitioned network rather than a legitimate longer chain.
pub const MAX_REORG_DEPTH: u32 = 100;

/// Cumulative proof-of-work a single block's target represents: the
/// expected number of hashes to find a solution at that difficulty
/// (spec §4.5, "cumulative chain work"). `2^256 / (target + 1)`.
pub fn work_for_target(target: U256) -> U256 {
    if target.is_zero() {
        return U256::max_value();
    }
    (U256::max_value() - target) / (target + U256::one()) + U256::one()
}

/// A header the chain manager has seen, whether connected to the active
/// chain or sitting on a side branch — enough to compare candidate tips by
/// cumulative work without consulting storage.
#[derive(Debug, Clone)]
struct HeaderInfo {
    height: u32,
    cumulative_work: U256,
}

fn header_work(header: &BlockHeader) -> Result<U256, CoreError> {
    let target = difficulty::bits_to_target(header.bits).map_err(BlockError::from)?;
    Ok(work_for_target(target))
}

/// Runtime counters, approximate by design (spec §4.9's "ambient" metrics
/// surface) — never consulted for consensus decisions.
#[derive(Default)]
pub struct NodeMetrics {
    pub blocks_connected: AtomicU64,
    pub reorgs: AtomicU64,
    pub mempool_size: AtomicU64,
    pub peer_count: AtomicU64,
}

/// The chain manager (spec §4.5): active tip, side branches, orphan pool,
/// owned UTXO view and certificate ledger, and the mempool they admit
/// transactions against.
pub struct Node {
    config: NodeConfig,
    store: RwLock<Box<dyn ChainStore>>,
    utxo: RwLock<UtxoIndex>,
    ledger: RwLock<Ledger>,
    mempool: Arc<RwLock<Mempool>>,
    /// Most recent [`MEDIAN_TIME_SPAN`] connected-block timestamps, oldest
    /// first — the window the median-time-past rule is computed over.
    timestamps: RwLock<Vec<u32>>,
    /// Every header the manager has ever accepted, active chain and side
    /// branches alike, keyed by hash.
    headers: RwLock<HashMap<Hash256, HeaderInfo>>,
    /// Full blocks on side branches, retained so a later reorg has the
    /// bodies on hand without re-requesting them.
    side_blocks: RwLock<HashMap<Hash256, Block>>,
    /// Blocks whose parent hasn't arrived yet, keyed by that missing parent.
    orphans: RwLock<HashMap<Hash256, (Block, Instant)>>,
    network: Option<Arc<dyn NetworkService + Send + Sync>>,
    metrics: NodeMetrics,
    /// Serializes every operation that mutates {tip, utxo, ledger} (spec
    /// §4.9's single chain-writer lock). Readers never take this.
    writer: Mutex<()>,
    weak_self: RwLock<Weak<Node>>,
}

impl Node {
    /// Open (or create) RocksDB-backed storage at `config.db_path()`.
    pub fn open(config: NodeConfig) -> Result<Arc<Self>, CoreError> {
        let store = RocksStore::open(config.db_path())?;
        Self::bootstrap(Box::new(store), config, None)
    }

    /// Like [`Self::open`] but wired to a running network collaborator.
    pub fn open_with_network(
        config: NodeConfig,
        network: Arc<dyn NetworkService + Send + Sync>,
    ) -> Result<Arc<Self>, CoreError> {
        let store = RocksStore::open(config.db_path())?;
        Self::bootstrap(Box::new(store), config, Some(network))
    }

    /// In-memory storage, for tests and the bundled benchmarks.
    pub fn in_memory(config: NodeConfig) -> Arc<Self> {
        Self::bootstrap(Box::new(MemoryStore::new()), config, None)
            .expect("in-memory store never fails to bootstrap")
    }

    fn bootstrap(
        mut store: Box<dyn ChainStore>,
        config: NodeConfig,
        network: Option<Arc<dyn NetworkService + Send + Sync>>,
    ) -> Result<Arc<Self>, CoreError> {
        let (tip_height, tip_hash) = store.tip()?;
        if tip_hash == Hash256::ZERO {
            let genesis = genesis::genesis_block().clone();
            store.put_block(&genesis, &genesis_diff(&genesis)?, &LedgerDiff::new())?;
        }
        let (tip_height, _) = store.tip()?;

        let mut utxo = UtxoIndex::new();
        let mut diff = Diff::new();
        diff.inserts = store.iter_utxo_entries()?;
        utxo.apply(&diff);

        let mut ledger = Ledger::new();
        let mut headers = HashMap::new();
        let mut timestamps = Vec::new();
        let mut cumulative_work = U256::zero();

        for height in 0..=tip_height {
            let hash = store
                .get_hash_at_height(height)?
                .ok_or_else(|| ChainError::IntegrityFault(format!("missing hash at height {height}")))?;
            let header = store
                .get_header(&hash)?
                .ok_or_else(|| ChainError::IntegrityFault(format!("missing header for height {height}")))?;
            cumulative_work += header_work(&header)?;
            headers.insert(hash, HeaderInfo { height, cumulative_work });
            timestamps.push(header.timestamp);
            if let Some(diff) = store.peek_ledger_diff(&hash)? {
                ledger.apply(&diff);
            }
        }
        let window_start = timestamps.len().saturating_sub(MEDIAN_TIME_SPAN);
        timestamps.drain(..window_start);

        let node = Arc::new(Self {
            config,
            store: RwLock::new(store),
            utxo: RwLock::new(utxo),
            ledger: RwLock::new(ledger),
            mempool: Arc::new(RwLock::new(Mempool::with_defaults())),
            timestamps: RwLock::new(timestamps),
            headers: RwLock::new(headers),
            side_blocks: RwLock::new(HashMap::new()),
            orphans: RwLock::new(HashMap::new()),
            network,
            metrics: NodeMetrics::default(),
            writer: Mutex::new(()),
            weak_self: RwLock::new(Weak::new()),
        });
        *node.weak_self.write() = Arc::downgrade(&node);
        Ok(node)
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn metrics(&self) -> &NodeMetrics {
        &self.metrics
    }

    pub fn mempool(&self) -> Arc<RwLock<Mempool>> {
        Arc::clone(&self.mempool)
    }

    pub fn network(&self) -> Option<&Arc<dyn NetworkService + Send + Sync>> {
        self.network.as_ref()
    }

    pub fn tip(&self) -> (u32, Hash256) {
        self.store.read().tip().unwrap_or((0, Hash256::ZERO))
    }

    pub fn orphan_count(&self) -> usize {
        self.orphans.read().len()
    }

    pub fn chain_state(&self) -> NodeChainState {
        let strong = self.weak_self.read().upgrade().expect("node outlives its own weak handle");
        NodeChainState(strong)
    }

    /// A [`Miner`] wired to this node's current chain state and mempool.
    /// Cheap to construct; callers ask for a fresh one per template/validate
    /// call rather than holding onto one across block connects.
    pub fn miner(&self) -> Miner {
        Miner::new(
            Arc::new(self.chain_state()) as Arc<dyn ChainState + Send + Sync>,
            Arc::clone(&self.mempool),
        )
    }

    /// Submit a transaction for mempool admission. Runs phase B and phase C
    /// validation against the current chain tip before handing off to the
    /// mempool's fee-rate and replace-by-fee policy.
    pub fn submit_tx(&self, tx: Transaction) -> Result<Hash256, CoreError> {
        validation::validate_tx_structure(&tx)?;
        let txid = tx.txid()?;

        let utxo = self.utxo.read();
        let ledger = self.ledger.read();
        let (tip_height, _) = self.store.read().tip()?;
        let next_height = tip_height.saturating_add(1);
        let effect = validation::validate_tx_contextual(&tx, txid, next_height, &utxo, &ledger, &HashSet::new())?;
        drop(ledger);
        drop(utxo);

        let size = codec::encode_transaction(&tx).len();
        let mut mempool = self.mempool.write();
        mempool.insert(tx, txid, effect.fee, size)?;
        self.metrics.mempool_size.store(mempool.len() as u64, Ordering::Relaxed);
        Ok(txid)
    }

    /// Submit a mined or peer-relayed block. Extends the tip directly if it
    /// builds on the current one, tracks it as a side branch and reorganizes
    /// if it overtakes the active chain's cumulative work, or stores it as
    /// an orphan if its parent hasn't arrived yet.
    pub fn accept_block(&self, block: Block) -> Result<(), CoreError> {
        let _guard = self.writer.lock();
        let hash = block.header.hash();
        let result = self.accept_one(&block);
        if result.is_ok() {
            self.retry_orphans(hash);
        }
        result
    }

    fn retry_orphans(&self, connected_hash: Hash256) {
        let mut frontier = vec![connected_hash];
        while let Some(parent) = frontier.pop() {
            let orphan = self.orphans.write().remove(&parent);
            let Some((block, _)) = orphan else { continue };
            let block_hash = block.header.hash();
            match self.accept_one(&block) {
                Ok(()) => frontier.push(block_hash),
                Err(e) => debug!(%e, %block_hash, "dropping previously orphaned block that failed to connect"),
            }
        }
    }

    /// Assumes `self.writer` is held by the caller.
    fn accept_one(&self, block: &Block) -> Result<(), CoreError> {
        let hash = block.header.hash();
        if self.headers.read().contains_key(&hash) {
            return Err(ChainError::DuplicateBlock(hash.to_string()).into());
        }

        let (_, tip_hash) = self.store.read().tip()?;
        if block.header.prev_hash == tip_hash {
            self.connect(block)?;
            self.metrics.blocks_connected.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        let parent_info = self.headers.read().get(&block.header.prev_hash).cloned();
        let Some(parent_info) = parent_info else {
            self.store_orphan(block.clone());
            return Ok(());
        };

        let work = header_work(&block.header)?;
        let cumulative_work = parent_info.cumulative_work + work;
        let height = parent_info.height + 1;

        self.side_blocks.write().insert(hash, block.clone());
        self.headers.write().insert(hash, HeaderInfo { height, cumulative_work });

        let (active_height, active_hash) = self.store.read().tip()?;
        let active_work = self
            .headers
            .read()
            .get(&active_hash)
            .map(|i| i.cumulative_work)
            .unwrap_or_else(U256::zero);

        if cumulative_work > active_work {
            self.reorganise(&hash, active_height)?;
        }
        Ok(())
    }

    fn store_orphan(&self, block: Block) {
        let mut orphans = self.orphans.write();
        orphans.retain(|_, (_, ts)| ts.elapsed().as_secs() < ORPHAN_POOL_MAX_AGE_SECS);
        if orphans.len() >= ORPHAN_POOL_MAX_ENTRIES {
            if let Some(oldest) = orphans.iter().min_by_key(|(_, (_, ts))| *ts).map(|(h, _)| *h) {
                orphans.remove(&oldest);
            }
        }
        debug!(prev_hash = %block.header.prev_hash, "storing block as orphan, parent unknown");
        orphans.insert(block.header.prev_hash, (block, Instant::now()));
    }

    /// Connect `block` as the new tip: validates it against the current
    /// chain state, computes its UTXO/ledger diff, persists it, and folds
    /// the diff into the in-memory index and ledger.
    fn connect(&self, block: &Block) -> Result<(), CoreError> {
        self.miner().validate_block(block)?;

        let (tip_height, tip_hash) = self.store.read().tip()?;
        if block.header.prev_hash != tip_hash {
            return Err(ChainError::UnknownParent.into());
        }
        let next_height = tip_height.checked_add(1).ok_or(ChainError::EmptyChain)?;
        if block.height != next_height {
            return Err(ChainError::HeightMismatch { expected: next_height as u64, got: block.height as u64 }.into());
        }

        let mut utxo = self.utxo.write();
        let mut ledger = self.ledger.write();

        let mut diff = Diff::new();
        let mut ledger_diff = LedgerDiff::new();
        let mut spent_in_block = HashSet::new();
        let mut seen_cert_ids = HashSet::new();

        for (index, tx) in block.transactions.iter().enumerate() {
            let txid = tx.txid().map_err(|source| BlockError::Tx { index, source })?;
            let effect = validation::validate_tx_contextual(tx, txid, next_height, &utxo, &ledger, &spent_in_block)
                .map_err(|source| BlockError::Tx { index, source })?;
            for (op, _) in &effect.utxo_removes {
                spent_in_block.insert(op.clone());
            }
            diff.removes.extend(effect.utxo_removes);
            diff.inserts.extend(effect.utxo_inserts);
            if let Some(update) = effect.certificate_update {
                if !seen_cert_ids.insert(update.0.clone()) {
                    return Err(BlockError::CertIdReused(update.0).into());
                }
                ledger_diff.certificates.push(update);
            }
            if let Some(created) = effect.project_created {
                ledger_diff.projects_created.push(created);
            }
        }

        utxo.apply(&diff);
        ledger.apply(&ledger_diff);
        self.store.write().put_block(block, &diff, &ledger_diff)?;
        drop(ledger);
        drop(utxo);

        let work = header_work(&block.header)?;
        let parent_work = self
            .headers
            .read()
            .get(&block.header.prev_hash)
            .map(|i| i.cumulative_work)
            .unwrap_or_else(U256::zero);
        self.headers.write().insert(
            block.header.hash(),
            HeaderInfo { height: next_height, cumulative_work: parent_work + work },
        );

        let mut timestamps = self.timestamps.write();
        timestamps.push(block.header.timestamp);
        let window_start = timestamps.len().saturating_sub(MEDIAN_TIME_SPAN);
        timestamps.drain(..window_start);
        drop(timestamps);

        self.mempool.write().remove_confirmed_block(block);
        self.side_blocks.write().remove(&block.header.hash());
        Ok(())
    }

    /// Disconnect the current tip, restoring the UTXO index and ledger to
    /// their pre-connect state and returning the disconnected block so the
    /// caller can decide what to do with it (re-attach as a side branch,
    /// re-queue its transactions, etc).
    fn disconnect(&self) -> Result<Block, CoreError> {
        let (tip_height, tip_hash) = self.store.read().tip()?;
        if tip_height == 0 {
            return Err(ChainError::EmptyChain.into());
        }
        let block = self
            .store
            .read()
            .get_block(&tip_hash)?
            .ok_or_else(|| ChainError::BlockNotFound(tip_hash.to_string()))?;

        let mut utxo = self.utxo.write();
        let mut ledger = self.ledger.write();
        let (diff, ledger_diff) = self.store.write().take_tip(&tip_hash)?;
        utxo.undo(&diff);
        ledger.undo(&ledger_diff);

        // Re-admit the block's non-coinbase transactions into the mempool,
        // re-validating each against the now-restored chain state so stale
        // double-spends don't resurface.
        let mut spent_in_block = HashSet::new();
        for tx in block.transactions.iter().skip(1) {
            let Ok(txid) = tx.txid() else { continue };
            if let Ok(effect) = validation::validate_tx_contextual(tx, txid, tip_height, &utxo, &ledger, &spent_in_block) {
                for (op, _) in &effect.utxo_removes {
                    spent_in_block.insert(op.clone());
                }
                let size = codec::encode_transaction(tx).len();
                let _ = self.mempool.write().insert(tx.clone(), txid, effect.fee, size);
            }
        }
        drop(ledger);
        drop(utxo);

        let mut timestamps = self.timestamps.write();
        timestamps.pop();
        drop(timestamps);

        Ok(block)
    }

    /// Reorganize the active chain onto the side branch ending at
    /// `new_tip_hash`, which has already been determined to carry more
    /// cumulative work than the current tip (at `active_height`).
    ///
    /// Each candidate block is validated and connected in branch order,
    /// against state as it stands after its predecessors in the branch have
    /// connected. If a later connect fails, every block connected so far in
    /// this reorg is disconnected again and the original active branch is
    /// reconnected, so a failed reorg is a no-op on state (spec §4.5, §8
    /// "reorganise is transactional").
    fn reorganise(&self, new_tip_hash: &Hash256, active_height: u32) -> Result<(), CoreError> {
        let (_, active_tip_hash) = self.store.read().tip()?;

        let mut to_connect = Vec::new();
        let mut cursor = *new_tip_hash;
        while self.store.read().get_header(&cursor)?.is_none() {
            let block = self
                .side_blocks
                .read()
                .get(&cursor)
                .cloned()
                .ok_or(ChainError::UnknownParent)?;
            cursor = block.header.prev_hash;
            to_connect.push(block);
        }
        to_connect.reverse();
        let fork_point = cursor;

        let fork_height = self
            .headers
            .read()
            .get(&fork_point)
            .map(|i| i.height)
            .ok_or(ChainError::UnknownParent)?;

        if checkpoint::is_below_checkpoint(fork_height) {
            return Err(BlockError::CheckpointMismatch.into());
        }
        let disconnect_count = active_height.saturating_sub(fork_height);
        if disconnect_count > MAX_REORG_DEPTH {
            return Err(ChainError::IntegrityFault(format!(
                "reorg would disconnect {disconnect_count} blocks, exceeding the {MAX_REORG_DEPTH}-block limit"
            ))
            .into());
        }

        // No blanket pre-validation pass here: a later block in `to_connect`
        // may legitimately spend an output first created by an earlier
        // block in the same side branch, which only exists once that
        // earlier block has actually been connected. `connect` below
        // re-validates (phase A/B and stateful phase C) each block in
        // sequence against state as it stands at that point in the new
        // branch, which is the only state a spend dependency like that can
        // be checked against.
        let mut disconnected = Vec::with_capacity(disconnect_count as usize);
        for _ in 0..disconnect_count {
            disconnected.push(self.disconnect()?);
        }

        let mut connected = 0usize;
        let mut failure = None;
        for block in &to_connect {
            match self.connect(block) {
                Ok(()) => connected += 1,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if let Some(e) = failure {
            for _ in 0..connected {
                self.disconnect()?;
            }
            for block in disconnected.iter().rev() {
                self.connect(block).map_err(|source| {
                    ChainError::IntegrityFault(format!(
                        "failed to revert reorg onto original tip {active_tip_hash}: {source}"
                    ))
                })?;
            }
            for block in &to_connect {
                self.side_blocks.write().insert(block.header.hash(), block.clone());
            }
            return Err(e);
        }

        for block in disconnected {
            let hash = block.header.hash();
            self.side_blocks.write().insert(hash, block);
        }

        self.metrics.reorgs.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Build the genesis block's UTXO diff: one coinbase output, inserted.
fn genesis_diff(genesis: &Block) -> Result<Diff, CoreError> {
    let mut diff = Diff::new();
    let coinbase = &genesis.transactions[0];
    let txid = coinbase.txid()?;
    for (index, output) in coinbase.outputs.iter().enumerate() {
        diff.insert(
            OutPoint { txid, index: index as u32 },
            co2_core::types::UtxoEntry { output: output.clone(), block_height: 0, is_coinbase: true },
        );
    }
    Ok(diff)
}

/// Read-only view of a [`Node`]'s chain state, implementing [`ChainState`]
/// for the miner, RPC, and mempool admission. Every method takes a fresh
/// read lock; holding one across calls is the caller's choice, not this
/// adapter's.
pub struct NodeChainState(Arc<Node>);

impl NodeChainState {
    pub fn new(node: Arc<Node>) -> Self {
        Self(node)
    }
}

impl ChainState for NodeChainState {
    fn tip(&self) -> (u32, Hash256, U256) {
        let (height, hash) = self.0.store.read().tip().unwrap_or((0, Hash256::ZERO));
        let work = self.0.headers.read().get(&hash).map(|i| i.cumulative_work).unwrap_or_else(U256::zero);
        (height, hash, work)
    }

    fn block_by_height(&self, height: u32) -> Option<Block> {
        let hash = self.0.store.read().get_hash_at_height(height).ok().flatten()?;
        self.0.store.read().get_block(&hash).ok().flatten()
    }

    fn block_by_hash(&self, hash: &Hash256) -> Option<Block> {
        self.0.store.read().get_block(hash).ok().flatten()
    }

    fn header_by_hash(&self, hash: &Hash256) -> Option<BlockHeader> {
        self.0.store.read().get_header(hash).ok().flatten()
    }

    /// Not backed by a persistent index: checks the mempool first, then
    /// scans the active chain tip-to-genesis. Acceptable off the hot path
    /// this node needs it on (RPC lookups); see DESIGN.md.
    fn tx_by_id(&self, txid: &Hash256) -> Option<Transaction> {
        if let Some(entry) = self.0.mempool.read().get(txid) {
            return Some(entry.tx.clone());
        }
        let (tip_height, _) = self.0.store.read().tip().ok()?;
        for height in (0..=tip_height).rev() {
            if let Some(block) = self.block_by_height(height) {
                if let Some(tx) = block.transactions.iter().find(|tx| tx.txid().ok().as_ref() == Some(txid)) {
                    return Some(tx.clone());
                }
            }
        }
        None
    }

    fn utxo(&self, outpoint: &OutPoint) -> Option<TxOutput> {
        self.0.utxo.read().get(outpoint).map(|e| e.output.clone())
    }

    fn balance(&self, address: &str) -> u64 {
        self.0.utxo.read().balance(address)
    }

    fn utxos_of(&self, address: &str) -> Vec<OutPoint> {
        self.0.utxo.read().utxos_of(address)
    }

    fn certificate(&self, certificate_id: &str) -> Option<Certificate> {
        self.0.ledger.read().certificate(certificate_id).cloned()
    }

    fn project(&self, project_id: &str) -> Option<Project> {
        self.0.ledger.read().project(project_id).cloned()
    }

    fn recent_timestamps(&self) -> Vec<u32> {
        self.0.timestamps.read().clone()
    }
}

impl SubmissionSink for Node {
    fn submit_tx(&self, tx: Transaction) -> Result<Hash256, MempoolError> {
        Node::submit_tx(self, tx).map_err(|e| match e {
            CoreError::Mempool(m) => m,
            CoreError::Tx(t) => MempoolError::Tx(t),
            other => MempoolError::Tx(co2_core::error::TxError::Serialization(other.to_string())),
        })
    }

    fn submit_block(&self, block: Block) -> Result<(), ChainError> {
        Node::accept_block(self, block).map_err(|e| match e {
            CoreError::Chain(c) => c,
            CoreError::Block(b) => ChainError::Block(b),
            other => ChainError::IntegrityFault(other.to_string()),
        })
    }
}
