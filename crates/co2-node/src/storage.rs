//! RocksDB-backed persistent chain state storage (spec §4.9).
//!
//! [`ChainStore`] exposes exactly the point-lookup and atomic batch-write
//! primitives the chain manager needs; it performs no consensus logic of its
//! own — diff computation (phase C) lives in `co2_core::validation` and is
//! driven by [`crate::node::Node`]. [`RocksStore`] persists blocks, headers,
//! the height index, per-block undo data, and aggregate metadata in separate
//! column families, all mutated atomically via [`WriteBatch`]. [`MemoryStore`]
//! is the in-memory twin used by tests and benchmarks.
//!
//! Undo/metadata blobs use `serde_json` rather than the canonical wire codec
//! in [`co2_core::codec`]: that codec is reserved for consensus-critical
//! bytes (txids, block hashes, network wire format); these blobs never leave
//! this process and never feed a hash, so plain `serde` round-tripping is
//! the simpler, equally correct choice (see DESIGN.md).

use std::collections::HashMap;
use std::path::Path;

use rocksdb::{ColumnFamilyDescriptor, Options, WriteBatch, DB};

use co2_core::error::CoreError;
use co2_core::ledger::LedgerDiff;
use co2_core::types::{Block, BlockHeader, Hash256, OutPoint, UtxoEntry};
use co2_core::utxo::Diff;

const CF_BLOCKS: &str = "blocks";
const CF_HEADERS: &str = "headers";
const CF_UTXOS: &str = "utxos";
const CF_HEIGHT_INDEX: &str = "height_index";
const CF_UNDO: &str = "undo";
const CF_METADATA: &str = "metadata";

const ALL_CFS: &[&str] = &[CF_BLOCKS, CF_HEADERS, CF_UTXOS, CF_HEIGHT_INDEX, CF_UNDO, CF_METADATA];

const META_TIP_HEIGHT: &[u8] = b"tip_height";
const META_TIP_HASH: &[u8] = b"tip_hash";

/// Per-block undo data: enough to reconstruct the pre-connect UTXO and
/// ledger state without consulting anything else (spec §4.5 `disconnect`).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct BlockUndo {
    diff: Diff,
    ledger_diff: LedgerDiff,
}

/// Durable storage primitives the chain manager mutates under its own
/// writer lock (spec §4.9). Not internally synchronized — callers
/// (`crate::node::Node`) wrap an implementor in a lock.
pub trait ChainStore: Send + Sync {
    /// Atomically persist a connected block: the block itself, its header,
    /// the height index entry, undo data to later disconnect it, and the
    /// UTXO-set deltas the diff describes. Advances the stored tip.
    fn put_block(&mut self, block: &Block, diff: &Diff, ledger_diff: &LedgerDiff) -> Result<(), CoreError>;

    /// Remove the stored tip block and its undo data, moving the stored tip
    /// back to `block.header.prev_hash`. Returns the undo data that was
    /// consumed, so the caller can fold it back into its in-memory state.
    fn take_tip(&mut self, tip_hash: &Hash256) -> Result<(Diff, LedgerDiff), CoreError>;

    fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, CoreError>;
    fn get_header(&self, hash: &Hash256) -> Result<Option<BlockHeader>, CoreError>;
    fn get_hash_at_height(&self, height: u32) -> Result<Option<Hash256>, CoreError>;
    fn tip(&self) -> Result<(u32, Hash256), CoreError>;

    /// Read (without consuming) the undo data stored for a connected block,
    /// used to replay the ledger on startup without touching stored UTXOs.
    fn peek_ledger_diff(&self, hash: &Hash256) -> Result<Option<LedgerDiff>, CoreError>;

    /// All persisted UTXOs, for rebuilding the in-memory index on startup.
    fn iter_utxo_entries(&self) -> Result<Vec<(OutPoint, UtxoEntry)>, CoreError>;
}

fn key(h: &Hash256) -> &[u8] {
    h.as_bytes()
}

fn height_key(height: u32) -> [u8; 4] {
    height.to_be_bytes()
}

fn outpoint_key(op: &OutPoint) -> Vec<u8> {
    let mut k = Vec::with_capacity(36);
    k.extend_from_slice(op.txid.as_bytes());
    k.extend_from_slice(&op.index.to_be_bytes());
    k
}

fn to_bytes<T: serde::Serialize>(v: &T) -> Result<Vec<u8>, CoreError> {
    serde_json::to_vec(v).map_err(|e| CoreError::Storage(e.to_string()))
}

fn from_bytes<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, CoreError> {
    serde_json::from_slice(bytes).map_err(|e| CoreError::Storage(e.to_string()))
}

/// RocksDB-backed [`ChainStore`] used by the running node.
pub struct RocksStore {
    db: DB,
}

impl RocksStore {
    /// Open or create a database at `path`, creating column families as
    /// needed. Does not connect genesis — the chain manager does that on
    /// top of an empty store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors)
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        Ok(Self { db })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, CoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| CoreError::Storage(format!("missing column family: {name}")))
    }

    /// Flush all in-memory buffers to disk.
    pub fn flush(&self) -> Result<(), CoreError> {
        self.db.flush().map_err(|e| CoreError::Storage(e.to_string()))
    }

    /// Trigger manual compaction across all column families.
    pub fn compact(&self) -> Result<(), CoreError> {
        for name in ALL_CFS {
            let cf = self.cf(name)?;
            self.db.compact_range_cf(&cf, None::<&[u8]>, None::<&[u8]>);
        }
        Ok(())
    }
}

impl ChainStore for RocksStore {
    fn put_block(&mut self, block: &Block, diff: &Diff, ledger_diff: &LedgerDiff) -> Result<(), CoreError> {
        let hash = block.header.hash();
        let mut batch = WriteBatch::default();

        let cf_blocks = self.cf(CF_BLOCKS)?;
        let cf_headers = self.cf(CF_HEADERS)?;
        let cf_height = self.cf(CF_HEIGHT_INDEX)?;
        let cf_utxos = self.cf(CF_UTXOS)?;
        let cf_undo = self.cf(CF_UNDO)?;
        let cf_meta = self.cf(CF_METADATA)?;

        batch.put_cf(cf_blocks, key(&hash), to_bytes(block)?);
        batch.put_cf(cf_headers, key(&hash), to_bytes(&block.header)?);
        batch.put_cf(cf_height, height_key(block.height), key(&hash));

        for (outpoint, _) in &diff.removes {
            batch.delete_cf(cf_utxos, outpoint_key(outpoint));
        }
        for (outpoint, entry) in &diff.inserts {
            batch.put_cf(cf_utxos, outpoint_key(outpoint), to_bytes(entry)?);
        }

        let undo = BlockUndo { diff: diff.clone(), ledger_diff: ledger_diff.clone() };
        batch.put_cf(cf_undo, key(&hash), to_bytes(&undo)?);

        batch.put_cf(cf_meta, META_TIP_HEIGHT, height_key(block.height));
        batch.put_cf(cf_meta, META_TIP_HASH, key(&hash));

        self.db.write(batch).map_err(|e| CoreError::Storage(e.to_string()))
    }

    fn take_tip(&mut self, tip_hash: &Hash256) -> Result<(Diff, LedgerDiff), CoreError> {
        let header = self
            .get_header(tip_hash)?
            .ok_or_else(|| CoreError::Storage(format!("missing header for tip {tip_hash}")))?;
        let height: u32 = {
            let cf_meta = self.cf(CF_METADATA)?;
            let bytes = self
                .db
                .get_cf(&cf_meta, META_TIP_HEIGHT)
                .map_err(|e| CoreError::Storage(e.to_string()))?
                .ok_or_else(|| CoreError::Storage("tip height missing".into()))?;
            u32::from_be_bytes(bytes.try_into().map_err(|_| CoreError::Storage("bad tip height".into()))?)
        };

        let cf_undo = self.cf(CF_UNDO)?;
        let undo_bytes = self
            .db
            .get_cf(&cf_undo, key(tip_hash))
            .map_err(|e| CoreError::Storage(e.to_string()))?
            .ok_or_else(|| CoreError::Storage(format!("undo data missing for {tip_hash}")))?;
        let undo: BlockUndo = from_bytes(&undo_bytes)?;

        let mut batch = WriteBatch::default();
        let cf_blocks = self.cf(CF_BLOCKS)?;
        let cf_headers = self.cf(CF_HEADERS)?;
        let cf_height = self.cf(CF_HEIGHT_INDEX)?;
        let cf_utxos = self.cf(CF_UTXOS)?;
        let cf_meta = self.cf(CF_METADATA)?;

        batch.delete_cf(cf_blocks, key(tip_hash));
        batch.delete_cf(cf_headers, key(tip_hash));
        batch.delete_cf(cf_height, height_key(height));
        batch.delete_cf(&cf_undo, key(tip_hash));

        for (outpoint, _) in &undo.diff.inserts {
            batch.delete_cf(cf_utxos, outpoint_key(outpoint));
        }
        for (outpoint, entry) in &undo.diff.removes {
            batch.put_cf(cf_utxos, outpoint_key(outpoint), to_bytes(entry)?);
        }

        if height == 0 {
            batch.delete_cf(cf_meta, META_TIP_HEIGHT);
            batch.delete_cf(cf_meta, META_TIP_HASH);
        } else {
            batch.put_cf(cf_meta, META_TIP_HEIGHT, height_key(height - 1));
            batch.put_cf(cf_meta, META_TIP_HASH, key(&header.prev_hash));
        }

        self.db.write(batch).map_err(|e| CoreError::Storage(e.to_string()))?;
        Ok((undo.diff, undo.ledger_diff))
    }

    fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, CoreError> {
        let cf = self.cf(CF_BLOCKS)?;
        match self.db.get_cf(&cf, key(hash)).map_err(|e| CoreError::Storage(e.to_string()))? {
            Some(bytes) => Ok(Some(from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn get_header(&self, hash: &Hash256) -> Result<Option<BlockHeader>, CoreError> {
        let cf = self.cf(CF_HEADERS)?;
        match self.db.get_cf(&cf, key(hash)).map_err(|e| CoreError::Storage(e.to_string()))? {
            Some(bytes) => Ok(Some(from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn peek_ledger_diff(&self, hash: &Hash256) -> Result<Option<LedgerDiff>, CoreError> {
        let cf = self.cf(CF_UNDO)?;
        match self.db.get_cf(&cf, key(hash)).map_err(|e| CoreError::Storage(e.to_string()))? {
            Some(bytes) => {
                let undo: BlockUndo = from_bytes(&bytes)?;
                Ok(Some(undo.ledger_diff))
            }
            None => Ok(None),
        }
    }

    fn get_hash_at_height(&self, height: u32) -> Result<Option<Hash256>, CoreError> {
        let cf = self.cf(CF_HEIGHT_INDEX)?;
        match self
            .db
            .get_cf(&cf, height_key(height))
            .map_err(|e| CoreError::Storage(e.to_string()))?
        {
            Some(bytes) if bytes.len() == 32 => {
                let arr: [u8; 32] = bytes.try_into().unwrap();
                Ok(Some(Hash256::from_bytes(arr)))
            }
            Some(_) => Err(CoreError::Storage("corrupt height index entry".into())),
            None => Ok(None),
        }
    }

    fn tip(&self) -> Result<(u32, Hash256), CoreError> {
        let cf = self.cf(CF_METADATA)?;
        let Some(hash_bytes) = self.db.get_cf(&cf, META_TIP_HASH).map_err(|e| CoreError::Storage(e.to_string()))?
        else {
            return Ok((0, Hash256::ZERO));
        };
        let arr: [u8; 32] = hash_bytes
            .try_into()
            .map_err(|_| CoreError::Storage("corrupt tip hash".into()))?;
        let height_bytes = self
            .db
            .get_cf(&cf, META_TIP_HEIGHT)
            .map_err(|e| CoreError::Storage(e.to_string()))?
            .ok_or_else(|| CoreError::Storage("tip hash present without tip height".into()))?;
        let height = u32::from_be_bytes(
            height_bytes
                .try_into()
                .map_err(|_| CoreError::Storage("corrupt tip height".into()))?,
        );
        Ok((height, Hash256::from_bytes(arr)))
    }

    fn iter_utxo_entries(&self) -> Result<Vec<(OutPoint, UtxoEntry)>, CoreError> {
        let cf = self.cf(CF_UTXOS)?;
        let mut out = Vec::new();
        for item in self.db.iterator_cf(&cf, rocksdb::IteratorMode::Start) {
            let (key_bytes, value_bytes) = item.map_err(|e| CoreError::Storage(e.to_string()))?;
            if key_bytes.len() != 36 {
                return Err(CoreError::Storage("corrupt utxo key".into()));
            }
            let mut txid = [0u8; 32];
            txid.copy_from_slice(&key_bytes[0..32]);
            let index = u32::from_be_bytes(key_bytes[32..36].try_into().unwrap());
            let entry: UtxoEntry = from_bytes(&value_bytes)?;
            out.push((OutPoint { txid: Hash256::from_bytes(txid), index }, entry));
        }
        Ok(out)
    }
}

/// In-memory [`ChainStore`], used by tests and the bundled benchmarks so
/// neither needs a RocksDB instance on disk.
#[derive(Default)]
pub struct MemoryStore {
    blocks: HashMap<Hash256, Block>,
    headers: HashMap<Hash256, BlockHeader>,
    height_to_hash: HashMap<u32, Hash256>,
    utxos: HashMap<OutPoint, UtxoEntry>,
    undo: HashMap<Hash256, BlockUndo>,
    tip_height: u32,
    tip_hash: Hash256,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChainStore for MemoryStore {
    fn put_block(&mut self, block: &Block, diff: &Diff, ledger_diff: &LedgerDiff) -> Result<(), CoreError> {
        let hash = block.header.hash();
        for (outpoint, _) in &diff.removes {
            self.utxos.remove(outpoint);
        }
        for (outpoint, entry) in &diff.inserts {
            self.utxos.insert(outpoint.clone(), entry.clone());
        }
        self.headers.insert(hash, block.header.clone());
        self.blocks.insert(hash, block.clone());
        self.height_to_hash.insert(block.height, hash);
        self.undo.insert(hash, BlockUndo { diff: diff.clone(), ledger_diff: ledger_diff.clone() });
        self.tip_height = block.height;
        self.tip_hash = hash;
        Ok(())
    }

    fn take_tip(&mut self, tip_hash: &Hash256) -> Result<(Diff, LedgerDiff), CoreError> {
        let header = self
            .headers
            .get(tip_hash)
            .cloned()
            .ok_or_else(|| CoreError::Storage(format!("missing header for tip {tip_hash}")))?;
        let undo = self
            .undo
            .remove(tip_hash)
            .ok_or_else(|| CoreError::Storage(format!("undo data missing for {tip_hash}")))?;

        for (outpoint, _) in &undo.diff.inserts {
            self.utxos.remove(outpoint);
        }
        for (outpoint, entry) in &undo.diff.removes {
            self.utxos.insert(outpoint.clone(), entry.clone());
        }
        self.blocks.remove(tip_hash);
        self.headers.remove(tip_hash);
        self.height_to_hash.remove(&self.tip_height);

        if self.tip_height == 0 {
            self.tip_hash = Hash256::ZERO;
        } else {
            self.tip_height -= 1;
            self.tip_hash = header.prev_hash;
        }
        Ok((undo.diff, undo.ledger_diff))
    }

    fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, CoreError> {
        Ok(self.blocks.get(hash).cloned())
    }

    fn get_header(&self, hash: &Hash256) -> Result<Option<BlockHeader>, CoreError> {
        Ok(self.headers.get(hash).cloned())
    }

    fn get_hash_at_height(&self, height: u32) -> Result<Option<Hash256>, CoreError> {
        Ok(self.height_to_hash.get(&height).copied())
    }

    fn tip(&self) -> Result<(u32, Hash256), CoreError> {
        Ok((self.tip_height, self.tip_hash))
    }

    fn peek_ledger_diff(&self, hash: &Hash256) -> Result<Option<LedgerDiff>, CoreError> {
        Ok(self.undo.get(hash).map(|u| u.ledger_diff.clone()))
    }

    fn iter_utxo_entries(&self) -> Result<Vec<(OutPoint, UtxoEntry)>, CoreError> {
        Ok(self.utxos.iter().map(|(op, e)| (op.clone(), e.clone())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use co2_core::genesis;

    #[test]
    fn memory_store_empty_tip_is_zero() {
        let store = MemoryStore::new();
        assert_eq!(store.tip().unwrap(), (0, Hash256::ZERO));
    }

    #[test]
    fn memory_store_put_then_get_block() {
        let mut store = MemoryStore::new();
        let block = genesis::genesis_block().clone();
        store.put_block(&block, &Diff::new(), &LedgerDiff::new()).unwrap();
        let hash = block.header.hash();
        assert_eq!(store.get_block(&hash).unwrap().unwrap(), block);
        assert_eq!(store.tip().unwrap(), (0, hash));
    }

    #[test]
    fn memory_store_put_then_take_tip_restores_previous() {
        let mut store = MemoryStore::new();
        let genesis_block = genesis::genesis_block().clone();
        store.put_block(&genesis_block, &Diff::new(), &LedgerDiff::new()).unwrap();

        let mut next = genesis_block.clone();
        next.header.prev_hash = genesis_block.header.hash();
        next.header.nonce = 1;
        next.height = 1;
        store.put_block(&next, &Diff::new(), &LedgerDiff::new()).unwrap();

        let (diff, ledger_diff) = store.take_tip(&next.header.hash()).unwrap();
        assert!(diff.inserts.is_empty() && diff.removes.is_empty());
        assert!(ledger_diff.is_empty());
        assert_eq!(store.tip().unwrap(), (0, genesis_block.header.hash()));
    }

    #[test]
    fn memory_store_utxo_roundtrip_through_diff() {
        let mut store = MemoryStore::new();
        let block = genesis::genesis_block().clone();
        let op = OutPoint { txid: genesis::genesis_coinbase_txid(), index: 0 };
        let entry = UtxoEntry {
            output: block.transactions[0].outputs[0].clone(),
            block_height: 0,
            is_coinbase: true,
        };
        let mut diff = Diff::new();
        diff.insert(op.clone(), entry.clone());
        store.put_block(&block, &diff, &LedgerDiff::new()).unwrap();

        let entries = store.iter_utxo_entries().unwrap();
        assert_eq!(entries, vec![(op, entry)]);
    }

    #[test]
    fn memory_store_unknown_header_rejects_take_tip() {
        let mut store = MemoryStore::new();
        assert!(store.take_tip(&Hash256([7u8; 32])).is_err());
    }
}
