//! In-memory pool of unconfirmed transactions (spec §4.6).
//!
//! The mempool admits only transactions that already pass phase B/C
//! validation ([`crate::validation`]); it layers fee-rate policy, conflict
//! detection (including replace-by-fee), capacity eviction, and
//! reorg/re-validation bookkeeping on top.
//!
//! - O(1) lookup by txid
//! - O(1) conflict detection via a spent-outpoint index
//! - O(log n) fee-rate-ordered selection for block templates
//! - Capacity-limited storage with lowest-fee-rate eviction

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::constants::{MEMPOOL_MAX_BYTES, MEMPOOL_MAX_TX_COUNT, MIN_ABSOLUTE_TX_FEE, MIN_RELAY_FEE_RATE_SAT_PER_BYTE};
use crate::error::MempoolError;
use crate::types::{Block, Hash256, OutPoint, Transaction};

/// Fee rate precision multiplier: fee rate is stored as
/// `fee * FEE_RATE_PRECISION / size`, giving milli-satoshi-per-byte
/// resolution so small fee differences still order distinctly.
const FEE_RATE_PRECISION: u128 = 1_000;

fn compute_fee_rate(fee: u64, size: usize) -> u64 {
    if size == 0 {
        return u64::MAX;
    }
    let rate = (fee as u128) * FEE_RATE_PRECISION / (size as u128);
    rate.min(u64::MAX as u128) as u64
}

/// A transaction held in the mempool with precomputed admission metadata.
#[derive(Debug, Clone)]
pub struct MempoolEntry {
    pub tx: Transaction,
    pub txid: Hash256,
    /// `sum(inputs) - sum(outputs)`, in satoshi.
    pub fee: u64,
    /// Canonical encoded size in bytes.
    pub size: usize,
    fee_rate: u64,
}

impl MempoolEntry {
    /// Fee rate in milli-satoshi per byte.
    pub fn fee_rate(&self) -> u64 {
        self.fee_rate
    }
}

/// In-memory pool of unconfirmed, pre-validated transactions.
///
/// Not thread-safe; callers hold it behind a lock (the node layer uses
/// `parking_lot::RwLock`).
pub struct Mempool {
    entries: HashMap<Hash256, MempoolEntry>,
    /// Spent outpoint -> txid of the pool transaction that spends it.
    by_outpoint: HashMap<OutPoint, Hash256>,
    /// `(fee_rate, txid)` ascending; lowest first for eviction, reverse for
    /// block template selection.
    by_fee_rate: BTreeSet<(u64, Hash256)>,
    max_count: usize,
    max_bytes: usize,
    total_bytes: usize,
}

impl Default for Mempool {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl Mempool {
    pub fn new(max_count: usize, max_bytes: usize) -> Self {
        Self {
            entries: HashMap::new(),
            by_outpoint: HashMap::new(),
            by_fee_rate: BTreeSet::new(),
            max_count,
            max_bytes,
            total_bytes: 0,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(MEMPOOL_MAX_TX_COUNT, MEMPOOL_MAX_BYTES)
    }

    /// Admit a transaction that has already passed phase B/C validation.
    ///
    /// Enforces the minimum absolute fee and minimum relay fee rate (spec
    /// §4.6), then resolves conflicts with transactions already in the
    /// pool: a conflicting transaction is accepted only as a replace-by-fee
    /// that pays a strictly higher absolute fee than the sum of everything
    /// it would evict, by at least `min_relay_fee * size(new)`. A higher
    /// fee *rate* alone is not sufficient.
    pub fn insert(&mut self, tx: Transaction, txid: Hash256, fee: u64, size: usize) -> Result<Hash256, MempoolError> {
        if fee < MIN_ABSOLUTE_TX_FEE {
            return Err(MempoolError::FeeTooLow { got: fee, min: MIN_ABSOLUTE_TX_FEE });
        }
        let fee_rate = compute_fee_rate(fee, size);
        let min_rate = compute_fee_rate(MIN_RELAY_FEE_RATE_SAT_PER_BYTE, 1);
        if fee_rate < min_rate {
            return Err(MempoolError::FeeRateTooLow { got: fee_rate, min: min_rate });
        }

        if self.entries.contains_key(&txid) {
            return Err(MempoolError::AlreadyExists(txid.to_string()));
        }

        let conflicting = self.conflicting_txids(&tx);
        if !conflicting.is_empty() {
            self.resolve_replacement(&conflicting, fee, size)?;
        }

        self.make_room(size, fee_rate)?;

        for input in &tx.inputs {
            self.by_outpoint.insert(input.previous_output.clone(), txid);
        }
        self.by_fee_rate.insert((fee_rate, txid));
        self.total_bytes += size;
        self.entries.insert(txid, MempoolEntry { tx, txid, fee, size, fee_rate });

        Ok(txid)
    }

    /// Replace-by-fee: the incoming transaction must pay a strictly higher
    /// absolute fee than the sum of every transaction it would evict, and
    /// that surplus must cover at least `min_relay_fee * size(new)` (spec
    /// §4.6 RBF rule) — a fee-*rate* comparison alone would admit a smaller
    /// replacement that actually pays less in absolute terms.
    fn resolve_replacement(&mut self, conflicting: &[Hash256], fee: u64, size: usize) -> Result<(), MempoolError> {
        let replaced_fee_sum: u64 = conflicting
            .iter()
            .map(|txid| self.entries.get(txid).expect("conflicting_txids returns live entries").fee)
            .sum();
        let surcharge = MIN_RELAY_FEE_RATE_SAT_PER_BYTE.saturating_mul(size as u64);
        let required = replaced_fee_sum.saturating_add(surcharge).saturating_add(1);
        if fee < required {
            return Err(MempoolError::RbfUnderbid { required, offered: fee });
        }
        for txid in conflicting {
            self.remove_entry(*txid);
        }
        Ok(())
    }

    /// Evict lowest-fee-rate entries until `size` more bytes fit, or fail if
    /// the incoming transaction does not outbid the cheapest occupant.
    fn make_room(&mut self, size: usize, fee_rate: u64) -> Result<(), MempoolError> {
        while (self.entries.len() >= self.max_count || self.total_bytes + size > self.max_bytes) && !self.entries.is_empty() {
            let &(lowest_rate, lowest_txid) = self.by_fee_rate.iter().next().expect("non-empty pool");
            if lowest_rate >= fee_rate {
                return Err(MempoolError::FeeRateTooLow { got: fee_rate, min: lowest_rate + 1 });
            }
            self.remove_entry(lowest_txid);
        }
        if self.entries.len() >= self.max_count || self.total_bytes + size > self.max_bytes {
            return Err(MempoolError::FeeRateTooLow { got: fee_rate, min: fee_rate + 1 });
        }
        Ok(())
    }

    pub fn remove(&mut self, txid: &Hash256) -> Option<MempoolEntry> {
        self.remove_entry(*txid)
    }

    fn remove_entry(&mut self, txid: Hash256) -> Option<MempoolEntry> {
        let entry = self.entries.remove(&txid)?;
        for input in &entry.tx.inputs {
            self.by_outpoint.remove(&input.previous_output);
        }
        self.by_fee_rate.remove(&(entry.fee_rate, txid));
        self.total_bytes -= entry.size;
        Some(entry)
    }

    pub fn contains(&self, txid: &Hash256) -> bool {
        self.entries.contains_key(txid)
    }

    pub fn get(&self, txid: &Hash256) -> Option<&MempoolEntry> {
        self.entries.get(txid)
    }

    pub fn has_conflict(&self, tx: &Transaction) -> bool {
        tx.inputs.iter().any(|input| self.by_outpoint.contains_key(&input.previous_output))
    }

    /// Deduplicated txids of pool transactions whose inputs overlap `tx`'s.
    pub fn conflicting_txids(&self, tx: &Transaction) -> Vec<Hash256> {
        let mut seen = HashSet::new();
        tx.inputs
            .iter()
            .filter_map(|input| self.by_outpoint.get(&input.previous_output).copied())
            .filter(|txid| seen.insert(*txid))
            .collect()
    }

    /// Greedily select pool transactions highest-fee-rate-first, filling up
    /// to `max_bytes` (spec §4.9 block template assembly).
    pub fn select_transactions(&self, max_bytes: usize) -> Vec<&MempoolEntry> {
        let mut selected = Vec::new();
        let mut remaining = max_bytes;
        for &(_, txid) in self.by_fee_rate.iter().rev() {
            if remaining == 0 {
                break;
            }
            if let Some(entry) = self.entries.get(&txid) {
                if entry.size <= remaining {
                    selected.push(entry);
                    remaining -= entry.size;
                }
            }
        }
        selected
    }

    /// Remove transactions confirmed by a connected block, plus any
    /// remaining pool transactions that now double-spend against it
    /// (spec §4.6 block-connect re-validation).
    pub fn remove_confirmed_block(&mut self, block: &Block) {
        let mut confirmed = HashSet::new();
        let mut spent = HashSet::new();
        for tx in &block.transactions {
            if let Ok(txid) = tx.txid() {
                confirmed.insert(txid);
            }
            for input in &tx.inputs {
                if !input.previous_output.is_null() {
                    spent.insert(input.previous_output.clone());
                }
            }
        }
        for txid in &confirmed {
            self.remove_entry(*txid);
        }
        let conflicting: HashSet<Hash256> = spent.iter().filter_map(|op| self.by_outpoint.get(op).copied()).collect();
        for txid in conflicting {
            self.remove_entry(txid);
        }
    }

    /// Re-admit transactions unwound by a disconnected block. Entries that
    /// no longer clear admission (e.g. the coin they spent is gone again)
    /// are silently dropped — the chain manager re-validates contextually
    /// before calling this, so drops here are expected to be rare.
    pub fn reinsert_disconnected(&mut self, entries: Vec<(Transaction, Hash256, u64, usize)>) {
        for (tx, txid, fee, size) in entries {
            let _ = self.insert(tx, txid, fee, size);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn max_count(&self) -> usize {
        self.max_count
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn total_fees(&self) -> u64 {
        self.entries.values().map(|e| e.fee).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MempoolEntry> {
        self.entries.values()
    }

    pub fn txids(&self) -> Vec<Hash256> {
        self.entries.keys().copied().collect()
    }
}
