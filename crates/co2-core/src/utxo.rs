//! UTXO index: `OutPoint -> UtxoEntry`, plus a secondary `Address -> OutPoint`
//! index (spec §4.4).
//!
//! The index is the single source of truth for spendability. It supports
//! atomic apply/undo of block-sized diffs so the chain manager can connect
//! and disconnect blocks without re-deriving state from scratch.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::types::{OutPoint, UtxoEntry};

/// The set of UTXO insertions and removals produced by applying one block.
///
/// `removes` carries the full entry that was removed (not just the
/// OutPoint) so that [`UtxoIndex::undo`] can restore it without consulting
/// any other source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diff {
    pub inserts: Vec<(OutPoint, UtxoEntry)>,
    pub removes: Vec<(OutPoint, UtxoEntry)>,
}

impl Diff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, outpoint: OutPoint, entry: UtxoEntry) {
        self.inserts.push((outpoint, entry));
    }

    pub fn remove(&mut self, outpoint: OutPoint, entry: UtxoEntry) {
        self.removes.push((outpoint, entry));
    }
}

/// In-memory UTXO index (spec §4.4). Production storage persists the same
/// shape behind the key-value store described in spec §6; this type is the
/// canonical in-process view the chain manager mutates under its writer lock.
#[derive(Debug, Clone, Default)]
pub struct UtxoIndex {
    entries: HashMap<OutPoint, UtxoEntry>,
    /// Secondary index: address -> outpoints currently owned by it.
    by_address: HashMap<String, BTreeSet<OutPoint>>,
}

impl UtxoIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, outpoint: &OutPoint) -> Option<&UtxoEntry> {
        self.entries.get(outpoint)
    }

    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.entries.contains_key(outpoint)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert_entry(&mut self, outpoint: OutPoint, entry: UtxoEntry) {
        self.by_address
            .entry(entry.output.address.clone())
            .or_default()
            .insert(outpoint.clone());
        self.entries.insert(outpoint, entry);
    }

    fn remove_entry(&mut self, outpoint: &OutPoint) -> Option<UtxoEntry> {
        let entry = self.entries.remove(outpoint)?;
        if let Some(set) = self.by_address.get_mut(&entry.output.address) {
            set.remove(outpoint);
            if set.is_empty() {
                self.by_address.remove(&entry.output.address);
            }
        }
        Some(entry)
    }

    /// Apply a block's diff: remove spent outputs, insert new ones.
    ///
    /// Order matters for diagnostics only — both sides are disjoint by
    /// construction (a block cannot spend an output it itself creates for
    /// the first time within the same apply). Removal happens first so a
    /// pathological diff that both inserts and removes the same outpoint
    /// leaves the insert in place.
    pub fn apply(&mut self, diff: &Diff) {
        for (outpoint, _) in &diff.removes {
            self.remove_entry(outpoint);
        }
        for (outpoint, entry) in &diff.inserts {
            self.insert_entry(outpoint.clone(), entry.clone());
        }
    }

    /// Undo a previously applied diff: remove what was inserted, restore
    /// what was removed. Exact inverse of [`Self::apply`].
    pub fn undo(&mut self, diff: &Diff) {
        for (outpoint, _) in &diff.inserts {
            self.remove_entry(outpoint);
        }
        for (outpoint, entry) in &diff.removes {
            self.insert_entry(outpoint.clone(), entry.clone());
        }
    }

    /// Sum of all unspent output amounts owned by `address`.
    pub fn balance(&self, address: &str) -> u64 {
        self.utxos_of(address)
            .iter()
            .filter_map(|op| self.entries.get(op))
            .map(|e| e.output.amount)
            .sum()
    }

    /// All outpoints currently owned by `address`, in deterministic
    /// (txid, index) order.
    pub fn utxos_of(&self, address: &str) -> Vec<OutPoint> {
        self.by_address
            .get(address)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Deterministic coin selection: largest-amount-first, tie-broken by
    /// `OutPoint` ordering, until the cumulative amount covers `amount`
    /// (spec §4.4). Returns `None` if the address's total balance is
    /// insufficient.
    pub fn select(&self, address: &str, amount: u64) -> Option<Vec<OutPoint>> {
        let mut candidates: Vec<(OutPoint, u64)> = self
            .utxos_of(address)
            .into_iter()
            .filter_map(|op| self.entries.get(&op).map(|e| (op, e.output.amount)))
            .collect();

        candidates.sort_by(|(op_a, amt_a), (op_b, amt_b)| amt_b.cmp(amt_a).then(op_a.cmp(op_b)));

        let mut selected = Vec::new();
        let mut total = 0u64;
        for (op, amt) in candidates {
            if total >= amount {
                break;
            }
            total = total.saturating_add(amt);
            selected.push(op);
        }

        if total >= amount {
            Some(selected)
        } else {
            None
        }
    }
}
