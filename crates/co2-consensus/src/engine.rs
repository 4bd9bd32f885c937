//! Block template assembly and nonce search (spec §4.7), plus the
//! [`BlockProducer`] implementation the chain manager mines and validates
//! candidate blocks against.
//!
//! The miner does not own the UTXO index or certificate ledger — those live
//! in the chain manager's owned state (spec §4.5). It validates transactions
//! against chain state purely through the [`ChainState`] query surface, one
//! outpoint at a time, mirroring how the mempool admits transactions before
//! they ever reach a block template. Full atomic phase-C validation (exact
//! UTXO diff + ledger diff production) happens in the chain manager when a
//! block is actually connected; [`Miner::validate_block`] gives an earlier,
//! cheaper rejection of blocks that cannot possibly be valid.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

use co2_core::codec;
use co2_core::constants::{DEFAULT_POW_ALGORITHM, MAX_BLOCK_BYTES, MAX_BLOCK_TX_COUNT, PowAlgorithm};
use co2_core::difficulty;
use co2_core::error::{BlockError, ChainError, HeaderError, TxError};
use co2_core::mempool::Mempool;
use co2_core::merkle;
use co2_core::reward;
use co2_core::traits::{BlockProducer, ChainState};
use co2_core::types::{Block, BlockHeader, CoinState, Hash256, OutPoint, Transaction, TxInput, TxKind, TxOutput};

use crate::checkpoint;

/// Wall-clock source, abstracted so block-template tests can pin "now"
/// without racing real time.
pub trait Clock: Send + Sync {
    fn now(&self) -> u32;
}

/// Reads the system clock, clamped into `u32` Unix-seconds range.
#[derive(Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u32 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs().min(u32::MAX as u64) as u32)
            .unwrap_or(0)
    }
}

/// Reserved header/coinbase-tx overhead subtracted from [`MAX_BLOCK_BYTES`]
/// before packing mempool transactions, so the assembled block never needs
/// a second trimming pass.
const TEMPLATE_COINBASE_RESERVE: usize = 4_096;

/// Cooperative cancellation flag: set when the active tip advances so an
/// in-flight nonce search can give up and re-template (spec §5).
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Mines block templates and validates candidate blocks against chain state
/// (spec §4.7). Implements [`BlockProducer`].
pub struct Miner {
    chain: Arc<dyn ChainState + Send + Sync>,
    mempool: Arc<RwLock<Mempool>>,
    pow_algorithm: PowAlgorithm,
    clock: Arc<dyn Clock>,
}

impl Miner {
    pub fn new(chain: Arc<dyn ChainState + Send + Sync>, mempool: Arc<RwLock<Mempool>>) -> Self {
        Self::with_clock(chain, mempool, DEFAULT_POW_ALGORITHM, Arc::new(SystemClock))
    }

    pub fn with_algorithm(
        chain: Arc<dyn ChainState + Send + Sync>,
        mempool: Arc<RwLock<Mempool>>,
        pow_algorithm: PowAlgorithm,
    ) -> Self {
        Self::with_clock(chain, mempool, pow_algorithm, Arc::new(SystemClock))
    }

    pub fn with_clock(
        chain: Arc<dyn ChainState + Send + Sync>,
        mempool: Arc<RwLock<Mempool>>,
        pow_algorithm: PowAlgorithm,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { chain, mempool, pow_algorithm, clock }
    }

    /// Validate a single non-coinbase transaction against chain state,
    /// checking existence and amount/coin-state consistency of its inputs.
    /// Certificate-accumulator arithmetic is intentionally not re-derived
    /// here (the chain manager's ledger owns that); this is a
    /// spend-correctness check suitable for template assembly and
    /// pre-connect rejection.
    fn check_spends(
        &self,
        tx: &Transaction,
        spent_in_block: &mut HashSet<OutPoint>,
    ) -> Result<u64, TxError> {
        let mut input_total = 0u64;
        for input in &tx.inputs {
            if !spent_in_block.insert(input.previous_output.clone()) {
                return Err(TxError::DuplicateInput(input.previous_output.to_string()));
            }
            let output = self
                .chain
                .utxo(&input.previous_output)
                .ok_or_else(|| TxError::UnknownUtxo(input.previous_output.to_string()))?;
            if output.coin_state != CoinState::Spendable && tx.kind != TxKind::AssignCompensation {
                return Err(TxError::CoinStateForbidden);
            }
            input_total = input_total
                .checked_add(output.amount)
                .ok_or(TxError::AmountExceedsMaxMoney)?;
        }
        let output_total = tx.total_output_value().ok_or(TxError::AmountExceedsMaxMoney)?;
        if input_total < output_total {
            return Err(TxError::InsufficientInputValue { inputs: input_total, outputs: output_total });
        }
        Ok(input_total - output_total)
    }

    /// Assemble the coinbase paying `height`'s subsidy plus `fees` to
    /// `address`. Carries `height` in scriptless metadata (spec §4.3) so
    /// two coinbases otherwise identical in reward/fees/timestamp/address
    /// at different heights never collide on txid.
    fn build_coinbase(&self, height: u32, address: &str, fees: u64, timestamp: u32) -> Transaction {
        let mut metadata = std::collections::BTreeMap::new();
        metadata.insert(
            co2_core::validation::COINBASE_HEIGHT_KEY.to_string(),
            height.to_le_bytes().to_vec(),
        );
        Transaction {
            version: 1,
            kind: TxKind::Coinbase,
            inputs: vec![TxInput {
                previous_output: OutPoint::null(),
                signature: Vec::new(),
                pubkey: Vec::new(),
            }],
            outputs: vec![TxOutput {
                amount: self.block_reward(height) + fees,
                address: address.to_string(),
                coin_state: CoinState::Spendable,
                certificate_id: None,
            }],
            metadata,
            timestamp,
        }
    }
}

impl BlockProducer for Miner {
    fn create_block_template(&self, miner_address: &str) -> Result<Block, ChainError> {
        let (tip_height, tip_hash, _) = self.chain.tip();
        let next_height = tip_height.checked_add(1).ok_or(ChainError::EmptyChain)?;
        let bits = self.difficulty_target(next_height).map_err(BlockError::from)?;

        let median = difficulty::median_time_past(&self.chain.recent_timestamps());
        let timestamp = self.clock.now().max(median.saturating_add(1));

        let mempool = self.mempool.read();
        let budget = MAX_BLOCK_BYTES.saturating_sub(TEMPLATE_COINBASE_RESERVE);
        let selected = mempool.select_transactions(budget);

        let mut spent_in_block = HashSet::new();
        let mut transactions = Vec::with_capacity(selected.len() + 1);
        let mut total_fees = 0u64;
        for entry in &selected {
            if transactions.len() + 1 >= MAX_BLOCK_TX_COUNT {
                break;
            }
            match self.check_spends(&entry.tx, &mut spent_in_block) {
                Ok(fee) => {
                    total_fees = total_fees.saturating_add(fee);
                    transactions.push(entry.tx.clone());
                }
                Err(_) => continue, // stale entry; the node re-validates on connect
            }
        }
        drop(mempool);

        let coinbase = self.build_coinbase(next_height, miner_address, total_fees, timestamp);
        transactions.insert(0, coinbase);

        let txids: Vec<Hash256> = transactions
            .iter()
            .map(|tx| tx.txid().map_err(|e| ChainError::Block(BlockError::Tx { index: 0, source: e })))
            .collect::<Result<_, _>>()?;
        let merkle_root = merkle::merkle_root(&txids);

        Ok(Block {
            header: BlockHeader {
                version: 1,
                prev_hash: tip_hash,
                merkle_root,
                timestamp,
                bits,
                nonce: 0,
            },
            height: next_height,
            transactions,
        })
    }

    fn validate_block(&self, block: &Block) -> Result<(), BlockError> {
        if block.transactions.is_empty() {
            return Err(BlockError::NoCoinbase);
        }
        if !block.transactions[0].is_coinbase() {
            return Err(BlockError::FirstTxNotCoinbase);
        }
        if block.transactions.iter().skip(1).any(|tx| tx.is_coinbase()) {
            return Err(BlockError::MultipleCoinbase);
        }
        if block.transactions.len() > MAX_BLOCK_TX_COUNT {
            return Err(BlockError::TooManyTransactions {
                count: block.transactions.len(),
                max: MAX_BLOCK_TX_COUNT,
            });
        }

        let encoded_size: usize = block.transactions.iter().map(|tx| codec::encode_transaction(tx).len()).sum();
        if encoded_size > MAX_BLOCK_BYTES {
            return Err(BlockError::OversizeBlock { size: encoded_size, max: MAX_BLOCK_BYTES });
        }

        let mut txids = Vec::with_capacity(block.transactions.len());
        let mut seen = HashSet::new();
        for (index, tx) in block.transactions.iter().enumerate() {
            co2_core::validation::validate_tx_structure(tx)
                .map_err(|source| BlockError::Tx { index, source })?;
            let txid = tx.txid().map_err(|source| BlockError::Tx { index, source })?;
            if !seen.insert(txid) {
                return Err(BlockError::DuplicateTxid(txid.to_string()));
            }
            txids.push(txid);
        }

        let merkle_root = merkle::merkle_root(&txids);
        if merkle_root != block.header.merkle_root {
            return Err(BlockError::InvalidMerkleRoot);
        }

        let expected_bits = self.difficulty_target(block.height)?;
        if block.header.bits != expected_bits {
            return Err(HeaderError::BitsOutOfRange.into());
        }
        if !self.validate_pow(&block.header)? {
            return Err(HeaderError::PowInsufficient.into());
        }
        let recent = self.chain.recent_timestamps();
        difficulty::check_timestamp(block.header.timestamp, &recent, self.clock.now())?;

        checkpoint::check_checkpoint(block.height, &block.header.hash())?;

        let mut spent_in_block = HashSet::new();
        let mut total_fees = 0u64;
        for (index, tx) in block.transactions.iter().enumerate().skip(1) {
            let fee = self
                .check_spends(tx, &mut spent_in_block)
                .map_err(|source| BlockError::Tx { index, source })?;
            total_fees = total_fees.saturating_add(fee);
        }

        let coinbase_total = block.transactions[0]
            .total_output_value()
            .ok_or(BlockError::Tx { index: 0, source: TxError::AmountExceedsMaxMoney })?;
        let max_coinbase = self.block_reward(block.height).saturating_add(total_fees);
        if coinbase_total > max_coinbase {
            return Err(BlockError::InvalidCoinbaseValue { got: coinbase_total, max: max_coinbase });
        }

        Ok(())
    }

    fn block_reward(&self, height: u32) -> u64 {
        reward::block_reward(height as u64)
    }

    fn difficulty_target(&self, height: u32) -> Result<u32, HeaderError> {
        if height == 0 {
            return Ok(co2_core::genesis::genesis_bits());
        }
        let prev = self
            .chain
            .block_by_height(height - 1)
            .ok_or(HeaderError::UnknownParent)?;
        if !difficulty::is_retarget_height(height) {
            return Ok(prev.header.bits);
        }
        let first_height = height.saturating_sub(co2_core::constants::RETARGET_INTERVAL as u32);
        let first = self
            .chain
            .block_by_height(first_height)
            .ok_or(HeaderError::UnknownParent)?;
        difficulty::retarget(prev.header.bits, first.header.timestamp, prev.header.timestamp)
    }

    fn validate_pow(&self, header: &BlockHeader) -> Result<bool, HeaderError> {
        co2_core::pow::meets_target(header, self.pow_algorithm)
    }
}

/// Search the nonce space for a header that satisfies `bits` under
/// `algorithm`, starting from `header.nonce` and wrapping around `u32`.
/// Returns `None` if `cancel` is set, or if the space is exhausted without
/// a solution, before one is found.
pub fn mine_block(mut header: BlockHeader, algorithm: PowAlgorithm, cancel: &CancelToken) -> Option<BlockHeader> {
    let start = header.nonce;
    loop {
        if cancel.is_cancelled() {
            return None;
        }
        if co2_core::pow::meets_target(&header, algorithm).unwrap_or(false) {
            return Some(header);
        }
        header.nonce = header.nonce.wrapping_add(1);
        if header.nonce == start {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use co2_core::traits::mocks::MockChainState;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FixedClock(u32);
    impl Clock for FixedClock {
        fn now(&self) -> u32 {
            self.0
        }
    }

    fn sample_chain() -> Arc<MockChainState> {
        Arc::new(MockChainState {
            blocks: Mutex::new(vec![co2_core::genesis::genesis_block().clone()]),
            utxos: Mutex::new(HashMap::new()),
            certificates: Mutex::new(HashMap::new()),
        })
    }

    fn miner(chain: Arc<MockChainState>) -> Miner {
        Miner::with_clock(
            chain,
            Arc::new(RwLock::new(Mempool::with_defaults())),
            PowAlgorithm::Scrypt,
            Arc::new(FixedClock(co2_core::genesis::GENESIS_TIMESTAMP + 600)),
        )
    }

    #[test]
    fn block_reward_matches_schedule() {
        let m = miner(sample_chain());
        assert_eq!(m.block_reward(0), reward::block_reward(0));
        assert_eq!(m.block_reward(210_000), reward::block_reward(210_000));
    }

    #[test]
    fn difficulty_target_at_height_one_matches_genesis_bits() {
        let m = miner(sample_chain());
        assert_eq!(m.difficulty_target(1).unwrap(), co2_core::genesis::genesis_bits());
    }

    #[test]
    fn difficulty_target_unknown_parent_errors() {
        let m = miner(sample_chain());
        assert_eq!(m.difficulty_target(5).unwrap_err(), HeaderError::UnknownParent);
    }

    #[test]
    fn create_block_template_extends_tip() {
        let chain = sample_chain();
        let m = miner(Arc::clone(&chain));
        let template = m.create_block_template("miner-address").unwrap();
        assert_eq!(template.height, 1);
        assert_eq!(template.header.prev_hash, co2_core::genesis::genesis_hash());
        assert!(template.transactions[0].is_coinbase());
        assert_eq!(template.transactions[0].outputs[0].amount, reward::block_reward(1));
    }

    #[test]
    fn create_block_template_merkle_root_matches_transactions() {
        let chain = sample_chain();
        let m = miner(chain);
        let template = m.create_block_template("miner-address").unwrap();
        let txids: Vec<Hash256> = template.transactions.iter().map(|tx| tx.txid().unwrap()).collect();
        assert_eq!(template.header.merkle_root, merkle::merkle_root(&txids));
    }

    #[test]
    fn mine_block_finds_easy_target() {
        let header = BlockHeader {
            version: 1,
            prev_hash: Hash256::ZERO,
            merkle_root: Hash256::ZERO,
            timestamp: 1_700_000_000,
            bits: co2_core::difficulty::target_to_bits(co2_core::difficulty::max_target()),
            nonce: 0,
        };
        let cancel = CancelToken::new();
        let solved = mine_block(header, PowAlgorithm::Scrypt, &cancel).expect("easiest target is solvable quickly");
        assert!(co2_core::pow::meets_target(&solved, PowAlgorithm::Scrypt).unwrap());
    }

    #[test]
    fn mine_block_respects_cancellation() {
        let header = BlockHeader {
            version: 1,
            prev_hash: Hash256::ZERO,
            merkle_root: Hash256::ZERO,
            timestamp: 1_700_000_000,
            bits: 0x0100_0001,
            nonce: 0,
        };
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(mine_block(header, PowAlgorithm::Scrypt, &cancel).is_none());
    }

    #[test]
    fn validate_block_accepts_freshly_mined_genesis_child() {
        let chain = sample_chain();
        let m = miner(Arc::clone(&chain));
        let mut template = m.create_block_template("miner-address").unwrap();
        let cancel = CancelToken::new();
        template.header = mine_block(template.header, PowAlgorithm::Scrypt, &cancel).unwrap();
        m.validate_block(&template).unwrap();
    }

    #[test]
    fn validate_block_rejects_bad_merkle_root() {
        let chain = sample_chain();
        let m = miner(Arc::clone(&chain));
        let mut template = m.create_block_template("miner-address").unwrap();
        template.header.merkle_root = Hash256::ZERO;
        let cancel = CancelToken::new();
        template.header = mine_block(template.header, PowAlgorithm::Scrypt, &cancel).unwrap();
        assert_eq!(m.validate_block(&template).unwrap_err(), BlockError::InvalidMerkleRoot);
    }

    #[test]
    fn validate_block_rejects_missing_coinbase() {
        let chain = sample_chain();
        let m = miner(Arc::clone(&chain));
        let mut template = m.create_block_template("miner-address").unwrap();
        template.transactions.clear();
        assert_eq!(m.validate_block(&template).unwrap_err(), BlockError::NoCoinbase);
    }
}
