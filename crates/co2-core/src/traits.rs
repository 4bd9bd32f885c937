//! Seam traits between the consensus core and its external collaborators
//! (spec §1, §6): chain query surface, block production, and the
//! network transport. Each is implemented by a different crate in this
//! workspace — `co2-node` implements [`ChainState`], `co2-consensus`
//! implements [`BlockProducer`], `co2-network` implements [`NetworkService`]
//! — so that each can be tested against a mock of the others.

use async_trait::async_trait;
use thiserror::Error;

use crate::error::{BlockError, ChainError, HeaderError, MempoolError};
use crate::types::{Block, BlockHeader, Certificate, Hash256, OutPoint, Project, Transaction, TxOutput};

/// Read-only view of chain state, exposing the query surface of spec §6.
///
/// Implemented by the node crate's storage/chain-manager wiring; consumed by
/// RPC handlers, the miner, and mempool admission.
pub trait ChainState {
    /// Current tip: `(height, hash, cumulative_work)`.
    fn tip(&self) -> (u32, Hash256, primitive_types::U256);

    fn block_by_height(&self, height: u32) -> Option<Block>;
    fn block_by_hash(&self, hash: &Hash256) -> Option<Block>;
    fn header_by_hash(&self, hash: &Hash256) -> Option<BlockHeader>;
    fn tx_by_id(&self, txid: &Hash256) -> Option<Transaction>;

    fn utxo(&self, outpoint: &OutPoint) -> Option<TxOutput>;
    fn balance(&self, address: &str) -> u64;
    fn utxos_of(&self, address: &str) -> Vec<OutPoint>;

    fn certificate(&self, certificate_id: &str) -> Option<Certificate>;
    fn project(&self, project_id: &str) -> Option<Project>;

    /// The most recent [`crate::constants::MEDIAN_TIME_SPAN`] timestamps
    /// preceding the tip, oldest first — the window
    /// [`crate::difficulty::check_timestamp`] needs for the next candidate
    /// header.
    fn recent_timestamps(&self) -> Vec<u32>;
}

/// Mines and validates blocks against the reward schedule and PoW rules
/// (spec §4.2, §4.3, §4.7). Implemented by the consensus engine.
pub trait BlockProducer {
    /// Assemble a candidate block extending the current tip, paying the
    /// subsidy plus mempool fees to `miner_address`. Does not search the
    /// nonce space — callers mine the returned template.
    fn create_block_template(&self, miner_address: &str) -> Result<Block, ChainError>;

    /// Full phase-B + phase-C validation of a block against chain state.
    fn validate_block(&self, block: &Block) -> Result<(), BlockError>;

    /// The coinbase subsidy owed at `height` (spec §4.7: `50·10⁸ >> (height/210000)`).
    fn block_reward(&self, height: u32) -> u64;

    /// The compact `bits` target a header at `height` must satisfy.
    fn difficulty_target(&self, height: u32) -> Result<u32, HeaderError>;

    /// Whether `header`'s proof-of-work hash satisfies its own `bits` target.
    fn validate_pow(&self, header: &BlockHeader) -> Result<bool, HeaderError>;
}

/// Transport-level failures reported by the network collaborator.
///
/// Kept local to this trait rather than folded into [`crate::error::CoreError`]
/// — the transport is an external collaborator per spec §1, not part of the
/// consensus-critical error taxonomy in spec §7.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("no connected peers")]
    NoPeers,
    #[error("peer {0} did not respond in time")]
    Timeout(String),
    #[error("peer {0} sent malformed data")]
    MalformedPeerData(String),
    #[error("not connected to the network")]
    Disconnected,
}

/// Block/transaction gossip and on-demand sync requests (spec §1's "peer-to-peer
/// gossip transport" collaborator, consumed only through this interface).
#[async_trait]
pub trait NetworkService: Send + Sync {
    async fn broadcast_block(&self, block: &Block) -> Result<(), NetworkError>;
    async fn broadcast_transaction(&self, tx: &Transaction) -> Result<(), NetworkError>;
    fn peer_count(&self) -> usize;
    fn is_connected(&self) -> bool;
    async fn request_block(&self, hash: &Hash256) -> Result<Block, NetworkError>;
    async fn request_headers(&self, from: &Hash256, count: u32) -> Result<Vec<BlockHeader>, NetworkError>;
}

/// Transaction and block admission surface shared by the chain manager and
/// mempool, used by RPC's `submit_tx`/`submit_block` (spec §6).
pub trait SubmissionSink {
    fn submit_tx(&self, tx: Transaction) -> Result<Hash256, MempoolError>;
    fn submit_block(&self, block: Block) -> Result<(), ChainError>;
}

#[cfg(test)]
pub(crate) mod mocks {
    use super::*;
    use std::sync::Mutex;

    /// Minimal in-memory [`ChainState`] stub for unit tests elsewhere in the
    /// crate that need a chain view without standing up the node crate.
    #[derive(Default)]
    pub struct MockChainState {
        pub blocks: Mutex<Vec<Block>>,
        pub utxos: Mutex<std::collections::HashMap<OutPoint, TxOutput>>,
        pub certificates: Mutex<std::collections::HashMap<String, Certificate>>,
    }

    impl ChainState for MockChainState {
        fn tip(&self) -> (u32, Hash256, primitive_types::U256) {
            let blocks = self.blocks.lock().unwrap();
            match blocks.last() {
                Some(b) => (b.height, b.header.hash(), primitive_types::U256::from(blocks.len())),
                None => (0, Hash256::ZERO, primitive_types::U256::zero()),
            }
        }

        fn block_by_height(&self, height: u32) -> Option<Block> {
            self.blocks.lock().unwrap().iter().find(|b| b.height == height).cloned()
        }

        fn block_by_hash(&self, hash: &Hash256) -> Option<Block> {
            self.blocks.lock().unwrap().iter().find(|b| &b.header.hash() == hash).cloned()
        }

        fn header_by_hash(&self, hash: &Hash256) -> Option<BlockHeader> {
            self.block_by_hash(hash).map(|b| b.header)
        }

        fn tx_by_id(&self, txid: &Hash256) -> Option<Transaction> {
            self.blocks
                .lock()
                .unwrap()
                .iter()
                .flat_map(|b| b.transactions.iter())
                .find(|tx| tx.txid().map(|id| &id == txid).unwrap_or(false))
                .cloned()
        }

        fn utxo(&self, outpoint: &OutPoint) -> Option<TxOutput> {
            self.utxos.lock().unwrap().get(outpoint).cloned()
        }

        fn balance(&self, address: &str) -> u64 {
            self.utxos.lock().unwrap().values().filter(|o| o.address == address).map(|o| o.amount).sum()
        }

        fn utxos_of(&self, address: &str) -> Vec<OutPoint> {
            self.utxos
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, o)| o.address == address)
                .map(|(op, _)| op.clone())
                .collect()
        }

        fn certificate(&self, certificate_id: &str) -> Option<Certificate> {
            self.certificates.lock().unwrap().get(certificate_id).cloned()
        }

        fn project(&self, _project_id: &str) -> Option<Project> {
            None
        }

        fn recent_timestamps(&self) -> Vec<u32> {
            self.blocks.lock().unwrap().iter().map(|b| b.header.timestamp).collect()
        }
    }

    /// No-op [`NetworkService`] stub: reports one peer and a successful
    /// broadcast/request every time, for consensus-engine tests that don't
    /// exercise the transport itself.
    #[derive(Default)]
    pub struct MockNetworkService {
        pub connected: bool,
    }

    #[async_trait]
    impl NetworkService for MockNetworkService {
        async fn broadcast_block(&self, _block: &Block) -> Result<(), NetworkError> {
            if self.connected { Ok(()) } else { Err(NetworkError::Disconnected) }
        }

        async fn broadcast_transaction(&self, _tx: &Transaction) -> Result<(), NetworkError> {
            if self.connected { Ok(()) } else { Err(NetworkError::Disconnected) }
        }

        fn peer_count(&self) -> usize {
            if self.connected { 1 } else { 0 }
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        async fn request_block(&self, _hash: &Hash256) -> Result<Block, NetworkError> {
            Err(NetworkError::NoPeers)
        }

        async fn request_headers(&self, _from: &Hash256, _count: u32) -> Result<Vec<BlockHeader>, NetworkError> {
            Err(NetworkError::NoPeers)
        }
    }

    #[tokio::test]
    async fn mock_chain_state_empty_tip() {
        let chain = MockChainState::default();
        assert_eq!(chain.tip(), (0, Hash256::ZERO, primitive_types::U256::zero()));
    }

    #[tokio::test]
    async fn mock_network_disconnected_rejects_broadcast() {
        let net = MockNetworkService { connected: false };
        let tx = crate::types::Transaction {
            version: 1,
            kind: crate::types::TxKind::Transfer,
            inputs: vec![],
            outputs: vec![],
            metadata: Default::default(),
            timestamp: 0,
        };
        assert_eq!(net.broadcast_transaction(&tx).await, Err(NetworkError::Disconnected));
    }

    #[tokio::test]
    async fn mock_network_connected_reports_one_peer() {
        let net = MockNetworkService { connected: true };
        assert_eq!(net.peer_count(), 1);
        assert!(net.is_connected());
    }
}
