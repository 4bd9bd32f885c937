//! JSON-RPC server for the co2chain full node.
//!
//! Exposes the stable query surface of spec §6 (`tip`, `get_block`, `get_tx`,
//! `get_utxo`, `balance`, `utxos`, `certificate`, `project`, `mempool_info`,
//! `submit_tx`, `submit_block`) over `jsonrpsee`, translating [`CoreError`]
//! into the `{code, message, details}` triple spec §7 requires.

use std::sync::Arc;

use jsonrpsee::core::async_trait;
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObjectOwned;
use serde::{Deserialize, Serialize};

use co2_core::error::CoreError;
use co2_core::traits::ChainState;
use co2_core::types::Hash256;

use crate::node::Node;

/// JSON representation of a block header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderJson {
    pub hash: String,
    pub version: u32,
    pub prev_hash: String,
    pub merkle_root: String,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
}

/// JSON representation of a block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockJson {
    pub header: HeaderJson,
    pub height: u32,
    pub tx_count: usize,
    pub tx: Vec<String>,
}

/// JSON representation of a transaction output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputJson {
    pub amount: u64,
    pub address: String,
    pub coin_state: String,
    pub certificate_id: Option<String>,
}

/// JSON representation of a transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionJson {
    pub txid: String,
    pub version: u32,
    pub kind: String,
    pub input_count: usize,
    pub outputs: Vec<OutputJson>,
    pub timestamp: u32,
}

/// JSON representation of a UTXO query result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtxoJson {
    pub outpoint: String,
    pub output: OutputJson,
}

/// JSON representation of a certificate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateJson {
    pub certificate_id: String,
    pub project_id: String,
    pub total_amount: u64,
    pub assigned_amount: u64,
    pub compensated_amount: u64,
    pub issuer_address: String,
    pub standard: String,
    pub location: String,
    pub issue_date: u32,
}

/// JSON representation of a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectJson {
    pub project_id: String,
    pub name: String,
    pub project_type: String,
    pub location: String,
    pub created_height: u32,
}

/// JSON representation of mempool info.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MempoolInfoJson {
    pub size: usize,
    pub bytes: usize,
    pub total_fee: u64,
}

/// JSON representation of general node info.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfoJson {
    pub blocks: u32,
    pub bestblockhash: String,
    pub connections: usize,
    pub orphans: usize,
}

/// A structured `{code, message}` RPC error, matching spec §7's stable
/// error taxonomy (`INVALID_SIGNATURE`, `DOUBLE_SPEND`, `CERT_ID_REUSED`, …).
fn coded_error(err: &CoreError) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(-32000, err.to_string(), Some(err.code()))
}

fn not_found(what: &str) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(-32001, format!("{what} not found"), Some("NOT_FOUND"))
}

fn bad_request(msg: impl Into<String>) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(-32602, msg.into(), Some("MALFORMED"))
}

/// Parse a 64-character hex string into a [`Hash256`].
pub fn parse_hash(hex_str: &str) -> Result<Hash256, ErrorObjectOwned> {
    let bytes = hex::decode(hex_str).map_err(|_| bad_request("invalid hex in hash"))?;
    let arr: [u8; 32] = bytes.try_into().map_err(|_| bad_request("hash must be 32 bytes"))?;
    Ok(Hash256(arr))
}

fn header_json(hash: Hash256, header: &co2_core::types::BlockHeader) -> HeaderJson {
    HeaderJson {
        hash: hash.to_string(),
        version: header.version,
        prev_hash: header.prev_hash.to_string(),
        merkle_root: header.merkle_root.to_string(),
        timestamp: header.timestamp,
        bits: header.bits,
        nonce: header.nonce,
    }
}

fn output_json(output: &co2_core::types::TxOutput) -> OutputJson {
    let coin_state = match output.coin_state {
        co2_core::types::CoinState::Spendable => "SPENDABLE",
        co2_core::types::CoinState::Certified => "CERTIFIED",
        co2_core::types::CoinState::Compensated => "COMPENSATED",
    };
    OutputJson {
        amount: output.amount,
        address: output.address.clone(),
        coin_state: coin_state.to_string(),
        certificate_id: output.certificate_id.clone(),
    }
}

fn tx_json(tx: &co2_core::types::Transaction) -> Result<TransactionJson, ErrorObjectOwned> {
    let txid = tx.txid().map_err(|e| bad_request(e.to_string()))?;
    Ok(TransactionJson {
        txid: txid.to_string(),
        version: tx.version,
        kind: tx.kind.to_string(),
        input_count: tx.inputs.len(),
        outputs: tx.outputs.iter().map(output_json).collect(),
        timestamp: tx.timestamp,
    })
}

/// The co2chain JSON-RPC interface (spec §6's stable query surface).
#[rpc(server)]
pub trait Co2Rpc {
    #[method(name = "tip")]
    async fn tip(&self) -> Result<(u32, String), ErrorObjectOwned>;

    #[method(name = "getblockhash")]
    async fn get_block_hash(&self, height: u32) -> Result<String, ErrorObjectOwned>;

    #[method(name = "getblock")]
    async fn get_block(&self, hash: String) -> Result<BlockJson, ErrorObjectOwned>;

    #[method(name = "getblockheader")]
    async fn get_block_header(&self, hash: String) -> Result<HeaderJson, ErrorObjectOwned>;

    #[method(name = "gettransaction")]
    async fn get_transaction(&self, txid: String) -> Result<TransactionJson, ErrorObjectOwned>;

    #[method(name = "getutxo")]
    async fn get_utxo(&self, txid: String, index: u32) -> Result<UtxoJson, ErrorObjectOwned>;

    #[method(name = "getbalance")]
    async fn get_balance(&self, address: String) -> Result<u64, ErrorObjectOwned>;

    #[method(name = "getutxos")]
    async fn get_utxos(&self, address: String) -> Result<Vec<String>, ErrorObjectOwned>;

    #[method(name = "getcertificate")]
    async fn get_certificate(&self, certificate_id: String) -> Result<CertificateJson, ErrorObjectOwned>;

    #[method(name = "getproject")]
    async fn get_project(&self, project_id: String) -> Result<ProjectJson, ErrorObjectOwned>;

    #[method(name = "getmempoolinfo")]
    async fn get_mempool_info(&self) -> Result<MempoolInfoJson, ErrorObjectOwned>;

    #[method(name = "getinfo")]
    async fn get_info(&self) -> Result<NodeInfoJson, ErrorObjectOwned>;

    #[method(name = "submittx")]
    async fn submit_tx(&self, hex_data: String) -> Result<String, ErrorObjectOwned>;

    #[method(name = "submitblock")]
    async fn submit_block(&self, hex_data: String) -> Result<String, ErrorObjectOwned>;

    #[method(name = "getblocktemplate")]
    async fn get_block_template(&self, mining_address: String) -> Result<String, ErrorObjectOwned>;
}

/// Implementation of the co2chain JSON-RPC server, wrapping a [`Node`].
pub struct RpcServerImpl {
    node: Arc<Node>,
}

impl RpcServerImpl {
    pub fn new(node: Arc<Node>) -> Self {
        Self { node }
    }
}

#[async_trait]
impl Co2RpcServer for RpcServerImpl {
    async fn tip(&self) -> Result<(u32, String), ErrorObjectOwned> {
        let (height, hash) = self.node.tip();
        Ok((height, hash.to_string()))
    }

    async fn get_block_hash(&self, height: u32) -> Result<String, ErrorObjectOwned> {
        let chain = self.node.chain_state();
        let block = chain.block_by_height(height).ok_or_else(|| not_found("block"))?;
        Ok(block.header.hash().to_string())
    }

    async fn get_block(&self, hash: String) -> Result<BlockJson, ErrorObjectOwned> {
        let hash256 = parse_hash(&hash)?;
        let chain = self.node.chain_state();
        let block = chain.block_by_hash(&hash256).ok_or_else(|| not_found("block"))?;
        let tx: Vec<String> = block
            .transactions
            .iter()
            .filter_map(|tx| tx.txid().ok())
            .map(|txid| txid.to_string())
            .collect();
        Ok(BlockJson {
            header: header_json(hash256, &block.header),
            height: block.height,
            tx_count: block.transactions.len(),
            tx,
        })
    }

    async fn get_block_header(&self, hash: String) -> Result<HeaderJson, ErrorObjectOwned> {
        let hash256 = parse_hash(&hash)?;
        let chain = self.node.chain_state();
        let header = chain.header_by_hash(&hash256).ok_or_else(|| not_found("block header"))?;
        Ok(header_json(hash256, &header))
    }

    async fn get_transaction(&self, txid: String) -> Result<TransactionJson, ErrorObjectOwned> {
        let hash = parse_hash(&txid)?;
        let chain = self.node.chain_state();
        let tx = chain.tx_by_id(&hash).ok_or_else(|| not_found("transaction"))?;
        tx_json(&tx)
    }

    async fn get_utxo(&self, txid: String, index: u32) -> Result<UtxoJson, ErrorObjectOwned> {
        let hash = parse_hash(&txid)?;
        let outpoint = co2_core::types::OutPoint { txid: hash, index };
        let chain = self.node.chain_state();
        let output = chain.utxo(&outpoint).ok_or_else(|| not_found("utxo"))?;
        Ok(UtxoJson { outpoint: outpoint.to_string(), output: output_json(&output) })
    }

    async fn get_balance(&self, address: String) -> Result<u64, ErrorObjectOwned> {
        Ok(self.node.chain_state().balance(&address))
    }

    async fn get_utxos(&self, address: String) -> Result<Vec<String>, ErrorObjectOwned> {
        Ok(self.node.chain_state().utxos_of(&address).iter().map(|op| op.to_string()).collect())
    }

    async fn get_certificate(&self, certificate_id: String) -> Result<CertificateJson, ErrorObjectOwned> {
        let cert = self
            .node
            .chain_state()
            .certificate(&certificate_id)
            .ok_or_else(|| not_found("certificate"))?;
        Ok(CertificateJson {
            certificate_id: cert.certificate_id,
            project_id: cert.project_id,
            total_amount: cert.total_amount,
            assigned_amount: cert.assigned_amount,
            compensated_amount: cert.compensated_amount,
            issuer_address: cert.issuer_address,
            standard: cert.standard,
            location: cert.location,
            issue_date: cert.issue_date,
        })
    }

    async fn get_project(&self, project_id: String) -> Result<ProjectJson, ErrorObjectOwned> {
        let project = self.node.chain_state().project(&project_id).ok_or_else(|| not_found("project"))?;
        Ok(ProjectJson {
            project_id: project.project_id,
            name: project.name,
            project_type: project.project_type,
            location: project.location,
            created_height: project.created_height,
        })
    }

    async fn get_mempool_info(&self) -> Result<MempoolInfoJson, ErrorObjectOwned> {
        let mempool = self.node.mempool();
        let guard = mempool.read();
        Ok(MempoolInfoJson { size: guard.len(), bytes: guard.total_bytes(), total_fee: guard.total_fees() })
    }

    async fn get_info(&self) -> Result<NodeInfoJson, ErrorObjectOwned> {
        let (height, hash) = self.node.tip();
        let connections = self.node.network().map(|n| n.peer_count()).unwrap_or(0);
        Ok(NodeInfoJson {
            blocks: height,
            bestblockhash: hash.to_string(),
            connections,
            orphans: self.node.orphan_count(),
        })
    }

    async fn submit_tx(&self, hex_data: String) -> Result<String, ErrorObjectOwned> {
        let raw = hex::decode(&hex_data).map_err(|_| bad_request("invalid hex encoding"))?;
        let tx = co2_core::codec::decode_transaction(&raw).map_err(|e| bad_request(e.to_string()))?;
        let txid = self.node.submit_tx(tx).map_err(|e| coded_error(&e))?;
        Ok(txid.to_string())
    }

    async fn submit_block(&self, hex_data: String) -> Result<String, ErrorObjectOwned> {
        let raw = hex::decode(&hex_data).map_err(|_| bad_request("invalid hex encoding"))?;
        let (tip_height, _) = self.node.tip();
        let block = co2_core::codec::decode_block(&raw, tip_height.saturating_add(1))
            .map_err(|e| bad_request(e.to_string()))?;
        let hash = block.header.hash();
        self.node.accept_block(block).map_err(|e| coded_error(&e))?;
        Ok(hash.to_string())
    }

    async fn get_block_template(&self, mining_address: String) -> Result<String, ErrorObjectOwned> {
        use co2_core::traits::BlockProducer;
        let block = self
            .node
            .miner()
            .create_block_template(&mining_address)
            .map_err(|e| ErrorObjectOwned::owned(-32000, e.to_string(), Some(e.code())))?;
        let bytes = co2_core::codec::encode_block(&block);
        Ok(hex::encode(bytes))
    }
}

/// Start the JSON-RPC server on `addr`, returning a handle that stops it on drop.
pub async fn start_rpc_server(addr: &str, node: Arc<Node>) -> Result<ServerHandle, CoreError> {
    let server = Server::builder()
        .build(addr)
        .await
        .map_err(|e| CoreError::Storage(format!("RPC server bind failed: {e}")))?;

    let rpc_impl = RpcServerImpl::new(node);
    let handle = server.start(rpc_impl.into_rpc());
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hash_valid() {
        let hex_str = "aa".repeat(32);
        let hash = parse_hash(&hex_str).unwrap();
        assert_eq!(hash, Hash256([0xAA; 32]));
    }

    #[test]
    fn parse_hash_zero() {
        let hex_str = "00".repeat(32);
        assert_eq!(parse_hash(&hex_str).unwrap(), Hash256::ZERO);
    }

    #[test]
    fn parse_hash_wrong_length_rejected() {
        let err = parse_hash("abcdef").unwrap_err();
        assert_eq!(err.message(), "hash must be 32 bytes");
    }

    #[test]
    fn parse_hash_invalid_hex_rejected() {
        let err = parse_hash(&"zz".repeat(32)).unwrap_err();
        assert_eq!(err.message(), "invalid hex in hash");
    }

    #[test]
    fn mempool_info_json_serializes() {
        let info = MempoolInfoJson { size: 10, bytes: 5000, total_fee: 100_000 };
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"size\":10"));
    }

    #[tokio::test]
    async fn rpc_reports_genesis_tip() {
        let node = Node::in_memory(crate::config::NodeConfig {
            data_dir: "/tmp/co2-node-rpc-test".into(),
            ..crate::config::NodeConfig::default()
        });
        let impl_ = RpcServerImpl::new(node.clone());
        let (height, hash) = impl_.tip().await.unwrap();
        assert_eq!(height, 0);
        assert_eq!(hash, co2_core::genesis::genesis_hash().to_string());
    }

    #[tokio::test]
    async fn rpc_get_block_finds_genesis() {
        let node = Node::in_memory(crate::config::NodeConfig {
            data_dir: "/tmp/co2-node-rpc-test2".into(),
            ..crate::config::NodeConfig::default()
        });
        let impl_ = RpcServerImpl::new(node);
        let hash = co2_core::genesis::genesis_hash().to_string();
        let block = impl_.get_block(hash).await.unwrap();
        assert_eq!(block.height, 0);
        assert_eq!(block.tx_count, 1);
    }

    #[tokio::test]
    async fn rpc_get_block_unknown_hash_not_found() {
        let node = Node::in_memory(crate::config::NodeConfig {
            data_dir: "/tmp/co2-node-rpc-test3".into(),
            ..crate::config::NodeConfig::default()
        });
        let impl_ = RpcServerImpl::new(node);
        let err = impl_.get_block("ab".repeat(32)).await.unwrap_err();
        assert_eq!(err.message(), "block not found");
    }
}
