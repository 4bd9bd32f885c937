//! co2-node full node binary.
//!
//! Starts a full node with RocksDB storage, a JSON-RPC server, and (unless
//! disabled) the libp2p network stub. Processes blocks and transactions,
//! validates the chain, and serves RPC queries.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use co2_network::{NetworkConfig, NetworkEvent, NetworkNode};
use co2_node_lib::{start_rpc_server, Node, NodeConfig};
use tracing::{debug, error, info, warn};

/// co2chain full node.
#[derive(Parser, Debug)]
#[command(
    name = "co2-node",
    version,
    about = "co2chain full node with RocksDB storage and JSON-RPC server"
)]
struct CliArgs {
    /// Data directory for blockchain storage and config.
    #[arg(long, default_value = None)]
    data_dir: Option<PathBuf>,

    /// RPC server bind address.
    #[arg(long, default_value = "127.0.0.1")]
    rpc_bind: String,

    /// RPC server port.
    #[arg(long, default_value_t = co2_core::constants::DEFAULT_RPC_PORT)]
    rpc_port: u16,

    /// P2P listen address.
    #[arg(long, default_value = "0.0.0.0")]
    p2p_listen_addr: String,

    /// P2P listen port.
    #[arg(long, default_value_t = co2_core::constants::DEFAULT_P2P_PORT)]
    p2p_listen_port: u16,

    /// Bootstrap peers (comma-separated multiaddrs).
    #[arg(long, value_delimiter = ',')]
    bootstrap_peers: Vec<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Disable P2P networking (single-node mode).
    #[arg(long)]
    no_network: bool,
}

impl CliArgs {
    fn into_config(self) -> NodeConfig {
        let data_dir = self.data_dir.unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("co2chain")
        });

        let network = NetworkConfig {
            listen_addr: self.p2p_listen_addr,
            listen_port: self.p2p_listen_port,
            bootstrap_peers: self.bootstrap_peers,
            enable_mdns: !self.no_network,
            node_key_path: Some(data_dir.join("node.key")),
            ..NetworkConfig::default()
        };

        NodeConfig {
            data_dir,
            rpc_bind: self.rpc_bind,
            rpc_port: self.rpc_port,
            log_level: self.log_level,
            network,
        }
    }
}

/// Drain network events into the node: inbound blocks are validated and
/// connected to the chain, inbound transactions are admitted to the
/// mempool. Failures are logged, not propagated — a malicious or confused
/// peer cannot crash the node.
async fn run_network_event_loop(node: Arc<Node>, mut events: tokio::sync::broadcast::Receiver<NetworkEvent>) {
    loop {
        match events.recv().await {
            Ok(NetworkEvent::BlockReceived(block)) => {
                if let Err(e) = node.accept_block(block) {
                    debug!("rejected block from peer: {e}");
                }
            }
            Ok(NetworkEvent::TransactionReceived(tx)) => {
                if let Err(e) = node.submit_tx(tx) {
                    debug!("rejected transaction from peer: {e}");
                }
            }
            Ok(other) => {
                debug!("network event: {other:?}");
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("network event receiver lagged, skipped {skipped} events");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    let config = args.into_config();

    init_logging(&config.log_level);

    info!("co2-node v{}", env!("CARGO_PKG_VERSION"));
    info!("data_dir: {:?}", config.data_dir);
    info!("rpc_addr: {}", config.rpc_addr());
    info!("p2p_listen: {}", config.network.listen_multiaddr());
    info!("bootstrap_peers: {:?}", config.network.bootstrap_peers);

    if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
        error!("failed to create data_dir: {e}");
        process::exit(1);
    }

    let network_config = config.network.clone();
    let node = if config.network.enable_mdns || !config.network.bootstrap_peers.is_empty() {
        match NetworkNode::start(network_config).await {
            Ok((net_node, events, _queries)) => {
                let net_node: Arc<dyn co2_core::traits::NetworkService + Send + Sync> =
                    Arc::new(net_node);
                let node = match Node::open_with_network(config.clone(), net_node) {
                    Ok(n) => n,
                    Err(e) => {
                        error!("failed to open node: {e}");
                        process::exit(1);
                    }
                };
                tokio::spawn(run_network_event_loop(Arc::clone(&node), events));
                node
            }
            Err(e) => {
                error!("failed to start network: {e}, continuing without networking");
                match Node::open(config.clone()) {
                    Ok(n) => n,
                    Err(e) => {
                        error!("failed to open node: {e}");
                        process::exit(1);
                    }
                }
            }
        }
    } else {
        match Node::open(config.clone()) {
            Ok(n) => n,
            Err(e) => {
                error!("failed to open node: {e}");
                process::exit(1);
            }
        }
    };

    let (height, hash) = node.tip();
    info!("chain_tip: height={height} hash={hash}");

    let rpc_handle = match start_rpc_server(&config.rpc_addr(), Arc::clone(&node)).await {
        Ok(handle) => {
            info!("RPC server listening on {}", config.rpc_addr());
            handle
        }
        Err(e) => {
            error!("failed to start RPC server: {e}");
            process::exit(1);
        }
    };

    info!("co2-node running (Ctrl+C to stop)");
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
    info!("received Ctrl+C, shutting down...");

    rpc_handle.stop().ok();
    info!("co2-node shutdown complete");
}

fn init_logging(level_str: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level_str)),
        )
        .init();
}
