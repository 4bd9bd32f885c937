//! co2-miner: standalone mining binary using RPC.
//!
//! Connects to a co2-node RPC server, fetches block templates, searches for
//! a valid proof of work using the network's configured memory-hard
//! algorithm, and submits found blocks back over RPC.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::core::params::ArrayParams;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use tracing::{error, info, warn};

use co2_consensus::engine::{mine_block, CancelToken};
use co2_core::constants::PowAlgorithm;

/// CLI arguments for the miner.
#[derive(Debug, Parser)]
#[command(name = "co2-miner")]
#[command(about = "co2chain standalone miner", long_about = None)]
struct Args {
    /// RPC server endpoint.
    #[arg(long, default_value = "http://127.0.0.1:18332")]
    rpc_endpoint: String,

    /// Address to receive the coinbase reward and credit newly issued certificates.
    #[arg(long)]
    mining_address: String,

    /// Number of mining threads.
    #[arg(long, default_value = "1")]
    threads: usize,

    /// PoW algorithm to mine with (scrypt or argon2id).
    #[arg(long, default_value = "scrypt")]
    pow_algorithm: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_algorithm(s: &str) -> Result<PowAlgorithm> {
    match s.to_ascii_lowercase().as_str() {
        "scrypt" => Ok(PowAlgorithm::Scrypt),
        "argon2" | "argon2id" => Ok(PowAlgorithm::Argon2id),
        other => anyhow::bail!("unknown PoW algorithm: {other}"),
    }
}

/// Statistics tracker for mining.
struct MiningStats {
    blocks_found: AtomicU64,
    attempts: AtomicU64,
    start_time: Instant,
}

impl MiningStats {
    fn new() -> Self {
        Self {
            blocks_found: AtomicU64::new(0),
            attempts: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    fn increment_attempts(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    fn increment_blocks(&self) {
        self.blocks_found.fetch_add(1, Ordering::Relaxed);
    }

    fn attempt_rate(&self) -> f64 {
        let attempts = self.attempts.load(Ordering::Relaxed) as f64;
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            attempts / elapsed
        } else {
            0.0
        }
    }

    fn blocks_found(&self) -> u64 {
        self.blocks_found.load(Ordering::Relaxed)
    }
}

/// Fetch the current chain tip height from the node.
async fn fetch_tip_height(client: &HttpClient) -> Result<u32> {
    let (height, _hash): (u32, String) = client
        .request("tip", ArrayParams::new())
        .await
        .context("failed to fetch chain tip")?;
    Ok(height)
}

/// Fetch a hex-encoded block template from the RPC server.
async fn fetch_template(client: &HttpClient, mining_address: &str) -> Result<String> {
    let mut params = ArrayParams::new();
    params.insert(mining_address).ok();
    let hex_data: String = client
        .request("getblocktemplate", params)
        .await
        .context("failed to fetch block template")?;
    Ok(hex_data)
}

/// Submit a mined, hex-encoded block to the RPC server.
async fn submit_block(client: &HttpClient, hex_data: String) -> Result<String> {
    let mut params = ArrayParams::new();
    params.insert(hex_data).ok();
    let hash: String = client
        .request("submitblock", params)
        .await
        .context("failed to submit block")?;
    Ok(hash)
}

/// Main mining loop for a single thread.
async fn mining_worker(
    client: HttpClient,
    mining_address: String,
    algorithm: PowAlgorithm,
    stats: Arc<MiningStats>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Relaxed) {
        let tip_height = match fetch_tip_height(&client).await {
            Ok(h) => h,
            Err(e) => {
                error!("failed to fetch chain tip: {e}");
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
        };

        let template_hex = match fetch_template(&client, &mining_address).await {
            Ok(t) => t,
            Err(e) => {
                error!("failed to fetch block template: {e}");
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
        };

        let template_bytes = match hex::decode(&template_hex) {
            Ok(b) => b,
            Err(e) => {
                error!("block template was not valid hex: {e}");
                continue;
            }
        };

        let mut block = match co2_core::codec::decode_block(&template_bytes, tip_height + 1) {
            Ok(b) => b,
            Err(e) => {
                error!("failed to decode block template: {e}");
                continue;
            }
        };

        info!("mining at height {} with {:?}", tip_height + 1, algorithm);
        let cancel = CancelToken::new();
        let cancel_watch = Arc::clone(&running);

        // Poll for shutdown in a side task so an in-flight search can be interrupted.
        let cancel_for_task = cancel.clone();
        let watcher = tokio::task::spawn_blocking(move || {
            while cancel_watch.load(Ordering::Relaxed) && !cancel_for_task.is_cancelled() {
                std::thread::sleep(Duration::from_millis(200));
            }
            if !cancel_watch.load(Ordering::Relaxed) {
                cancel_for_task.cancel();
            }
        });

        let header = block.header.clone();
        let mine_result =
            tokio::task::spawn_blocking(move || mine_block(header, algorithm, &cancel))
                .await
                .expect("mining task panicked");
        watcher.abort();
        stats.increment_attempts();

        match mine_result {
            Some(header) => {
                block.header = header;
                let hash = block.header.hash();
                info!("found block at height {} hash={}", tip_height + 1, hash);

                let encoded = co2_core::codec::encode_block(&block);
                match submit_block(&client, hex::encode(encoded)).await {
                    Ok(accepted_hash) => {
                        info!("block accepted: {accepted_hash}");
                        stats.increment_blocks();
                    }
                    Err(e) => {
                        error!("node rejected submitted block: {e}");
                    }
                }
            }
            None => {
                info!("search cancelled without a solution, fetching a fresh template");
            }
        }
    }

    info!("mining worker shutting down");
}

/// Log mining statistics periodically.
async fn stats_logger(stats: Arc<MiningStats>, running: Arc<AtomicBool>) {
    while running.load(Ordering::Relaxed) {
        tokio::time::sleep(Duration::from_secs(30)).await;
        info!(
            "template rate: {:.2}/s | blocks found: {}",
            stats.attempt_rate(),
            stats.blocks_found()
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .init();

    let algorithm = parse_algorithm(&args.pow_algorithm)?;

    info!("co2-miner v{}", env!("CARGO_PKG_VERSION"));
    info!("RPC endpoint: {}", args.rpc_endpoint);
    info!("mining address: {}", args.mining_address);
    info!("mining threads: {}", args.threads);

    let client = HttpClientBuilder::default()
        .build(&args.rpc_endpoint)
        .context("failed to create RPC client")?;

    let tip_height = fetch_tip_height(&client).await?;
    info!("connected to RPC server at height {tip_height}");

    let stats = Arc::new(MiningStats::new());
    let running = Arc::new(AtomicBool::new(true));

    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        warn!("received SIGINT, shutting down...");
        running_clone.store(false, Ordering::Relaxed);
    });

    let stats_clone = Arc::clone(&stats);
    let running_clone = Arc::clone(&running);
    tokio::spawn(stats_logger(stats_clone, running_clone));

    let mut handles = vec![];
    for i in 0..args.threads {
        let client_clone = client.clone();
        let address_clone = args.mining_address.clone();
        let stats_clone = Arc::clone(&stats);
        let running_clone = Arc::clone(&running);

        let handle = tokio::spawn(async move {
            info!("starting mining thread {i}");
            mining_worker(client_clone, address_clone, algorithm, stats_clone, running_clone).await;
        });
        handles.push(handle);
    }

    for handle in handles {
        handle.await.ok();
    }

    info!("miner shutdown complete");
    Ok(())
}
