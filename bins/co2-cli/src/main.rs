//! co2-cli — command-line interface for submitting transactions/blocks and
//! querying chain state against a running co2-node.
//!
//! Transaction construction and signing are external-collaborator concerns
//! (the wallet); this binary only moves already-encoded hex blobs to and
//! from the node's JSON-RPC surface and renders query responses.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use jsonrpsee::core::client::ClientT;
use jsonrpsee::core::params::ArrayParams;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use serde_json::Value;

/// co2chain command-line interface.
#[derive(Parser)]
#[command(name = "co2-cli")]
#[command(version, about = "Submit transactions/blocks and query co2chain node state")]
struct Cli {
    /// RPC server endpoint.
    #[arg(long, global = true, default_value = "http://127.0.0.1:18332")]
    rpc_endpoint: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the current chain tip (height, hash).
    Tip,
    /// Look up the block hash at a given height.
    GetBlockHash(HeightArgs),
    /// Fetch a block by hash.
    GetBlock(HashArgs),
    /// Fetch a block header by hash.
    GetBlockHeader(HashArgs),
    /// Fetch a transaction by id.
    GetTransaction(TxidArgs),
    /// Look up a single UTXO.
    GetUtxo(UtxoArgs),
    /// Query the spendable balance of an address.
    GetBalance(AddressArgs),
    /// List the UTXOs owned by an address.
    GetUtxos(AddressArgs),
    /// Fetch a certificate by id.
    GetCertificate(CertificateArgs),
    /// Fetch a project by id.
    GetProject(ProjectArgs),
    /// Summarize mempool occupancy.
    MempoolInfo,
    /// General node status.
    Info,
    /// Submit a hex-encoded, already-signed transaction.
    SubmitTx(HexArgs),
    /// Submit a hex-encoded, mined block.
    SubmitBlock(HexArgs),
    /// Fetch a hex-encoded block template to mine against.
    GetBlockTemplate(AddressArgs),
}

#[derive(Args)]
struct HeightArgs {
    height: u32,
}

#[derive(Args)]
struct HashArgs {
    hash: String,
}

#[derive(Args)]
struct TxidArgs {
    txid: String,
}

#[derive(Args)]
struct UtxoArgs {
    txid: String,
    index: u32,
}

#[derive(Args)]
struct AddressArgs {
    address: String,
}

#[derive(Args)]
struct CertificateArgs {
    certificate_id: String,
}

#[derive(Args)]
struct ProjectArgs {
    project_id: String,
}

#[derive(Args)]
struct HexArgs {
    /// Hex-encoded payload.
    hex_data: String,
}

async fn call<T: serde::de::DeserializeOwned>(
    client: &HttpClient,
    method: &str,
    params: ArrayParams,
) -> Result<T> {
    client
        .request(method, params)
        .await
        .with_context(|| format!("RPC call to `{method}` failed"))
}

fn one_param(value: impl serde::Serialize) -> Result<ArrayParams> {
    let mut params = ArrayParams::new();
    params.insert(value).context("failed to encode RPC parameter")?;
    Ok(params)
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let client = HttpClientBuilder::default()
        .build(&cli.rpc_endpoint)
        .context("failed to create RPC client")?;

    match cli.command {
        Commands::Tip => {
            let (height, hash): (u32, String) =
                call(&client, "tip", ArrayParams::new()).await?;
            print_json(&serde_json::json!({ "height": height, "hash": hash }))?;
        }
        Commands::GetBlockHash(args) => {
            let hash: String = call(&client, "getblockhash", one_param(args.height)?).await?;
            println!("{hash}");
        }
        Commands::GetBlock(args) => {
            let block: Value = call(&client, "getblock", one_param(args.hash)?).await?;
            print_json(&block)?;
        }
        Commands::GetBlockHeader(args) => {
            let header: Value =
                call(&client, "getblockheader", one_param(args.hash)?).await?;
            print_json(&header)?;
        }
        Commands::GetTransaction(args) => {
            let tx: Value = call(&client, "gettransaction", one_param(args.txid)?).await?;
            print_json(&tx)?;
        }
        Commands::GetUtxo(args) => {
            let mut params = ArrayParams::new();
            params.insert(args.txid).ok();
            params.insert(args.index).ok();
            let utxo: Value = call(&client, "getutxo", params).await?;
            print_json(&utxo)?;
        }
        Commands::GetBalance(args) => {
            let balance: u64 = call(&client, "getbalance", one_param(args.address)?).await?;
            println!("{balance}");
        }
        Commands::GetUtxos(args) => {
            let outpoints: Vec<String> =
                call(&client, "getutxos", one_param(args.address)?).await?;
            for outpoint in outpoints {
                println!("{outpoint}");
            }
        }
        Commands::GetCertificate(args) => {
            let cert: Value =
                call(&client, "getcertificate", one_param(args.certificate_id)?).await?;
            print_json(&cert)?;
        }
        Commands::GetProject(args) => {
            let project: Value =
                call(&client, "getproject", one_param(args.project_id)?).await?;
            print_json(&project)?;
        }
        Commands::MempoolInfo => {
            let info: Value = call(&client, "getmempoolinfo", ArrayParams::new()).await?;
            print_json(&info)?;
        }
        Commands::Info => {
            let info: Value = call(&client, "getinfo", ArrayParams::new()).await?;
            print_json(&info)?;
        }
        Commands::SubmitTx(args) => {
            hex::decode(&args.hex_data).context("submitted transaction was not valid hex")?;
            let txid: String = call(&client, "submittx", one_param(args.hex_data)?).await?;
            println!("{txid}");
        }
        Commands::SubmitBlock(args) => {
            hex::decode(&args.hex_data).context("submitted block was not valid hex")?;
            let hash: String = call(&client, "submitblock", one_param(args.hex_data)?).await?;
            println!("{hash}");
        }
        Commands::GetBlockTemplate(args) => {
            let hex_block: String =
                call(&client, "getblocktemplate", one_param(args.address)?).await?;
            println!("{hex_block}");
        }
    }

    Ok(())
}
