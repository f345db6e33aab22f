//! # Taproot Gate CLI
//!
//! Command-line driver for the signing gate. Address derivation, transaction
//! building and status lookups talk to an Esplora explorer or a bitcoind node;
//! wallet creation and signing run against an in-process key network whose
//! master key lives in a local file.
//!
//! ## Usage
//!
//! ```bash
//! # Derive the Taproot address of a wallet public key
//! taproot-gate address --public-key 02...
//!
//! # Create a wallet sealed for the delegated address in the credentials
//! taproot-gate create-wallet --credentials session_sigs.json --identity 0x... > wallet.json
//!
//! # Build the spend and print { transaction, sigHash }
//! taproot-gate build-tx --public-key 02... --destination tb1p... --amount 10000 --fee 1000
//!
//! # Sign (and optionally broadcast) it
//! taproot-gate sign --credentials session_sigs.json --identity 0x... --wallet wallet.json \
//!     --transaction 0200... --sig-hash 3f1e... --broadcast
//! ```
//!
//! Set `RUST_LOG=debug` to watch the gate move through its states.

use anyhow::{anyhow, Context, Result};
use bitcoin::secp256k1::rand::{thread_rng, RngCore};
use bitcoin::Txid;
use clap::{Parser, Subcommand};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use taproot_gate::action::{ActionHandler, ActionRequest};
use taproot_gate::authorization::SessionCredentials;
use taproot_gate::capabilities::{LocalKeyNetwork, Secp256k1Signer, StdoutSink};
use taproot_gate::config::{parse_network, GateConfig};
use taproot_gate::key_material::{EncryptedWalletRecord, KeyMaterialStore};
use taproot_gate::services::{BitcoindClient, BroadcastPort, EsploraClient};
use taproot_gate::signing::SigningGate;
use taproot_gate::transaction::{BuildResponse, SignatureHash, TaprootTransactionBuilder};
use taproot_gate::utils::address::format_short;
use taproot_gate::TaprootAddressDeriver;

/// Chain backend used for UTXO lookup, broadcast and status
#[derive(Clone, Copy, Debug)]
pub enum Backend {
    /// Esplora REST API (mempool.space / blockstream)
    Esplora,
    /// bitcoind JSON-RPC
    Bitcoind,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "esplora" => Ok(Backend::Esplora),
            "bitcoind" | "rpc" => Ok(Backend::Bitcoind),
            _ => Err(format!("Invalid backend: {}. Valid options: esplora, bitcoind", s)),
        }
    }
}

#[derive(Parser)]
#[command(name = "taproot-gate")]
#[command(about = "Build Taproot spends and sign them through a delegated key gate")]
struct Cli {
    /// Bitcoin network (bitcoin, testnet, signet, regtest); defaults to BITCOIN_NETWORK or testnet
    #[arg(long, global = true)]
    network: Option<String>,

    /// Chain backend
    #[arg(long, global = true, default_value = "esplora")]
    backend: Backend,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Derive the Taproot address controlled by a public key
    Address {
        /// Compressed or uncompressed public key, hex
        #[arg(short, long)]
        public_key: String,
    },
    /// Fetch UTXOs for the sender and print the unsigned transaction and its sighash
    BuildTx {
        /// Sender public key, hex
        #[arg(short, long)]
        public_key: String,
        /// Destination address
        #[arg(short, long)]
        destination: String,
        /// Amount in satoshis, fee included
        #[arg(short, long)]
        amount: u64,
        /// Fee in satoshis
        #[arg(short, long)]
        fee: u64,
    },
    /// Generate a wallet sealed for the delegated address
    CreateWallet {
        /// JSON file with the session credential map
        #[arg(short, long)]
        credentials: String,
        /// Address the key network session is authenticated as
        #[arg(short, long)]
        identity: String,
        /// Master key file of the local key network (created when missing)
        #[arg(long, default_value = "key_network.key")]
        key_file: String,
    },
    /// Sign a prepared transaction with a sealed wallet
    Sign {
        /// JSON file with the session credential map
        #[arg(short, long)]
        credentials: String,
        /// Address the key network session is authenticated as
        #[arg(short, long)]
        identity: String,
        /// Master key file of the local key network
        #[arg(long, default_value = "key_network.key")]
        key_file: String,
        /// Wallet record produced by create-wallet
        #[arg(short, long)]
        wallet: String,
        /// Unsigned transaction hex
        #[arg(short, long)]
        transaction: String,
        /// Signature hash from build-tx
        #[arg(short, long)]
        sig_hash: String,
        /// Broadcast the signed transaction and print its txid
        #[arg(long, default_value_t = false)]
        broadcast: bool,
    },
    /// Show the confirmation status of a transaction
    Status {
        /// Transaction id
        #[arg(short, long)]
        txid: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = GateConfig::from_env()?;
    if let Some(network) = &cli.network {
        config = config.with_network(parse_network(network)?);
    }

    match cli.command {
        Commands::Address { public_key } => {
            derive_address(&config, &public_key)?;
        }
        Commands::BuildTx {
            public_key,
            destination,
            amount,
            fee,
        } => {
            let port = connect(&config, cli.backend)?;
            build_tx(&config, port.as_ref(), &public_key, &destination, amount, fee).await?;
        }
        Commands::CreateWallet {
            credentials,
            identity,
            key_file,
        } => {
            create_wallet(&config, &credentials, &identity, &key_file).await?;
        }
        Commands::Sign {
            credentials,
            identity,
            key_file,
            wallet,
            transaction,
            sig_hash,
            broadcast,
        } => {
            let port = connect(&config, cli.backend)?;
            let request = SignArgs {
                credentials,
                identity,
                key_file,
                wallet,
                transaction,
                sig_hash,
                broadcast,
            };
            sign(&config, port, request).await?;
        }
        Commands::Status { txid } => {
            let port = connect(&config, cli.backend)?;
            status(port.as_ref(), &txid).await?;
        }
    }

    Ok(())
}

fn connect(config: &GateConfig, backend: Backend) -> Result<Arc<dyn BroadcastPort>> {
    let port: Arc<dyn BroadcastPort> = match backend {
        Backend::Esplora => Arc::new(EsploraClient::with_base(&config.esplora_api_base)?),
        Backend::Bitcoind => Arc::new(BitcoindClient::new(config)?),
    };
    Ok(port)
}

fn derive_address(config: &GateConfig, public_key: &str) -> Result<()> {
    let output = TaprootAddressDeriver::new(config.network).derive(public_key)?;
    println!("Address:      {}", output.address);
    println!("Output key:   {}", output.x_only);
    println!("ScriptPubKey: {}", output.script_pubkey.to_hex_string());
    Ok(())
}

async fn build_tx(
    config: &GateConfig,
    port: &dyn BroadcastPort,
    public_key: &str,
    destination: &str,
    amount: u64,
    fee: u64,
) -> Result<()> {
    let unsigned = TaprootTransactionBuilder::new(config.network)
        .create_taproot_txn(port, public_key, destination, amount, fee)
        .await?;

    log::info!(
        "Spending {} sats to {} ({} sats fee)",
        unsigned.output_value(),
        format_short(destination),
        fee
    );
    println!(
        "{}",
        serde_json::to_string_pretty(&BuildResponse::from(&unsigned))?
    );
    Ok(())
}

/// Load the local key network's master key, creating it on first use
fn load_key_network(key_file: &str) -> Result<Arc<LocalKeyNetwork>> {
    let path = Path::new(key_file);
    if !path.exists() {
        let mut key = [0u8; 32];
        thread_rng().fill_bytes(&mut key);
        std::fs::write(path, hex::encode(key))
            .with_context(|| format!("failed to write key network file {}", key_file))?;
        log::warn!("Created new key network master key at {}", key_file);
    }

    let encoded = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read key network file {}", key_file))?;
    let key = hex::decode(encoded.trim()).context("key network file is not hex")?;
    Ok(LocalKeyNetwork::from_key(&key)?)
}

fn load_credentials(path: &str) -> Result<SessionCredentials> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read credentials file {}", path))?;
    serde_json::from_str(&content).map_err(|e| anyhow!("invalid credentials file {}: {}", path, e))
}

fn handler_for(
    config: &GateConfig,
    key_file: &str,
    identity: &str,
    port: Option<Arc<dyn BroadcastPort>>,
) -> Result<ActionHandler> {
    let network = load_key_network(key_file)?;
    let store = KeyMaterialStore::from_network(network.session(identity));
    let mut gate = SigningGate::new(store, Arc::new(Secp256k1Signer::new())).with_config(config);
    if let Some(port) = port {
        gate = gate.with_broadcast_port(port);
    }
    Ok(ActionHandler::new(gate))
}

async fn create_wallet(config: &GateConfig, credentials: &str, identity: &str, key_file: &str) -> Result<()> {
    let handler = handler_for(config, key_file, identity, None)?;
    let request = ActionRequest::CreateWallet {
        session_credentials: load_credentials(credentials)?,
    };
    handler.handle(request, &StdoutSink).await;
    Ok(())
}

struct SignArgs {
    credentials: String,
    identity: String,
    key_file: String,
    wallet: String,
    transaction: String,
    sig_hash: String,
    broadcast: bool,
}

async fn sign(config: &GateConfig, port: Arc<dyn BroadcastPort>, args: SignArgs) -> Result<()> {
    let content = std::fs::read_to_string(&args.wallet)
        .with_context(|| format!("failed to read wallet file {}", args.wallet))?;
    let record: EncryptedWalletRecord = serde_json::from_str(&content)
        .or_else(|_| {
            // Accept the raw create-wallet output as well
            serde_json::from_str::<serde_json::Value>(&content)
                .and_then(|value| serde_json::from_value(value["response"].clone()))
        })
        .map_err(|e| anyhow!("invalid wallet file {}: {}", args.wallet, e))?;

    let handler = handler_for(config, &args.key_file, &args.identity, Some(port))?;
    let request = ActionRequest::SignTaprootTxn {
        session_credentials: load_credentials(&args.credentials)?,
        ciphertext: record.ciphertext,
        ciphertext_hash: record.ciphertext_hash,
        transaction_hex: args.transaction,
        sig_hash: SignatureHash::from_hex(&args.sig_hash)?,
        broadcast: args.broadcast,
        public_key: Some(record.public_key),
    };
    handler.handle(request, &StdoutSink).await;
    Ok(())
}

async fn status(port: &dyn BroadcastPort, txid: &str) -> Result<()> {
    taproot_gate::utils::txid::validate(txid)?;
    let txid = Txid::from_str(txid).map_err(|e| anyhow!("invalid txid {}: {}", txid, e))?;
    let status = port.transaction_status(&txid).await?;
    match status.block_height {
        Some(height) if status.confirmed => println!("{} confirmed at height {}", txid, height),
        _ if status.confirmed => println!("{} confirmed", txid),
        _ => println!("{} unconfirmed", txid),
    }
    Ok(())
}
