//! # Configuration Constants
//!
//! Constants used by the signing gate, plus [`GateConfig`], the runtime
//! configuration assembled from the environment (and an optional `.env` file).

use crate::error::{GateError, GateResult};
use bitcoin::Network;

/// Network and explorer configuration
pub mod network {
    use std::time::Duration;

    /// Esplora-compatible API used for UTXO lookups and broadcast (testnet)
    pub const ESPLORA_API_BASE: &str = "https://mempool.space/testnet/api";

    /// Esplora API for mainnet
    pub const ESPLORA_MAINNET_API_BASE: &str = "https://mempool.space/api";

    /// Esplora API for signet
    pub const ESPLORA_SIGNET_API_BASE: &str = "https://mempool.space/signet/api";

    /// Local electrs/esplora HTTP endpoint for regtest
    pub const ESPLORA_REGTEST_API_BASE: &str = "http://127.0.0.1:3002";

    /// Request timeout for network operations
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

    /// Default bitcoind RPC host
    pub const DEFAULT_RPC_HOST: &str = "127.0.0.1";

    /// Default bitcoind RPC port (testnet)
    pub const DEFAULT_RPC_PORT: &str = "18332";

    /// bitcoind RPC port on mainnet
    pub const MAINNET_RPC_PORT: &str = "8332";

    /// bitcoind RPC port on signet
    pub const SIGNET_RPC_PORT: &str = "38332";

    /// bitcoind RPC port on regtest
    pub const REGTEST_RPC_PORT: &str = "18443";

    /// Default RPC username
    pub const DEFAULT_RPC_USER: &str = "user";

    /// Default RPC password
    pub const DEFAULT_RPC_PASSWORD: &str = "password";
}

/// Authorization constants
///
/// These describe the access-control condition shape understood by the
/// threshold key network and the capability tag it stamps on delegated
/// session credentials.
pub mod authorization {
    /// Algorithm tag of the capability entry issued by the threshold-key
    /// delegation path. Only that entry carries the decryption identity.
    pub const DELEGATION_ALGORITHM: &str = "LIT_BLS";

    /// Chain against which the requester's identity is evaluated
    pub const ACCESS_CONTROL_CHAIN: &str = "ethereum";

    /// Placeholder the network substitutes with the authenticated caller
    pub const USER_ADDRESS_PARAMETER: &str = ":userAddress";

    /// Comparator of the condition's return-value test
    pub const EQUALS_COMPARATOR: &str = "=";
}

/// Wallet secret encoding
pub mod wallet {
    /// Prefix carried by hex-encoded keys and scalars
    pub const HEX_PREFIX: &str = "0x";

    /// Length of a compressed secp256k1 public key
    pub const COMPRESSED_PUBKEY_LEN: usize = 33;

    /// Length of an uncompressed secp256k1 public key
    pub const UNCOMPRESSED_PUBKEY_LEN: usize = 65;

    /// Length of a private scalar
    pub const SECRET_SCALAR_LEN: usize = 32;
}

/// Environment variable names
pub mod env {
    /// Esplora API base override
    pub const ESPLORA_API_BASE: &str = "ESPLORA_API_BASE";

    /// Bitcoin network (bitcoin, testnet, signet, regtest)
    pub const BITCOIN_NETWORK: &str = "BITCOIN_NETWORK";

    /// Delegation capability tag override
    pub const DELEGATION_ALGORITHM: &str = "DELEGATION_ALGORITHM";

    /// Enables the decrypted-key check before signing
    pub const VERIFY_DECRYPTED_KEY: &str = "VERIFY_DECRYPTED_KEY";

    /// RPC URL override
    pub const RPC_URL: &str = "RPC_URL";

    /// RPC port override
    pub const RPC_PORT: &str = "RPC_PORT";

    /// RPC username override
    pub const RPC_USER: &str = "RPC_USER";

    /// RPC password override
    pub const RPC_PASSWORD: &str = "RPC_PASSWORD";
}

/// Runtime configuration for one host process.
#[derive(Debug, Clone)]
pub struct GateConfig {
    pub esplora_api_base: String,
    pub network: Network,
    pub delegation_algorithm: String,
    /// Compare the key derived from the decrypted scalar with the record's
    /// public key before signing. Off by default.
    pub verify_decrypted_key: bool,
    pub rpc_host: String,
    pub rpc_port: String,
    pub rpc_user: String,
    pub rpc_password: String,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self::for_network(Network::Testnet)
    }
}

impl GateConfig {
    /// Defaults for one network: explorer endpoint and RPC port follow it
    pub fn for_network(network: Network) -> Self {
        Self {
            esplora_api_base: default_esplora_api_base(network).to_string(),
            network,
            delegation_algorithm: authorization::DELEGATION_ALGORITHM.to_string(),
            verify_decrypted_key: false,
            rpc_host: network::DEFAULT_RPC_HOST.to_string(),
            rpc_port: default_rpc_port(network).to_string(),
            rpc_user: network::DEFAULT_RPC_USER.to_string(),
            rpc_password: network::DEFAULT_RPC_PASSWORD.to_string(),
        }
    }

    /// Switch network. Endpoints still at the old network's defaults move
    /// with it; explicit overrides are kept.
    pub fn with_network(mut self, network: Network) -> Self {
        if self.esplora_api_base == default_esplora_api_base(self.network) {
            self.esplora_api_base = default_esplora_api_base(network).to_string();
        }
        if self.rpc_port == default_rpc_port(self.network) {
            self.rpc_port = default_rpc_port(network).to_string();
        }
        self.network = network;
        self
    }

    /// Build configuration from environment variables, falling back to defaults
    pub fn from_env() -> GateResult<Self> {
        dotenv::dotenv().ok();

        let network = match std::env::var(self::env::BITCOIN_NETWORK) {
            Ok(value) => parse_network(&value)?,
            Err(_) => Network::Testnet,
        };
        let defaults = Self::for_network(network);
        let verify_decrypted_key = std::env::var(self::env::VERIFY_DECRYPTED_KEY)
            .map(|value| matches!(value.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(defaults.verify_decrypted_key);

        Ok(Self {
            esplora_api_base: std::env::var(self::env::ESPLORA_API_BASE)
                .unwrap_or(defaults.esplora_api_base),
            network,
            delegation_algorithm: std::env::var(self::env::DELEGATION_ALGORITHM)
                .unwrap_or(defaults.delegation_algorithm),
            verify_decrypted_key,
            rpc_host: std::env::var(self::env::RPC_URL).unwrap_or(defaults.rpc_host),
            rpc_port: std::env::var(self::env::RPC_PORT).unwrap_or(defaults.rpc_port),
            rpc_user: std::env::var(self::env::RPC_USER).unwrap_or(defaults.rpc_user),
            rpc_password: std::env::var(self::env::RPC_PASSWORD).unwrap_or(defaults.rpc_password),
        })
    }

    /// bitcoind RPC endpoint URL
    pub fn rpc_url(&self) -> String {
        format!("http://{}:{}", self.rpc_host, self.rpc_port)
    }
}

/// Default Esplora API base for a network
pub fn default_esplora_api_base(network: Network) -> &'static str {
    match network {
        Network::Bitcoin => network::ESPLORA_MAINNET_API_BASE,
        Network::Signet => network::ESPLORA_SIGNET_API_BASE,
        Network::Regtest => network::ESPLORA_REGTEST_API_BASE,
        _ => network::ESPLORA_API_BASE,
    }
}

/// Default bitcoind RPC port for a network
pub fn default_rpc_port(network: Network) -> &'static str {
    match network {
        Network::Bitcoin => network::MAINNET_RPC_PORT,
        Network::Signet => network::SIGNET_RPC_PORT,
        Network::Regtest => network::REGTEST_RPC_PORT,
        _ => network::DEFAULT_RPC_PORT,
    }
}

/// Parse a network name as accepted on the command line and in `BITCOIN_NETWORK`
pub fn parse_network(value: &str) -> GateResult<Network> {
    match value.to_lowercase().as_str() {
        "bitcoin" | "mainnet" => Ok(Network::Bitcoin),
        "testnet" => Ok(Network::Testnet),
        "signet" => Ok(Network::Signet),
        "regtest" => Ok(Network::Regtest),
        other => Err(GateError::Configuration {
            message: format!("unknown network: {}", other),
        }),
    }
}
