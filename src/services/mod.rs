//! # Services Module
//!
//! Network collaborators of the signing gate.
//!
//! ## Components
//!
//! - **Broadcast port**: the trait the core consumes for UTXO lookup, broadcast and confirmation
//! - **Esplora Client**: block explorer HTTP API (mempool.space / blockstream)
//! - **RPC Client**: bitcoind JSON-RPC

pub mod broadcast;
pub mod explorer_client;
pub mod rpc_client;

pub use broadcast::{BroadcastPort, TxStatus, Utxo};
pub use explorer_client::EsploraClient;
pub use rpc_client::BitcoindClient;
