//! # Taproot Gate: Capability-Gated Taproot Signing
//!
//! Builds BIP341 key-path spends from a wallet public key and signs them with a
//! custodial private scalar that a threshold key network releases only to the
//! address delegated in the caller's session credential.
//!
//! ```text
//! public key ──> TaprootAddressDeriver ──> sender address ──> BroadcastPort (UTXOs)
//!                                                                   │
//!        TaprootTransactionBuilder <────────────────────────────────┘
//!                 │ { transaction, sigHash }
//!                 ▼
//! session credential ──> SigningGate: authorize ─> decrypt ─> sign ─> signed tx
//!                                                                  │
//!                                                      BroadcastPort (broadcast)
//! ```

pub mod action;
pub mod address;
pub mod authorization;
pub mod capabilities;
pub mod config;
pub mod error;
pub mod key_material;
pub mod services;
pub mod signing;
pub mod transaction;
pub mod utils;

// Re-export commonly used types
pub use action::{ActionHandler, ActionRequest};
pub use address::{TaprootAddressDeriver, TaprootOutput};
pub use authorization::{AccessControlAuthorizer, AccessControlCondition, SessionCredential};
pub use capabilities::{LocalKeyNetwork, Secp256k1Signer};
pub use config::GateConfig;
pub use error::{GateError, GateResult};
pub use key_material::{EncryptedWalletRecord, KeyMaterialStore};
pub use services::{BitcoindClient, BroadcastPort, EsploraClient};
pub use signing::{GateState, SignRequest, SigningGate};
pub use transaction::{SignatureHash, TaprootTransactionBuilder};
