//! # Error Types for the Taproot Signing Gate
//!
//! Every failure a request can hit. All kinds are terminal for the current
//! request; nothing is retried internally. Authorization and decryption
//! failures carry no secret material in their messages.

use serde::Serialize;
use thiserror::Error;

/// Main error type for address derivation, transaction building and signing
#[derive(Debug, Error)]
pub enum GateError {
    /// Public key is not a valid secp256k1 point
    #[error("Invalid public key: {message}")]
    InvalidPublicKey { message: String },

    /// Address parsing and validation errors
    #[error("Invalid address: {address}")]
    InvalidAddress { address: String },

    /// The UTXO set for the sender address is empty
    #[error("No UTXOs found for address {address}")]
    NoUtxoAvailable { address: String },

    /// `amount - fee` would not leave a positive output
    #[error("Output value must be positive: amount {amount} sats, fee {fee} sats")]
    NonPositiveOutput { amount: u64, fee: u64 },

    /// The request carried no session credential at all
    #[error("Invalid session credentials: no entries supplied")]
    NoSessionCredential,

    /// The session's signed message has no capabilities
    #[error("Capabilities in the session's signed message are empty, but required")]
    EmptyCapabilities,

    /// No capability entry was issued through the delegation path
    #[error("Session credential is not delegated; no {algorithm} capability found")]
    NotDelegated { algorithm: String },

    /// The key network refused to decrypt under the presented condition
    #[error("Unauthorized: caller does not satisfy the access-control condition")]
    Unauthorized,

    /// Ciphertext does not match the hash recorded at encryption time
    #[error("Ciphertext integrity check failed")]
    IntegrityCheck,

    /// Decrypted plaintext is not a usable private scalar
    #[error("Decrypted key material is not a valid private scalar")]
    InvalidSecret,

    /// Decrypted scalar does not belong to the expected public key
    #[error("Decrypted key does not match the wallet public key")]
    KeyMismatch,

    /// Schnorr signing failed
    #[error("Signing failed: {message}")]
    Signing { message: String },

    /// Transport failures talking to explorers, nodes or the key network
    #[error("Network request failed: {message}")]
    Network { message: String },

    /// Hex, JSON or consensus encoding failures
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Invalid runtime configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

/// Result type alias for gate operations
pub type GateResult<T> = Result<T, GateError>;

impl GateError {
    /// Create a network error with a message
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a serialization error with a message
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create an invalid public key error with a message
    pub fn invalid_public_key(message: impl Into<String>) -> Self {
        Self::InvalidPublicKey {
            message: message.into(),
        }
    }

    /// Create an invalid address error
    pub fn invalid_address(address: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.into(),
        }
    }

    /// Stable taxonomy name reported in structured failure responses
    pub fn kind(&self) -> &'static str {
        match self {
            GateError::InvalidPublicKey { .. } => "InvalidPublicKey",
            GateError::InvalidAddress { .. } => "InvalidAddress",
            GateError::NoUtxoAvailable { .. } => "NoUtxoAvailable",
            GateError::NonPositiveOutput { .. } => "NonPositiveOutput",
            GateError::NoSessionCredential => "NoSessionCredential",
            GateError::EmptyCapabilities => "EmptyCapabilities",
            GateError::NotDelegated { .. } => "NotDelegated",
            GateError::Unauthorized => "Unauthorized",
            GateError::IntegrityCheck => "IntegrityCheck",
            GateError::InvalidSecret => "InvalidSecret",
            GateError::KeyMismatch => "KeyMismatch",
            GateError::Signing { .. } => "Signing",
            GateError::Network { .. } => "NetworkError",
            GateError::Serialization { .. } => "SerializationError",
            GateError::Configuration { .. } => "Configuration",
        }
    }

    /// Requests are never retried by the gate; the caller must issue a new one
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// Check if this error came from the authorization boundary
    pub fn is_authorization_failure(&self) -> bool {
        matches!(
            self,
            GateError::NoSessionCredential
                | GateError::EmptyCapabilities
                | GateError::NotDelegated { .. }
                | GateError::Unauthorized
        )
    }

    /// Structured form returned to the caller by the action handler
    pub fn to_failure(&self) -> Failure {
        Failure {
            kind: self.kind().to_string(),
            message: self.to_string(),
        }
    }
}

/// Single structured failure message handed back to the caller
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Failure {
    pub kind: String,
    pub message: String,
}

impl From<reqwest::Error> for GateError {
    fn from(err: reqwest::Error) -> Self {
        GateError::network(err.to_string())
    }
}

impl From<bitcoincore_rpc::Error> for GateError {
    fn from(err: bitcoincore_rpc::Error) -> Self {
        GateError::network(err.to_string())
    }
}

impl From<serde_json::Error> for GateError {
    fn from(err: serde_json::Error) -> Self {
        GateError::serialization(err.to_string())
    }
}

impl From<hex::FromHexError> for GateError {
    fn from(err: hex::FromHexError) -> Self {
        GateError::serialization(format!("invalid hex: {}", err))
    }
}

impl From<bitcoin::consensus::encode::Error> for GateError {
    fn from(err: bitcoin::consensus::encode::Error) -> Self {
        GateError::serialization(format!("invalid transaction encoding: {}", err))
    }
}
