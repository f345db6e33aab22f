//! Boundary between the gate and the Bitcoin network.
//!
//! The gate only ever needs three things from chain state: the spendable
//! outputs of an address, a way to submit a finished transaction, and a way
//! to observe whether it confirmed. Implementations never retry; a failed
//! call surfaces as `GateError::Network` and the caller decides what to do.

use crate::error::GateResult;
use async_trait::async_trait;
use bitcoin::Txid;
use serde::{Deserialize, Serialize};

/// An unspent output as reported by an explorer (`/address/{addr}/utxo`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    /// Funding transaction id, displayed (big-endian) hex on the wire
    pub txid: Txid,
    /// Output index within the funding transaction
    pub vout: u32,
    /// Output value in satoshis
    pub value: u64,
}

/// Confirmation status of a broadcast transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxStatus {
    pub confirmed: bool,
    #[serde(default)]
    pub block_height: Option<u32>,
}

/// Network I/O port consumed by the transaction builder and the signing gate
#[async_trait]
pub trait BroadcastPort: Send + Sync {
    /// Spendable outputs locked to `address`. An empty list is not an error.
    async fn fetch_utxos(&self, address: &str) -> GateResult<Vec<Utxo>>;

    /// Submit a raw transaction and return its id
    async fn broadcast(&self, signed_tx_hex: &str) -> GateResult<Txid>;

    /// Confirmation status of a previously broadcast transaction
    async fn transaction_status(&self, txid: &Txid) -> GateResult<TxStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utxo_wire_shape() {
        let json = format!(
            r#"[{{"txid":"{}","vout":1,"value":20000,"status":{{"confirmed":true}}}}]"#,
            "aa".repeat(32)
        );
        let utxos: Vec<Utxo> = serde_json::from_str(&json).unwrap();
        assert_eq!(utxos.len(), 1);
        assert_eq!(utxos[0].vout, 1);
        assert_eq!(utxos[0].value, 20_000);
        assert_eq!(utxos[0].txid.to_string(), "aa".repeat(32));
    }

    #[test]
    fn test_status_without_height() {
        let status: TxStatus = serde_json::from_str(r#"{"confirmed":false}"#).unwrap();
        assert!(!status.confirmed);
        assert_eq!(status.block_height, None);
    }
}
