use crate::config::GateConfig;
use crate::error::{GateError, GateResult};
use crate::services::broadcast::{BroadcastPort, TxStatus, Utxo};
use async_trait::async_trait;
use bitcoin::{Amount, BlockHash, Txid};
use bitcoincore_rpc::{Auth, Client, RpcApi};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;

/// BroadcastPort backed by a bitcoind node over JSON-RPC.
///
/// UTXOs come from `scantxoutset`, so the node needs no wallet and no prior
/// knowledge of the address.
#[derive(Clone)]
pub struct BitcoindClient {
    client: Arc<Client>,
}

impl BitcoindClient {
    /// Create a new RPC client from configuration
    pub fn new(config: &GateConfig) -> GateResult<Self> {
        let auth = Auth::UserPass(config.rpc_user.clone(), config.rpc_password.clone());
        let client = Client::new(&config.rpc_url(), auth)?;

        Ok(Self {
            client: Arc::new(client),
        })
    }

    async fn call<T, F>(&self, op: F) -> GateResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Client) -> GateResult<T> + Send + 'static,
    {
        let client = Arc::clone(&self.client);
        tokio::task::spawn_blocking(move || op(&client))
            .await
            .map_err(|e| GateError::network(format!("RPC task failed: {}", e)))?
    }
}

/// Convert `scantxoutset` unspents into UTXOs
fn parse_scan_result(result: &Value) -> GateResult<Vec<Utxo>> {
    let unspents = match result.get("unspents").and_then(Value::as_array) {
        Some(unspents) => unspents,
        None => return Ok(Vec::new()),
    };

    unspents
        .iter()
        .map(|entry| {
            let txid = entry["txid"]
                .as_str()
                .ok_or_else(|| GateError::serialization("unspent without txid"))?;
            let vout = entry["vout"]
                .as_u64()
                .ok_or_else(|| GateError::serialization("unspent without vout"))?;
            let amount = entry["amount"]
                .as_f64()
                .ok_or_else(|| GateError::serialization("unspent without amount"))?;

            let vout = u32::try_from(vout)
                .map_err(|_| GateError::serialization(format!("vout {} out of range", vout)))?;

            Ok(Utxo {
                txid: Txid::from_str(txid)
                    .map_err(|e| GateError::serialization(e.to_string()))?,
                vout,
                value: Amount::from_btc(amount)
                    .map_err(|e| GateError::serialization(e.to_string()))?
                    .to_sat(),
            })
        })
        .collect()
}

/// Confirmation count and containing block of a verbose `getrawtransaction`
fn parse_confirmation(info: &Value) -> GateResult<(u64, Option<BlockHash>)> {
    let confirmations = info["confirmations"].as_u64().unwrap_or(0);
    let block_hash = match info.get("blockhash").and_then(Value::as_str) {
        Some(hash) => Some(
            BlockHash::from_str(hash).map_err(|e| GateError::serialization(e.to_string()))?,
        ),
        None => None,
    };
    Ok((confirmations, block_hash))
}

#[async_trait]
impl BroadcastPort for BitcoindClient {
    async fn fetch_utxos(&self, address: &str) -> GateResult<Vec<Utxo>> {
        let descriptor = format!("addr({})", address);
        let result = self
            .call(move |client| {
                Ok(client.call::<Value>(
                    "scantxoutset",
                    &["start".into(), serde_json::json!([descriptor])],
                )?)
            })
            .await?;
        parse_scan_result(&result)
    }

    async fn broadcast(&self, signed_tx_hex: &str) -> GateResult<Txid> {
        let tx_hex = signed_tx_hex.to_string();
        let txid = self
            .call(move |client| Ok(client.send_raw_transaction(tx_hex.as_str())?))
            .await?;
        log::info!("Transaction broadcast via RPC: {}", txid);
        Ok(txid)
    }

    async fn transaction_status(&self, txid: &Txid) -> GateResult<TxStatus> {
        let txid = *txid;
        let info = self
            .call(move |client| {
                Ok(client.call::<Value>(
                    "getrawtransaction",
                    &[txid.to_string().into(), true.into()],
                )?)
            })
            .await?;

        let (confirmations, block_hash) = parse_confirmation(&info)?;
        let block_height = match block_hash {
            Some(hash) if confirmations > 0 => {
                let header = self
                    .call(move |client| Ok(client.get_block_header_info(&hash)?))
                    .await?;
                let height = u32::try_from(header.height).map_err(|_| {
                    GateError::serialization(format!("block height {} out of range", header.height))
                })?;
                Some(height)
            }
            _ => None,
        };

        Ok(TxStatus {
            confirmed: confirmations > 0,
            block_height,
        })
    }
}
