use crate::config::network::{ESPLORA_API_BASE, REQUEST_TIMEOUT};
use crate::error::{GateError, GateResult};
use crate::services::broadcast::{BroadcastPort, TxStatus, Utxo};
use async_trait::async_trait;
use bitcoin::Txid;
use reqwest::Client;
use std::str::FromStr;

/// Client for an Esplora-compatible block explorer API (mempool.space, blockstream)
#[derive(Debug, Clone)]
pub struct EsploraClient {
    client: Client,
    api_base: String,
}

impl EsploraClient {
    /// Create a new explorer client against the default testnet endpoint
    pub fn new() -> GateResult<Self> {
        Self::with_base(ESPLORA_API_BASE)
    }

    /// Create a new explorer client against a specific API base
    pub fn with_base(api_base: &str) -> GateResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GateError::network(format!("client creation failed: {}", e)))?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }
}

#[async_trait]
impl BroadcastPort for EsploraClient {
    async fn fetch_utxos(&self, address: &str) -> GateResult<Vec<Utxo>> {
        let url = format!("{}/address/{}/utxo", self.api_base, address);
        log::debug!("Fetching UTXOs from {}", url);

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(GateError::network(format!(
                "HTTP {}: Failed to fetch UTXOs",
                response.status()
            )));
        }

        let utxos: Vec<Utxo> = response.json().await?;
        log::debug!("{} UTXOs found for {}", utxos.len(), address);
        Ok(utxos)
    }

    async fn broadcast(&self, signed_tx_hex: &str) -> GateResult<Txid> {
        let url = format!("{}/tx", self.api_base);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "text/plain")
            .body(signed_tx_hex.to_string())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(GateError::network(format!(
                "HTTP {}: broadcast rejected: {}",
                status,
                body.trim()
            )));
        }

        let txid = Txid::from_str(body.trim())
            .map_err(|e| GateError::serialization(format!("invalid txid in response: {}", e)))?;
        log::info!("Transaction broadcast: {}", txid);
        Ok(txid)
    }

    async fn transaction_status(&self, txid: &Txid) -> GateResult<TxStatus> {
        let url = format!("{}/tx/{}/status", self.api_base, txid);

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(GateError::network(format!(
                "HTTP {}: Failed to fetch transaction status",
                response.status()
            )));
        }

        Ok(response.json().await?)
    }
}
