//! # Signing Gate
//!
//! Runs one request at a time through
//!
//! ```text
//! Idle -> Authorizing -> Decrypting -> Signing -> Done
//!   \__________\_____________\___________\_____-> Failed
//! ```
//!
//! The wallet secret exists only between `Decrypting` and `Signing`. It is a
//! [`SecretScalar`](crate::key_material::SecretScalar) local to
//! [`SigningGate::sign`], dropped (and wiped) as soon as the signature is
//! produced or any step fails.

use crate::authorization::{AccessControlAuthorizer, SessionCredential};
use crate::capabilities::SignCapability;
use crate::config::GateConfig;
use crate::error::{GateError, GateResult};
use crate::key_material::{EncryptedWalletRecord, KeyMaterialStore, KeyPair, SecretScalar};
use crate::services::BroadcastPort;
use crate::transaction::{attach_key_path_signature, decode_hex, encode_hex, SignatureHash};
use crate::utils::hex_string;
use bitcoin::secp256k1::PublicKey;
use bitcoin::{Transaction, Txid};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Position of the gate in its request pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Idle,
    Authorizing,
    Decrypting,
    Signing,
    Done,
    Failed,
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GateState::Idle => "idle",
            GateState::Authorizing => "authorizing",
            GateState::Decrypting => "decrypting",
            GateState::Signing => "signing",
            GateState::Done => "done",
            GateState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Parameters of a signing request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignRequest {
    /// Wallet ciphertext, hex
    pub ciphertext: String,
    /// SHA-256 of the ciphertext, hex
    #[serde(alias = "dataToEncryptHash")]
    pub ciphertext_hash: String,
    /// Unsigned transaction, wire hex
    pub transaction_hex: String,
    /// Signature hash computed by the transaction builder
    pub sig_hash: SignatureHash,
    /// Submit the signed transaction through the broadcast port
    #[serde(default)]
    pub broadcast: bool,
    /// Wallet public key, used only when the decrypted-key check is enabled
    #[serde(default)]
    pub public_key: Option<String>,
}

/// Result of a completed signing request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub transaction: Transaction,
    pub hex: String,
    pub txid: Txid,
    /// Set when the transaction was broadcast
    pub broadcast_txid: Option<Txid>,
}

impl SignedTransaction {
    /// What the caller receives: the broadcast txid, or the signed hex
    pub fn response_value(&self) -> String {
        match self.broadcast_txid {
            Some(txid) => txid.to_string(),
            None => self.hex.clone(),
        }
    }
}

/// Authorize, decrypt, sign, assemble.
#[derive(Clone)]
pub struct SigningGate {
    authorizer: AccessControlAuthorizer,
    store: KeyMaterialStore,
    signer: Arc<dyn SignCapability>,
    port: Option<Arc<dyn BroadcastPort>>,
    verify_decrypted_key: bool,
    state: GateState,
}

impl SigningGate {
    pub fn new(store: KeyMaterialStore, signer: Arc<dyn SignCapability>) -> Self {
        Self {
            authorizer: AccessControlAuthorizer::default(),
            store,
            signer,
            port: None,
            verify_decrypted_key: false,
            state: GateState::Idle,
        }
    }

    /// Apply the authorization and key-check settings of a configuration
    pub fn with_config(mut self, config: &GateConfig) -> Self {
        self.authorizer = AccessControlAuthorizer::new(config.delegation_algorithm.clone());
        self.verify_decrypted_key = config.verify_decrypted_key;
        self
    }

    pub fn with_broadcast_port(mut self, port: Arc<dyn BroadcastPort>) -> Self {
        self.port = Some(port);
        self
    }

    /// Check that the decrypted scalar belongs to the request's public key
    pub fn with_key_check(mut self, enabled: bool) -> Self {
        self.verify_decrypted_key = enabled;
        self
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    fn transition(&mut self, next: GateState) {
        log::debug!("Signing gate: {} -> {}", self.state, next);
        self.state = next;
    }

    fn fail(&mut self, error: &GateError) {
        log::warn!("Signing gate failed while {}: {}", self.state, error);
        self.transition(GateState::Failed);
    }

    /// Wallet creation: authorize the requester, generate a key pair and seal
    /// its scalar under the requester's condition.
    pub async fn create_wallet(
        &mut self,
        credential: &SessionCredential,
    ) -> GateResult<EncryptedWalletRecord> {
        self.state = GateState::Idle;
        match self.run_create_wallet(credential).await {
            Ok(record) => {
                self.transition(GateState::Done);
                log::info!("Wallet created for public key {}", record.public_key);
                Ok(record)
            }
            Err(error) => {
                self.fail(&error);
                Err(error)
            }
        }
    }

    async fn run_create_wallet(
        &mut self,
        credential: &SessionCredential,
    ) -> GateResult<EncryptedWalletRecord> {
        self.transition(GateState::Authorizing);
        let condition = self.authorizer.authorize(credential)?;

        let key_pair = KeyPair::generate()?;
        self.store.seal(&key_pair, &condition).await
    }

    /// Signing: authorize, decrypt the wallet scalar, sign the supplied
    /// sighash and attach the signature to input 0.
    pub async fn sign(
        &mut self,
        credential: &SessionCredential,
        request: &SignRequest,
    ) -> GateResult<SignedTransaction> {
        self.state = GateState::Idle;
        match self.run_sign(credential, request).await {
            Ok(signed) => {
                self.transition(GateState::Done);
                log::info!("Signed transaction {}", signed.txid);
                Ok(signed)
            }
            Err(error) => {
                self.fail(&error);
                Err(error)
            }
        }
    }

    async fn run_sign(
        &mut self,
        credential: &SessionCredential,
        request: &SignRequest,
    ) -> GateResult<SignedTransaction> {
        self.transition(GateState::Authorizing);
        let condition = self.authorizer.authorize(credential)?;
        let mut transaction = decode_hex(&request.transaction_hex)?;
        if transaction.input.is_empty() {
            return Err(GateError::serialization("transaction has no inputs"));
        }

        self.transition(GateState::Decrypting);
        let secret = self
            .store
            .unseal(&condition, &request.ciphertext, &request.ciphertext_hash)
            .await?;
        if self.verify_decrypted_key {
            check_decrypted_key(&secret, request.public_key.as_deref())?;
        }

        self.transition(GateState::Signing);
        let signature = self.signer.sign_schnorr(&request.sig_hash, &secret).await;
        drop(secret);
        let signature = signature?;

        attach_key_path_signature(&mut transaction, 0, &signature)?;
        let hex = encode_hex(&transaction);
        let txid = transaction.compute_txid();

        let broadcast_txid = if request.broadcast {
            let port = self.port.as_ref().ok_or_else(|| GateError::Configuration {
                message: "broadcast requested but no broadcast port configured".to_string(),
            })?;
            Some(port.broadcast(&hex).await?)
        } else {
            None
        };

        Ok(SignedTransaction {
            transaction,
            hex,
            txid,
            broadcast_txid,
        })
    }
}

/// Compare the key behind the decrypted scalar with the expected public key
fn check_decrypted_key(secret: &SecretScalar, expected: Option<&str>) -> GateResult<()> {
    let expected = match expected {
        Some(expected) => expected,
        None => {
            log::warn!("Decrypted-key check enabled but request carries no public key");
            return Ok(());
        }
    };

    let bytes = hex_string::decode(expected)
        .map_err(|_| GateError::invalid_public_key("public key is not valid hex"))?;
    let expected = PublicKey::from_slice(&bytes)
        .map_err(|e| GateError::invalid_public_key(e.to_string()))?;

    if secret.public_key()? != expected {
        return Err(GateError::KeyMismatch);
    }
    Ok(())
}
