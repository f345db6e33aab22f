//! # Action Entry Point
//!
//! Dispatches one JSON request to wallet creation or signing and writes
//! exactly one JSON response to the sink:
//!
//! ```text
//! success: { "response": <record | signed hex | txid> }
//! failure: { "error": { "kind": "Unauthorized", "message": "..." } }
//! ```
//!
//! Errors never escape [`ActionHandler::handle`]; whatever happens, the sink
//! receives one response.

use crate::authorization::{first_session_credential, SessionCredentials};
use crate::capabilities::ResponseSink;
use crate::error::{GateError, GateResult};
use crate::signing::{SignRequest, SigningGate};
use crate::transaction::SignatureHash;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A request addressed to the gate
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "method")]
pub enum ActionRequest {
    /// Generate and seal a fresh wallet for the delegated address
    #[serde(rename = "createWallet", rename_all = "camelCase")]
    CreateWallet {
        #[serde(alias = "pkpSessionSigs")]
        session_credentials: SessionCredentials,
    },
    /// Sign a prepared Taproot transaction
    #[serde(rename = "signTaprootTxn", rename_all = "camelCase")]
    SignTaprootTxn {
        #[serde(alias = "pkpSessionSigs")]
        session_credentials: SessionCredentials,
        ciphertext: String,
        #[serde(alias = "dataToEncryptHash")]
        ciphertext_hash: String,
        transaction_hex: String,
        sig_hash: SignatureHash,
        #[serde(default)]
        broadcast: bool,
        #[serde(default)]
        public_key: Option<String>,
    },
}

impl ActionRequest {
    pub fn method(&self) -> &'static str {
        match self {
            ActionRequest::CreateWallet { .. } => "createWallet",
            ActionRequest::SignTaprootTxn { .. } => "signTaprootTxn",
        }
    }
}

/// Success envelope
#[derive(Debug, Serialize)]
struct Success<T: Serialize> {
    response: T,
}

/// Runs action requests through a signing gate
pub struct ActionHandler {
    gate: SigningGate,
}

impl ActionHandler {
    pub fn new(gate: SigningGate) -> Self {
        Self { gate }
    }

    /// Parse a raw JSON request and handle it. Malformed input still yields
    /// one error response.
    pub async fn handle_json(&self, raw: &str, sink: &dyn ResponseSink) {
        match serde_json::from_str::<ActionRequest>(raw) {
            Ok(request) => self.handle(request, sink).await,
            Err(e) => {
                let error = GateError::serialization(format!("invalid action request: {}", e));
                sink.set_response(error_response(&error));
            }
        }
    }

    /// Handle one request and write its single response
    pub async fn handle(&self, request: ActionRequest, sink: &dyn ResponseSink) {
        let method = request.method();
        log::debug!("Handling action {}", method);

        let response = match self.dispatch(request).await {
            Ok(value) => success_response(&value),
            Err(error) if error.is_authorization_failure() => {
                log::warn!("Action {} refused: {}", method, error);
                error_response(&error)
            }
            Err(error) => {
                log::warn!("Action {} failed: {} ({})", method, error, error.kind());
                error_response(&error)
            }
        };
        sink.set_response(response);
    }

    async fn dispatch(&self, request: ActionRequest) -> GateResult<Value> {
        // Fresh gate per request: every request re-runs authorization
        let mut gate = self.gate.clone();

        match request {
            ActionRequest::CreateWallet {
                session_credentials,
            } => {
                let credential = first_session_credential(&session_credentials)?;
                let record = gate.create_wallet(credential).await?;
                Ok(serde_json::to_value(record)?)
            }
            ActionRequest::SignTaprootTxn {
                session_credentials,
                ciphertext,
                ciphertext_hash,
                transaction_hex,
                sig_hash,
                broadcast,
                public_key,
            } => {
                let credential = first_session_credential(&session_credentials)?;
                let request = SignRequest {
                    ciphertext,
                    ciphertext_hash,
                    transaction_hex,
                    sig_hash,
                    broadcast,
                    public_key,
                };
                let signed = gate.sign(credential, &request).await?;
                Ok(Value::String(signed.response_value()))
            }
        }
    }
}

fn success_response(value: &Value) -> String {
    serde_json::to_string(&Success { response: value })
        .unwrap_or_else(|_| json!({ "response": Value::Null }).to_string())
}

fn error_response(error: &GateError) -> String {
    json!({ "error": error.to_failure() }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{LocalKeyNetwork, MemorySink, Secp256k1Signer};
    use crate::key_material::{EncryptedWalletRecord, KeyMaterialStore};
    use crate::transaction::TaprootTransactionBuilder;
    use crate::services::Utxo;
    use bitcoin::{Network, Txid};
    use std::str::FromStr;
    use std::sync::Arc;

    const OWNER: &str = "0x1111111111111111111111111111111111111111";
    const DESTINATION: &str = "tb1pfgj62z9zdc3mm4we7lhhq06lgvmyalxfac7q7vk4u6qw4rgx49kq2hheus";

    fn handler_as(network: &Arc<LocalKeyNetwork>, identity: &str) -> ActionHandler {
        let store = KeyMaterialStore::from_network(network.session(identity));
        ActionHandler::new(SigningGate::new(store, Arc::new(Secp256k1Signer::new())))
    }

    fn session_sigs(address: &str) -> Value {
        let signed_message = json!({
            "capabilities": [
                { "sig": "", "derivedVia": "lit.bls", "signedMessage": "", "address": address, "algo": "LIT_BLS" }
            ]
        })
        .to_string();
        json!({
            "https://node-a": { "sig": "00", "derivedVia": "litSessionSignViaNacl", "signedMessage": signed_message, "address": "", "algo": "ed25519" }
        })
    }

    fn parse(response: &str) -> Value {
        serde_json::from_str(response).unwrap()
    }

    #[tokio::test]
    async fn test_create_then_sign_through_json() {
        let network = LocalKeyNetwork::new();
        let handler = handler_as(&network, OWNER);
        let sink = MemorySink::new();

        let create = json!({ "method": "createWallet", "pkpSessionSigs": session_sigs(OWNER) });
        handler.handle_json(&create.to_string(), &sink).await;
        let response = parse(&sink.last().unwrap());
        let record: EncryptedWalletRecord = serde_json::from_value(response["response"].clone()).unwrap();

        let utxo = Utxo {
            txid: Txid::from_str(&"aa".repeat(32)).unwrap(),
            vout: 0,
            value: 10_000,
        };
        let unsigned = TaprootTransactionBuilder::new(Network::Testnet)
            .build_unsigned(&record.public_key, DESTINATION, 10_000, 1_000, &[utxo])
            .unwrap();

        let sign = json!({
            "method": "signTaprootTxn",
            "pkpSessionSigs": session_sigs(OWNER),
            "ciphertext": record.ciphertext,
            "dataToEncryptHash": record.ciphertext_hash,
            "transactionHex": unsigned.to_hex(),
            "sigHash": unsigned.sig_hash.to_hex(),
            "broadcast": false
        });
        handler.handle_json(&sign.to_string(), &sink).await;

        assert_eq!(sink.responses().len(), 2);
        let response = parse(&sink.last().unwrap());
        let signed_hex = response["response"].as_str().unwrap();
        let signed = crate::transaction::decode_hex(signed_hex).unwrap();
        assert_eq!(signed.input[0].witness.len(), 1);
    }

    #[tokio::test]
    async fn test_unauthorized_caller_gets_error_envelope() {
        let network = LocalKeyNetwork::new();
        let sink = MemorySink::new();

        let create = json!({ "method": "createWallet", "pkpSessionSigs": session_sigs(OWNER) });
        handler_as(&network, OWNER).handle_json(&create.to_string(), &sink).await;
        let record: EncryptedWalletRecord =
            serde_json::from_value(parse(&sink.last().unwrap())["response"].clone()).unwrap();

        let sign = json!({
            "method": "signTaprootTxn",
            "pkpSessionSigs": session_sigs(OWNER),
            "ciphertext": record.ciphertext,
            "ciphertextHash": record.ciphertext_hash,
            "transactionHex": "00",
            "sigHash": "11".repeat(32)
        });
        let intruder = handler_as(&network, "0x2222222222222222222222222222222222222222");
        intruder.handle_json(&sign.to_string(), &sink).await;

        let response = parse(&sink.last().unwrap());
        assert!(response.get("response").is_none());
        assert_eq!(response["error"]["kind"], "SerializationError");

        // Well-formed transaction: the refusal comes from the key network
        let unsigned = TaprootTransactionBuilder::new(Network::Testnet)
            .build_unsigned(
                &record.public_key,
                DESTINATION,
                10_000,
                1_000,
                &[Utxo {
                    txid: Txid::from_str(&"aa".repeat(32)).unwrap(),
                    vout: 0,
                    value: 10_000,
                }],
            )
            .unwrap();
        let mut sign = sign;
        sign["transactionHex"] = Value::String(unsigned.to_hex());
        intruder.handle_json(&sign.to_string(), &sink).await;

        let response = parse(&sink.last().unwrap());
        assert_eq!(response["error"]["kind"], "Unauthorized");
        assert_eq!(sink.responses().len(), 3);
    }

    #[tokio::test]
    async fn test_missing_session_credentials() {
        let network = LocalKeyNetwork::new();
        let sink = MemorySink::new();
        let create = json!({ "method": "createWallet", "pkpSessionSigs": {} });
        handler_as(&network, OWNER).handle_json(&create.to_string(), &sink).await;

        let response = parse(&sink.last().unwrap());
        assert_eq!(response["error"]["kind"], "NoSessionCredential");
    }

    #[tokio::test]
    async fn test_malformed_request_yields_one_error() {
        let network = LocalKeyNetwork::new();
        let sink = MemorySink::new();
        let handler = handler_as(&network, OWNER);

        handler.handle_json("not json", &sink).await;
        handler.handle_json(r#"{"method":"launchRockets"}"#, &sink).await;

        let responses = sink.responses();
        assert_eq!(responses.len(), 2);
        for response in responses {
            assert_eq!(parse(&response)["error"]["kind"], "SerializationError");
        }
    }

    #[test]
    fn test_request_method_names() {
        let request: ActionRequest =
            serde_json::from_value(json!({ "method": "createWallet", "sessionCredentials": {} })).unwrap();
        assert_eq!(request.method(), "createWallet");
    }
}
