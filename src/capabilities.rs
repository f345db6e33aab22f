//! # Capability Interfaces
//!
//! Everything the gate needs from its host is passed in explicitly:
//!
//! - [`EncryptCapability`] / [`DecryptCapability`]: the threshold key network
//! - [`SignCapability`]: BIP-340 Schnorr signing over a 32-byte digest
//! - [`ResponseSink`]: where the single response of a request is written
//!
//! [`Secp256k1Signer`] signs locally with libsecp256k1. [`LocalKeyNetwork`]
//! is an in-process stand-in for the key network (AES-256-GCM with the
//! access-control condition bound as associated data), used by the CLI and
//! by tests.

use crate::authorization::AccessControlCondition;
use crate::error::{GateError, GateResult};
use crate::key_material::{ciphertext_hash, EncryptedPayload, SecretScalar};
use crate::transaction::SignatureHash;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;
use bitcoin::secp256k1::{All, Keypair, Message, Secp256k1};
use std::sync::{Arc, Mutex};
use zeroize::Zeroizing;

/// AES-GCM nonce length in bytes
const NONCE_LEN: usize = 12;

/// One decryption request: exactly one condition per call
#[derive(Debug, Clone, Copy)]
pub struct DecryptRequest<'a> {
    pub condition: &'a AccessControlCondition,
    pub ciphertext: &'a [u8],
    pub ciphertext_hash: &'a [u8; 32],
}

/// Encrypts data so that only callers satisfying `condition` can decrypt it
#[async_trait]
pub trait EncryptCapability: Send + Sync {
    async fn encrypt(
        &self,
        condition: &AccessControlCondition,
        plaintext: &[u8],
    ) -> GateResult<EncryptedPayload>;
}

/// Releases plaintext when the authenticated caller satisfies the condition.
///
/// Implementations return `GateError::Unauthorized` on refusal and never
/// return partial plaintext.
#[async_trait]
pub trait DecryptCapability: Send + Sync {
    async fn decrypt(&self, request: DecryptRequest<'_>) -> GateResult<Zeroizing<Vec<u8>>>;
}

/// BIP-340 Schnorr signing over a precomputed digest
#[async_trait]
pub trait SignCapability: Send + Sync {
    async fn sign_schnorr(&self, digest: &SignatureHash, secret: &SecretScalar) -> GateResult<[u8; 64]>;
}

/// Destination of the one response a request produces
pub trait ResponseSink: Send + Sync {
    fn set_response(&self, response: String);
}

/// Signs with libsecp256k1 in-process
pub struct Secp256k1Signer {
    secp: Secp256k1<All>,
}

impl Secp256k1Signer {
    pub fn new() -> Self {
        Self {
            secp: Secp256k1::new(),
        }
    }
}

impl Default for Secp256k1Signer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SignCapability for Secp256k1Signer {
    async fn sign_schnorr(&self, digest: &SignatureHash, secret: &SecretScalar) -> GateResult<[u8; 64]> {
        let mut secret_key = secret.secret_key()?;
        let mut keypair = Keypair::from_secret_key(&self.secp, &secret_key);
        secret_key.non_secure_erase();

        let message = Message::from_digest(*digest.as_bytes());
        let signature = self.secp.sign_schnorr(&message, &keypair);
        keypair.non_secure_erase();

        Ok(signature.serialize())
    }
}

/// Collects responses in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    responses: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All responses written so far
    pub fn responses(&self) -> Vec<String> {
        self.responses
            .lock()
            .map(|responses| responses.clone())
            .unwrap_or_default()
    }

    /// Most recent response
    pub fn last(&self) -> Option<String> {
        self.responses().pop()
    }
}

impl ResponseSink for MemorySink {
    fn set_response(&self, response: String) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push(response);
        }
    }
}

/// Prints each response on its own line
#[derive(Debug, Default)]
pub struct StdoutSink;

impl ResponseSink for StdoutSink {
    fn set_response(&self, response: String) {
        println!("{}", response);
    }
}

/// In-process key network holding one AES-256-GCM master key.
///
/// Ciphertext layout: `nonce (12 bytes) || ciphertext + auth_tag`, with the
/// serialized access-control condition as associated data. A ciphertext can
/// therefore only be opened under the exact condition it was sealed with.
pub struct LocalKeyNetwork {
    cipher: Aes256Gcm,
}

impl LocalKeyNetwork {
    /// Create a network with a fresh random master key
    pub fn new() -> Arc<Self> {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        Arc::new(Self {
            cipher: Aes256Gcm::new(&key),
        })
    }

    /// Create a network around an existing 32-byte master key
    pub fn from_key(key: &[u8]) -> GateResult<Arc<Self>> {
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| GateError::Configuration {
            message: "key network master key must be 32 bytes".to_string(),
        })?;
        Ok(Arc::new(Self { cipher }))
    }

    /// A session on this network authenticated as `identity`
    pub fn session(self: &Arc<Self>, identity: impl Into<String>) -> Arc<LocalKeySession> {
        Arc::new(LocalKeySession {
            network: Arc::clone(self),
            identity: identity.into(),
        })
    }

    fn seal(&self, condition: &AccessControlCondition, plaintext: &[u8]) -> GateResult<EncryptedPayload> {
        let aad = condition.canonical_bytes()?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, Payload { msg: plaintext, aad: &aad })
            .map_err(|_| GateError::serialization("encryption failed"))?;

        let mut ciphertext = Vec::with_capacity(NONCE_LEN + sealed.len());
        ciphertext.extend_from_slice(&nonce);
        ciphertext.extend_from_slice(&sealed);

        Ok(EncryptedPayload {
            ciphertext_hash: ciphertext_hash(&ciphertext),
            ciphertext,
        })
    }

    fn open(&self, identity: &str, request: DecryptRequest<'_>) -> GateResult<Zeroizing<Vec<u8>>> {
        if ciphertext_hash(request.ciphertext) != *request.ciphertext_hash {
            return Err(GateError::IntegrityCheck);
        }
        if !request.condition.is_satisfied_by(identity) {
            return Err(GateError::Unauthorized);
        }
        if request.ciphertext.len() < NONCE_LEN {
            return Err(GateError::Unauthorized);
        }

        let (nonce, sealed) = request.ciphertext.split_at(NONCE_LEN);
        let aad = request.condition.canonical_bytes()?;
        self.cipher
            .decrypt(Nonce::from_slice(nonce), Payload { msg: sealed, aad: &aad })
            .map(Zeroizing::new)
            .map_err(|_| GateError::Unauthorized)
    }
}

/// A caller's authenticated view of a [`LocalKeyNetwork`]
pub struct LocalKeySession {
    network: Arc<LocalKeyNetwork>,
    identity: String,
}

impl LocalKeySession {
    pub fn identity(&self) -> &str {
        &self.identity
    }
}

#[async_trait]
impl EncryptCapability for LocalKeySession {
    async fn encrypt(
        &self,
        condition: &AccessControlCondition,
        plaintext: &[u8],
    ) -> GateResult<EncryptedPayload> {
        self.network.seal(condition, plaintext)
    }
}

#[async_trait]
impl DecryptCapability for LocalKeySession {
    async fn decrypt(&self, request: DecryptRequest<'_>) -> GateResult<Zeroizing<Vec<u8>>> {
        let result = self.network.open(&self.identity, request);
        if result.is_err() {
            log::warn!("Decryption refused for {}", self.identity);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authorization::AccessControlAuthorizer;
    use bitcoin::secp256k1::schnorr::Signature;

    const OWNER: &str = "0x1111111111111111111111111111111111111111";
    const OTHER: &str = "0x2222222222222222222222222222222222222222";

    fn condition_for(address: &str) -> AccessControlCondition {
        AccessControlAuthorizer::default()
            .build_access_control_condition(address)
            .unwrap()
    }

    #[tokio::test]
    async fn test_sign_schnorr_verifies() {
        let secret = SecretScalar::from_bytes([0x19; 32]).unwrap();
        let digest = SignatureHash::from_bytes([0x42; 32]);
        let signature = Secp256k1Signer::new().sign_schnorr(&digest, &secret).await.unwrap();

        let secp = Secp256k1::verification_only();
        let (x_only, _) = secret.public_key().unwrap().x_only_public_key();
        let signature = Signature::from_slice(&signature).unwrap();
        let message = Message::from_digest([0x42; 32]);
        assert!(secp.verify_schnorr(&signature, &message, &x_only).is_ok());
    }

    #[tokio::test]
    async fn test_local_network_round_trip() {
        let network = LocalKeyNetwork::new();
        let session = network.session(OWNER);
        let condition = condition_for(OWNER);

        let payload = session.encrypt(&condition, b"0xsecret").await.unwrap();
        let plaintext = session
            .decrypt(DecryptRequest {
                condition: &condition,
                ciphertext: &payload.ciphertext,
                ciphertext_hash: &payload.ciphertext_hash,
            })
            .await
            .unwrap();
        assert_eq!(plaintext.as_slice(), b"0xsecret");
    }

    #[tokio::test]
    async fn test_wrong_identity_is_unauthorized() {
        let network = LocalKeyNetwork::new();
        let condition = condition_for(OWNER);
        let payload = network.session(OWNER).encrypt(&condition, b"0xsecret").await.unwrap();

        let result = network
            .session(OTHER)
            .decrypt(DecryptRequest {
                condition: &condition,
                ciphertext: &payload.ciphertext,
                ciphertext_hash: &payload.ciphertext_hash,
            })
            .await;
        assert!(matches!(result, Err(GateError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_condition_is_bound_to_ciphertext() {
        let network = LocalKeyNetwork::new();
        let payload = network
            .session(OWNER)
            .encrypt(&condition_for(OWNER), b"0xsecret")
            .await
            .unwrap();

        // Other caller presenting a condition naming itself
        let other_condition = condition_for(OTHER);
        let result = network
            .session(OTHER)
            .decrypt(DecryptRequest {
                condition: &other_condition,
                ciphertext: &payload.ciphertext,
                ciphertext_hash: &payload.ciphertext_hash,
            })
            .await;
        assert!(matches!(result, Err(GateError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_hash_mismatch() {
        let network = LocalKeyNetwork::new();
        let condition = condition_for(OWNER);
        let session = network.session(OWNER);
        let payload = session.encrypt(&condition, b"0xsecret").await.unwrap();

        let result = session
            .decrypt(DecryptRequest {
                condition: &condition,
                ciphertext: &payload.ciphertext,
                ciphertext_hash: &[0u8; 32],
            })
            .await;
        assert!(matches!(result, Err(GateError::IntegrityCheck)));
    }

    #[tokio::test]
    async fn test_networks_do_not_share_keys() {
        let condition = condition_for(OWNER);
        let payload = LocalKeyNetwork::new()
            .session(OWNER)
            .encrypt(&condition, b"0xsecret")
            .await
            .unwrap();

        let result = LocalKeyNetwork::new()
            .session(OWNER)
            .decrypt(DecryptRequest {
                condition: &condition,
                ciphertext: &payload.ciphertext,
                ciphertext_hash: &payload.ciphertext_hash,
            })
            .await;
        assert!(matches!(result, Err(GateError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_shared_master_key() {
        let condition = condition_for(OWNER);
        let payload = LocalKeyNetwork::from_key(&[7u8; 32])
            .unwrap()
            .session(OWNER)
            .encrypt(&condition, b"0xsecret")
            .await
            .unwrap();

        let plaintext = LocalKeyNetwork::from_key(&[7u8; 32])
            .unwrap()
            .session(OWNER)
            .decrypt(DecryptRequest {
                condition: &condition,
                ciphertext: &payload.ciphertext,
                ciphertext_hash: &payload.ciphertext_hash,
            })
            .await
            .unwrap();
        assert_eq!(plaintext.as_slice(), b"0xsecret");
        assert!(LocalKeyNetwork::from_key(&[7u8; 16]).is_err());
    }

    #[test]
    fn test_memory_sink() {
        let sink = MemorySink::new();
        assert_eq!(sink.last(), None);
        sink.set_response("one".to_string());
        sink.set_response("two".to_string());
        assert_eq!(sink.responses(), vec!["one", "two"]);
        assert_eq!(sink.last().as_deref(), Some("two"));
    }
}
