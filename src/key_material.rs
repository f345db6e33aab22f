//! # Wallet Key Material
//!
//! The wallet's private scalar only ever exists in two forms: sealed inside an
//! [`EncryptedWalletRecord`] under an access-control condition, or briefly in a
//! [`SecretScalar`] that wipes itself when dropped. Records are returned to the
//! caller for storage; nothing here persists them.

use crate::authorization::AccessControlCondition;
use crate::capabilities::{DecryptCapability, DecryptRequest, EncryptCapability};
use crate::config::wallet::{HEX_PREFIX, SECRET_SCALAR_LEN};
use crate::error::{GateError, GateResult};
use crate::utils::hex_string;
use bitcoin::secp256k1::{rand, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// A wallet private scalar. Wiped on drop, never printed, never cloned.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretScalar {
    bytes: [u8; SECRET_SCALAR_LEN],
}

impl SecretScalar {
    /// Wrap raw scalar bytes, rejecting zero and values outside the curve order
    pub fn from_bytes(mut bytes: [u8; SECRET_SCALAR_LEN]) -> GateResult<Self> {
        let valid = SecretKey::from_slice(&bytes).map(|mut key| key.non_secure_erase());
        if valid.is_err() {
            bytes.zeroize();
            return Err(GateError::InvalidSecret);
        }
        Ok(Self { bytes })
    }

    /// Parse a decrypted plaintext: hex scalar, optionally `0x`-prefixed.
    ///
    /// Errors never include any part of the plaintext.
    pub fn from_plaintext(plaintext: &[u8]) -> GateResult<Self> {
        let text = std::str::from_utf8(plaintext).map_err(|_| GateError::InvalidSecret)?;
        let decoded = Zeroizing::new(
            hex::decode(hex_string::strip_prefix(text.trim())).map_err(|_| GateError::InvalidSecret)?,
        );
        if decoded.len() != SECRET_SCALAR_LEN {
            return Err(GateError::InvalidSecret);
        }
        let mut bytes = Zeroizing::new([0u8; SECRET_SCALAR_LEN]);
        bytes.copy_from_slice(&decoded);
        Self::from_bytes(*bytes)
    }

    /// `0x`-prefixed hex form, the plaintext that gets encrypted
    pub fn to_plaintext(&self) -> Zeroizing<String> {
        let mut encoded = Zeroizing::new(hex::encode(self.bytes));
        let mut plaintext = Zeroizing::new(String::with_capacity(HEX_PREFIX.len() + encoded.len()));
        plaintext.push_str(HEX_PREFIX);
        plaintext.push_str(&encoded);
        encoded.zeroize();
        plaintext
    }

    /// libsecp256k1 key for a single signing operation. Callers must erase it.
    pub(crate) fn secret_key(&self) -> GateResult<SecretKey> {
        SecretKey::from_slice(&self.bytes).map_err(|_| GateError::InvalidSecret)
    }

    /// Compressed public key matching this scalar
    pub fn public_key(&self) -> GateResult<PublicKey> {
        let secp = Secp256k1::signing_only();
        let mut secret_key = self.secret_key()?;
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        secret_key.non_secure_erase();
        Ok(public_key)
    }
}

impl fmt::Debug for SecretScalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretScalar(<redacted>)")
    }
}

/// A freshly generated wallet key
#[derive(Debug)]
pub struct KeyPair {
    pub public_key: PublicKey,
    secret: SecretScalar,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> GateResult<Self> {
        let secp = Secp256k1::new();
        let mut secret_key = SecretKey::new(&mut rand::thread_rng());
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        let secret = SecretScalar::from_bytes(secret_key.secret_bytes());
        secret_key.non_secure_erase();

        Ok(Self {
            public_key,
            secret: secret?,
        })
    }

    pub fn secret(&self) -> &SecretScalar {
        &self.secret
    }

    /// Compressed public key as hex (33 bytes)
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key.serialize())
    }
}

/// Ciphertext plus hash as produced by an encrypt capability
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    pub ciphertext: Vec<u8>,
    pub ciphertext_hash: [u8; 32],
}

/// Content hash recorded alongside every ciphertext
pub fn ciphertext_hash(ciphertext: &[u8]) -> [u8; 32] {
    Sha256::digest(ciphertext).into()
}

/// Encrypted wallet handed back to the caller at creation time.
///
/// ```json
/// { "publicKey": "02..", "ciphertext": "..", "ciphertextHash": ".." }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedWalletRecord {
    /// Compressed public key, hex
    pub public_key: String,
    /// Opaque ciphertext, hex
    pub ciphertext: String,
    /// SHA-256 of the ciphertext bytes, hex
    #[serde(alias = "dataToEncryptHash")]
    pub ciphertext_hash: String,
}

impl EncryptedWalletRecord {
    pub fn new(public_key: &PublicKey, payload: &EncryptedPayload) -> Self {
        Self {
            public_key: hex::encode(public_key.serialize()),
            ciphertext: hex::encode(&payload.ciphertext),
            ciphertext_hash: hex::encode(payload.ciphertext_hash),
        }
    }

    /// Decode the ciphertext and check it against the recorded hash
    pub fn verified_payload(&self) -> GateResult<EncryptedPayload> {
        verified_payload(&self.ciphertext, &self.ciphertext_hash)
    }
}

/// Decode hex ciphertext and hash, failing with `IntegrityCheck` on mismatch
pub fn verified_payload(ciphertext_hex: &str, ciphertext_hash_hex: &str) -> GateResult<EncryptedPayload> {
    let ciphertext = hex_string::decode(ciphertext_hex)?;
    let expected = hex_string::decode_32(ciphertext_hash_hex)?;

    if ciphertext_hash(&ciphertext) != expected {
        return Err(GateError::IntegrityCheck);
    }

    Ok(EncryptedPayload {
        ciphertext,
        ciphertext_hash: expected,
    })
}

/// Seals and unseals wallet secrets through the key network's capabilities.
#[derive(Clone)]
pub struct KeyMaterialStore {
    encryptor: Arc<dyn EncryptCapability>,
    decryptor: Arc<dyn DecryptCapability>,
}

impl KeyMaterialStore {
    pub fn new(encryptor: Arc<dyn EncryptCapability>, decryptor: Arc<dyn DecryptCapability>) -> Self {
        Self {
            encryptor,
            decryptor,
        }
    }

    /// Use one object for both capabilities
    pub fn from_network<N>(network: Arc<N>) -> Self
    where
        N: EncryptCapability + DecryptCapability + 'static,
    {
        Self {
            encryptor: network.clone(),
            decryptor: network,
        }
    }

    /// Encrypt the key pair's scalar under `condition`
    pub async fn seal(
        &self,
        key_pair: &KeyPair,
        condition: &AccessControlCondition,
    ) -> GateResult<EncryptedWalletRecord> {
        let plaintext = key_pair.secret().to_plaintext();
        let payload = self
            .encryptor
            .encrypt(condition, plaintext.as_bytes())
            .await?;
        Ok(EncryptedWalletRecord::new(&key_pair.public_key, &payload))
    }

    /// Ask the key network to release the scalar sealed under `condition`.
    ///
    /// The ciphertext hash is checked before the network is contacted.
    pub async fn unseal(
        &self,
        condition: &AccessControlCondition,
        ciphertext_hex: &str,
        ciphertext_hash_hex: &str,
    ) -> GateResult<SecretScalar> {
        let payload = verified_payload(ciphertext_hex, ciphertext_hash_hex)?;
        let plaintext = self
            .decryptor
            .decrypt(DecryptRequest {
                condition,
                ciphertext: &payload.ciphertext,
                ciphertext_hash: &payload.ciphertext_hash,
            })
            .await?;
        SecretScalar::from_plaintext(&plaintext)
    }
}
