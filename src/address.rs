//! # Taproot Address Derivation
//!
//! Turns a wallet public key into the segwit v1 output it controls. The x-only
//! key is committed directly as the output key (no script tree, no tweak), the
//! same way a key-path-only destination is built for hot and cold wallets:
//!
//! ```text
//! scriptPubKey: OP_1 <32-byte x-only key>
//! address:      bech32m(hrp, 1, x-only key)   e.g. tb1p...
//! ```

use crate::config::wallet::{COMPRESSED_PUBKEY_LEN, UNCOMPRESSED_PUBKEY_LEN};
use crate::error::{GateError, GateResult};
use crate::utils::hex_string;
use bitcoin::{
    key::TweakedPublicKey,
    secp256k1::{PublicKey, XOnlyPublicKey},
    Address, Network, ScriptBuf,
};

/// A Taproot output derived from a wallet public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaprootOutput {
    /// X-only output key (parity byte dropped)
    pub x_only: XOnlyPublicKey,
    /// Segwit v1 output script
    pub script_pubkey: ScriptBuf,
    /// Bech32m address for the configured network
    pub address: Address,
}

/// Derives Taproot outputs for one network.
#[derive(Debug, Clone, Copy)]
pub struct TaprootAddressDeriver {
    network: Network,
}

impl TaprootAddressDeriver {
    pub fn new(network: Network) -> Self {
        Self { network }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Derive the Taproot output for a hex public key.
    ///
    /// Accepts a 33-byte compressed or 65-byte uncompressed key, with or
    /// without a `0x` prefix.
    ///
    /// # Errors
    /// `GateError::InvalidPublicKey` if the input is not hex, has the wrong
    /// length, or is not a point on the curve.
    pub fn derive(&self, public_key_hex: &str) -> GateResult<TaprootOutput> {
        let bytes = hex_string::decode(public_key_hex)
            .map_err(|_| GateError::invalid_public_key("public key is not valid hex"))?;
        self.derive_from_slice(&bytes)
    }

    /// Derive the Taproot output for raw public key bytes
    pub fn derive_from_slice(&self, bytes: &[u8]) -> GateResult<TaprootOutput> {
        if bytes.len() != COMPRESSED_PUBKEY_LEN && bytes.len() != UNCOMPRESSED_PUBKEY_LEN {
            return Err(GateError::invalid_public_key(format!(
                "expected {} or {} bytes, got {}",
                COMPRESSED_PUBKEY_LEN,
                UNCOMPRESSED_PUBKEY_LEN,
                bytes.len()
            )));
        }

        let public_key = PublicKey::from_slice(bytes)
            .map_err(|e| GateError::invalid_public_key(e.to_string()))?;
        Ok(self.derive_from_key(&public_key))
    }

    /// Derive the Taproot output for a parsed public key
    pub fn derive_from_key(&self, public_key: &PublicKey) -> TaprootOutput {
        let (x_only, _parity) = public_key.x_only_public_key();
        let address = Address::p2tr_tweaked(
            TweakedPublicKey::dangerous_assume_tweaked(x_only),
            self.network,
        );

        TaprootOutput {
            x_only,
            script_pubkey: address.script_pubkey(),
            address,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::secp256k1::{Secp256k1, SecretKey};
    use proptest::prelude::*;

    fn public_key_for(secret: [u8; 32]) -> Option<PublicKey> {
        let secp = Secp256k1::new();
        SecretKey::from_slice(&secret)
            .ok()
            .map(|sk| PublicKey::from_secret_key(&secp, &sk))
    }

    #[test]
    fn test_script_shape() {
        let key = public_key_for([7u8; 32]).unwrap();
        let output = TaprootAddressDeriver::new(Network::Testnet).derive_from_key(&key);

        let script = output.script_pubkey.as_bytes();
        assert_eq!(script.len(), 34);
        assert_eq!(script[0], 0x51); // OP_1
        assert_eq!(script[1], 0x20); // push 32
        assert_eq!(&script[2..], &output.x_only.serialize());
        assert!(output.address.to_string().starts_with("tb1p"));
    }

    #[test]
    fn test_mainnet_hrp() {
        let key = public_key_for([7u8; 32]).unwrap();
        let output = TaprootAddressDeriver::new(Network::Bitcoin).derive_from_key(&key);
        assert!(output.address.to_string().starts_with("bc1p"));
    }

    #[test]
    fn test_prefixed_and_uncompressed_keys_agree() {
        let key = public_key_for([9u8; 32]).unwrap();
        let deriver = TaprootAddressDeriver::new(Network::Testnet);

        let plain = deriver.derive(&hex::encode(key.serialize())).unwrap();
        let prefixed = deriver
            .derive(&format!("0x{}", hex::encode(key.serialize())))
            .unwrap();
        let uncompressed = deriver
            .derive(&format!("0x{}", hex::encode(key.serialize_uncompressed())))
            .unwrap();

        assert_eq!(plain, prefixed);
        assert_eq!(plain, uncompressed);
    }

    #[test]
    fn test_invalid_public_keys() {
        let deriver = TaprootAddressDeriver::new(Network::Testnet);

        // Not a curve point
        let mut bogus = vec![0x02];
        bogus.extend_from_slice(&[0xff; 32]);
        assert!(matches!(
            deriver.derive_from_slice(&bogus),
            Err(GateError::InvalidPublicKey { .. })
        ));

        // Wrong length
        assert!(matches!(
            deriver.derive_from_slice(&[0x02; 32]),
            Err(GateError::InvalidPublicKey { .. })
        ));

        // Not hex
        assert!(matches!(
            deriver.derive("0xnothex"),
            Err(GateError::InvalidPublicKey { .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_derivation_is_deterministic(secret in any::<[u8; 32]>()) {
            let key = public_key_for(secret);
            prop_assume!(key.is_some());
            let key_hex = hex::encode(key.unwrap().serialize());

            let deriver = TaprootAddressDeriver::new(Network::Testnet);
            let first = deriver.derive(&key_hex).unwrap();
            let second = deriver.derive(&key_hex).unwrap();
            prop_assert_eq!(first.address, second.address);
        }

        #[test]
        fn prop_distinct_keys_give_distinct_addresses(
            a in any::<[u8; 32]>(),
            b in any::<[u8; 32]>(),
        ) {
            let (ka, kb) = (public_key_for(a), public_key_for(b));
            prop_assume!(ka.is_some() && kb.is_some());
            let (ka, kb) = (ka.unwrap(), kb.unwrap());
            prop_assume!(ka.x_only_public_key().0 != kb.x_only_public_key().0);

            let deriver = TaprootAddressDeriver::new(Network::Testnet);
            prop_assert_ne!(
                deriver.derive_from_key(&ka).address,
                deriver.derive_from_key(&kb).address
            );
        }
    }
}
